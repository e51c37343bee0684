//! RBAC resource management
//!
//! Thin create/list/delete over ClusterRole, ClusterRoleBinding, Role and
//! RoleBinding. Rules and subjects are passed through untouched; the only
//! thing added is the ownership label on every binding created here, which
//! records the identity the binding was generated for.
//!
//! Every store call is bounded by a timeout. Nothing is retried.

pub mod store;

#[cfg(test)]
pub(crate) mod memory;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{
    ClusterRole, ClusterRoleBinding, PolicyRule, Role, RoleBinding, RoleRef, Subject,
};
use kube::api::ObjectMeta;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Identity, Result, OWNER_LABEL, RBAC_API_GROUP};

pub use store::{KubeStore, ResourceStore};

/// What a delete actually did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The resource existed and was removed
    Deleted,
    /// Nothing by that name existed
    NotFound,
}

/// Kind of role a binding refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    /// Namespaced Role
    Role,
    /// Cluster-wide ClusterRole
    ClusterRole,
}

impl RoleKind {
    /// The Kubernetes kind string
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleKind::Role => "Role",
            RoleKind::ClusterRole => "ClusterRole",
        }
    }
}

impl fmt::Display for RoleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoleKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Role" => Ok(RoleKind::Role),
            "ClusterRole" => Ok(RoleKind::ClusterRole),
            other => Err(Error::validation_for_field(
                "roleKind",
                format!("roleKind must be Role or ClusterRole, got {other:?}"),
            )),
        }
    }
}

/// A binding to create
#[derive(Debug, Clone)]
pub struct BindingRequest {
    /// Binding name
    pub name: String,
    /// Identity the binding is generated for (recorded in the ownership label)
    pub owner: Identity,
    /// Subjects granted the role
    pub subjects: Vec<Subject>,
    /// Kind of the referenced role
    pub role_kind: RoleKind,
    /// Name of the referenced role
    pub role_name: String,
}

/// Full, unfiltered view of RBAC objects in the cluster
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RbacSnapshot {
    /// All ClusterRoles
    pub cluster_roles: Vec<ClusterRole>,
    /// All ClusterRoleBindings
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
    /// Roles across all namespaces
    pub roles: Vec<Role>,
    /// RoleBindings across all namespaces
    pub role_bindings: Vec<RoleBinding>,
}

impl RbacSnapshot {
    /// Identities recorded as owners on bindings, sorted and deduplicated
    pub fn owners(&self) -> Vec<String> {
        let role_binding_labels = self.role_bindings.iter().map(|b| &b.metadata);
        let cluster_binding_labels = self.cluster_role_bindings.iter().map(|b| &b.metadata);

        role_binding_labels
            .chain(cluster_binding_labels)
            .filter_map(|meta| meta.labels.as_ref()?.get(OWNER_LABEL).cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Group subjects referenced by any binding, sorted and deduplicated
    pub fn groups(&self) -> Vec<String> {
        let role_binding_subjects = self.role_bindings.iter().flat_map(|b| b.subjects.iter().flatten());
        let cluster_binding_subjects = self
            .cluster_role_bindings
            .iter()
            .flat_map(|b| b.subjects.iter().flatten());

        role_binding_subjects
            .chain(cluster_binding_subjects)
            .filter(|s| s.kind == "Group")
            .map(|s| s.name.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Namespace-qualified display name (`ns/name`, or `name` when cluster-scoped)
pub(crate) fn qualified_name(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

/// Validate an RBAC object name (a path segment: `system:foo` is fine)
fn validate_name(field: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::validation_for_field(field, format!("{field} must not be empty")));
    }
    if name.len() > 253 || name == "." || name == ".." || name.contains(['/', '%']) {
        return Err(Error::validation_for_field(
            field,
            format!("{field} {name:?} is not a valid resource name"),
        ));
    }
    Ok(())
}

/// Validate a namespace name (RFC 1123 label)
fn validate_namespace(field: &str, namespace: &str) -> Result<()> {
    let bytes = namespace.as_bytes();
    let valid = !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0] != b'-'
        && bytes[bytes.len() - 1] != b'-';
    if valid {
        Ok(())
    } else {
        Err(Error::validation_for_field(
            field,
            format!("{field} {namespace:?} is not a valid namespace"),
        ))
    }
}

fn owner_labels(owner: &Identity) -> Result<BTreeMap<String, String>> {
    let value = owner.as_label_value()?;
    Ok(BTreeMap::from([(OWNER_LABEL.to_string(), value.to_string())]))
}

fn role_ref(kind: RoleKind, name: &str) -> RoleRef {
    RoleRef {
        api_group: RBAC_API_GROUP.to_string(),
        kind: kind.as_str().to_string(),
        name: name.to_string(),
    }
}

/// RBAC operations over an injected [`ResourceStore`]
pub struct RbacManager {
    store: Arc<dyn ResourceStore>,
    timeout: Duration,
}

impl RbacManager {
    /// Create a manager; every store call is bounded by `timeout`
    pub fn new(store: Arc<dyn ResourceStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    async fn bounded<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(operation = %operation, timeout = ?self.timeout, "resource store call timed out");
                Err(Error::timeout(operation, self.timeout))
            }
        }
    }

    /// List all namespaces
    pub async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.bounded("list Namespaces", self.store.list_namespaces())
            .await
    }

    /// Snapshot every RBAC object in the cluster
    pub async fn snapshot(&self) -> Result<RbacSnapshot> {
        let (cluster_roles, cluster_role_bindings, roles, role_bindings) = tokio::try_join!(
            self.bounded("list ClusterRoles", self.store.list_cluster_roles()),
            self.bounded(
                "list ClusterRoleBindings",
                self.store.list_cluster_role_bindings()
            ),
            self.bounded("list Roles", self.store.list_roles("")),
            self.bounded("list RoleBindings", self.store.list_role_bindings("")),
        )?;

        Ok(RbacSnapshot {
            cluster_roles,
            cluster_role_bindings,
            roles,
            role_bindings,
        })
    }

    /// Identities that own at least one binding
    pub async fn list_users(&self) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.owners())
    }

    /// Groups bound to at least one role
    pub async fn list_groups(&self) -> Result<Vec<String>> {
        Ok(self.snapshot().await?.groups())
    }

    /// Create a ClusterRole with the given rules
    pub async fn create_cluster_role(&self, name: &str, rules: Vec<PolicyRule>) -> Result<()> {
        validate_name("roleName", name)?;

        let role = ClusterRole {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            rules: Some(rules),
            ..Default::default()
        };

        self.bounded("create ClusterRole", self.store.create_cluster_role(role))
            .await?;
        info!(kind = "ClusterRole", name = %name, "created");
        Ok(())
    }

    /// Create a Role in `namespace` with the given rules
    pub async fn create_role(
        &self,
        namespace: &str,
        name: &str,
        rules: Vec<PolicyRule>,
    ) -> Result<()> {
        validate_namespace("namespace", namespace)?;
        validate_name("roleName", name)?;

        let role = Role {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            rules: Some(rules),
        };

        self.bounded("create Role", self.store.create_role(role))
            .await?;
        info!(kind = "Role", namespace = %namespace, name = %name, "created");
        Ok(())
    }

    /// Create a RoleBinding in `namespace`, labelled with its owner
    pub async fn create_role_binding(&self, namespace: &str, request: BindingRequest) -> Result<()> {
        validate_namespace("namespace", namespace)?;
        validate_name("rolebindingName", &request.name)?;
        validate_name("roleName", &request.role_name)?;
        let labels = owner_labels(&request.owner)?;

        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            role_ref: role_ref(request.role_kind, &request.role_name),
            subjects: Some(request.subjects),
        };

        self.bounded("create RoleBinding", self.store.create_role_binding(binding))
            .await?;
        info!(
            kind = "RoleBinding",
            namespace = %namespace,
            name = %request.name,
            owner = %request.owner,
            role_kind = %request.role_kind,
            role = %request.role_name,
            "created"
        );
        Ok(())
    }

    /// Create a ClusterRoleBinding, labelled with its owner
    ///
    /// A ClusterRoleBinding can only reference a ClusterRole; `role_kind` on
    /// the request is ignored.
    pub async fn create_cluster_role_binding(&self, request: BindingRequest) -> Result<()> {
        validate_name("clusterRolebindingName", &request.name)?;
        validate_name("roleName", &request.role_name)?;
        let labels = owner_labels(&request.owner)?;

        let binding = ClusterRoleBinding {
            metadata: ObjectMeta {
                name: Some(request.name.clone()),
                labels: Some(labels),
                ..Default::default()
            },
            role_ref: role_ref(RoleKind::ClusterRole, &request.role_name),
            subjects: Some(request.subjects),
        };

        self.bounded(
            "create ClusterRoleBinding",
            self.store.create_cluster_role_binding(binding),
        )
        .await?;
        info!(
            kind = "ClusterRoleBinding",
            name = %request.name,
            owner = %request.owner,
            role = %request.role_name,
            "created"
        );
        Ok(())
    }

    /// Delete a ClusterRole
    pub async fn delete_cluster_role(&self, name: &str) -> Result<DeleteOutcome> {
        validate_name("roleName", name)?;
        let outcome = self
            .bounded("delete ClusterRole", self.store.delete_cluster_role(name))
            .await?;
        log_delete("ClusterRole", None, name, outcome);
        Ok(outcome)
    }

    /// Delete a Role
    pub async fn delete_role(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        validate_namespace("namespace", namespace)?;
        validate_name("roleName", name)?;
        let outcome = self
            .bounded("delete Role", self.store.delete_role(namespace, name))
            .await?;
        log_delete("Role", Some(namespace), name, outcome);
        Ok(outcome)
    }

    /// Delete a ClusterRoleBinding
    pub async fn delete_cluster_role_binding(&self, name: &str) -> Result<DeleteOutcome> {
        validate_name("rolebindingName", name)?;
        let outcome = self
            .bounded(
                "delete ClusterRoleBinding",
                self.store.delete_cluster_role_binding(name),
            )
            .await?;
        log_delete("ClusterRoleBinding", None, name, outcome);
        Ok(outcome)
    }

    /// Delete a RoleBinding
    pub async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        validate_namespace("namespace", namespace)?;
        validate_name("rolebindingName", name)?;
        let outcome = self
            .bounded(
                "delete RoleBinding",
                self.store.delete_role_binding(namespace, name),
            )
            .await?;
        log_delete("RoleBinding", Some(namespace), name, outcome);
        Ok(outcome)
    }
}

fn log_delete(kind: &str, namespace: Option<&str>, name: &str, outcome: DeleteOutcome) {
    let name = qualified_name(namespace, name);
    match outcome {
        DeleteOutcome::Deleted => info!(kind = %kind, name = %name, "deleted"),
        DeleteOutcome::NotFound => info!(kind = %kind, name = %name, "delete of absent resource"),
    }
}
