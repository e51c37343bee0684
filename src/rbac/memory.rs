//! In-memory [`ResourceStore`] for tests

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::ObjectMeta;
use parking_lot::Mutex;

use super::{qualified_name, DeleteOutcome, ResourceStore};
use crate::{Error, Result};

/// Keyed by (namespace, name); cluster-scoped objects use an empty namespace
type Objects<K> = BTreeMap<(String, String), K>;

#[derive(Default)]
struct State {
    namespaces: Vec<Namespace>,
    cluster_roles: Objects<ClusterRole>,
    cluster_role_bindings: Objects<ClusterRoleBinding>,
    roles: Objects<Role>,
    role_bindings: Objects<RoleBinding>,
    unavailable: bool,
    delay: Option<Duration>,
}

pub(crate) struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// A store seeded with a few namespaces and no RBAC objects
    pub(crate) fn new() -> Self {
        let namespaces = ["default", "kube-system", "team-a"]
            .into_iter()
            .map(|name| Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            })
            .collect();

        Self {
            state: Mutex::new(State {
                namespaces,
                ..Default::default()
            }),
        }
    }

    /// Make every call fail as if the API server returned 503
    pub(crate) fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Delay every call by `delay`
    pub(crate) fn set_delay(&self, delay: Duration) {
        self.state.lock().delay = Some(delay);
    }

    async fn enter(&self) -> Result<()> {
        let (unavailable, delay) = {
            let state = self.state.lock();
            (state.unavailable, state.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unavailable {
            return Err(kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "the server is currently unable to handle the request".to_string(),
                reason: "ServiceUnavailable".to_string(),
                code: 503,
            })
            .into());
        }
        Ok(())
    }
}

fn key(meta: &ObjectMeta) -> (String, String) {
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

fn in_namespace<K: Clone>(objects: &Objects<K>, namespace: &str) -> Vec<K> {
    objects
        .iter()
        .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
        .map(|(_, obj)| obj.clone())
        .collect()
}

fn insert<K>(objects: &mut Objects<K>, kind: &str, meta: &ObjectMeta, obj: K) -> Result<()> {
    let key = key(meta);
    if objects.contains_key(&key) {
        let ns = (!key.0.is_empty()).then_some(key.0.as_str());
        return Err(Error::conflict(kind, qualified_name(ns, &key.1)));
    }
    objects.insert(key, obj);
    Ok(())
}

fn remove<K>(objects: &mut Objects<K>, namespace: &str, name: &str) -> DeleteOutcome {
    match objects.remove(&(namespace.to_string(), name.to_string())) {
        Some(_) => DeleteOutcome::Deleted,
        None => DeleteOutcome::NotFound,
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.enter().await?;
        Ok(self.state.lock().namespaces.clone())
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>> {
        self.enter().await?;
        Ok(self.state.lock().cluster_roles.values().cloned().collect())
    }

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>> {
        self.enter().await?;
        Ok(self
            .state
            .lock()
            .cluster_role_bindings
            .values()
            .cloned()
            .collect())
    }

    async fn list_roles(&self, namespace: &str) -> Result<Vec<Role>> {
        self.enter().await?;
        Ok(in_namespace(&self.state.lock().roles, namespace))
    }

    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>> {
        self.enter().await?;
        Ok(in_namespace(&self.state.lock().role_bindings, namespace))
    }

    async fn create_cluster_role(&self, role: ClusterRole) -> Result<()> {
        self.enter().await?;
        let meta = role.metadata.clone();
        insert(&mut self.state.lock().cluster_roles, "ClusterRole", &meta, role)
    }

    async fn create_role(&self, role: Role) -> Result<()> {
        self.enter().await?;
        let meta = role.metadata.clone();
        insert(&mut self.state.lock().roles, "Role", &meta, role)
    }

    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<()> {
        self.enter().await?;
        let meta = binding.metadata.clone();
        insert(
            &mut self.state.lock().cluster_role_bindings,
            "ClusterRoleBinding",
            &meta,
            binding,
        )
    }

    async fn create_role_binding(&self, binding: RoleBinding) -> Result<()> {
        self.enter().await?;
        let meta = binding.metadata.clone();
        insert(
            &mut self.state.lock().role_bindings,
            "RoleBinding",
            &meta,
            binding,
        )
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<DeleteOutcome> {
        self.enter().await?;
        Ok(remove(&mut self.state.lock().cluster_roles, "", name))
    }

    async fn delete_role(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        self.enter().await?;
        Ok(remove(&mut self.state.lock().roles, namespace, name))
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<DeleteOutcome> {
        self.enter().await?;
        Ok(remove(
            &mut self.state.lock().cluster_role_bindings,
            "",
            name,
        ))
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        self.enter().await?;
        Ok(remove(&mut self.state.lock().role_bindings, namespace, name))
    }
}
