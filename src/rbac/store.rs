//! Cluster resource store
//!
//! [`ResourceStore`] is the seam between the RBAC manager and wherever the
//! objects actually live. [`KubeStore`] talks to the Kubernetes API through
//! kube-rs; tests substitute an in-memory store.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, Role, RoleBinding};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{qualified_name, DeleteOutcome};
use crate::{Error, Result};

/// Create/list/delete over the resource kinds this crate manages
///
/// For `list_roles` and `list_role_bindings` an empty namespace means every
/// namespace. Objects passed to `create_*` carry their own namespace.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List all namespaces
    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    /// List all ClusterRoles
    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>>;

    /// List all ClusterRoleBindings
    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>>;

    /// List Roles in `namespace` (all namespaces when empty)
    async fn list_roles(&self, namespace: &str) -> Result<Vec<Role>>;

    /// List RoleBindings in `namespace` (all namespaces when empty)
    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>>;

    /// Create a ClusterRole
    async fn create_cluster_role(&self, role: ClusterRole) -> Result<()>;

    /// Create a Role
    async fn create_role(&self, role: Role) -> Result<()>;

    /// Create a ClusterRoleBinding
    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<()>;

    /// Create a RoleBinding
    async fn create_role_binding(&self, binding: RoleBinding) -> Result<()>;

    /// Delete a ClusterRole by name
    async fn delete_cluster_role(&self, name: &str) -> Result<DeleteOutcome>;

    /// Delete a Role by namespace and name
    async fn delete_role(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;

    /// Delete a ClusterRoleBinding by name
    async fn delete_cluster_role_binding(&self, name: &str) -> Result<DeleteOutcome>;

    /// Delete a RoleBinding by namespace and name
    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<DeleteOutcome>;
}

/// [`ResourceStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced_or_all<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::default_namespaced(self.client.clone()),
        }
    }
}

async fn list_all<K>(api: Api<K>) -> Result<Vec<K>>
where
    K: Clone + DeserializeOwned + Debug,
{
    Ok(api.list(&ListParams::default()).await?.items)
}

async fn create<K>(api: Api<K>, obj: K) -> Result<()>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Serialize + Debug,
{
    let kind = K::kind(&()).to_string();
    let meta = obj.meta();
    let name = qualified_name(meta.namespace.as_deref(), meta.name.as_deref().unwrap_or(""));
    match api.create(&PostParams::default(), &obj).await {
        Ok(_) => {
            debug!(kind = %kind, name = %name, "created");
            Ok(())
        }
        Err(kube::Error::Api(ae)) if ae.code == 409 => Err(Error::conflict(kind, name)),
        Err(e) => Err(e.into()),
    }
}

async fn delete<K>(api: Api<K>, name: &str) -> Result<DeleteOutcome>
where
    K: Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(DeleteOutcome::Deleted),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(DeleteOutcome::NotFound),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        list_all(Api::<Namespace>::all(self.client.clone())).await
    }

    async fn list_cluster_roles(&self) -> Result<Vec<ClusterRole>> {
        list_all(Api::<ClusterRole>::all(self.client.clone())).await
    }

    async fn list_cluster_role_bindings(&self) -> Result<Vec<ClusterRoleBinding>> {
        list_all(Api::<ClusterRoleBinding>::all(self.client.clone())).await
    }

    async fn list_roles(&self, namespace: &str) -> Result<Vec<Role>> {
        list_all(self.namespaced_or_all::<Role>(namespace)).await
    }

    async fn list_role_bindings(&self, namespace: &str) -> Result<Vec<RoleBinding>> {
        list_all(self.namespaced_or_all::<RoleBinding>(namespace)).await
    }

    async fn create_cluster_role(&self, role: ClusterRole) -> Result<()> {
        create(Api::<ClusterRole>::all(self.client.clone()), role).await
    }

    async fn create_role(&self, role: Role) -> Result<()> {
        let api = self.namespaced::<Role>(role.metadata.namespace.as_deref());
        create(api, role).await
    }

    async fn create_cluster_role_binding(&self, binding: ClusterRoleBinding) -> Result<()> {
        create(Api::<ClusterRoleBinding>::all(self.client.clone()), binding).await
    }

    async fn create_role_binding(&self, binding: RoleBinding) -> Result<()> {
        let api = self.namespaced::<RoleBinding>(binding.metadata.namespace.as_deref());
        create(api, binding).await
    }

    async fn delete_cluster_role(&self, name: &str) -> Result<DeleteOutcome> {
        delete(Api::<ClusterRole>::all(self.client.clone()), name).await
    }

    async fn delete_role(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        delete(Api::<Role>::namespaced(self.client.clone(), namespace), name).await
    }

    async fn delete_cluster_role_binding(&self, name: &str) -> Result<DeleteOutcome> {
        delete(Api::<ClusterRoleBinding>::all(self.client.clone()), name).await
    }

    async fn delete_role_binding(&self, namespace: &str, name: &str) -> Result<DeleteOutcome> {
        delete(
            Api::<RoleBinding>::namespaced(self.client.clone(), namespace),
            name,
        )
        .await
    }
}
