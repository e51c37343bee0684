//! RBAC endpoints

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::rbac::v1::{PolicyRule, Subject};
use serde::{Deserialize, Serialize};

use super::{AppState, OkResponse};
use crate::rbac::{BindingRequest, DeleteOutcome, RbacSnapshot, RoleKind};
use crate::{Error, Identity, Result};

#[derive(Debug, Serialize)]
pub(super) struct NamespaceList {
    namespaces: Vec<Namespace>,
}

/// Entry in the list-users / list-groups responses
#[derive(Debug, Serialize)]
pub(super) struct NamedEntry {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateClusterRoleRequest {
    role_name: String,
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateRoleRequest {
    role_name: String,
    namespace: String,
    #[serde(default)]
    rules: Vec<PolicyRule>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateRoleBindingRequest {
    rolebinding_name: String,
    namespace: String,
    user: String,
    #[serde(default)]
    subjects: Vec<Subject>,
    role_kind: String,
    role_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CreateClusterRoleBindingRequest {
    cluster_rolebinding_name: String,
    user: String,
    #[serde(default)]
    subjects: Vec<Subject>,
    role_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteClusterRoleRequest {
    role_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteRoleRequest {
    role_name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteRoleBindingRequest {
    rolebinding_name: String,
    namespace: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct DeleteClusterRoleBindingRequest {
    rolebinding_name: String,
}

fn named(names: Vec<String>) -> Vec<NamedEntry> {
    names.into_iter().map(|name| NamedEntry { name }).collect()
}

/// Turn a delete outcome into a response; absent resources are a 404
fn deleted(outcome: DeleteOutcome, kind: &str, name: String) -> Result<Json<OkResponse>> {
    match outcome {
        DeleteOutcome::Deleted => Ok(Json(OkResponse::ok())),
        DeleteOutcome::NotFound => Err(Error::not_found(kind, name)),
    }
}

/// Handle GET /api/list-namespace
pub(super) async fn list_namespaces(State(state): State<AppState>) -> Result<Json<NamespaceList>> {
    let namespaces = state.rbac.list_namespaces().await?;
    Ok(Json(NamespaceList { namespaces }))
}

/// Handle GET /api/rbac
pub(super) async fn snapshot(State(state): State<AppState>) -> Result<Json<RbacSnapshot>> {
    Ok(Json(state.rbac.snapshot().await?))
}

/// Handle GET /api/list-users
pub(super) async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<NamedEntry>>> {
    Ok(Json(named(state.rbac.list_users().await?)))
}

/// Handle GET /api/list-groups
pub(super) async fn list_groups(State(state): State<AppState>) -> Result<Json<Vec<NamedEntry>>> {
    Ok(Json(named(state.rbac.list_groups().await?)))
}

/// Handle POST /api/create-cluster-role
pub(super) async fn create_cluster_role(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateClusterRoleRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    state
        .rbac
        .create_cluster_role(&req.role_name, req.rules)
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// Handle POST /api/create-role
pub(super) async fn create_role(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateRoleRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    state
        .rbac
        .create_role(&req.namespace, &req.role_name, req.rules)
        .await?;
    Ok(Json(OkResponse::ok()))
}

/// Handle POST /api/create-rolebinding
pub(super) async fn create_role_binding(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateRoleBindingRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let role_kind: RoleKind = req.role_kind.parse()?;
    let owner = Identity::new(req.user)?;

    let request = BindingRequest {
        name: req.rolebinding_name,
        owner,
        subjects: req.subjects,
        role_kind,
        role_name: req.role_name,
    };
    state.rbac.create_role_binding(&req.namespace, request).await?;
    Ok(Json(OkResponse::ok()))
}

/// Handle POST /api/create-cluster-rolebinding
pub(super) async fn create_cluster_role_binding(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateClusterRoleBindingRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let owner = Identity::new(req.user)?;

    let request = BindingRequest {
        name: req.cluster_rolebinding_name,
        owner,
        subjects: req.subjects,
        role_kind: RoleKind::ClusterRole,
        role_name: req.role_name,
    };
    state.rbac.create_cluster_role_binding(request).await?;
    Ok(Json(OkResponse::ok()))
}

/// Handle POST /api/delete-cluster-role
pub(super) async fn delete_cluster_role(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteClusterRoleRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let outcome = state.rbac.delete_cluster_role(&req.role_name).await?;
    deleted(outcome, "ClusterRole", req.role_name)
}

/// Handle POST /api/delete-role
pub(super) async fn delete_role(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteRoleRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let outcome = state
        .rbac
        .delete_role(&req.namespace, &req.role_name)
        .await?;
    deleted(
        outcome,
        "Role",
        format!("{}/{}", req.namespace, req.role_name),
    )
}

/// Handle POST /api/delete-rolebinding
pub(super) async fn delete_role_binding(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteRoleBindingRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let outcome = state
        .rbac
        .delete_role_binding(&req.namespace, &req.rolebinding_name)
        .await?;
    deleted(
        outcome,
        "RoleBinding",
        format!("{}/{}", req.namespace, req.rolebinding_name),
    )
}

/// Handle POST /api/delete-cluster-rolebinding
pub(super) async fn delete_cluster_role_binding(
    State(state): State<AppState>,
    payload: std::result::Result<Json<DeleteClusterRoleBindingRequest>, JsonRejection>,
) -> Result<Json<OkResponse>> {
    let Json(req) = payload?;
    let outcome = state
        .rbac
        .delete_cluster_role_binding(&req.rolebinding_name)
        .await?;
    deleted(outcome, "ClusterRoleBinding", req.rolebinding_name)
}
