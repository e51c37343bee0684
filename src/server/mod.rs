//! HTTP surface
//!
//! JSON endpoints under `/api/` for RBAC management and kubeconfig issuance,
//! plus `/healthz`. Handlers hold no state of their own; everything they
//! need is injected through [`AppState`].

mod kubeconfig;
mod rbac;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::info;

use crate::kubeconfig::ClusterEndpoint;
use crate::pki::IssuancePipeline;
use crate::rbac::RbacManager;
use crate::{Error, Result};

/// Shared state for handlers
#[derive(Clone)]
pub struct AppState {
    /// RBAC resource manager
    pub rbac: Arc<RbacManager>,
    /// Client certificate issuance
    pub pipeline: Arc<IssuancePipeline>,
    /// Cluster written into issued kubeconfigs
    pub cluster: Arc<ClusterEndpoint>,
}

/// Body of a successful mutation
#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

impl OkResponse {
    fn ok() -> Self {
        Self { ok: true }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/list-namespace", get(rbac::list_namespaces))
        .route("/api/rbac", get(rbac::snapshot))
        .route("/api/list-users", get(rbac::list_users))
        .route("/api/list-groups", get(rbac::list_groups))
        .route("/api/create-cluster-role", post(rbac::create_cluster_role))
        .route("/api/create-role", post(rbac::create_role))
        .route("/api/create-rolebinding", post(rbac::create_role_binding))
        .route(
            "/api/create-cluster-rolebinding",
            post(rbac::create_cluster_role_binding),
        )
        .route("/api/delete-cluster-role", post(rbac::delete_cluster_role))
        .route("/api/delete-role", post(rbac::delete_role))
        .route("/api/delete-rolebinding", post(rbac::delete_role_binding))
        .route(
            "/api/delete-cluster-rolebinding",
            post(rbac::delete_cluster_role_binding),
        )
        .route("/api/create-kubeconfig", post(kubeconfig::create_kubeconfig))
        .route("/healthz", get(|| async { "ok" }))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

/// Log every request once, after the response is produced
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        "request"
    );
    response
}

/// Serve the API on `addr` until ctrl-c
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        Error::internal_with_context("server", format!("failed to bind {addr}: {e}"))
    })?;

    info!(addr = %addr, "Starting kubeaccess API server");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::internal_with_context("server", format!("server error: {e}")))?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use super::AppState;
    use crate::kubeconfig::ClusterEndpoint;
    use crate::pki::test_support::write_test_ca;
    use crate::pki::{IssuancePipeline, IssuancePolicy, KeyAlgorithm, NativeBackend};
    use crate::rbac::memory::MemoryStore;
    use crate::rbac::RbacManager;

    /// State over an in-memory store and the in-process signer, rooted at `dir`
    pub(crate) fn test_state(dir: &Path, store: Arc<MemoryStore>) -> AppState {
        let ca = write_test_ca(dir);
        let scratch_dir = dir.join("scratch");
        std::fs::create_dir_all(&scratch_dir).unwrap();

        let policy = IssuancePolicy {
            key_algorithm: KeyAlgorithm::EcdsaP256,
            validity_days: 365,
            ca,
            scratch_dir,
            stage_timeout: Duration::from_secs(30),
        };

        AppState {
            rbac: Arc::new(RbacManager::new(store, Duration::from_secs(5))),
            pipeline: Arc::new(IssuancePipeline::new(Arc::new(NativeBackend::new()), policy)),
            cluster: Arc::new(ClusterEndpoint {
                name: "minikube".to_string(),
                server: "https://192.168.99.100:8443".to_string(),
            }),
        }
    }
}
