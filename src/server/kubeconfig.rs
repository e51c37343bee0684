//! Kubeconfig issuance endpoint
//!
//! Issues a fresh client certificate for the requested username and returns
//! it wrapped in a kubeconfig for the configured cluster. Nothing is stored:
//! each call yields a new key and serial.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::AppState;
use crate::kubeconfig::build_kubeconfig;
use crate::pki::read_ca_file;
use crate::{Identity, Result};

#[derive(Debug, Deserialize)]
pub(super) struct CreateKubeconfigRequest {
    username: String,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateKubeconfigResponse {
    ok: bool,
    kubeconfig: String,
}

/// Handle POST /api/create-kubeconfig
pub(super) async fn create_kubeconfig(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateKubeconfigRequest>, JsonRejection>,
) -> Result<Json<CreateKubeconfigResponse>> {
    let Json(req) = payload?;
    let identity = Identity::new(req.username)?;

    let credential = state.pipeline.issue(&identity).await?;
    let ca_pem = read_ca_file(&state.pipeline.policy().ca.cert).await?;

    let kubeconfig =
        build_kubeconfig(&state.cluster, ca_pem.as_bytes(), &identity, &credential.encode())
            .to_yaml()?;

    info!(
        identity = %identity,
        cluster = %state.cluster.name,
        serial = %credential.serial,
        "issued kubeconfig"
    );

    Ok(Json(CreateKubeconfigResponse {
        ok: true,
        kubeconfig,
    }))
}
