//! kubeaccess - Kubernetes access provisioning service

use std::sync::Arc;

use clap::Parser;
use kube::Client;
use tracing::info;

use kubeaccess::config::{Cli, Commands, ServeArgs};
use kubeaccess::pki::IssuancePipeline;
use kubeaccess::rbac::{KubeStore, RbacManager};
use kubeaccess::server::{start_server, AppState};
use kubeaccess::telemetry::init_logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
    }
}

/// Build the collaborators and serve until ctrl-c
async fn run_serve(args: ServeArgs) -> anyhow::Result<()> {
    init_logging(args.log_format)?;
    args.validate()?;

    let policy = args.issuance_policy()?;
    info!(
        signer = ?args.signer,
        key_algorithm = %policy.key_algorithm,
        validity_days = policy.validity_days,
        ca_cert = %policy.ca.cert.display(),
        scratch_dir = %policy.scratch_dir.display(),
        "certificate issuance configured"
    );

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    let store = Arc::new(KubeStore::new(client));
    let state = AppState {
        rbac: Arc::new(RbacManager::new(store, args.store_timeout())),
        pipeline: Arc::new(IssuancePipeline::new(args.signing_backend(), policy)),
        cluster: Arc::new(args.cluster_endpoint()),
    };

    start_server(args.listen, state).await?;
    Ok(())
}
