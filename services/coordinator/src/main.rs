use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use coordinator_service::{router, FederationModule};
use fedbank_core::{clear_ready, init_tracing, load_config, mark_ready};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("coordinator")?;
    let cfg = load_config("coordinator")?;
    info!(service = %cfg.service_name, port = cfg.http_port, trainer = ?cfg.trainer.kind, "starting coordinator");

    let module = Arc::new(FederationModule::new(&cfg)?);
    module.seed_demo_roster()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "coordinator listening");
    mark_ready();

    axum::serve(listener, router(module.clone())).with_graceful_shutdown(shutdown_signal()).await?;
    clear_ready();
    module.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = ?e, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
