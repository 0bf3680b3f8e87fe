use mailgraph_worker::{run_worker_pool, WorkerContext};
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .json()
        .init();

    info!(version = mailgraph_core::VERSION, "Starting Mailgraph worker");

    let config = mailgraph_core::MailgraphConfig::from_env()?;
    let ctx = WorkerContext::new(config).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    run_worker_pool(ctx, shutdown_rx).await;
    Ok(())
}
