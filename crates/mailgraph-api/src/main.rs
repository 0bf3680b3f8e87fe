use mailgraph_api::ApiContext;
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

    info!(version = mailgraph_core::VERSION, "Starting Mailgraph API");

    let config = mailgraph_core::MailgraphConfig::from_env()?;
    let ctx = ApiContext::new(config).await?;
    let app = mailgraph_api::router(ctx);

    let bind = std::env::var("MAILGRAPH_API_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!(bind = %bind, "Listening");
    axum::serve(listener, app).await?;
    Ok(())
}
