use anyhow::Context;
use kudimed_service::{ServiceConfig, create_app, telemetry::init_tracing};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env();
    info!(
        database_url = %config.database_url,
        current_user = %config.current_user_id,
        "Starting KudiMed service"
    );

    let app = create_app(&config)
        .await
        .context("Failed to initialise application state")?;

    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Failed to bind port {}", config.port))?;
    let addr = listener.local_addr()?;

    info!("KudiMed service listening on http://{}", addr);
    info!("Health check endpoint: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
