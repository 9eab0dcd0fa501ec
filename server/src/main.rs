//! Duplex Server binary.

use duplex_server::{app, AppState, Config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duplex_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        "Starting Duplex Server for replica {} on {}:{}",
        config.replica_id,
        config.host,
        config.port
    );
    if config.secret.is_none() {
        tracing::warn!("SYNC_SECRET not set, accepting anonymous requests");
    }

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::load(config).await?;

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app(state)).await?;

    Ok(())
}
