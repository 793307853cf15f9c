use penpool_server::{AppState, ServerConfig, app};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "penpool_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let state = Arc::new(AppState::new());

    info!("Penpool relay server listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app(state)).await?;
    Ok(())
}
