use std::sync::Arc;

use inkboard_server::{AppState, ServerConfig, app};
use tracing::info;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkboard_server=info,tower_http=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = (config.host.clone(), config.port);
    let state = Arc::new(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    info!("InkBoard relay server listening on {}", local);
    info!("WebSocket endpoint: ws://{}/ws", local);

    axum::serve(listener, app(state)).await
}
