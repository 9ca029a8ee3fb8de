//! InkBoard WebSocket Relay Server
//!
//! Relays Loro updates and presence between clients in the same room and
//! serves board checkpoints over HTTP.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "update", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "state": { "cursor": { "x": 100, "y": 200 }, "name": "Ada", "color": "#f97316" } }
//! { "type": "leave" }
//! ```

pub mod boards;
pub mod config;
pub mod room;
mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::ServerConfig;
pub use room::{AppState, RelayError};

/// Build the relay router over shared state.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/ws", get(ws::ws_handler))
        .route(
            "/api/boards/{room_id}",
            get(boards::get_board)
                .post(boards::put_board)
                .delete(boards::delete_board),
        )
        .layer(DefaultBodyLimit::max(boards::MAX_BOARD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "InkBoard Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}
