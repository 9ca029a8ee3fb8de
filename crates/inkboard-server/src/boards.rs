//! HTTP facade over the board checkpoint store.
//!
//! `GET /api/boards/{room_id}` returns the raw checkpoint (or 404),
//! `?format=json` returns metadata instead. `POST` stores the body, `DELETE`
//! removes it.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use inkboard_core::storage::{StorageError, board_key};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::room::AppState;

/// Largest accepted board upload.
pub const MAX_BOARD_BYTES: usize = 16 * 1024 * 1024;

const STORAGE_KIND: &str = "blob";

#[derive(Debug, Default, Deserialize)]
pub struct BoardQuery {
    format: Option<String>,
}

fn storage_error(room_id: &str, e: StorageError) -> Response {
    warn!("Board storage error for room {}: {}", room_id, e);
    let status = match e {
        StorageError::EmptyPayload => StatusCode::BAD_REQUEST,
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "ok": false, "roomId": room_id, "error": e.to_string() })),
    )
        .into_response()
}

pub async fn get_board(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    Query(query): Query<BoardQuery>,
) -> Response {
    let blob = match state.boards.get(&board_key(&room_id)).await {
        Ok(blob) => blob,
        Err(e) => return storage_error(&room_id, e),
    };

    if query.format.as_deref() == Some("json") {
        let size = blob.as_ref().map(Vec::len).unwrap_or(0);
        return Json(json!({
            "ok": true,
            "roomId": room_id,
            "exists": blob.is_some(),
            "size": size,
        }))
        .into_response();
    }

    match blob {
        Some(bytes) => ([(header::CONTENT_TYPE, "application/json")], bytes).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "ok": false, "roomId": room_id, "error": "NOT_FOUND" })),
        )
            .into_response(),
    }
}

pub async fn put_board(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "roomId": room_id, "error": "EMPTY_BODY" })),
        )
            .into_response();
    }

    let size = body.len();
    let ttl = Some(state.config.board_ttl);
    if let Err(e) = state.boards.set(&board_key(&room_id), body.to_vec(), ttl).await {
        return storage_error(&room_id, e);
    }
    info!("Stored board {} ({} bytes)", room_id, size);
    Json(json!({
        "ok": true,
        "roomId": room_id,
        "size": size,
        "storage": STORAGE_KIND,
    }))
    .into_response()
}

pub async fn delete_board(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Response {
    if let Err(e) = state.boards.del(&board_key(&room_id)).await {
        return storage_error(&room_id, e);
    }
    info!("Deleted board {}", room_id);
    Json(json!({ "ok": true, "roomId": room_id })).into_response()
}
