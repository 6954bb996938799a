//! Board REST routes — the persistence collaborator surface.
//!
//! Thin wrappers over the store for the board-picker UI and explicit
//! save/load actions. Response shapes match the original API: 200 with a
//! `success` flag for expected outcomes, 500 only when the store itself
//! fails. A failed explicit save surfaces to its caller alone; it never
//! touches live collaborative state.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;
use tracing::error;
use uuid::Uuid;

use crate::element::Element;
use crate::state::AppState;
use crate::store::StoreError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveBoardBody {
    pub board_id: Uuid,
    pub elements: Vec<Element>,
}

/// `POST /api/create-board` — initialize an empty board record.
pub async fn create_board(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let board_id = Uuid::new_v4();
    state
        .store
        .create(board_id, OffsetDateTime::now_utc())
        .await
        .map_err(store_error_to_status)?;

    Ok(Json(json!({ "success": true, "boardId": board_id })))
}

/// `POST /api/save-board` — explicit full-snapshot save.
pub async fn save_board(
    State(state): State<AppState>,
    Json(body): Json<SaveBoardBody>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    state
        .store
        .save(body.board_id, &body.elements, OffsetDateTime::now_utc())
        .await
        .map_err(store_error_to_status)?;

    Ok(Json(json!({ "success": true, "message": "Board saved successfully" })))
}

/// `GET /api/load-board/:board_id` — last flushed snapshot.
pub async fn load_board(
    State(state): State<AppState>,
    Path(board_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let record = state.store.load(board_id).await.map_err(store_error_to_status)?;

    match record {
        Some(record) => Ok(Json(json!({
            "success": true,
            "elements": record.elements,
            "lastUpdated": record.last_updated,
        }))),
        None => Ok(Json(json!({ "success": false, "message": "Board not found" }))),
    }
}

/// `GET /api/boards` — board-picker listing, recomputed per call.
pub async fn list_boards(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let boards = state.store.list().await.map_err(store_error_to_status)?;
    Ok(Json(json!({ "success": true, "boards": boards })))
}

fn store_error_to_status(err: StoreError) -> StatusCode {
    error!(error = %err, "store operation failed");
    StatusCode::INTERNAL_SERVER_ERROR
}
