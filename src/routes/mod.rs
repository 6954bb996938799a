//! Router assembly.
//!
//! Binds the REST persistence surface and the websocket synchronization
//! channel under a single Axum router. CORS is permissive because the
//! editing front end is served separately.

pub mod boards;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/create-board", post(boards::create_board))
        .route("/api/save-board", post(boards::save_board))
        .route("/api/load-board/{board_id}", get(boards::load_board))
        .route("/api/boards", get(boards::list_boards))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
