//! Endpoints of HTTP server.
//!
use std::sync::Arc;

use axum::{routing::get, Extension, Json, Router};
use common::status::DistractionStatus;
use tower_http::cors::CorsLayer;

use crate::state::StatusBoard;

/// Latest distraction status.
pub async fn status(Extension(board): Extension<Arc<StatusBoard>>) -> Json<DistractionStatus> {
    let status = board.status();
    log::debug!("Status requested: {:?}", status);
    Json(status)
}

/// Build the HTTP application serving the status board.
///
/// CORS is open since the status is polled from browser extensions.
pub fn app(board: Arc<StatusBoard>) -> Router {
    Router::new()
        .route("/status", get(status))
        .layer(Extension(board))
        .layer(CorsLayer::permissive())
}
