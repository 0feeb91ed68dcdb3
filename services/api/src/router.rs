//! Axum Router Configuration
//!
//! The service surface is deliberately small: a health probe and the
//! custom-LLM WebSocket endpoint the voice platform connects to.

use crate::{state::AppState, ws::ws_handler};
use axum::{Router, routing::get};

async fn health() -> &'static str {
    "ok"
}

/// Creates the main Axum router for the application.
pub fn create_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ws/llm", get(ws_handler))
        .with_state(app_state)
}
