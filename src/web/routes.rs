use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - web interface
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/ask", post(handlers::ui::ask_handler))
        .route("/settings", post(handlers::ui::settings_handler))
        .route("/static/{*path}", get(static_handler))
}

// API Routes - REST API for programmatic access
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Pipeline
            .route("/query", post(handlers::api::run_query))
            .route("/history", get(handlers::api::list_history))
            // Configuration
            .route(
                "/settings",
                get(handlers::api::get_settings).post(handlers::api::save_settings),
            )
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
