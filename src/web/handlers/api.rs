use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::{SettingsUpdate, SettingsView};
use crate::error::ConfigurationError;
use crate::models::HistoryEntry;
use crate::web::state::AppState;

// Query types

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub prompt: String,
    #[serde(default = "default_execute")]
    pub execute: bool,
}

fn default_execute() -> bool {
    true
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HistoryOrder {
    #[default]
    Oldest,
    Newest,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    #[serde(default)]
    pub order: HistoryOrder,
}

// System status

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub dialect: String,
    pub provider: String,
    pub history_count: usize,
}

// API Implementations

/// Natural language prompt -> generated SQL -> (optional) execution, recorded in history
pub async fn run_query(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<HistoryEntry>, (StatusCode, String)> {
    info!("Query requested (execute = {})", payload.execute);

    state
        .ask(&payload.prompt, payload.execute)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))
}

pub async fn list_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> Json<Vec<HistoryEntry>> {
    let entries = match params.order {
        HistoryOrder::Oldest => state.history().await,
        HistoryOrder::Newest => state.recent_history().await,
    };
    Json(entries)
}

pub async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsView> {
    Json(state.settings_view().await)
}

pub async fn save_settings(
    State(state): State<Arc<AppState>>,
    Json(update): Json<SettingsUpdate>,
) -> Result<Json<SettingsView>, (StatusCode, String)> {
    state.apply_settings(update).await.map(Json).map_err(|e| {
        error!("Failed to save settings: {}", e);
        (settings_error_status(&e), e.to_string())
    })
}

pub(crate) fn settings_error_status(e: &ConfigurationError) -> StatusCode {
    match e {
        ConfigurationError::Io(_) | ConfigurationError::Encode(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    }
}

pub async fn system_status(State(state): State<Arc<AppState>>) -> Json<SystemStatus> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let pipeline = state.current_pipeline().await;
    let history_count = state.session.lock().await.history.len();

    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        dialect: pipeline.gateway().dialect().to_string(),
        provider: pipeline.provider_name().to_string(),
        history_count,
    })
}
