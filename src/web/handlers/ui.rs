use axum::{
    extract::State,
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use minijinja::context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::config::SettingsUpdate;
use crate::error::ConfigurationError;
use crate::web::state::AppState;
use crate::web::templates::render_template;

#[derive(Debug, Serialize)]
struct Flash {
    level: &'static str,
    message: String,
}

impl Flash {
    fn new(level: &'static str, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    fn success(message: impl Into<String>) -> Self {
        Self::new("success", message)
    }

    fn warning(message: impl Into<String>) -> Self {
        Self::new("warning", message)
    }

    fn error(message: impl Into<String>) -> Self {
        Self::new("error", message)
    }
}

#[derive(Debug, Deserialize)]
pub struct AskForm {
    pub prompt: String,
    // Checkboxes are only submitted when ticked
    pub execute: Option<String>,
}

/// Flat form fields; blank password and key keep the stored values.
#[derive(Debug, Deserialize)]
pub struct SettingsForm {
    pub dialect: String,
    pub host: String,
    #[serde(default)]
    pub port: String,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
}

impl SettingsForm {
    fn into_update(self) -> Result<SettingsUpdate, ConfigurationError> {
        let port = match self.port.trim() {
            "" => None,
            value => Some(value.parse::<u16>().map_err(|_| ConfigurationError::Invalid {
                key: "port".to_string(),
                reason: format!("'{}' is not a port number", value),
            })?),
        };

        Ok(SettingsUpdate {
            dialect: self.dialect,
            host: self.host,
            port,
            user: self.user,
            password: Some(self.password),
            database: self.database,
            provider: self.provider,
            model: Some(self.model),
            api_key: Some(self.api_key),
        })
    }
}

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    render_index(&state, None, "").await
}

pub async fn ask_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<AskForm>,
) -> Response {
    match state.ask(&form.prompt, form.execute.is_some()).await {
        // Back to the page so a refresh does not resubmit the prompt
        Ok(_) => Redirect::to("/").into_response(),
        Err(e) => {
            warn!("Prompt rejected: {}", e);
            render_index(&state, Some(Flash::warning(e.to_string())), &form.prompt)
                .await
                .into_response()
        }
    }
}

pub async fn settings_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SettingsForm>,
) -> Html<String> {
    let result = match form.into_update() {
        Ok(update) => state.apply_settings(update).await,
        Err(e) => Err(e),
    };

    let flash = match result {
        Ok(_) => Flash::success("Configuration saved."),
        Err(e) => Flash::error(e.to_string()),
    };
    render_index(&state, Some(flash), "").await
}

async fn render_index(state: &AppState, flash: Option<Flash>, draft: &str) -> Html<String> {
    let entries = state.history().await;
    let recent = state.recent_history().await;
    let settings = state.settings_view().await;
    let pipeline = state.current_pipeline().await;

    let ctx = context! {
        entries => entries,
        recent => recent,
        settings => settings,
        provider => pipeline.provider_name(),
        dialect => pipeline.gateway().dialect().as_str(),
        flash => flash,
        draft => draft,
    };

    Html(render_template(&state.template_env, "index.html", ctx))
}
