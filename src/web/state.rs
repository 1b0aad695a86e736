use crate::config::{save_settings, AppConfig, SettingsUpdate, SettingsView};
use crate::error::ConfigurationError;
use crate::models::HistoryEntry;
use crate::pipeline::{PipelineError, QueryPipeline, SessionContext};
use crate::web::templates::init_templates;
use minijinja::Environment;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Shared application state for the web server
pub struct AppState {
    pub config: RwLock<AppConfig>,
    pub pipeline: RwLock<Arc<QueryPipeline>>,
    // One interactive session per server; requests run one at a time
    pub session: Mutex<SessionContext>,
    pub template_env: Environment<'static>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, pipeline: QueryPipeline) -> Self {
        Self {
            config: RwLock::new(config),
            pipeline: RwLock::new(Arc::new(pipeline)),
            session: Mutex::new(SessionContext::new()),
            template_env: init_templates(),
            startup_time: chrono::Utc::now(),
        }
    }

    pub async fn current_pipeline(&self) -> Arc<QueryPipeline> {
        Arc::clone(&*self.pipeline.read().await)
    }

    /// Runs the pipeline against the session and returns a copy of the new entry.
    pub async fn ask(&self, prompt: &str, execute: bool) -> Result<HistoryEntry, PipelineError> {
        let pipeline = self.current_pipeline().await;
        let mut session = self.session.lock().await;
        pipeline.run(&mut session, prompt, execute).await.cloned()
    }

    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.session.lock().await.history.all().to_vec()
    }

    pub async fn recent_history(&self) -> Vec<HistoryEntry> {
        self.session.lock().await.history.reversed_view().cloned().collect()
    }

    pub async fn settings_view(&self) -> SettingsView {
        SettingsView::from(&*self.config.read().await)
    }

    /// Validates the update, persists it and swaps in a pipeline built from it.
    /// The session history is kept.
    pub async fn apply_settings(
        &self,
        update: SettingsUpdate,
    ) -> Result<SettingsView, ConfigurationError> {
        let mut config = self.config.write().await;

        let settings = update.into_settings(&config)?;
        let updated = settings.apply_to(&config);

        // Build first so an invalid configuration is never persisted
        let pipeline = QueryPipeline::from_config(&updated)?;
        save_settings(&settings, &PathBuf::from(&updated.settings_file))?;

        *self.pipeline.write().await = Arc::new(pipeline);
        *config = updated;
        info!(
            "Configuration updated: {} database, {} provider",
            config.database.dialect, config.llm.provider
        );

        Ok(SettingsView::from(&*config))
    }
}
