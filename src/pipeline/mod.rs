use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::db::DatabaseGateway;
use crate::error::ConfigurationError;
use crate::history::HistoryStore;
use crate::llm::LlmManager;
use crate::models::{HistoryEntry, Outcome};

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("Please enter a prompt.")]
    EmptyPrompt,
}

/// State of one interactive session, passed into every run.
#[derive(Debug, Default)]
pub struct SessionContext {
    pub history: HistoryStore,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// prompt -> generated SQL -> optional execution -> history entry
pub struct QueryPipeline {
    generator: LlmManager,
    gateway: DatabaseGateway,
}

impl QueryPipeline {
    pub fn new(generator: LlmManager, gateway: DatabaseGateway) -> Self {
        Self { generator, gateway }
    }

    /// Selects provider and dialect once; unknown tags fail here, before any I/O.
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigurationError> {
        let gateway = DatabaseGateway::new(&config.database)?;
        let generator = LlmManager::new(&config.llm)?;
        Ok(Self::new(generator, gateway))
    }

    pub fn provider_name(&self) -> &str {
        self.generator.provider_name()
    }

    pub fn gateway(&self) -> &DatabaseGateway {
        &self.gateway
    }

    /// Runs one request and records it. Only an empty prompt is rejected without a record.
    pub async fn run<'s>(
        &self,
        session: &'s mut SessionContext,
        prompt: &str,
        execute: bool,
    ) -> Result<&'s HistoryEntry, PipelineError> {
        if prompt.trim().is_empty() {
            warn!("Rejected empty prompt");
            return Err(PipelineError::EmptyPrompt);
        }

        let dialect = self.gateway.dialect();
        debug!("Prompt received: {}", prompt);
        info!("Generating SQL with {} for a {} database", self.provider_name(), dialect);

        let started = Instant::now();
        let (sql, outcome) = match self.generator.generate_sql(prompt, dialect).await {
            Err(e) => {
                error!("SQL generation failed: {}", e);
                (String::new(), Outcome::generation_failed(e.to_string()))
            }
            Ok(sql) if !execute => {
                info!("Execution skipped for generated statement");
                (sql, Outcome::NotExecuted)
            }
            Ok(sql) => {
                let outcome = self.gateway.execute(&sql).await;
                (sql, outcome)
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let entry = HistoryEntry::new(
            session.history.next_id(),
            prompt,
            sql,
            outcome,
            self.provider_name(),
            dialect,
            elapsed_ms,
        );
        Ok(session.history.append(entry))
    }
}
