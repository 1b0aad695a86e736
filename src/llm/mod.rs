pub mod models;
pub mod providers;

use crate::config::LlmConfig;
use crate::db::Dialect;
use crate::error::ConfigurationError;
use async_trait::async_trait;
use models::GenerationRequest;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

#[derive(Debug)]
pub enum LlmError {
    ConnectionError(String),
    ResponseError(String),
    ConfigError(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::ConnectionError(msg) => write!(f, "LLM connection error: {}", msg),
            LlmError::ResponseError(msg) => write!(f, "LLM response error: {}", msg),
            LlmError::ConfigError(msg) => write!(f, "LLM configuration error: {}", msg),
        }
    }
}

impl Error for LlmError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "OPENAI",
            ProviderKind::Gemini => "GEMINI",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "gpt-3.5-turbo",
            ProviderKind::Gemini => "gemini-1.5-pro",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPENAI" => Ok(ProviderKind::OpenAi),
            "GEMINI" => Ok(ProviderKind::Gemini),
            _ => Err(ConfigurationError::UnsupportedProvider(s.to_string())),
        }
    }
}

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    async fn generate_sql(&self, request: &GenerationRequest) -> Result<String, LlmError>;
    fn name(&self) -> &str;
}

pub struct LlmManager {
    generator: Box<dyn SqlGenerator + Send + Sync>,
}

impl LlmManager {
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let (kind, provider) = config.active()?;
        let generator: Box<dyn SqlGenerator + Send + Sync> = match kind {
            ProviderKind::OpenAi => Box::new(providers::openai::OpenAiProvider::new(provider)),
            ProviderKind::Gemini => Box::new(providers::gemini::GeminiProvider::new(provider)),
        };
        info!("Using {} for SQL generation", generator.name());

        Ok(Self { generator })
    }

    pub fn with_generator(generator: Box<dyn SqlGenerator + Send + Sync>) -> Self {
        Self { generator }
    }

    pub fn provider_name(&self) -> &str {
        self.generator.name()
    }

    /// Returns the provider's text with surrounding whitespace removed.
    pub async fn generate_sql(
        &self,
        instruction: &str,
        dialect: Dialect,
    ) -> Result<String, LlmError> {
        let request = GenerationRequest::new(instruction, dialect);
        let sql = self.generator.generate_sql(&request).await?;
        debug!("Generated SQL: {}", sql);
        Ok(sql.trim().to_string())
    }
}
