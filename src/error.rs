use thiserror::Error;

/// Setup mistakes: raised before any network or database I/O happens.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unsupported database dialect: '{0}' (expected 'mysql' or 'postgresql')")]
    UnsupportedDialect(String),

    #[error("Unsupported AI provider: '{0}'. Use 'OPENAI' or 'GEMINI'.")]
    UnsupportedProvider(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to write settings: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode settings: {0}")]
    Encode(#[from] serde_json::Error),
}
