pub mod gemini;
pub mod openai;

use crate::llm::LlmError;
use reqwest::StatusCode;
use serde::Deserialize;

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Builds the error for a non-2xx reply, preferring the provider's own message.
/// Both providers wrap failures as `{"error": {"message": ...}}`.
pub(crate) fn status_error(provider: &str, status: StatusCode, body: &str) -> LlmError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());

    if detail.is_empty() {
        LlmError::ResponseError(format!("{} API responded with status code: {}", provider, status))
    } else {
        LlmError::ResponseError(format!(
            "{} API responded with status code: {} - {}",
            provider, status, detail
        ))
    }
}
