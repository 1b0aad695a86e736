use crate::config::ProviderConfig;
use crate::llm::models::GenerationRequest;
use crate::llm::{LlmError, SqlGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Single-prompt provider: system and user text are sent as one blob.
pub struct GeminiProvider {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
}

#[derive(Serialize, Debug)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize, Debug)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize, Debug)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

impl Candidate {
    fn parts(&self) -> &[CandidatePart] {
        match &self.content {
            Some(content) => &content.parts,
            None => &[],
        }
    }

    /// All text parts joined, the way the response-level text accessor reads it.
    fn joined_text(&self) -> Option<String> {
        let text: String = self.parts().iter().filter_map(|p| p.text.as_deref()).collect();
        non_empty(text)
    }

    fn first_part_text(&self) -> Option<String> {
        self.parts().first().and_then(|p| p.text.clone()).and_then(non_empty)
    }
}

fn non_empty(text: String) -> Option<String> {
    (!text.trim().is_empty()).then_some(text)
}

impl GenerateContentResponse {
    /// Reduces every response shape to one text value or a decode error.
    fn into_text(self) -> Result<String, LlmError> {
        if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(LlmError::ResponseError(format!("Gemini blocked the prompt: {}", reason)));
        }

        // The joined text is only defined for a single candidate;
        // otherwise read the first candidate's first part.
        let primary = match self.candidates.as_slice() {
            [only] => only.joined_text(),
            _ => None,
        };

        primary
            .or_else(|| self.candidates.first().and_then(Candidate::first_part_text))
            .ok_or_else(|| {
                let reason = self
                    .candidates
                    .first()
                    .and_then(|c| c.finish_reason.clone())
                    .unwrap_or_else(|| "no candidates".to_string());
                LlmError::ResponseError(format!("Gemini returned no text ({})", reason))
            })
    }
}

impl GeminiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        let api_base = config
            .api_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.api_base, self.model)
    }

    fn parse_response(body: &str) -> Result<String, LlmError> {
        let response: GenerateContentResponse = serde_json::from_str(body).map_err(|e| {
            error!("Failed to parse Gemini response: {} - Response was: {}", e, body);
            LlmError::ResponseError(format!("Failed to parse Gemini response: {}", e))
        })?;
        response.into_text()
    }
}

#[async_trait]
impl SqlGenerator for GeminiProvider {
    async fn generate_sql(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::ConfigError("Gemini API key is not configured".to_string()));
        }

        let prompt = request.single_prompt();
        let body = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part { text: &prompt }],
            }],
        };

        info!("Sending request to Gemini with model: {}", self.model);
        debug!("API URL: {}", self.endpoint());

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::ConnectionError(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| LlmError::ResponseError(format!("Failed to read response body: {}", e)))?;

        if !status.is_success() {
            error!("Gemini API responded with status code: {}", status);
            return Err(super::status_error("Gemini", status, &text));
        }

        debug!("Raw response from Gemini: {}", text);
        Self::parse_response(&text)
    }

    fn name(&self) -> &str {
        "GEMINI"
    }
}
