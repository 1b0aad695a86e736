use crate::config::ProviderConfig;
use crate::llm::models::GenerationRequest;
use crate::llm::{LlmError, SqlGenerator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Chat-completion provider: one system and one user message, no sampling.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize, Debug)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: config
                .api_url
                .clone()
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    fn build_request<'a>(
        &'a self,
        system: &'a str,
        request: &'a GenerationRequest,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                Message {
                    role: "system",
                    content: system,
                },
                Message {
                    role: "user",
                    content: &request.instruction,
                },
            ],
            temperature: 0.0,
        }
    }

    fn parse_response(body: &str) -> Result<String, LlmError> {
        let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
            LlmError::ResponseError(format!("Failed to parse OpenAI response: {}", e))
        })?;

        response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ResponseError("No choices in response".to_string()))?
            .message
            .content
            .ok_or_else(|| LlmError::ResponseError("Empty message content in response".to_string()))
    }
}

#[async_trait]
impl SqlGenerator for OpenAiProvider {
    async fn generate_sql(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::ConfigError("OpenAI API key is not configured".to_string()));
        }

        let system = request.system_instruction();
        let body = self.build_request(&system, request);

        info!("Sending request to OpenAI with model: {}", self.model);
        debug!("API URL: {}", self.api_url);

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
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
            error!("OpenAI API responded with status code: {}", status);
            return Err(super::status_error("OpenAI", status, &text));
        }

        Self::parse_response(&text)
    }

    fn name(&self) -> &str {
        "OPENAI"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Dialect;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::new(&ProviderConfig {
            model: "gpt-4o-mini".to_string(),
            api_key: "sk-test".to_string(),
            api_url: None,
        })
    }

    #[test]
    fn test_defaults() {
        let p = provider();
        assert_eq!(p.api_url, DEFAULT_API_URL);
        assert_eq!(p.model, "gpt-4o-mini");
        assert_eq!(p.name(), "OPENAI");
    }

    #[test]
    fn test_request_has_system_and_user_messages_at_zero_temperature() {
        let p = provider();
        let request = GenerationRequest::new("Show me all users", Dialect::MySql);
        let system = request.system_instruction();
        let json = serde_json::to_value(p.build_request(&system, &request)).unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(
            json["messages"][0]["content"],
            "You are an expert SQL assistant for a mysql database. Generate only the SQL query, nothing else."
        );
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["messages"][1]["content"], "Show me all users");
        assert_eq!(json["messages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_parse_response() {
        let raw = r#"{"id": "chatcmpl-1", "choices": [{"index": 0, "message": {"role": "assistant", "content": " SELECT COUNT(*) FROM products\n"}}]}"#;
        assert_eq!(
            OpenAiProvider::parse_response(raw).unwrap(),
            " SELECT COUNT(*) FROM products\n"
        );
    }

    #[test]
    fn test_parse_response_without_choices() {
        let err = OpenAiProvider::parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, LlmError::ResponseError(msg) if msg == "No choices in response"));

        let err = OpenAiProvider::parse_response("<html>").unwrap_err();
        assert!(matches!(err, LlmError::ResponseError(_)));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_network() {
        let p = OpenAiProvider::new(&ProviderConfig {
            model: "gpt-4o-mini".to_string(),
            api_key: String::new(),
            api_url: Some("http://127.0.0.1:9/never".to_string()),
        });
        let err = p
            .generate_sql(&GenerationRequest::new("x", Dialect::MySql))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::ConfigError(_)));
    }
}
