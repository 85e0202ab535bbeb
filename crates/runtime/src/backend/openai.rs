//! OpenAI-compatible chat completions backend.

use super::{ChatRequest, ChatResponse, LlmBackend, Role, Usage};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

/// Builder for creating an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiBackendBuilder {
    /// Create a new builder with an API key and model.
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: 0.7,
            max_tokens: 1500,
        }
    }

    /// Point the backend at another OpenAI-compatible endpoint.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the maximum tokens for responses.
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Build the backend.
    pub fn build(self) -> OpenAiBackend {
        OpenAiBackend {
            client: reqwest::Client::new(),
            api_key: self.api_key,
            model: self.model,
            endpoint: format!("{}/chat/completions", self.base_url.trim_end_matches('/')),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiBackend {
    /// Create a builder for the backend.
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(api_key, model)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn api_request<'a>(&'a self, request: &ChatRequest<'a>) -> ApiRequest<'a> {
        let system = request.system.map(|content| ApiMessage {
            role: Role::System,
            content,
        });
        let messages = system
            .into_iter()
            .chain(request.messages.iter().map(|m| ApiMessage {
                role: m.role,
                content: &m.content,
            }))
            .collect();

        ApiRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "openai({}, {})", self.model, self.endpoint)
    }
}

impl LlmBackend for OpenAiBackend {
    async fn chat(&self, request: ChatRequest<'_>) -> Result<ChatResponse> {
        let api_request = self.api_request(&request);

        tracing::debug!(model = %self.model, messages = api_request.messages.len(), "chat request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Api(format!("{status}: {body}")));
        }

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| Error::Api(e.to_string()))?;

        into_chat_response(api_response)
    }
}

fn into_chat_response(api_response: ApiResponse) -> Result<ChatResponse> {
    let content = api_response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::Api("response contained no choices".into()))?
        .message
        .content
        .unwrap_or_default();

    let usage = api_response
        .usage
        .map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(ChatResponse { content, usage })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Message;
    use serde_json::json;

    #[test]
    fn system_prompt_leads_the_messages() {
        let backend = OpenAiBackend::builder("key", "gpt-test").build();
        let messages = [Message::user("hi"), Message::assistant("hello")];
        let request = ChatRequest {
            messages: &messages,
            system: Some("be brief"),
        };

        let body = serde_json::to_value(backend.api_request(&request)).unwrap();
        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["max_tokens"], 1500);
        assert_eq!(
            body["messages"],
            json!([
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ])
        );
    }

    #[test]
    fn endpoint_joins_base_url() {
        let backend = OpenAiBackend::builder("key", "m")
            .base_url("http://localhost:11434/v1/")
            .build();
        assert_eq!(
            backend.to_string(),
            "openai(m, http://localhost:11434/v1/chat/completions)"
        );
    }

    #[test]
    fn parses_first_choice_and_usage() {
        let api_response: ApiResponse = serde_json::from_value(json!({
            "choices": [{"message": {"role": "assistant", "content": "answer"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        }))
        .unwrap();

        let response = into_chat_response(api_response).unwrap();
        assert_eq!(response.content, "answer");
        assert_eq!(response.usage.total_tokens(), 15);
    }

    #[test]
    fn empty_choices_is_api_error() {
        let api_response: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(into_chat_response(api_response), Err(Error::Api(_))));
    }
}
