use crate::config::{LlmProviderKind, Settings};
use crate::embeddings::join_endpoint;
use crate::traits::{ChatRequest, LanguageModel};
use crate::SearchError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Builds the configured language model. A missing API key is logged and
/// yields `None`: the index still loads and retrieval still works, only
/// answer synthesis is unavailable.
pub fn build_language_model(settings: &Settings) -> Result<Option<Arc<dyn LanguageModel>>, SearchError> {
    match settings.llm_provider {
        LlmProviderKind::Anthropic => {
            let Some(api_key) = settings.anthropic_api_key.clone() else {
                warn!("anthropic selected as llm provider but ANTHROPIC_API_KEY is missing");
                return Ok(None);
            };
            let model = AnthropicChatModel::new(
                &settings.anthropic_base_url,
                api_key,
                &settings.anthropic_model,
                settings.anthropic_max_tokens,
            )?;
            info!(model = %settings.anthropic_model, "anthropic llm configured");
            Ok(Some(Arc::new(model)))
        }
        LlmProviderKind::OpenAi => {
            let Some(api_key) = settings.openai_api_key.clone() else {
                warn!("OPENAI_API_KEY is missing; answer synthesis is disabled");
                return Ok(None);
            };
            let model =
                OpenAiChatModel::new(&settings.openai_base_url, api_key, &settings.openai_model)?;
            info!(model = %settings.openai_model, "openai llm configured");
            Ok(Some(Arc::new(model)))
        }
    }
}

pub struct OpenAiChatModel {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            endpoint: join_endpoint(base_url, "chat/completions")?,
            api_key: api_key.into(),
            model: model.into(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SearchError> {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.user }));

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "messages": messages }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "openai".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: OpenAiChatResponse = response.json().await?;
        openai_text(parsed)
    }
}

fn openai_text(parsed: OpenAiChatResponse) -> Result<String, SearchError> {
    parsed
        .choices
        .into_iter()
        .find_map(|choice| choice.message.content)
        .ok_or_else(|| SearchError::BackendResponse {
            backend: "openai".to_string(),
            details: "missing text in response".to_string(),
        })
}

pub struct AnthropicChatModel {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicChatModel {
    pub fn new(
        base_url: &str,
        api_key: impl Into<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Result<Self, SearchError> {
        Ok(Self {
            client: Client::new(),
            endpoint: join_endpoint(base_url, "messages")?,
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}

#[async_trait]
impl LanguageModel for AnthropicChatModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, SearchError> {
        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": [ { "role": "user", "content": request.user } ],
        });
        if let Some(system) = &request.system {
            payload["system"] = json!(system);
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(SearchError::BackendResponse {
                backend: "anthropic".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: AnthropicResponse = response.json().await?;
        anthropic_text(parsed)
    }
}

fn anthropic_text(parsed: AnthropicResponse) -> Result<String, SearchError> {
    let text: Vec<String> = parsed
        .content
        .into_iter()
        .filter_map(|part| part.text)
        .collect();
    if text.is_empty() {
        return Err(SearchError::BackendResponse {
            backend: "anthropic".to_string(),
            details: "missing text in response".to_string(),
        });
    }
    Ok(text.join(""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_disables_synthesis() {
        let settings = Settings {
            llm_provider: LlmProviderKind::Anthropic,
            ..Settings::default()
        };
        assert!(build_language_model(&settings).unwrap().is_none());
        assert!(build_language_model(&Settings::default()).unwrap().is_none());
    }

    #[test]
    fn provider_selects_client_and_model() {
        let settings = Settings {
            llm_provider: LlmProviderKind::Anthropic,
            anthropic_api_key: Some("key".to_string()),
            anthropic_model: "claude-test".to_string(),
            ..Settings::default()
        };
        let model = build_language_model(&settings).unwrap().expect("configured");
        assert_eq!(model.name(), "claude-test");

        let settings = Settings {
            openai_api_key: Some("key".to_string()),
            ..Settings::default()
        };
        let model = build_language_model(&settings).unwrap().expect("configured");
        assert_eq!(model.name(), "gpt-3.5-turbo");
    }

    #[test]
    fn endpoints_are_joined_onto_base_urls() {
        let openai = OpenAiChatModel::new("https://api.openai.com/v1", "k", "m").unwrap();
        assert_eq!(openai.endpoint.as_str(), "https://api.openai.com/v1/chat/completions");

        let anthropic =
            AnthropicChatModel::new("https://api.anthropic.com/v1/", "k", "m", 16).unwrap();
        assert_eq!(anthropic.endpoint.as_str(), "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn response_text_is_extracted() {
        let openai: OpenAiChatResponse = serde_json::from_value(json!({
            "choices": [ { "message": { "role": "assistant", "content": "Page two." } } ]
        }))
        .unwrap();
        assert_eq!(openai_text(openai).unwrap(), "Page two.");

        let anthropic: AnthropicResponse = serde_json::from_value(json!({
            "content": [ { "type": "text", "text": "Hello" }, { "type": "text", "text": " there" } ]
        }))
        .unwrap();
        assert_eq!(anthropic_text(anthropic).unwrap(), "Hello there");

        let empty: AnthropicResponse = serde_json::from_value(json!({ "content": [] })).unwrap();
        assert!(anthropic_text(empty).is_err());
    }
}
