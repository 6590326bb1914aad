//! Anthropic Messages API backend (`POST /v1/messages`).

use async_trait::async_trait;
use serde_json::json;

use super::{
    api_key_from_env, http_client, normalize_base_url, post_json, Backend, ANTHROPIC_API_KEY_ENV,
    DEFAULT_ANTHROPIC_BASE_URL, DEFAULT_ANTHROPIC_VERSION,
};
use crate::error::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};

const DEFAULT_MAX_TOKENS: u32 = 1200;

pub struct AnthropicGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicGenerator {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: &str) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client()?,
            base_url: normalize_base_url(base_url, DEFAULT_ANTHROPIC_BASE_URL, "https"),
            api_key: api_key.into(),
            model: model.to_string(),
        })
    }

    pub fn from_env(base_url: &str, model: &str) -> Result<Self, GenerationError> {
        let key = api_key_from_env(ANTHROPIC_API_KEY_ENV, Backend::Anthropic)?;
        Self::new(base_url, key, model)
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature.unwrap_or(0.0),
            "messages": [
                { "role": "user", "content": request.prompt }
            ]
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }
        body
    }
}

pub(crate) fn extract_text_blocks(v: &serde_json::Value) -> Option<String> {
    let blocks = v.get("content")?.as_array()?;
    let text: Vec<&str> = blocks
        .iter()
        .filter(|b| b.get("type").and_then(|x| x.as_str()) == Some("text"))
        .filter_map(|b| b.get("text").and_then(|x| x.as_str()))
        .collect();
    let joined = text.join("\n");
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl TextGenerator for AnthropicGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/v1/messages", self.base_url);
        let http = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", DEFAULT_ANTHROPIC_VERSION);
        let v = post_json(Backend::Anthropic, http, &self.body(request)).await?;
        extract_text_blocks(&v).ok_or_else(|| {
            GenerationError::Permanent(
                "anthropic: no text blocks in response (unexpected response shape)".to_string(),
            )
        })
    }

    fn describe(&self) -> String {
        format!("anthropic:{}", self.model)
    }
}
