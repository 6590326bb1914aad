//! OpenAI Responses API backend (`POST /v1/responses`).

use async_trait::async_trait;
use serde_json::json;

use super::{
    api_key_from_env, http_client, normalize_base_url, post_json, Backend, DEFAULT_OPENAI_BASE_URL,
    OPENAI_API_KEY_ENV,
};
use crate::error::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};

const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 1200;

pub struct OpenAiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: &str) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client()?,
            base_url: normalize_base_url(base_url, DEFAULT_OPENAI_BASE_URL, "https"),
            api_key: api_key.into(),
            model: model.to_string(),
        })
    }

    pub fn from_env(base_url: &str, model: &str) -> Result<Self, GenerationError> {
        let key = api_key_from_env(OPENAI_API_KEY_ENV, Backend::OpenAi)?;
        Self::new(base_url, key, model)
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut body = json!({
            "model": self.model,
            "input": request.prompt,
            "max_output_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_OUTPUT_TOKENS),
        });
        if let Some(system) = &request.system {
            body["instructions"] = json!(system);
        }
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        body
    }
}

/// Concatenate every `output_text` part of every `message` item.
pub(crate) fn extract_output_text(v: &serde_json::Value) -> Option<String> {
    let mut out = String::new();
    for item in v.get("output")?.as_array()? {
        if item.get("type").and_then(|x| x.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|x| x.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|x| x.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(t) = part.get("text").and_then(|x| x.as_str()) {
                if !out.is_empty() {
                    out.push('\n');
                }
                out.push_str(t);
            }
        }
    }
    let trimmed = out.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/v1/responses", self.base_url);
        let http = self.client.post(&url).bearer_auth(&self.api_key);
        let v = post_json(Backend::OpenAi, http, &self.body(request)).await?;
        extract_output_text(&v).ok_or_else(|| {
            GenerationError::Permanent(
                "openai: no output_text in response (unexpected response shape)".to_string(),
            )
        })
    }

    fn describe(&self) -> String {
        format!("openai:{}", self.model)
    }
}
