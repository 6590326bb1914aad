//! Ollama `/api/chat` backend.

use async_trait::async_trait;
use serde_json::json;

use super::{http_client, normalize_base_url, post_json, Backend, DEFAULT_OLLAMA_HOST};
use crate::error::GenerationError;
use crate::generation::{GenerationRequest, TextGenerator};

pub struct OllamaGenerator {
    client: reqwest::Client,
    host: String,
    model: String,
}

impl OllamaGenerator {
    pub fn new(host: &str, model: &str) -> Result<Self, GenerationError> {
        Ok(Self {
            client: http_client()?,
            host: normalize_base_url(host, DEFAULT_OLLAMA_HOST, "http"),
            model: model.to_string(),
        })
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        messages.push(json!({ "role": "user", "content": request.prompt }));

        let mut options = json!({ "temperature": request.temperature.unwrap_or(0.0) });
        if let Some(max_tokens) = request.max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        json!({
            "model": self.model,
            "stream": false,
            "messages": messages,
            "options": options,
        })
    }
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let url = format!("{}/api/chat", self.host);
        let v = post_json(Backend::Ollama, self.client.post(&url), &self.body(request)).await?;
        v.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| {
                GenerationError::Transient("ollama: response has no message.content".to_string())
            })
    }

    fn describe(&self) -> String {
        format!("ollama:{}", self.model)
    }
}
