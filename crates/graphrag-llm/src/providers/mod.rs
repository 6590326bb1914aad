//! HTTP generation backends
//!
//! Each backend is compiled behind its own cargo feature (`ollama`, `openai`,
//! `anthropic`). Requests go through `reqwest`'s async client; HTTP status
//! codes are classified into [`GenerationError`] kinds here so the retry
//! layer can tell transient failures from permanent ones.
//!
//! Secrets are read from the environment only (`OPENAI_API_KEY`,
//! `ANTHROPIC_API_KEY`), never from config files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::GenerationConfig;
use crate::error::GenerationError;
use crate::generation::TextGenerator;
use crate::resilient::ResilientGenerator;

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "ollama")]
pub mod ollama;
#[cfg(feature = "openai")]
pub mod openai;

pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Ollama,
    #[serde(rename = "openai")]
    OpenAi,
    Anthropic,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Ollama => "ollama",
            Backend::OpenAi => "openai",
            Backend::Anthropic => "anthropic",
        }
    }

    pub fn is_compiled_in(&self) -> bool {
        match self {
            Backend::Ollama => cfg!(feature = "ollama"),
            Backend::OpenAi => cfg!(feature = "openai"),
            Backend::Anthropic => cfg!(feature = "anthropic"),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Backend::Ollama),
            "openai" => Ok(Backend::OpenAi),
            "anthropic" => Ok(Backend::Anthropic),
            other => Err(format!(
                "unknown backend `{other}` (expected ollama, openai or anthropic)"
            )),
        }
    }
}

/// Build the configured backend wrapped in a [`ResilientGenerator`].
pub fn build_generator(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    let raw = build_backend(config)?;
    tracing::info!(
        backend = %config.backend,
        model = %config.model,
        timeout_secs = config.timeout_secs,
        max_attempts = config.max_attempts,
        "generation backend ready"
    );
    Ok(Arc::new(ResilientGenerator::new(
        raw,
        config.retry_policy(),
        config.timeout(),
    )))
}

fn build_backend(config: &GenerationConfig) -> Result<Arc<dyn TextGenerator>, GenerationError> {
    match config.backend {
        #[cfg(feature = "ollama")]
        Backend::Ollama => Ok(Arc::new(ollama::OllamaGenerator::new(
            config.ollama_host.as_deref().unwrap_or(DEFAULT_OLLAMA_HOST),
            &config.model,
        )?)),
        #[cfg(feature = "openai")]
        Backend::OpenAi => Ok(Arc::new(openai::OpenAiGenerator::from_env(
            config.base_url.as_deref().unwrap_or(DEFAULT_OPENAI_BASE_URL),
            &config.model,
        )?)),
        #[cfg(feature = "anthropic")]
        Backend::Anthropic => Ok(Arc::new(anthropic::AnthropicGenerator::from_env(
            config.base_url.as_deref().unwrap_or(DEFAULT_ANTHROPIC_BASE_URL),
            &config.model,
        )?)),
        #[allow(unreachable_patterns)]
        other => Err(GenerationError::Permanent(format!(
            "backend `{other}` is not compiled in (enable the `{other}` feature)"
        ))),
    }
}

// ============================================================================
// Shared HTTP helpers
// ============================================================================

/// Map an unsuccessful HTTP status to an error kind.
///
/// - 429 → rate limited (with retry-after when given)
/// - 408, 5xx → transient
/// - other 4xx → permanent (bad request, auth, content policy)
pub fn classify_http_status(
    backend: Backend,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
) -> GenerationError {
    let detail = format!("{backend} http error {status}: {}", truncate(body, 400));
    match status {
        429 => GenerationError::RateLimited { retry_after },
        408 | 500..=599 => GenerationError::Transient(detail),
        _ => GenerationError::Permanent(detail),
    }
}

/// `Retry-After` in delta-seconds form. HTTP dates are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    let secs: f64 = value?.trim().parse().ok()?;
    (secs.is_finite() && secs >= 0.0).then(|| Duration::from_secs_f64(secs))
}

#[cfg_attr(
    not(any(feature = "ollama", feature = "openai", feature = "anthropic")),
    allow(dead_code)
)]
pub(crate) fn normalize_base_url(base_url: &str, default: &str, default_scheme: &str) -> String {
    let mut host = base_url.trim().to_string();
    if host.is_empty() {
        host = default.to_string();
    }
    if !host.starts_with("http://") && !host.starts_with("https://") {
        host = format!("{default_scheme}://{host}");
    }
    host.trim_end_matches('/').to_string()
}

#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
pub(crate) fn http_client() -> Result<reqwest::Client, GenerationError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| GenerationError::Permanent(format!("failed to build http client: {e}")))
}

/// Send a JSON POST and return the parsed body, classifying failures.
#[cfg(any(feature = "ollama", feature = "openai", feature = "anthropic"))]
pub(crate) async fn post_json(
    backend: Backend,
    request: reqwest::RequestBuilder,
    body: &serde_json::Value,
) -> Result<serde_json::Value, GenerationError> {
    let resp = request.json(body).send().await.map_err(|e| {
        if e.is_timeout() {
            GenerationError::Transient(format!("{backend}: request timed out: {e}"))
        } else {
            GenerationError::Transient(format!("{backend}: failed to reach server: {e}"))
        }
    })?;

    let status = resp.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(
            resp.headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
        );
        let text = resp.text().await.unwrap_or_default();
        return Err(classify_http_status(backend, status.as_u16(), retry_after, &text));
    }

    resp.json()
        .await
        .map_err(|e| GenerationError::Transient(format!("{backend} returned invalid JSON: {e}")))
}

#[cfg_attr(
    not(any(feature = "ollama", feature = "openai", feature = "anthropic")),
    allow(dead_code)
)]
pub(crate) fn api_key_from_env(name: &str, backend: Backend) -> Result<String, GenerationError> {
    let key = std::env::var(name).unwrap_or_default();
    let key = key.trim().to_string();
    if key.is_empty() {
        return Err(GenerationError::Permanent(format!(
            "{backend} backend requires {name} (set it in your env; do not put secrets in config files)"
        )));
    }
    Ok(key)
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}
