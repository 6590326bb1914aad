//! Pipeline configuration
//!
//! Resolution order (later wins):
//!
//! 1. built-in defaults ([`PipelineConfig::default`])
//! 2. an optional JSON file (`--config`), any subset of sections/fields
//! 3. `GRAPHRAG_*` environment variables
//! 4. CLI flags (applied by the binary)
//!
//! ```json
//! {
//!   "chunking":      { "chunk_size": 1200, "chunk_overlap": 100 },
//!   "community":     { "resolution": 1.0, "seed": 42 },
//!   "generation":    { "backend": "ollama", "model": "qwen2:1.5b", "timeout_secs": 120 }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use graphrag_graph::CommunityConfig;
use graphrag_ingest::TextSplitter;

use crate::providers::Backend;
use crate::resilient::RetryPolicy;

pub const GRAPHRAG_BACKEND_ENV: &str = "GRAPHRAG_BACKEND";
pub const GRAPHRAG_MODEL_ENV: &str = "GRAPHRAG_MODEL";
pub const GRAPHRAG_OLLAMA_HOST_ENV: &str = "GRAPHRAG_OLLAMA_HOST";
pub const GRAPHRAG_BASE_URL_ENV: &str = "GRAPHRAG_BASE_URL";
pub const GRAPHRAG_LLM_TIMEOUT_SECS_ENV: &str = "GRAPHRAG_LLM_TIMEOUT_SECS";
pub const GRAPHRAG_MAX_ATTEMPTS_ENV: &str = "GRAPHRAG_MAX_ATTEMPTS";
pub const GRAPHRAG_CONCURRENCY_ENV: &str = "GRAPHRAG_CONCURRENCY";
pub const GRAPHRAG_RESOLUTION_ENV: &str = "GRAPHRAG_RESOLUTION";
pub const GRAPHRAG_SEED_ENV: &str = "GRAPHRAG_SEED";
pub const GRAPHRAG_CHUNK_SIZE_ENV: &str = "GRAPHRAG_CHUNK_SIZE";
pub const GRAPHRAG_CHUNK_OVERLAP_ENV: &str = "GRAPHRAG_CHUNK_OVERLAP";
/// Standard Ollama variable, used when `GRAPHRAG_OLLAMA_HOST` is unset.
pub const OLLAMA_HOST_ENV: &str = "OLLAMA_HOST";

pub const DEFAULT_MODEL: &str = "qwen2:1.5b";
pub const SUMMARY_FAILURE_PLACEHOLDER: &str = "Error: Failed to generate summary.";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid {name}={value:?} (expected {expected})")]
    InvalidEnv {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Concurrent extraction calls.
    pub concurrency: usize,
    pub max_tokens: Option<u32>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_tokens: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizationConfig {
    pub concurrency: usize,
    /// Budget for the rendered community data inside the prompt.
    pub max_input_chars: usize,
    pub max_tokens: Option<u32>,
    /// Stored as the summary of a community whose call failed.
    pub failure_placeholder: String,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_input_chars: 8000,
            max_tokens: None,
            failure_placeholder: SUMMARY_FAILURE_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub concurrency: usize,
    /// Upper bound on one map call, retries included. `0` disables.
    pub map_timeout_secs: u64,
    pub max_tokens: Option<u32>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            map_timeout_secs: 300,
            max_tokens: None,
        }
    }
}

impl QueryConfig {
    pub fn map_timeout(&self) -> Option<Duration> {
        (self.map_timeout_secs > 0).then(|| Duration::from_secs(self.map_timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub backend: Backend,
    pub model: String,
    pub ollama_host: Option<String>,
    /// Base URL override for the OpenAI / Anthropic backends.
    pub base_url: Option<String>,
    /// Per-attempt timeout. `0` disables.
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub temperature: Option<f32>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Ollama,
            model: DEFAULT_MODEL.to_string(),
            ollama_host: None,
            base_url: None,
            timeout_secs: 120,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 10_000,
            temperature: Some(0.0),
        }
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms.max(self.initial_backoff_ms)),
            ..RetryPolicy::exponential()
        }
    }
}

// ============================================================================
// Whole pipeline
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub chunking: TextSplitter,
    pub extraction: ExtractionConfig,
    pub community: CommunityConfig,
    pub summarization: SummarizationConfig,
    pub query: QueryConfig,
    pub generation: GenerationConfig,
}

impl PipelineConfig {
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the optional file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_json_file(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `GRAPHRAG_*` overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var(GRAPHRAG_BACKEND_ENV) {
            self.generation.backend = v.parse().map_err(|_| ConfigError::InvalidEnv {
                name: GRAPHRAG_BACKEND_ENV,
                value: v.clone(),
                expected: "ollama, openai or anthropic",
            })?;
        }
        if let Some(v) = var(GRAPHRAG_MODEL_ENV) {
            self.generation.model = v;
        }
        if let Some(v) = var(GRAPHRAG_OLLAMA_HOST_ENV).or_else(|| var(OLLAMA_HOST_ENV)) {
            self.generation.ollama_host = Some(v);
        }
        if let Some(v) = var(GRAPHRAG_BASE_URL_ENV) {
            self.generation.base_url = Some(v);
        }
        if let Some(v) = var(GRAPHRAG_LLM_TIMEOUT_SECS_ENV) {
            self.generation.timeout_secs =
                parse_env(GRAPHRAG_LLM_TIMEOUT_SECS_ENV, &v, "integer seconds; 0 disables")?;
        }
        if let Some(v) = var(GRAPHRAG_MAX_ATTEMPTS_ENV) {
            self.generation.max_attempts = parse_env(GRAPHRAG_MAX_ATTEMPTS_ENV, &v, "positive integer")?;
        }
        if let Some(v) = var(GRAPHRAG_CONCURRENCY_ENV) {
            let n: usize = parse_env(GRAPHRAG_CONCURRENCY_ENV, &v, "positive integer")?;
            self.extraction.concurrency = n;
            self.summarization.concurrency = n;
            self.query.concurrency = n;
        }
        if let Some(v) = var(GRAPHRAG_RESOLUTION_ENV) {
            self.community.resolution = parse_env(GRAPHRAG_RESOLUTION_ENV, &v, "positive number")?;
        }
        if let Some(v) = var(GRAPHRAG_SEED_ENV) {
            self.community.seed = parse_env(GRAPHRAG_SEED_ENV, &v, "unsigned integer")?;
        }
        if let Some(v) = var(GRAPHRAG_CHUNK_SIZE_ENV) {
            self.chunking.chunk_size = parse_env(GRAPHRAG_CHUNK_SIZE_ENV, &v, "positive integer")?;
        }
        if let Some(v) = var(GRAPHRAG_CHUNK_OVERLAP_ENV) {
            self.chunking.chunk_overlap = parse_env(GRAPHRAG_CHUNK_OVERLAP_ENV, &v, "integer")?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.extraction.concurrency == 0
            || self.summarization.concurrency == 0
            || self.query.concurrency == 0
        {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        let gamma = self.community.resolution;
        if !(gamma.is_finite() && gamma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "community resolution must be a positive number, got {gamma}"
            )));
        }
        if self.generation.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.summarization.max_input_chars < 200 {
            return Err(ConfigError::Invalid(
                "summarization.max_input_chars must be at least 200".into(),
            ));
        }
        if self.generation.model.trim().is_empty() {
            return Err(ConfigError::Invalid("generation.model is empty".into()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    name: &'static str,
    value: &str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        name,
        value: value.to_string(),
        expected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let c = PipelineConfig::default();
        c.validate().unwrap();
        assert_eq!(c.generation.backend, Backend::Ollama);
        assert_eq!(c.community.min_split_size, 5);
        assert_eq!(c.generation.timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn partial_json_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("graphrag.json");
        std::fs::write(
            &path,
            r#"{ "community": { "resolution": 0.5 }, "generation": { "backend": "openai", "model": "gpt-4o-mini" } }"#,
        )
        .unwrap();
        let c = PipelineConfig::from_json_file(&path).unwrap();
        assert_eq!(c.community.resolution, 0.5);
        assert_eq!(c.community.seed, 42);
        assert_eq!(c.generation.backend, Backend::OpenAi);
        assert_eq!(c.generation.max_attempts, 3);
        assert_eq!(c.chunking, TextSplitter::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut c = PipelineConfig::default();
        c.apply_env_with(env(&[
            (GRAPHRAG_BACKEND_ENV, "Anthropic"),
            (GRAPHRAG_CONCURRENCY_ENV, "8"),
            (GRAPHRAG_LLM_TIMEOUT_SECS_ENV, "0"),
            (GRAPHRAG_SEED_ENV, "7"),
            (OLLAMA_HOST_ENV, "gpu-box:11434"),
        ]))
        .unwrap();
        assert_eq!(c.generation.backend, Backend::Anthropic);
        assert_eq!(c.extraction.concurrency, 8);
        assert_eq!(c.query.concurrency, 8);
        assert_eq!(c.generation.timeout(), None);
        assert_eq!(c.community.seed, 7);
        assert_eq!(c.generation.ollama_host.as_deref(), Some("gpu-box:11434"));
    }

    #[test]
    fn graphrag_ollama_host_wins_over_standard_variable() {
        let mut c = PipelineConfig::default();
        c.apply_env_with(env(&[(OLLAMA_HOST_ENV, "a"), (GRAPHRAG_OLLAMA_HOST_ENV, "b")]))
            .unwrap();
        assert_eq!(c.generation.ollama_host.as_deref(), Some("b"));
    }

    #[test]
    fn bad_env_values_are_reported() {
        let mut c = PipelineConfig::default();
        let err = c
            .apply_env_with(env(&[(GRAPHRAG_RESOLUTION_ENV, "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { name, .. } if name == GRAPHRAG_RESOLUTION_ENV));
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut c = PipelineConfig::default();
        c.chunking.chunk_overlap = c.chunking.chunk_size;
        assert!(c.validate().is_err());

        let mut c = PipelineConfig::default();
        c.community.resolution = 0.0;
        assert!(c.validate().is_err());

        let mut c = PipelineConfig::default();
        c.query.concurrency = 0;
        assert!(c.validate().is_err());
    }

    #[test]
    fn retry_policy_from_config() {
        let g = GenerationConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 50,
            ..GenerationConfig::default()
        };
        let p = g.retry_policy();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.initial_delay, Duration::from_millis(100));
        assert_eq!(p.max_delay, Duration::from_millis(100));
    }
}
