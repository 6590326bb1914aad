//! # graphrag-llm
//!
//! Everything that talks to a language model:
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌──────────────────┐
//! │ IndexPipeline│──►│ CommunitySummarizer│   │ QuerySynthesizer │
//! └──────┬───────┘   └─────────┬──────────┘   └────────┬─────────┘
//!        └─────────────────────┼───────────────────────┘
//!                              ▼
//!                   Arc<dyn TextGenerator>
//!                   ResilientGenerator (timeout + retry)
//!                              ▼
//!                 ollama │ openai │ anthropic (features)
//! ```
//!
//! Pipeline stages only see the [`TextGenerator`] trait, so tests drive them
//! with [`ScriptedGenerator`] or [`FnGenerator`] and no network.

pub mod config;
pub mod error;
pub mod generation;
pub mod index;
pub mod prompts;
pub mod providers;
pub mod query;
pub mod resilient;
pub mod summarize;

pub use config::{
    ConfigError, ExtractionConfig, GenerationConfig, PipelineConfig, QueryConfig,
    SummarizationConfig, DEFAULT_MODEL, SUMMARY_FAILURE_PLACEHOLDER,
};
pub use error::{GenerationError, IndexError, QueryError};
pub use generation::{FnGenerator, GenerationRequest, ScriptedGenerator, TextGenerator};
pub use index::{
    ArtifactPaths, ExtractionReport, IndexOutput, IndexPipeline, IndexReport, GRAPH_GML_FILE,
    GRAPH_JSON_FILE, SUMMARIES_FILE,
};
pub use providers::{build_generator, Backend};
pub use query::{IntermediateAnswer, MapOutcome, QuerySynthesizer, SynthesizedAnswer};
pub use resilient::{ResilientGenerator, RetryPolicy};
pub use summarize::{render_community, CommunitySummarizer, RenderedCommunity, SummaryBatch};
