use std::time::Duration;

use graphrag_graph::GraphError;
use graphrag_ingest::IngestError;

/// Failure of a single generation call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    /// Network failure, 5xx, dropped connection.
    #[error("transient generation failure: {0}")]
    Transient(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    /// Content filtered, invalid input, authentication. Never retried.
    #[error("permanent generation failure: {0}")]
    Permanent(String),
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    /// Server-suggested wait before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Fatal outcomes of an indexing run. No artifact is written for any of them.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("document produced no chunks")]
    NoChunks,
    #[error(
        "extraction produced an empty graph ({chunks} chunks, {yield_zero} yielded no triples, {failed} failed)"
    )]
    EmptyGraph {
        chunks: usize,
        yield_zero: usize,
        failed: usize,
    },
    #[error("community detection produced no communities")]
    EmptyPartition,
    #[error("all {communities} community summaries failed")]
    NoSummaries { communities: usize },
    #[error("graph aggregation task aborted: {0}")]
    Aborted(String),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Ingest(#[from] IngestError),
}

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Every map call failed (or there was nothing to map over).
    #[error("no answer derivable: all {communities} community calls failed")]
    NoAnswerDerivable { communities: usize },
    #[error("reduce call failed: {0}")]
    Reduce(#[source] GenerationError),
}
