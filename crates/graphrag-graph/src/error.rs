use std::path::PathBuf;

/// Errors raised while loading, validating or persisting graph artifacts.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("unsupported graph artifact version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("duplicate entity key `{0}` in graph artifact")]
    DuplicateEntity(String),
    #[error("relationship references unknown entity `{0}`")]
    DanglingEdge(String),
    #[error("more than one relationship between `{0}` and `{1}` in graph artifact")]
    DuplicateRelationship(String, String),
    #[error("self-loop on entity `{0}` in graph artifact")]
    SelfLoop(String),
    #[error("duplicate community id {0} in summary set")]
    DuplicateCommunity(u32),
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        GraphError::Json {
            path: path.into(),
            source,
        }
    }
}
