use std::path::PathBuf;

/// Errors raised while loading or segmenting a source document.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("PDF support not enabled (rebuild with --features pdf)")]
    PdfFeatureDisabled,
    #[error("document `{0}` contains no text")]
    EmptyDocument(String),
    #[error("chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})")]
    InvalidSplitter {
        chunk_size: usize,
        chunk_overlap: usize,
    },
}
