//! GraphRAG ingestion
//!
//! Everything between a source document and the triples the graph builder
//! consumes:
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌───────────┐       ┌───────────────────┐
//! │ document │───►│ TextSplitter │───►│ Vec<Chunk>│──LLM─►│ parse_extraction  │───► triples
//! │txt/md/pdf│    │ (overlapping)│    └───────────┘       │ (never fails)     │     + entities
//! └──────────┘    └──────────────┘                        └───────────────────┘
//! ```
//!
//! - `document`: load text from disk or bytes (PDF behind the `pdf` feature)
//! - `chunking`: fixed-size character windows with overlap, cut on whitespace
//! - `extraction`: tolerant parser for `A -> label -> B` completions

pub mod chunking;
pub mod document;
pub mod error;
pub mod extraction;

pub use chunking::{Chunk, TextSplitter};
pub use document::{load_document, Document, DocumentFormat};
pub use error::IngestError;
pub use extraction::{parse_extraction, Extraction};

// Re-exported so callers of the parser need only this crate.
pub use graphrag_graph::{EntityMention, Triple};
