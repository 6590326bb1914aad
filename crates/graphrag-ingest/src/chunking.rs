//! Overlapping character windows over a document.
//!
//! Windows are measured in characters, not bytes, and are cut at the last
//! whitespace inside the window when there is one. Consecutive chunks share
//! roughly `chunk_overlap` characters so a relationship stated across a
//! boundary is seen whole by at least one extraction call.

use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// One text unit handed to the extraction prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    /// Position in the document's chunk sequence.
    pub index: usize,
    pub text: String,
    /// Byte offsets of `text` in the source document.
    pub start: usize,
    pub end: usize,
}

impl Chunk {
    pub fn new(document_id: &str, index: usize, text: impl Into<String>, start: usize, end: usize) -> Self {
        Self {
            chunk_id: format!("{}_{}", document_id, index),
            document_id: document_id.to_string(),
            index,
            text: text.into(),
            start,
            end,
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSplitter {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 100,
        }
    }
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, IngestError> {
        let splitter = Self {
            chunk_size,
            chunk_overlap,
        };
        splitter.validate()?;
        Ok(splitter)
    }

    pub fn validate(&self) -> Result<(), IngestError> {
        if self.chunk_size == 0 || self.chunk_overlap >= self.chunk_size {
            return Err(IngestError::InvalidSplitter {
                chunk_size: self.chunk_size,
                chunk_overlap: self.chunk_overlap,
            });
        }
        Ok(())
    }

    /// Split `text` into chunks. Whitespace-only input yields no chunks.
    pub fn split(&self, document_id: &str, text: &str) -> Result<Vec<Chunk>, IngestError> {
        self.validate()?;
        let len = text.len();
        let mut chunks = Vec::new();
        let mut start = skip_whitespace(text, 0);

        while start < len {
            let hard_end = advance_chars(text, start, self.chunk_size);
            let end = if hard_end >= len {
                len
            } else {
                match text[start..hard_end].rfind(char::is_whitespace) {
                    Some(i) if i > 0 => start + i,
                    _ => hard_end,
                }
            };

            let piece = text[start..end].trim_end();
            if !piece.is_empty() {
                chunks.push(Chunk::new(document_id, chunks.len(), piece, start, start + piece.len()));
            }
            if end >= len {
                break;
            }

            let mut next = retreat_chars(text, end, self.chunk_overlap);
            // Do not start inside a word: back up to its start, or skip it.
            if next > 0 && !starts_after_whitespace(text, next) {
                let word_start = word_start(text, next);
                next = if word_start > start {
                    word_start
                } else {
                    text[next..end]
                        .find(char::is_whitespace)
                        .map_or(end, |i| next + i)
                };
            }
            next = skip_whitespace(text, next);
            if next <= start {
                next = skip_whitespace(text, end);
            }
            start = next;
        }

        tracing::debug!(
            document_id,
            chunks = chunks.len(),
            chunk_size = self.chunk_size,
            chunk_overlap = self.chunk_overlap,
            "split document"
        );
        Ok(chunks)
    }
}

fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map_or(text.len(), |(i, _)| from + i)
}

fn retreat_chars(text: &str, from: usize, n: usize) -> usize {
    if n == 0 {
        return from;
    }
    text[..from]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map_or(0, |(i, _)| i)
}

fn skip_whitespace(text: &str, from: usize) -> usize {
    text[from..]
        .char_indices()
        .find(|(_, c)| !c.is_whitespace())
        .map_or(text.len(), |(i, _)| from + i)
}

fn word_start(text: &str, at: usize) -> usize {
    text[..at]
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
        .map_or(0, |(i, c)| i + c.len_utf8())
}

fn starts_after_whitespace(text: &str, at: usize) -> bool {
    text[..at].chars().next_back().map_or(true, char::is_whitespace)
}
