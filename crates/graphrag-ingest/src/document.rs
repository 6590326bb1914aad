//! Source document loading
//!
//! Plain text and markdown are read as-is. PDFs go through `pdf-extract`
//! when the `pdf` feature is enabled; without it they are rejected with
//! [`IngestError::PdfFeatureDisabled`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::chunking::{Chunk, TextSplitter};
use crate::error::IngestError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "txt" | "text" => Some(Self::PlainText),
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    /// Guess from content: the PDF magic wins, otherwise the hint, otherwise text.
    pub fn sniff(bytes: &[u8], hint: Option<Self>) -> Self {
        if bytes.starts_with(b"%PDF-") {
            Self::Pdf
        } else {
            match hint {
                Some(Self::Pdf) | None => Self::PlainText,
                Some(other) => other,
            }
        }
    }
}

/// A loaded source document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub format: DocumentFormat,
    pub text: String,
}

impl Document {
    pub fn from_text(document_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            format: DocumentFormat::PlainText,
            text: text.into(),
        }
    }

    /// Decode raw bytes (e.g. a downloaded file).
    pub fn from_bytes(
        document_id: impl Into<String>,
        bytes: &[u8],
        format: DocumentFormat,
    ) -> Result<Self, IngestError> {
        let document_id = document_id.into();
        let text = match format {
            DocumentFormat::Pdf => pdf_text_from_bytes(bytes)?,
            DocumentFormat::PlainText | DocumentFormat::Markdown => {
                String::from_utf8_lossy(bytes).into_owned()
            }
        };
        Self::checked(document_id, format, text)
    }

    pub fn chunks(&self, splitter: &TextSplitter) -> Result<Vec<Chunk>, IngestError> {
        splitter.split(&self.document_id, &self.text)
    }

    fn checked(document_id: String, format: DocumentFormat, text: String) -> Result<Self, IngestError> {
        if text.trim().is_empty() {
            return Err(IngestError::EmptyDocument(document_id));
        }
        Ok(Self {
            document_id,
            format,
            text,
        })
    }
}

/// Load a document from disk. The document id is the file stem.
pub fn load_document(path: &Path) -> Result<Document, IngestError> {
    let format = DocumentFormat::from_path(path).ok_or_else(|| {
        IngestError::UnsupportedFormat(
            path.extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        )
    })?;
    let document_id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let text = match format {
        DocumentFormat::Pdf => pdf_text_from_file(path)?,
        DocumentFormat::PlainText | DocumentFormat::Markdown => {
            std::fs::read_to_string(path).map_err(|source| IngestError::Io {
                path: path.to_path_buf(),
                source,
            })?
        }
    };

    tracing::info!(
        path = %path.display(),
        ?format,
        chars = text.chars().count(),
        "loaded document"
    );
    Document::checked(document_id, format, text)
}

#[cfg(feature = "pdf")]
fn pdf_text_from_file(path: &Path) -> Result<String, IngestError> {
    pdf_extract::extract_text(path).map_err(|e| IngestError::Pdf(e.to_string()))
}

#[cfg(feature = "pdf")]
fn pdf_text_from_bytes(bytes: &[u8]) -> Result<String, IngestError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| IngestError::Pdf(e.to_string()))
}

#[cfg(not(feature = "pdf"))]
fn pdf_text_from_file(_path: &Path) -> Result<String, IngestError> {
    Err(IngestError::PdfFeatureDisabled)
}

#[cfg(not(feature = "pdf"))]
fn pdf_text_from_bytes(_bytes: &[u8]) -> Result<String, IngestError> {
    Err(IngestError::PdfFeatureDisabled)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(DocumentFormat::from_path(Path::new("a/b.MD")), Some(DocumentFormat::Markdown));
        assert_eq!(DocumentFormat::from_path(Path::new("paper.pdf")), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_path(Path::new("notes")), None);
    }

    #[test]
    fn sniff_prefers_pdf_magic() {
        assert_eq!(DocumentFormat::sniff(b"%PDF-1.7 ...", None), DocumentFormat::Pdf);
        assert_eq!(
            DocumentFormat::sniff(b"# Title", Some(DocumentFormat::Markdown)),
            DocumentFormat::Markdown
        );
        assert_eq!(DocumentFormat::sniff(b"plain", Some(DocumentFormat::Pdf)), DocumentFormat::PlainText);
    }

    #[test]
    fn empty_bytes_are_rejected() {
        assert!(matches!(
            Document::from_bytes("d", b"  \n ", DocumentFormat::PlainText),
            Err(IngestError::EmptyDocument(id)) if id == "d"
        ));
    }

    #[cfg(not(feature = "pdf"))]
    #[test]
    fn pdf_without_feature_is_an_error() {
        assert!(matches!(
            Document::from_bytes("d", b"%PDF-1.4", DocumentFormat::Pdf),
            Err(IngestError::PdfFeatureDisabled)
        ));
    }
}
