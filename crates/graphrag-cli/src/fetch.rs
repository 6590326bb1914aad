//! Remote document download for `graphrag index --url`.

use anyhow::{anyhow, Context, Result};
use graphrag_ingest::{Document, DocumentFormat};

/// Download `url` and decode it; the format is sniffed from the bytes,
/// with the URL's extension as a hint.
#[cfg(feature = "fetch")]
pub async fn fetch_document(url: &str) -> Result<Document> {
    let resp = reqwest::get(url)
        .await
        .with_context(|| format!("failed to download {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("download of {url} failed: http {status}"));
    }
    let is_pdf_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("application/pdf"));
    let bytes = resp
        .bytes()
        .await
        .with_context(|| format!("failed to read body of {url}"))?;

    let (document_id, ext_hint) = id_and_hint(url);
    let hint = if is_pdf_type { Some(DocumentFormat::Pdf) } else { ext_hint };
    let format = DocumentFormat::sniff(&bytes, hint);
    tracing::info!(url, bytes = bytes.len(), ?format, "downloaded document");

    Document::from_bytes(document_id, &bytes, format)
        .with_context(|| format!("failed to decode document from {url}"))
}

#[cfg(not(feature = "fetch"))]
pub async fn fetch_document(url: &str) -> Result<Document> {
    Err(anyhow!(
        "cannot download {url}: graphrag was built without the `fetch` feature"
    ))
}

/// Document id and format hint from the last path segment of `url`.
pub fn id_and_hint(url: &str) -> (String, Option<DocumentFormat>) {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .unwrap_or("document");
    match segment.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => match DocumentFormat::from_extension(ext) {
            Some(format) => (stem.to_string(), Some(format)),
            None => (segment.to_string(), None),
        },
        _ => (segment.to_string(), None),
    }
}
