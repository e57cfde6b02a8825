use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// Formats text can be pulled out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    /// Guess the format from a file name, a MIME type and the leading
    /// bytes. Anything not recognizably PDF is treated as text.
    ///
    /// # Examples
    ///
    /// ```
    /// use docchat::extract::DocumentKind;
    ///
    /// assert_eq!(DocumentKind::detect(Some("a.PDF"), None, b""), DocumentKind::Pdf);
    /// assert_eq!(DocumentKind::detect(None, None, b"%PDF-1.7"), DocumentKind::Pdf);
    /// assert_eq!(DocumentKind::detect(Some("notes.md"), None, b"# hi"), DocumentKind::Text);
    /// ```
    pub fn detect(
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: &[u8],
    ) -> Self {
        let by_extension = file_name
            .and_then(|name| Path::new(name).extension())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        let by_mime = content_type
            .is_some_and(|mime| mime.eq_ignore_ascii_case("application/pdf"));

        if by_extension || by_mime || bytes.starts_with(b"%PDF-") {
            DocumentKind::Pdf
        } else {
            DocumentKind::Text
        }
    }
}

/// Extract the text of a document held in memory.
///
/// Returns [`Error::EmptyExtraction`] when the document holds no text
/// (e.g. a scanned PDF without a text layer).
pub fn extract_text(
    source_document: &str,
    kind: DocumentKind,
    bytes: &[u8],
) -> Result<String> {
    let text = match kind {
        // Pages come back separated by form feeds.
        DocumentKind::Pdf => pdf_extract::extract_text_from_mem(bytes)
            .map_err(|e| Error::Extraction {
                source_document: source_document.to_string(),
                reason: e.to_string(),
            })?
            .replace('\x0c', "\n"),
        DocumentKind::Text => std::str::from_utf8(bytes)
            .map_err(|e| Error::Extraction {
                source_document: source_document.to_string(),
                reason: format!("not valid UTF-8: {e}"),
            })?
            .to_string(),
    };

    if text.trim().is_empty() {
        return Err(Error::EmptyExtraction {
            source_document: source_document.to_string(),
        });
    }
    debug!(source_document, ?kind, chars = text.len(), "extracted text");
    Ok(text)
}

/// [`extract_text`] on a blocking thread; PDF parsing is CPU-bound.
pub async fn extract_text_blocking(
    source_document: String,
    kind: DocumentKind,
    bytes: Vec<u8>,
) -> Result<String> {
    tokio::task::spawn_blocking(move || {
        extract_text(&source_document, kind, &bytes)
    })
    .await?
}
