use crate::error::IngestError;
use lopdf::Document;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PageText {
    pub number: u32,
    pub text: String,
}

pub trait PdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError>;
}

#[derive(Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let document =
            Document::load(path).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            match document.extract_text(&[page_no]) {
                Ok(text) if !text.trim().is_empty() => {
                    debug!(page = page_no, chars = text.len(), "extracted page text");
                    pages.push(PageText {
                        number: page_no,
                        text,
                    });
                }
                Ok(_) => {
                    warn!(page = page_no, path = %path.display(), "no text on page");
                }
                Err(error) => {
                    warn!(page = page_no, path = %path.display(), error = %error, "page extraction failed");
                }
            }
        }

        Ok(pages)
    }
}

pub fn join_pages(pages: &[PageText]) -> String {
    pages
        .iter()
        .map(|page| page.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Best-effort full text of a document. Primary extraction runs page by page
/// through lopdf; when it errors or yields only whitespace, `pdftotext` is
/// tried as a subprocess. A document that defeats both strategies degrades to
/// an empty string rather than failing the run.
pub async fn extract_text(path: &Path) -> String {
    match LopdfExtractor::default().extract_pages(path) {
        Ok(pages) => {
            let text = join_pages(&pages);
            info!(
                path = %path.display(),
                pages = pages.len(),
                chars = text.len(),
                "primary pdf extraction complete"
            );
            if text.trim().is_empty() {
                warn!(path = %path.display(), "primary extraction yielded no text, falling back to pdftotext");
                extract_with_pdftotext(path).await
            } else {
                text
            }
        }
        Err(error) => {
            warn!(path = %path.display(), error = %error, "primary pdf extraction failed, falling back to pdftotext");
            extract_with_pdftotext(path).await
        }
    }
}

async fn extract_with_pdftotext(path: &Path) -> String {
    let output = Command::new("pdftotext")
        .arg("-raw")
        .arg(path)
        .arg("-")
        .output()
        .await;

    match output {
        Ok(output) if output.status.success() => {
            let text = String::from_utf8_lossy(&output.stdout).into_owned();
            info!(path = %path.display(), chars = text.len(), "pdftotext extraction complete");
            if text.trim().is_empty() {
                warn!(path = %path.display(), "pdftotext yielded no text");
            }
            text
        }
        Ok(output) => {
            error!(path = %path.display(), status = %output.status, "pdftotext exited with failure");
            String::new()
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            error!("pdftotext not found; install poppler-utils to enable the fallback extractor");
            String::new()
        }
        Err(error) => {
            error!(path = %path.display(), error = %error, "unable to run pdftotext");
            String::new()
        }
    }
}
