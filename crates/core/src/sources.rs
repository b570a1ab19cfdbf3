use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Client;
use tracing::info;
use url::Url;

use crate::error::IngestError;

/// Resolves a document to a local path: a pre-supplied file wins, otherwise
/// the source reference is fetched over http(s) into a kept temp file.
pub async fn resolve_source(
    file: Option<&Path>,
    source: &str,
    timeout: Duration,
) -> Result<PathBuf, IngestError> {
    match file {
        Some(path) => Ok(path.to_path_buf()),
        None => download_pdf(source, timeout).await,
    }
}

pub async fn download_pdf(source: &str, timeout: Duration) -> Result<PathBuf, IngestError> {
    let url = Url::parse(source)?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(IngestError::UnsupportedSource(source.to_string()));
    }

    let client = Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|error| IngestError::Download {
            url: source.to_string(),
            details: error.to_string(),
        })?;

    let response = client
        .get(url)
        .send()
        .await
        .map_err(|error| classify(source, error))?;

    if !response.status().is_success() {
        return Err(IngestError::Download {
            url: source.to_string(),
            details: response.status().to_string(),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|error| classify(source, error))?;

    let mut file = tempfile::Builder::new().suffix(".pdf").tempfile()?;
    file.write_all(&bytes)?;
    let (_, path) = file.keep().map_err(|error| IngestError::Io(error.error))?;

    info!(url = source, bytes = bytes.len(), path = %path.display(), "downloaded pdf");
    Ok(path)
}

fn classify(source: &str, error: reqwest::Error) -> IngestError {
    if error.is_timeout() {
        IngestError::DownloadTimeout {
            url: source.to_string(),
        }
    } else {
        IngestError::Download {
            url: source.to_string(),
            details: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_prefers_the_supplied_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("sheet.pdf");
        std::fs::write(&path, b"%PDF-1.4\n%fake").expect("write fixture");

        let resolved = resolve_source(
            Some(path.as_path()),
            "https://funds.example/sheet.pdf",
            Duration::from_secs(5),
        )
        .await
        .expect("local file should resolve");
        assert_eq!(resolved, path);
    }

    #[tokio::test]
    async fn non_http_source_is_rejected() {
        let result = download_pdf("ftp://funds.example/sheet.pdf", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IngestError::UnsupportedSource(_))));
    }

    #[tokio::test]
    async fn malformed_source_is_a_url_error() {
        let result = download_pdf("not a url", Duration::from_secs(5)).await;
        assert!(matches!(result, Err(IngestError::Url(_))));
    }
}
