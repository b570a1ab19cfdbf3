use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("unsupported source reference: {0}")]
    UnsupportedSource(String),

    #[error("download of {url} failed: {details}")]
    Download { url: String, details: String },

    #[error("download of {url} timed out")]
    DownloadTimeout { url: String },
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("authentication rejected by {backend}")]
    Auth { backend: String },

    #[error("request to {backend} timed out")]
    Timeout { backend: String },

    #[error("http error from {backend}: {source}")]
    Http {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("request failed: {0}")]
    Request(String),
}

impl ServiceError {
    /// Maps a transport failure, keeping timeouts as their own kind.
    pub fn transport(backend: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            ServiceError::Timeout {
                backend: backend.to_string(),
            }
        } else {
            ServiceError::Http {
                backend: backend.to_string(),
                source,
            }
        }
    }

    /// Credential failures abort the run; everything else degrades.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Auth { .. })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;
