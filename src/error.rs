// src/error.rs

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The endpoint was unreachable or answered with a non-success status.
    #[error("request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },
    /// A Content-Disposition value carried no usable filename. Callers fall back to a default.
    #[error("could not parse filename from '{0}'")]
    FilenameUnparseable(String),
    #[error("a batch run is already in progress")]
    BatchAlreadyRunning,
    #[error("url does not point to a playlist")]
    NotACollection,
    #[error("url does not point to a single video")]
    NotASingleItem,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("configuration error: {message}")]
    Config { message: String },
    #[error("integrity check failed: {0}")]
    Integrity(#[from] crate::integrity::IntegrityError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }
}
