// src/transfer.rs

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{Artifact, MediaFormat, TransferRequest};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

/// Upper bound for preallocating a payload buffer from Content-Length.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Why a single transfer did not produce an artifact.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct TransferError {
    pub reason: String,
}

impl TransferError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

pub type TransferResult = std::result::Result<Artifact, TransferError>;

/// Performs one download for one item. Implementations convert every
/// endpoint failure into a [`TransferError`] instead of panicking or
/// bubbling transport errors.
#[async_trait]
pub trait TransferClient: Send + Sync {
    async fn fetch(&self, request: &TransferRequest) -> TransferResult;
}

#[derive(Serialize)]
struct DownloadBody<'a> {
    url: &'a str,
    format: MediaFormat,
    quality: &'a str,
}

/// Talks to the `/download` endpoint of the media service.
#[derive(Debug, Clone)]
pub struct HttpTransferClient {
    client: Client,
    endpoint: String,
}

impl HttpTransferClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            client: config.http_client()?,
            endpoint: config.endpoint("download"),
        })
    }

    /// Builds a client around an existing reqwest client, e.g. to share its connection pool.
    pub fn with_client(client: Client, config: &Config) -> Self {
        Self {
            client,
            endpoint: config.endpoint("download"),
        }
    }

    async fn download_once(&self, request: &TransferRequest) -> TransferResult {
        let body = DownloadBody {
            url: &request.url,
            format: request.format,
            quality: request.quality.as_deref().unwrap_or(""),
        };

        debug!(
            url = %request.url,
            format = %request.format,
            quality = body.quality,
            "requesting download"
        );
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransferError::new(format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let text = text.trim();
            return Err(TransferError::new(if text.is_empty() {
                format!("server returned {status}")
            } else {
                format!("server returned {status}: {text}")
            }));
        }

        let filename = suggested_filename(resp.headers(), &request.fallback_filename);
        let capacity = resp.content_length().unwrap_or(0).min(MAX_PREALLOC) as usize;
        let mut payload = Vec::with_capacity(capacity);

        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let bytes =
                chunk.map_err(|e| TransferError::new(format!("body read failed: {e}")))?;
            payload.extend_from_slice(&bytes);
        }

        debug!(%filename, bytes = payload.len(), "download finished");
        Ok(Artifact { filename, payload })
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn fetch(&self, request: &TransferRequest) -> TransferResult {
        let result = self.download_once(request).await;
        if let Err(e) = &result {
            warn!(url = %request.url, reason = %e, "transfer failed");
        }
        result
    }
}

/// Picks the filename announced by the server, or `fallback` when there is none.
pub fn suggested_filename(headers: &HeaderMap, fallback: &str) -> String {
    let Some(value) = headers.get(CONTENT_DISPOSITION) else {
        return fallback.to_string();
    };
    let parsed = value
        .to_str()
        .map_err(|_| {
            Error::FilenameUnparseable(String::from_utf8_lossy(value.as_bytes()).into_owned())
        })
        .and_then(filename_from_disposition);
    match parsed {
        Ok(name) => name,
        Err(e) => {
            debug!(error = %e, %fallback, "using fallback filename");
            fallback.to_string()
        }
    }
}

/// Extracts the filename from a Content-Disposition value.
///
/// Accepts quoted and unquoted `filename=` as well as RFC 5987 `filename*=`,
/// which wins when both are present.
pub fn filename_from_disposition(value: &str) -> Result<String> {
    let mut plain = None;
    let mut extended = None;

    for param in split_params(value) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(raw)),
            "filename*" => extended = decode_extended(&unquote(raw)),
            _ => {}
        }
    }

    extended
        .into_iter()
        .chain(plain)
        .find(|name| !name.trim().is_empty())
        .ok_or_else(|| Error::FilenameUnparseable(value.to_string()))
}

// Splits on ';' outside of double quotes. Inside quotes `\x` escapes `x`.
fn split_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

// Unwraps a quoted-string, resolving backslash escapes. Unquoted values only
// lose stray surrounding quotes.
fn unquote(raw: &str) -> String {
    let raw = raw.trim();
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.trim_matches(|c| c == '"' || c == '\'').to_string();
    };

    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

// charset'lang'percent-encoded
fn decode_extended(raw: &str) -> Option<String> {
    let encoded = raw.rsplit_once('\'').map_or(raw, |(_, rest)| rest);
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}
