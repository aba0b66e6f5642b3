//! Remote fetcher - streams a linked resource to a temporary file.
//!
//! The file identifier is taken from the link, substituted into the
//! download endpoint, and the response body is written chunk by chunk.
//! Every attempt and outcome is recorded in the user's activity journal.

use crate::activity::{Journal, LogEntry};
use crate::config::RelaySettings;
use crate::link::derive_file_id;
use anyhow::Context;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Bytes in one megabyte as reported to users.
pub const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;

/// Response bodies kept for diagnostics are cut to this many characters.
const MAX_ERROR_BODY_CHARS: usize = 1000;

/// Errors that can occur while fetching a resource
#[derive(Error, Debug)]
pub enum FetchError {
    /// The link has no trailing path segment to use as file ID
    #[error("The link does not contain a file ID.")]
    MissingIdentifier,
    /// The download service answered 503
    #[error("The server is temporarily unavailable (503). Please try again later.")]
    ServiceUnavailable,
    /// Any other unexpected answer from the download service
    #[error("Failed to download file. Status code: {status}")]
    DownloadFailed {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        body: String,
    },
    /// `Content-Length` was absent or zero
    #[error("The file size returned by the server is 0 bytes. The file might not be available.")]
    EmptyFile,
    /// The request or the body stream exceeded the timeout
    #[error("Download operation timed out: {0}")]
    NetworkTimeout(String),
    /// The service could not be reached or the connection broke
    #[error("A connection error occurred: {0}")]
    ConnectionError(String),
    /// The service answered with something that could not be decoded
    #[error("Failed to parse response from server. It may be down or returning an unexpected response. ({0})")]
    MalformedResponse(String),
    /// Writing the temporary file failed
    #[error("Failed to store the downloaded file: {0}")]
    Storage(#[from] std::io::Error),
}

impl FetchError {
    fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::NetworkTimeout(e.to_string())
        } else {
            Self::ConnectionError(e.to_string())
        }
    }

    /// Activity log action describing this failure
    #[must_use]
    pub fn log_action(&self) -> String {
        match self {
            Self::DownloadFailed { status, body } => {
                format!("Failed to download file. Status code: {status}, Response: {body}")
            }
            Self::NetworkTimeout(_) => "Download operation timed out.".to_string(),
            Self::ConnectionError(_) => "A connection error occurred.".to_string(),
            Self::MalformedResponse(detail) => format!("JSON decode error: {detail}"),
            other => format!("An error occurred: {other}"),
        }
    }
}

/// Temporary download that is deleted when dropped.
#[derive(Debug)]
pub struct TempDownload {
    path: PathBuf,
    armed: bool,
}

impl TempDownload {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Location on disk
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file now instead of on drop.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if removal fails; drop will try again.
    pub async fn remove(mut self) -> std::io::Result<()> {
        tokio::fs::remove_file(&self.path).await?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for TempDownload {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed temporary download"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove temporary download"),
        }
    }
}

/// A completed download
#[derive(Debug)]
pub struct DownloadedFile {
    /// Identifier derived from the link
    pub file_id: String,
    /// Size announced by the server
    pub size_bytes: u64,
    /// The temporary file holding the body
    pub file: TempDownload,
}

impl DownloadedFile {
    /// Size in megabytes rounded to two decimals
    #[must_use]
    pub fn size_mb(&self) -> f64 {
        round_megabytes(megabytes(self.size_bytes))
    }
}

/// Convert bytes to megabytes without rounding
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn megabytes(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MEGABYTE
}

/// Round a megabyte figure to two decimals, ties to even (`0.625` gives `0.62`)
#[must_use]
pub fn round_megabytes(mb: f64) -> f64 {
    (mb * 100.0).round_ties_even() / 100.0
}

/// Error document the download API may return instead of a file
#[derive(Debug, Deserialize)]
struct ApiErrorDocument {
    error: Option<String>,
    message: Option<String>,
}

/// HTTP client for the download API
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: reqwest::Client,
    endpoint: Url,
    download_dir: PathBuf,
}

impl RemoteFetcher {
    /// Create a fetcher from relay settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is not a valid URL or the HTTP
    /// client cannot be built.
    pub fn new(settings: &RelaySettings) -> anyhow::Result<Self> {
        let endpoint = Url::parse(&settings.download_api_url)
            .with_context(|| format!("Invalid download API URL: {}", settings.download_api_url))?;
        let client = reqwest::Client::builder()
            .timeout(settings.download_timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            download_dir: settings.download_dir(),
        })
    }

    /// Download URL for `file_id`
    #[must_use]
    pub fn endpoint_for(&self, file_id: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("id", file_id);
        url
    }

    /// Download the resource behind `url` into a temporary file.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] describing why no file was produced. The
    /// failure has already been written to `journal`.
    pub async fn fetch(
        &self,
        url: &str,
        journal: Journal<'_>,
    ) -> Result<DownloadedFile, FetchError> {
        match self.download(url, journal).await {
            Ok(downloaded) => {
                journal
                    .record(LogEntry::with_file(
                        "Downloaded file",
                        downloaded.file_id.clone(),
                        megabytes(downloaded.size_bytes),
                    ))
                    .await;
                Ok(downloaded)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "Download failed");
                journal.record(LogEntry::action(e.log_action())).await;
                Err(e)
            }
        }
    }

    async fn download(
        &self,
        url: &str,
        journal: Journal<'_>,
    ) -> Result<DownloadedFile, FetchError> {
        let file_id = derive_file_id(url).ok_or(FetchError::MissingIdentifier)?;
        let endpoint = self.endpoint_for(&file_id);

        journal
            .record(LogEntry::action(format!("Attempting to download from: {endpoint}")))
            .await;
        info!(file_id = %file_id, "Requesting download");

        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(FetchError::from_request)?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(FetchError::ServiceUnavailable);
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::DownloadFailed {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        if is_json(&response) {
            let bytes = response.bytes().await.map_err(FetchError::from_request)?;
            return Err(parse_error_document(&bytes));
        }

        let size_bytes = content_length(&response)?;
        let file = TempDownload::new(self.download_dir.join(format!(
            "downloaded_{}_{}.mp4",
            file_stem(&file_id),
            Uuid::new_v4().simple()
        )));

        let written = stream_to_file(response, file.path()).await?;
        if written != size_bytes {
            warn!(
                file_id = %file_id,
                expected = size_bytes,
                written,
                "Downloaded size differs from Content-Length"
            );
        }
        info!(file_id = %file_id, size_bytes, "Download complete");

        Ok(DownloadedFile {
            file_id,
            size_bytes,
            file,
        })
    }
}

async fn stream_to_file(response: Response, path: &Path) -> Result<u64, FetchError> {
    let mut out = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::from_request)?;
        out.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    out.flush().await?;

    Ok(written)
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.contains("json"))
}

fn content_length(response: &Response) -> Result<u64, FetchError> {
    let Some(value) = response.headers().get(CONTENT_LENGTH) else {
        return Err(FetchError::EmptyFile);
    };
    let size = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| FetchError::MalformedResponse(format!("invalid Content-Length {value:?}")))?;

    if size == 0 {
        Err(FetchError::EmptyFile)
    } else {
        Ok(size)
    }
}

fn parse_error_document(bytes: &[u8]) -> FetchError {
    match serde_json::from_slice::<ApiErrorDocument>(bytes) {
        Ok(doc) => FetchError::DownloadFailed {
            status: StatusCode::OK.as_u16(),
            body: doc
                .error
                .or(doc.message)
                .unwrap_or_else(|| truncate_body(&String::from_utf8_lossy(bytes))),
        },
        Err(e) => FetchError::MalformedResponse(e.to_string()),
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY_CHARS).collect()
}

fn file_stem(file_id: &str) -> String {
    file_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
