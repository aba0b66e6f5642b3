//! Per-user append-only activity log
//!
//! Each user gets `<root>/<user key>/log.json` holding `{ "logs": [...] }`.
//! Appends rewrite the whole document, so writes to one file are serialized
//! through a per-path lock.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const LOG_FILE_NAME: &str = "log.json";

/// Errors that can occur while reading or writing an activity log
#[derive(Error, Debug)]
pub enum ActivityLogError {
    /// Filesystem error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    /// The file exists but is not a `{ "logs": [...] }` document
    #[error("Corrupt activity log at {}", .0.display())]
    Corrupt(PathBuf),
}

/// Location of one user's activity log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogHandle {
    path: PathBuf,
}

impl LogHandle {
    /// Path of the underlying JSON file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A single timestamped entry
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// When the event happened
    pub event_time: DateTime<Local>,
    /// What happened
    pub action: String,
    /// Relayed file identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    /// Relayed file size in megabytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,
}

/// Record content before it is timestamped
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    /// What happened
    pub action: String,
    /// Identifier and size of the file involved, if any
    pub file: Option<(String, f64)>,
}

impl LogEntry {
    /// An entry with only an action
    #[must_use]
    pub fn action(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            file: None,
        }
    }

    /// An entry describing a file
    #[must_use]
    pub fn with_file(action: impl Into<String>, file_id: impl Into<String>, size_mb: f64) -> Self {
        Self {
            action: action.into(),
            file: Some((file_id.into(), size_mb)),
        }
    }

    fn into_record(self) -> LogRecord {
        let (file_id, file_size_mb) = match self.file {
            Some((id, size)) => (Some(id), Some(size)),
            None => (None, None),
        };
        LogRecord {
            event_time: Local::now(),
            action: self.action,
            file_id,
            file_size_mb,
        }
    }
}

// Prior records are kept as raw JSON so rewriting never alters them.
#[derive(Debug, Default, Serialize, Deserialize)]
struct LogDocument {
    logs: Vec<serde_json::Value>,
}

/// Store of per-user activity logs under one root directory
#[derive(Debug)]
pub struct ActivityLog {
    root: PathBuf,
    // Only paths with a writer in flight have an entry.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl ActivityLog {
    /// Create a store rooted at `root`. Nothing is touched on disk yet.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Root directory of this store
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the log directory and file for `user_key` if missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or file cannot be created.
    pub async fn ensure_log(&self, user_key: &str) -> Result<LogHandle, ActivityLogError> {
        let dir = self.root.join(user_key);
        tokio::fs::create_dir_all(&dir).await?;

        let path = dir.join(LOG_FILE_NAME);
        let lock = self.lock_for(&path).await;
        let guard = lock.lock().await;
        let created = create_empty(&path).await;
        drop(guard);
        self.release(&path, lock).await;

        created.map(|()| LogHandle { path })
    }

    /// Append one timestamped record and rewrite the document.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or written, or if the
    /// existing content is not an activity log. A corrupt file is left as is.
    pub async fn append(
        &self,
        handle: &LogHandle,
        entry: LogEntry,
    ) -> Result<(), ActivityLogError> {
        let lock = self.lock_for(&handle.path).await;
        let guard = lock.lock().await;
        let written = self.rewrite_with(&handle.path, entry).await;
        drop(guard);
        self.release(&handle.path, lock).await;
        written
    }

    async fn rewrite_with(&self, path: &Path, entry: LogEntry) -> Result<(), ActivityLogError> {
        let mut document = self.load(path).await?;
        document
            .logs
            .push(serde_json::to_value(entry.into_record())?);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, render(&document)?).await?;
        Ok(())
    }

    /// Read every record in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or a record does not parse.
    pub async fn read(&self, handle: &LogHandle) -> Result<Vec<LogRecord>, ActivityLogError> {
        let document = self.load(&handle.path).await?;
        document
            .logs
            .into_iter()
            .map(|value| serde_json::from_value(value).map_err(ActivityLogError::from))
            .collect()
    }

    async fn load(&self, path: &Path) -> Result<LogDocument, ActivityLogError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogDocument::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path = %path.display(), error = %e, "Activity log is not a valid document");
            ActivityLogError::Corrupt(path.to_path_buf())
        })
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    // Drops the map entry once no other writer holds or waits on it.
    async fn release(&self, path: &Path, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        if Arc::strong_count(&lock) == 2 {
            locks.remove(path);
        }
    }
}

// The file is created and filled while the caller holds its path lock, so no
// appender ever observes it empty.
async fn create_empty(path: &Path) -> Result<(), ActivityLogError> {
    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    file.write_all(&render(&LogDocument::default())?).await?;
    file.flush().await?;
    debug!(path = %path.display(), "Created activity log");
    Ok(())
}

fn render(document: &LogDocument) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    document.serialize(&mut serializer)?;
    Ok(buf)
}

/// Best-effort writer bound to one user's log.
///
/// Failures are reported through `tracing` and never returned, so logging
/// problems cannot abort a relay run.
#[derive(Debug, Clone, Copy)]
pub struct Journal<'a> {
    log: &'a ActivityLog,
    handle: Option<&'a LogHandle>,
}

impl<'a> Journal<'a> {
    /// Journal writing to `handle`, or discarding entries when `None`
    #[must_use]
    pub const fn new(log: &'a ActivityLog, handle: Option<&'a LogHandle>) -> Self {
        Self { log, handle }
    }

    /// Append `entry`, logging instead of failing
    pub async fn record(&self, entry: LogEntry) {
        let Some(handle) = self.handle else {
            debug!(action = %entry.action, "No activity log destination, entry dropped");
            return;
        };
        if let Err(e) = self.log.append(handle, entry).await {
            warn!(path = %handle.path.display(), error = %e, "Failed to append activity log entry");
        }
    }
}
