//! Relay pipeline
//!
//! Orchestrates one inbound message end to end:
//! validate → notify → fetch → send document → clean up → journal.
//! The chat platform is reached only through [`RelayTransport`].

use crate::activity::{ActivityLog, Journal, LogEntry};
use crate::config::RelaySettings;
use crate::fetcher::{FetchError, RemoteFetcher};
use crate::link::LinkValidator;
use crate::user::UserIdentity;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Reply sent when a message is not a supported link.
pub const REJECTION_TEXT: &str = "Please send a valid Terabox link.";
/// Provisional notice sent before the download starts.
pub const STARTED_TEXT: &str = "Started downloading...";

/// Errors reported by a chat transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The platform refused the operation, e.g. the message is already gone
    #[error("Request rejected by chat API: {0}")]
    Rejected(String),
    /// The request could not be completed
    #[error("Chat API request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Whether a failed message deletion can be silently ignored
    #[must_use]
    pub const fn is_ignorable(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Opaque reference to a message sent through a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoticeHandle(pub i32);

/// Outbound side of the chat platform, bound to one conversation
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Send a text reply
    async fn send_text(&self, text: &str) -> Result<NoticeHandle, TransportError>;
    /// Send a local file as a document with a caption
    async fn send_document(
        &self,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<(), TransportError>;
    /// Delete a previously sent message
    async fn delete_message(&self, notice: NoticeHandle) -> Result<(), TransportError>;
}

/// Pipeline stages of a relay run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStage {
    /// Message accepted for processing
    Received,
    /// Text is a supported link
    Validated,
    /// Fetch in progress
    Downloading,
    /// File is on local disk
    Downloaded,
    /// Document delivered
    Sent,
    /// Temporary file removed
    Cleaned,
    /// Text was not a supported link
    Rejected,
    /// A step failed
    Failed,
}

impl fmt::Display for RelayStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Sent => "sent",
            Self::Cleaned => "cleaned",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Errors that end a relay run
#[derive(Error, Debug)]
pub enum RelayError {
    /// The text is not a supported link
    #[error("Invalid link")]
    InvalidLink,
    /// The download failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// A reply or the document could not be delivered
    #[error(transparent)]
    Delivery(#[from] TransportError),
}

/// How a relay run ended
#[derive(Debug)]
pub enum RelayOutcome {
    /// Not a supported link; a rejection reply was sent
    Rejected,
    /// The document was delivered
    Delivered {
        /// Identifier shown in the caption
        file_id: String,
        /// Rounded size shown in the caption
        size_mb: f64,
    },
    /// The run failed after validation
    Failed {
        /// Stage at which the failure happened
        stage: RelayStage,
        /// Cause
        error: RelayError,
    },
}

impl RelayOutcome {
    /// Terminal pipeline stage
    #[must_use]
    pub const fn stage(&self) -> RelayStage {
        match self {
            Self::Rejected => RelayStage::Rejected,
            Self::Delivered { .. } => RelayStage::Cleaned,
            Self::Failed { .. } => RelayStage::Failed,
        }
    }
}

/// Render a megabyte figure; whole numbers keep one decimal (`2.0`).
#[must_use]
pub fn format_megabytes(size_mb: f64) -> String {
    if size_mb.fract() == 0.0 {
        format!("{size_mb:.1}")
    } else {
        format!("{size_mb}")
    }
}

/// Caption attached to a relayed document
#[must_use]
pub fn format_caption(file_id: &str, size_mb: f64, tag: &str) -> String {
    let caption = format!(
        "Video ID: {file_id}\nSize: {} MB {tag}",
        format_megabytes(size_mb)
    );
    caption.trim_end().to_string()
}

/// Download-and-relay pipeline shared by all conversations
#[derive(Debug)]
pub struct RelayPipeline {
    validator: LinkValidator,
    fetcher: RemoteFetcher,
    activity: ActivityLog,
    caption_tag: String,
}

impl RelayPipeline {
    /// Build a pipeline from settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the fetcher cannot be created.
    pub fn new(settings: &RelaySettings) -> anyhow::Result<Self> {
        Ok(Self {
            validator: LinkValidator::new(settings.link_marker.clone()),
            fetcher: RemoteFetcher::new(settings)?,
            activity: ActivityLog::new(settings.log_dir.clone()),
            caption_tag: settings.caption_tag.clone(),
        })
    }

    /// Activity log store used by this pipeline
    #[must_use]
    pub const fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Process one inbound message from `user`.
    ///
    /// Every failure is answered through `transport` and journaled; the
    /// returned outcome is informational.
    pub async fn handle_incoming<T>(
        &self,
        transport: &T,
        user: &UserIdentity,
        text: &str,
    ) -> RelayOutcome
    where
        T: RelayTransport + ?Sized,
    {
        let log_key = user.log_key();
        let handle = match self.activity.ensure_log(&log_key).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(user_id = user.id, log_key = %log_key, error = %e, "Activity log unavailable");
                None
            }
        };
        let journal = Journal::new(&self.activity, handle.as_ref());
        debug!(user_id = user.id, stage = %RelayStage::Received, "Relay run started");

        if !self.validator.is_supported(text) {
            info!(user_id = user.id, reason = %RelayError::InvalidLink, "Rejected message");
            if let Err(e) = transport.send_text(REJECTION_TEXT).await {
                warn!(user_id = user.id, error = %e, "Failed to send rejection reply");
            }
            journal
                .record(LogEntry::action("Invalid Terabox link received."))
                .await;
            return RelayOutcome::Rejected;
        }
        debug!(user_id = user.id, stage = %RelayStage::Validated, "Link accepted");

        match self.relay(transport, user, text, journal).await {
            Ok(outcome) => outcome,
            Err((stage, error)) => {
                error!(user_id = user.id, stage = %stage, error = %error, "Relay run failed");
                let reply = format!("Failed to download the file from {text}: {error}");
                if let Err(e) = transport.send_text(&reply).await {
                    warn!(user_id = user.id, error = %e, "Failed to send failure reply");
                }
                journal
                    .record(LogEntry::action(format!("Download error: {error}")))
                    .await;
                RelayOutcome::Failed { stage, error }
            }
        }
    }

    async fn relay<T>(
        &self,
        transport: &T,
        user: &UserIdentity,
        url: &str,
        journal: Journal<'_>,
    ) -> Result<RelayOutcome, (RelayStage, RelayError)>
    where
        T: RelayTransport + ?Sized,
    {
        let notice = transport
            .send_text(STARTED_TEXT)
            .await
            .map_err(|e| (RelayStage::Validated, RelayError::from(e)))?;

        debug!(user_id = user.id, stage = %RelayStage::Downloading, "Fetching");
        let downloaded = self
            .fetcher
            .fetch(url, journal)
            .await
            .map_err(|e| (RelayStage::Downloading, RelayError::from(e)))?;
        debug!(user_id = user.id, stage = %RelayStage::Downloaded, file_id = %downloaded.file_id, "Fetched");

        let size_mb = downloaded.size_mb();
        let caption = format_caption(&downloaded.file_id, size_mb, &self.caption_tag);
        let file_name = format!("{}.mp4", downloaded.file_id);
        let sent = transport
            .send_document(downloaded.file.path(), &file_name, &caption)
            .await;

        // The temporary file goes away on every path from here on
        let file_id = downloaded.file_id.clone();
        if let Err(e) = downloaded.file.remove().await {
            warn!(file_id = %file_id, error = %e, "Failed to remove temporary download");
        }
        sent.map_err(|e| (RelayStage::Downloaded, RelayError::from(e)))?;
        debug!(user_id = user.id, stage = %RelayStage::Sent, file_id = %file_id, "Document sent");

        journal.record(LogEntry::action("File sent successfully.")).await;
        info!(user_id = user.id, file_id = %file_id, size_mb, "File relayed");

        match transport.delete_message(notice).await {
            Ok(()) => {}
            Err(e) if e.is_ignorable() => {
                debug!(user_id = user.id, error = %e, "Progress notice already gone");
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Unable to delete progress notice");
                journal
                    .record(LogEntry::action(format!("Unable to delete progress message: {e}")))
                    .await;
            }
        }
        debug!(user_id = user.id, stage = %RelayStage::Cleaned, "Relay run finished");

        Ok(RelayOutcome::Delivered { file_id, size_mb })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use std::sync::{Arc, Mutex};
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        server: MockServer,
        pipeline: RelayPipeline,
        download_dir: tempfile::TempDir,
        _log_dir: tempfile::TempDir,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let server = MockServer::start().await;
        let download_dir = tempfile::tempdir()?;
        let log_dir = tempfile::tempdir()?;
        let settings = RelaySettings {
            download_api_url: format!("{}/tera/data.php", server.uri()),
            download_timeout_secs: 30,
            download_dir: Some(download_dir.path().to_path_buf()),
            log_dir: log_dir.path().to_path_buf(),
            ..RelaySettings::default()
        };
        Ok(Fixture {
            pipeline: RelayPipeline::new(&settings)?,
            server,
            download_dir,
            _log_dir: log_dir,
        })
    }

    fn alice() -> UserIdentity {
        UserIdentity {
            id: 1,
            first_name: "Alice".to_string(),
            last_name: None,
            username: Some("alice".to_string()),
        }
    }

    #[test]
    fn test_caption_format() {
        assert_eq!(
            format_caption("abc123", 2.0, "@teraboxtt01_bot"),
            "Video ID: abc123\nSize: 2.0 MB @teraboxtt01_bot"
        );
        assert_eq!(
            format_caption("x", 12.34, "@bot"),
            "Video ID: x\nSize: 12.34 MB @bot"
        );
        assert_eq!(format_caption("x", 0.5, ""), "Video ID: x\nSize: 0.5 MB");
    }

    #[test]
    fn test_only_rejections_are_ignorable() {
        assert!(TransportError::Rejected("message to delete not found".into()).is_ignorable());
        assert!(!TransportError::Request("network down".into()).is_ignorable());
    }

    #[tokio::test]
    async fn test_rejected_text_never_fetches() -> anyhow::Result<()> {
        let fx = fixture().await?;
        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .with(eq(REJECTION_TEXT))
            .times(1)
            .returning(|_| Ok(NoticeHandle(1)));
        transport.expect_send_document().never();
        transport.expect_delete_message().never();

        let outcome = fx.pipeline.handle_incoming(&transport, &alice(), "hello").await;

        assert_eq!(outcome.stage(), RelayStage::Rejected);
        assert!(fx.server.received_requests().await.unwrap_or_default().is_empty());

        let handle = fx.pipeline.activity().ensure_log("alice").await?;
        let records = fx.pipeline.activity().read(&handle).await?;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].action, "Invalid Terabox link received.");
        Ok(())
    }

    #[tokio::test]
    async fn test_successful_relay_cleans_up() -> anyhow::Result<()> {
        let fx = fixture().await?;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2_097_152]))
            .mount(&fx.server)
            .await;

        let seen_path: Arc<Mutex<Option<std::path::PathBuf>>> = Arc::new(Mutex::new(None));
        let seen = Arc::clone(&seen_path);

        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .with(eq(STARTED_TEXT))
            .times(1)
            .returning(|_| Ok(NoticeHandle(10)));
        transport
            .expect_send_document()
            .times(1)
            .returning(move |path, file_name, caption| {
                assert!(path.exists());
                assert_eq!(file_name, "abc123.mp4");
                assert_eq!(caption, "Video ID: abc123\nSize: 2.0 MB @teraboxtt01_bot");
                if let Ok(mut slot) = seen.lock() {
                    *slot = Some(path.to_path_buf());
                }
                Ok(())
            });
        transport
            .expect_delete_message()
            .with(eq(NoticeHandle(10)))
            .times(1)
            .returning(|_| Ok(()));

        let outcome = fx
            .pipeline
            .handle_incoming(&transport, &alice(), "https://terabox.com/s/abc123")
            .await;

        match outcome {
            RelayOutcome::Delivered { file_id, size_mb } => {
                assert_eq!(file_id, "abc123");
                assert!((size_mb - 2.0).abs() < f64::EPSILON);
            }
            other => anyhow::bail!("unexpected outcome: {other:?}"),
        }

        let path = seen_path
            .lock()
            .map_err(|e| anyhow::anyhow!(e.to_string()))?
            .clone()
            .ok_or_else(|| anyhow::anyhow!("document was not sent"))?;
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(fx.download_dir.path())?.count(), 0);

        let handle = fx.pipeline.activity().ensure_log("alice").await?;
        let actions: Vec<String> = fx
            .pipeline
            .activity()
            .read(&handle)
            .await?
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions.len(), 3);
        assert!(actions[0].starts_with("Attempting to download from: "));
        assert_eq!(actions[1], "Downloaded file");
        assert_eq!(actions[2], "File sent successfully.");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_send_still_removes_temp_file() -> anyhow::Result<()> {
        let fx = fixture().await?;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&fx.server)
            .await;

        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .with(eq(STARTED_TEXT))
            .times(1)
            .returning(|_| Ok(NoticeHandle(10)));
        transport
            .expect_send_document()
            .times(1)
            .returning(|_, _, _| Err(TransportError::Request("upload aborted".into())));
        transport
            .expect_send_text()
            .withf(|text: &str| text.starts_with("Failed to download the file from https://terabox.com/s/abc123: "))
            .times(1)
            .returning(|_| Ok(NoticeHandle(11)));
        transport.expect_delete_message().never();

        let outcome = fx
            .pipeline
            .handle_incoming(&transport, &alice(), "https://terabox.com/s/abc123")
            .await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed {
                stage: RelayStage::Downloaded,
                error: RelayError::Delivery(_)
            }
        ));
        assert_eq!(std::fs::read_dir(fx.download_dir.path())?.count(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_ignorable_deletion_failure_keeps_delivery() -> anyhow::Result<()> {
        let fx = fixture().await?;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&fx.server)
            .await;

        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .times(1)
            .returning(|_| Ok(NoticeHandle(10)));
        transport
            .expect_send_document()
            .times(1)
            .returning(|_, _, _| Ok(()));
        transport
            .expect_delete_message()
            .times(1)
            .returning(|_| Err(TransportError::Rejected("message to delete not found".into())));

        let outcome = fx
            .pipeline
            .handle_incoming(&transport, &alice(), "https://terabox.com/s/abc123")
            .await;

        assert_eq!(outcome.stage(), RelayStage::Cleaned);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_deletion_is_journaled_but_still_delivered() -> anyhow::Result<()> {
        let fx = fixture().await?;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1024]))
            .mount(&fx.server)
            .await;

        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .with(eq(STARTED_TEXT))
            .times(1)
            .returning(|_| Ok(NoticeHandle(10)));
        transport
            .expect_send_document()
            .times(1)
            .returning(|_, _, _| Ok(()));
        transport
            .expect_delete_message()
            .with(eq(NoticeHandle(10)))
            .times(1)
            .returning(|_| Err(TransportError::Request("connection reset".into())));

        let outcome = fx
            .pipeline
            .handle_incoming(&transport, &alice(), "https://terabox.com/s/abc123")
            .await;

        assert!(matches!(outcome, RelayOutcome::Delivered { .. }));
        let handle = fx.pipeline.activity().ensure_log("alice").await?;
        let actions: Vec<String> = fx
            .pipeline
            .activity()
            .read(&handle)
            .await?
            .into_iter()
            .map(|r| r.action)
            .collect();
        assert_eq!(actions.len(), 4);
        assert_eq!(actions[2], "File sent successfully.");
        assert!(actions[3].starts_with("Unable to delete progress message: "));
        assert!(actions[3].contains("connection reset"));
        Ok(())
    }

    #[tokio::test]
    async fn test_service_unavailable_reply() -> anyhow::Result<()> {
        let fx = fixture().await?;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&fx.server)
            .await;

        let mut transport = MockRelayTransport::new();
        transport
            .expect_send_text()
            .with(eq(STARTED_TEXT))
            .times(1)
            .returning(|_| Ok(NoticeHandle(10)));
        transport
            .expect_send_text()
            .withf(|text: &str| text.contains("temporarily unavailable"))
            .times(1)
            .returning(|_| Ok(NoticeHandle(11)));
        transport.expect_send_document().never();

        let outcome = fx
            .pipeline
            .handle_incoming(&transport, &alice(), "https://terabox.com/s/abc123")
            .await;

        assert!(matches!(
            outcome,
            RelayOutcome::Failed {
                stage: RelayStage::Downloading,
                error: RelayError::Fetch(FetchError::ServiceUnavailable)
            }
        ));

        let handle = fx.pipeline.activity().ensure_log("alice").await?;
        let records = fx.pipeline.activity().read(&handle).await?;
        let last = records.last().map(|r| r.action.clone()).unwrap_or_default();
        assert!(last.starts_with("Download error: "));
        Ok(())
    }
}
