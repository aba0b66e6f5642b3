use async_trait::async_trait;
use std::path::Path;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, MessageId};
use teloxide::RequestError;
use terabox_relay_core::relay::{NoticeHandle, RelayTransport, TransportError};
use tracing::debug;

/// Relay transport bound to one Telegram chat.
pub struct TelegramRelayTransport {
    bot: Bot,
    chat_id: ChatId,
}

impl TelegramRelayTransport {
    /// Create a transport replying into `chat_id`.
    pub const fn new(bot: Bot, chat_id: ChatId) -> Self {
        Self { bot, chat_id }
    }
}

/// API-level refusals (e.g. "message to delete not found") are rejections;
/// everything else is a failed request.
fn classify(e: RequestError) -> TransportError {
    match e {
        RequestError::Api(api) => TransportError::Rejected(api.to_string()),
        other => TransportError::Request(other.to_string()),
    }
}

#[async_trait]
impl RelayTransport for TelegramRelayTransport {
    async fn send_text(&self, text: &str) -> Result<NoticeHandle, TransportError> {
        let msg = self
            .bot
            .send_message(self.chat_id, text)
            .await
            .map_err(classify)?;
        Ok(NoticeHandle(msg.id.0))
    }

    async fn send_document(
        &self,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<(), TransportError> {
        debug!(chat_id = %self.chat_id, file_name = %file_name, "Uploading document");
        let file = InputFile::file(path.to_path_buf()).file_name(file_name.to_string());
        self.bot
            .send_document(self.chat_id, file)
            .caption(caption)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn delete_message(&self, notice: NoticeHandle) -> Result<(), TransportError> {
        self.bot
            .delete_message(self.chat_id, MessageId(notice.0))
            .await
            .map_err(classify)?;
        Ok(())
    }
}
