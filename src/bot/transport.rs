//! Telegram side of a transfer.

use crate::bot::resilient::edit_message_safe_resilient;
use crate::bot::views::{render_status, DefaultRelayView};
use crate::transfer::{PayloadStream, StatusView, TransferError, TransferGateway, TransferId};
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, MessageId};
use tracing::debug;

/// Telegram-specific transfer gateway, bound to one status message.
pub struct TelegramGateway {
    bot: Bot,
    http: reqwest::Client,
    chat_id: ChatId,
    status_msg_id: MessageId,
}

impl TelegramGateway {
    /// Create a gateway editing `status_msg_id` in `chat_id`.
    ///
    /// `http` streams payloads; it should carry a read timeout rather than a
    /// total one, since large files take a while.
    pub const fn new(
        bot: Bot,
        http: reqwest::Client,
        chat_id: ChatId,
        status_msg_id: MessageId,
    ) -> Self {
        Self {
            bot,
            http,
            chat_id,
            status_msg_id,
        }
    }

    fn transfer_id(&self) -> TransferId {
        TransferId(self.status_msg_id.0)
    }
}

#[async_trait]
impl TransferGateway for TelegramGateway {
    async fn resolve_download_url(&self, file_id: &str) -> Result<String, TransferError> {
        let file = crate::utils::retry_telegram_operation(|| async {
            self.bot
                .get_file(FileId(file_id.to_string()))
                .await
                .map_err(|e| anyhow::anyhow!("getFile failed: {e}"))
        })
        .await
        .map_err(|e| TransferError::Resolve(e.to_string()))?;

        debug!(file_id = %file_id, size = file.size, "Resolved file path");

        // The file endpoint embeds the bot token; the URL must never be logged.
        self.bot
            .api_url()
            .join(&format!("file/bot{}/{}", self.bot.token(), file.path))
            .map(String::from)
            .map_err(|e| TransferError::Resolve(e.to_string()))
    }

    async fn open_download(&self, url: &str) -> Result<PayloadStream, TransferError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| TransferError::Transport(e.without_url().to_string()))?;

        Ok(response
            .bytes_stream()
            .map_err(|e| TransferError::Transport(e.without_url().to_string()))
            .boxed())
    }

    async fn show_status(&self, view: &StatusView) -> Result<(), TransferError> {
        let (text, markup) = render_status::<DefaultRelayView>(self.transfer_id(), view);
        // The resilient helper retries and logs internally.
        let _ = edit_message_safe_resilient(
            &self.bot,
            self.chat_id,
            self.status_msg_id,
            &text,
            markup,
        )
        .await;
        Ok(())
    }
}
