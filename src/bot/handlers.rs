//! Command, media and callback handlers for the relay bot.

use crate::bot::media::classify_media;
use crate::bot::resilient::{edit_message_safe_resilient, send_message_resilient};
use crate::bot::transport::TelegramGateway;
use crate::bot::views::{
    delete_confirmation_keyboard, published_keyboard, render_files_page, render_status,
    CallbackAction, DefaultRelayView, RelayView,
};
use crate::config::{Settings, FILES_PAGE_SIZE};
use crate::transfer::{
    PublishedArtifact, StatusView, Transfer, TransferGateway, TransferId, TransferSupervisor,
};
use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, ChatId, MessageId};
use teloxide::utils::command::BotCommands;
use tracing::{debug, info, warn};

/// HTTP client used for payload downloads, kept apart from the Bot API client
/// because downloads need a read timeout instead of a total one.
#[derive(Clone)]
pub struct DownloadClient(pub reqwest::Client);

/// Get user ID safely from a message
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Returns `true` if `msg` comes from the operator
#[must_use]
pub fn is_operator_message(msg: &Message, settings: &Settings) -> bool {
    settings.is_admin(get_user_id_safe(msg))
}

/// Returns `true` if `q` was pressed by the operator
#[must_use]
pub fn is_operator_callback(q: &CallbackQuery, settings: &Settings) -> bool {
    settings.is_admin(q.from.id.0.cast_signed())
}

/// Supported bot commands
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show the welcome message
    #[command(description = "Start the bot.")]
    Start,
    /// Show usage
    #[command(description = "Show usage.")]
    Help,
    /// Cancel every running transfer
    #[command(description = "Cancel all uploads.")]
    Cancel,
    /// Show the number of running transfers
    #[command(description = "Show active transfers.")]
    Status,
    /// Browse published files
    #[command(description = "Browse published files.")]
    Files,
}

/// Handle a bot command
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    supervisor: Arc<TransferSupervisor>,
) -> Result<()> {
    let chat_id = msg.chat.id;
    match cmd {
        Command::Start => {
            send_message_resilient(&bot, chat_id, DefaultRelayView::welcome_message(), None)
                .await?;
        }
        Command::Help => {
            send_message_resilient(&bot, chat_id, DefaultRelayView::help_message(), None).await?;
        }
        Command::Cancel => {
            let signalled = supervisor.registry().cancel_all().await;
            info!(signalled, "Cancel-all requested by operator");
            send_message_resilient(
                &bot,
                chat_id,
                DefaultRelayView::upload_cancelled(signalled),
                None,
            )
            .await?;
        }
        Command::Status => {
            let active = supervisor.registry().active_count().await;
            send_message_resilient(
                &bot,
                chat_id,
                DefaultRelayView::active_transfers(active),
                None,
            )
            .await?;
        }
        Command::Files => {
            let (text, markup) = files_page(&supervisor, 0).await;
            send_message_resilient(&bot, chat_id, text, markup).await?;
        }
    }
    Ok(())
}

/// Start a transfer for the media attached to `msg`.
///
/// Sends the status message first; its id becomes the transfer id. The worker
/// runs in the background under the supervisor.
///
/// # Errors
///
/// Returns an error if the status message cannot be sent.
pub async fn handle_media(
    bot: Bot,
    msg: Message,
    supervisor: Arc<TransferSupervisor>,
    http: DownloadClient,
    settings: Arc<Settings>,
) -> Result<()> {
    let Some(media) = classify_media(&msg) else {
        return handle_text(bot, msg).await;
    };
    let chat_id = msg.chat.id;

    let initial = StatusView::Downloading {
        kind: media.kind,
        progress: None,
    };
    let (text, _) = render_status::<DefaultRelayView>(TransferId(0), &initial);
    let status = send_message_resilient(&bot, chat_id, text, None).await?;

    let gateway = TelegramGateway::new(bot, http.0, chat_id, status.id);
    // Attach the cancel control now that the token is known.
    let _ = gateway.show_status(&initial).await;

    let transfer = Transfer::new(
        TransferId(status.id.0),
        media,
        &settings.staging_dir,
        chrono::Utc::now().timestamp(),
    );
    info!(
        transfer_id = %transfer.id,
        kind = transfer.kind.label(),
        name = %transfer.name,
        declared_size = transfer.declared_size,
        "Media received"
    );

    let gateway = Arc::new(gateway);
    if supervisor.spawn(transfer, gateway.clone()).await.is_none() {
        let _ = gateway
            .show_status(&StatusView::Failed("relay is shutting down".to_string()))
            .await;
    }
    Ok(())
}

/// Reply to a message that carries no file.
///
/// # Errors
///
/// Returns an error if the reply cannot be sent.
pub async fn handle_text(bot: Bot, msg: Message) -> Result<()> {
    send_message_resilient(&bot, msg.chat.id, DefaultRelayView::send_a_file(), None).await?;
    Ok(())
}

/// Handle inline-button presses on status messages and the files menu.
///
/// # Errors
///
/// Returns an error if the callback message is missing its chat.
pub async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    supervisor: Arc<TransferSupervisor>,
) -> Result<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(action) = CallbackAction::parse(data) else {
        debug!(data = %data, "Unknown callback data");
        let _ = bot.answer_callback_query(q.id.clone()).await;
        return Ok(());
    };

    let (chat_id, msg_id) = q
        .message
        .as_ref()
        .map(|msg| (msg.chat().id, msg.id()))
        .ok_or_else(|| anyhow::anyhow!("Callback message missing chat id"))?;

    let notice = match action {
        CallbackAction::CancelUpload(id) => {
            if supervisor.registry().cancel(&id).await {
                None
            } else {
                Some(DefaultRelayView::view_expired())
            }
        }
        CallbackAction::Delete(id) => ask_delete(&bot, chat_id, msg_id, &supervisor, id).await,
        CallbackAction::ConfirmDelete(id) => {
            confirm_delete(&bot, chat_id, msg_id, &supervisor, id).await
        }
        CallbackAction::CancelDelete(id) => {
            restore_published(&bot, chat_id, msg_id, &supervisor, id).await
        }
        CallbackAction::FilesPage(page) => {
            let (text, markup) = files_page(&supervisor, page).await;
            edit_message_safe_resilient(&bot, chat_id, msg_id, &text, markup).await;
            None
        }
    };

    let mut answer = bot.answer_callback_query(q.id.clone());
    if let Some(text) = notice {
        answer = answer.text(text);
    }
    let _ = answer.await;
    Ok(())
}

async fn ask_delete(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    supervisor: &TransferSupervisor,
    id: TransferId,
) -> Option<&'static str> {
    let Some(artifact) = supervisor.published().get(&id).await else {
        return Some(DefaultRelayView::view_expired());
    };
    edit_message_safe_resilient(
        bot,
        chat_id,
        msg_id,
        &DefaultRelayView::delete_confirmation(&artifact.name),
        Some(delete_confirmation_keyboard(id)),
    )
    .await;
    None
}

/// Result of deleting a published artifact from the bucket
#[derive(Debug)]
enum DeleteResult {
    /// The published view is no longer cached
    Expired,
    /// Object removed and its view forgotten
    Deleted(PublishedArtifact),
    /// The store refused; the view stays restorable
    Failed(PublishedArtifact),
}

async fn delete_published(supervisor: &TransferSupervisor, id: TransferId) -> DeleteResult {
    let Some(artifact) = supervisor.published().get(&id).await else {
        return DeleteResult::Expired;
    };

    match supervisor.store().delete_object(&artifact.name).await {
        Ok(()) => {
            supervisor.published().invalidate(&id).await;
            info!(transfer_id = %id, key = %artifact.name, "Published artifact deleted");
            DeleteResult::Deleted(artifact)
        }
        Err(e) => {
            warn!(transfer_id = %id, key = %artifact.name, error = %e, "Delete failed");
            DeleteResult::Failed(artifact)
        }
    }
}

async fn confirm_delete(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    supervisor: &TransferSupervisor,
    id: TransferId,
) -> Option<&'static str> {
    let (text, markup) = match delete_published(supervisor, id).await {
        DeleteResult::Expired => return Some(DefaultRelayView::view_expired()),
        DeleteResult::Deleted(artifact) => (DefaultRelayView::deleted(&artifact.name), None),
        // Keep the delete control so the operator can retry.
        DeleteResult::Failed(artifact) => (
            DefaultRelayView::delete_failed(&artifact.name),
            Some(published_keyboard(id)),
        ),
    };
    edit_message_safe_resilient(bot, chat_id, msg_id, &text, markup).await;
    None
}

async fn restore_published(
    bot: &Bot,
    chat_id: ChatId,
    msg_id: MessageId,
    supervisor: &TransferSupervisor,
    id: TransferId,
) -> Option<&'static str> {
    let Some(artifact) = supervisor.published().get(&id).await else {
        return Some(DefaultRelayView::view_expired());
    };
    let (text, markup) = render_status::<DefaultRelayView>(id, &StatusView::Published(artifact));
    edit_message_safe_resilient(bot, chat_id, msg_id, &text, markup).await;
    None
}

async fn files_page(
    supervisor: &TransferSupervisor,
    page: usize,
) -> (String, Option<teloxide::types::InlineKeyboardMarkup>) {
    match supervisor.store().list_objects().await {
        Ok(keys) => render_files_page::<DefaultRelayView>(
            &keys,
            page,
            FILES_PAGE_SIZE,
            supervisor.public_base(),
        ),
        Err(e) => {
            warn!(error = %e, "Failed to list bucket");
            (DefaultRelayView::listing_failed().to_string(), None)
        }
    }
}
