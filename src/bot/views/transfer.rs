//! Relay UI components
//!
//! Contains callback vocabulary, status texts and inline keyboards for the
//! transfer status message and the files menu.

use crate::transfer::{
    format_size, MediaKind, PublishedArtifact, StatusView, TransferId, TransferProgress,
};
use crate::storage::public_url;
use html_escape::encode_text;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

// ─────────────────────────────────────────────────────────────────────────────
// Callback constants
// ─────────────────────────────────────────────────────────────────────────────

/// Callback prefix for cancelling a running transfer
pub const CALLBACK_CANCEL_UPLOAD: &str = "cancel_upload";
/// Callback prefix for asking to delete a published artifact
pub const CALLBACK_DELETE: &str = "delete";
/// Callback prefix for confirming a delete
pub const CALLBACK_CONFIRM_DELETE: &str = "confirm_delete";
/// Callback prefix for backing out of a delete
pub const CALLBACK_CANCEL_DELETE: &str = "cancel_delete";
/// Callback prefix for a page of the files menu
pub const CALLBACK_FILES_PAGE: &str = "files";

/// A parsed inline-button action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// `cancel_upload:<token>`
    CancelUpload(TransferId),
    /// `delete:<token>`
    Delete(TransferId),
    /// `confirm_delete:<token>`
    ConfirmDelete(TransferId),
    /// `cancel_delete:<token>`
    CancelDelete(TransferId),
    /// `files:<page>`
    FilesPage(usize),
}

impl CallbackAction {
    /// Parse callback data. Unknown prefixes and malformed arguments yield `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_relay::bot::views::CallbackAction;
    /// use oxide_relay::transfer::TransferId;
    ///
    /// assert_eq!(
    ///     CallbackAction::parse("cancel_upload:42"),
    ///     Some(CallbackAction::CancelUpload(TransferId(42)))
    /// );
    /// assert_eq!(CallbackAction::parse("cancel_upload:abc"), None);
    /// ```
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        let (prefix, arg) = data.split_once(':')?;
        match prefix {
            CALLBACK_CANCEL_UPLOAD => arg.parse().ok().map(Self::CancelUpload),
            CALLBACK_DELETE => arg.parse().ok().map(Self::Delete),
            CALLBACK_CONFIRM_DELETE => arg.parse().ok().map(Self::ConfirmDelete),
            CALLBACK_CANCEL_DELETE => arg.parse().ok().map(Self::CancelDelete),
            CALLBACK_FILES_PAGE => arg.trim().parse().ok().map(Self::FilesPage),
            _ => None,
        }
    }

    /// Encode as callback data
    #[must_use]
    pub fn to_data(self) -> String {
        match self {
            Self::CancelUpload(id) => format!("{CALLBACK_CANCEL_UPLOAD}:{id}"),
            Self::Delete(id) => format!("{CALLBACK_DELETE}:{id}"),
            Self::ConfirmDelete(id) => format!("{CALLBACK_CONFIRM_DELETE}:{id}"),
            Self::CancelDelete(id) => format!("{CALLBACK_CANCEL_DELETE}:{id}"),
            Self::FilesPage(page) => format!("{CALLBACK_FILES_PAGE}:{page}"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait definition
// ─────────────────────────────────────────────────────────────────────────────

/// Trait for relay UI text rendering
pub trait RelayView {
    /// Reply to `/start`
    fn welcome_message() -> &'static str;

    /// Reply to `/help`
    fn help_message() -> &'static str;

    /// Reply to a message without media
    fn send_a_file() -> &'static str;

    /// Reply to `/cancel`
    fn upload_cancelled(signalled: usize) -> String;

    /// Reply to `/status`
    fn active_transfers(count: usize) -> String;

    /// Download in progress; `None` before the first chunk
    fn downloading(kind: MediaKind, progress: Option<&TransferProgress>) -> String;

    /// Upload in progress
    fn uploading() -> &'static str;

    /// Artifact is public
    fn published(artifact: &PublishedArtifact) -> String;

    /// Transfer cancelled
    fn cancelled() -> &'static str;

    /// Transfer failed
    fn failed(reason: &str) -> String;

    /// Delete confirmation prompt
    fn delete_confirmation(name: &str) -> String;

    /// Object deleted
    fn deleted(name: &str) -> String;

    /// Object could not be deleted
    fn delete_failed(name: &str) -> String;

    /// Published view no longer cached
    fn view_expired() -> &'static str;

    /// Bucket listing failed
    fn listing_failed() -> &'static str;

    /// Files menu header
    fn files_header(total: usize, page: usize, pages: usize) -> String;

    /// Bucket is empty
    fn no_files() -> &'static str;
}

// ─────────────────────────────────────────────────────────────────────────────
// Default implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Default English implementation of `RelayView`
pub struct DefaultRelayView;

impl RelayView for DefaultRelayView {
    fn welcome_message() -> &'static str {
        r"📦 <b>File relay</b>

Send a document, video, audio or voice message and I will publish it to the bucket and reply with a public link.

/files - browse published files
/status - active transfers
/cancel - stop every running upload"
    }

    fn help_message() -> &'static str {
        r"Send any file as a document, video, audio or voice message.

While it is downloading press <b>❌ Cancel</b> to stop it. Once published, <b>🗑 Delete</b> removes it from the bucket.

/files - browse published files
/status - active transfers
/cancel - stop every running upload"
    }

    fn send_a_file() -> &'static str {
        "❌ Send a file"
    }

    fn upload_cancelled(signalled: usize) -> String {
        if signalled == 0 {
            "❌ Upload cancelled\nNo active transfers.".to_string()
        } else {
            format!("❌ Upload cancelled\nStopping {signalled} transfer(s).")
        }
    }

    fn active_transfers(count: usize) -> String {
        if count == 0 {
            "💤 No active transfers".to_string()
        } else {
            format!("🔄 Active transfers: {count}")
        }
    }

    fn downloading(kind: MediaKind, progress: Option<&TransferProgress>) -> String {
        match progress {
            None => format!("⬇️ Downloading {}… 0%", kind.label()),
            Some(p) => format!(
                "⬇️ Downloading\n{:.1}% | {:.2} MB/s\nETA: {}s",
                p.percent, p.speed_mbps, p.eta_secs
            ),
        }
    }

    fn uploading() -> &'static str {
        "⬆️ Uploading to R2…"
    }

    fn published(artifact: &PublishedArtifact) -> String {
        format!(
            "✅ Upload complete!\n\n📁 {}\n📦 {}\n🔗 {}",
            encode_text(&artifact.name),
            format_size(artifact.size),
            encode_text(&artifact.url)
        )
    }

    fn cancelled() -> &'static str {
        "❌ Upload cancelled"
    }

    fn failed(reason: &str) -> String {
        format!("⚠️ Upload failed\n<code>{}</code>", encode_text(reason))
    }

    fn delete_confirmation(name: &str) -> String {
        format!(
            "⚠️ Delete <b>{}</b> from the bucket?\nThe public link will stop working.",
            encode_text(name)
        )
    }

    fn deleted(name: &str) -> String {
        format!("🗑 Deleted\n📁 {}", encode_text(name))
    }

    fn delete_failed(name: &str) -> String {
        format!("⚠️ Could not delete {}. Try again later.", encode_text(name))
    }

    fn view_expired() -> &'static str {
        "This message is too old to manage"
    }

    fn listing_failed() -> &'static str {
        "⚠️ Could not list the bucket. Try again later."
    }

    fn files_header(total: usize, page: usize, pages: usize) -> String {
        format!("📂 <b>Files</b> ({total}) · page {}/{pages}", page + 1)
    }

    fn no_files() -> &'static str {
        "📂 The bucket is empty"
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keyboards
// ─────────────────────────────────────────────────────────────────────────────

/// Cancel control attached while a transfer is running
#[must_use]
pub fn cancel_keyboard(id: TransferId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "❌ Cancel",
        CallbackAction::CancelUpload(id).to_data(),
    )]])
}

/// Delete control attached to a published artifact
#[must_use]
pub fn published_keyboard(id: TransferId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "🗑 Delete",
        CallbackAction::Delete(id).to_data(),
    )]])
}

/// Yes / no controls of the delete confirmation
#[must_use]
pub fn delete_confirmation_keyboard(id: TransferId) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("✅ Yes, delete", CallbackAction::ConfirmDelete(id).to_data()),
        InlineKeyboardButton::callback("↩️ Keep", CallbackAction::CancelDelete(id).to_data()),
    ]])
}

/// Previous / next controls of the files menu, `None` for a single page
#[must_use]
pub fn files_keyboard(page: usize, pages: usize) -> Option<InlineKeyboardMarkup> {
    let mut row = Vec::new();
    if page > 0 {
        row.push(InlineKeyboardButton::callback(
            "⬅️ Prev",
            CallbackAction::FilesPage(page - 1).to_data(),
        ));
    }
    if page + 1 < pages {
        row.push(InlineKeyboardButton::callback(
            "Next ➡️",
            CallbackAction::FilesPage(page + 1).to_data(),
        ));
    }
    (!row.is_empty()).then(|| InlineKeyboardMarkup::new(vec![row]))
}

// ─────────────────────────────────────────────────────────────────────────────
// Renderers
// ─────────────────────────────────────────────────────────────────────────────

/// Text and controls of the status message of transfer `id`.
///
/// Running phases carry the cancel control, a published artifact carries the
/// delete control, other terminal views carry none.
#[must_use]
pub fn render_status<V: RelayView>(
    id: TransferId,
    view: &StatusView,
) -> (String, Option<InlineKeyboardMarkup>) {
    match view {
        StatusView::Downloading { kind, progress } => (
            V::downloading(*kind, progress.as_ref()),
            Some(cancel_keyboard(id)),
        ),
        StatusView::Uploading => (V::uploading().to_string(), Some(cancel_keyboard(id))),
        StatusView::Published(artifact) => {
            (V::published(artifact), Some(published_keyboard(id)))
        }
        StatusView::Cancelled => (V::cancelled().to_string(), None),
        StatusView::Failed(reason) => (V::failed(reason), None),
    }
}

/// One page of the files menu. `page` is clamped to the last page.
#[must_use]
pub fn render_files_page<V: RelayView>(
    keys: &[String],
    page: usize,
    page_size: usize,
    public_base: &str,
) -> (String, Option<InlineKeyboardMarkup>) {
    if keys.is_empty() {
        return (V::no_files().to_string(), None);
    }

    let page_size = page_size.max(1);
    let pages = keys.len().div_ceil(page_size);
    let page = page.min(pages - 1);
    let start = page * page_size;

    let mut text = V::files_header(keys.len(), page, pages);
    text.push('\n');
    for (offset, key) in keys.iter().skip(start).take(page_size).enumerate() {
        text.push_str(&format!(
            "\n{}. <a href=\"{}\">{}</a>",
            start + offset + 1,
            html_escape::encode_double_quoted_attribute(&public_url(public_base, key)),
            encode_text(key)
        ));
    }

    (text, files_keyboard(page, pages))
}
