//! Transfer data model
//!
//! A transfer is identified by the status message the operator watches; the same
//! id is used as the registry key and in callback data.

use super::progress::TransferProgress;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

/// Identifier of a transfer: the id of its status message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransferId(pub i32);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(Self)
    }
}

/// Kind of inbound media
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    /// Generic file
    Document,
    /// Video file
    Video,
    /// Music or other audio track
    Audio,
    /// Voice note
    Voice,
}

impl MediaKind {
    /// Capitalized label used in status messages
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Document => "Document",
            Self::Video => "Video",
            Self::Audio => "Audio",
            Self::Voice => "Voice",
        }
    }

    /// Lower-case prefix used for generated file names
    #[must_use]
    pub const fn slug(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Voice => "voice",
        }
    }
}

/// Media attached to an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMedia {
    /// Media kind
    pub kind: MediaKind,
    /// Opaque file handle issued by the messaging gateway
    pub file_id: String,
    /// Declared size in bytes, 0 when unknown
    pub size: u64,
    /// Declared file name, if the sender supplied one
    pub file_name: Option<String>,
    /// Declared MIME type
    pub mime_type: Option<String>,
}

impl IncomingMedia {
    /// Destination name: the declared name, or `<kind>_<unix seconds>` when absent.
    #[must_use]
    pub fn destination_name(&self, unix_secs: i64) -> String {
        self.file_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map_or_else(
                || format!("{}_{unix_secs}", self.kind.slug()),
                ToString::to_string,
            )
    }
}

/// A single file's journey from the chat to the bucket
#[derive(Debug, Clone)]
pub struct Transfer {
    /// Status message id
    pub id: TransferId,
    /// Opaque file handle
    pub file_id: String,
    /// Object key and display name
    pub name: String,
    /// Declared total size, 0 when unknown
    pub declared_size: u64,
    /// MIME type forwarded to the object store
    pub mime_type: Option<String>,
    /// Media kind
    pub kind: MediaKind,
    /// Local staging file
    pub staging_path: PathBuf,
    /// When the transfer was created
    pub started_at: Instant,
}

impl Transfer {
    /// Build a transfer for `media`, staging under `staging_dir`.
    #[must_use]
    pub fn new(id: TransferId, media: IncomingMedia, staging_dir: &Path, unix_secs: i64) -> Self {
        let name = media.destination_name(unix_secs);
        let staging_path = staging_dir.join(staging_file_name(id, &name));
        Self {
            id,
            file_id: media.file_id,
            name,
            declared_size: media.size,
            mime_type: media.mime_type,
            kind: media.kind,
            staging_path,
            started_at: Instant::now(),
        }
    }
}

/// `<id>_<name>` with path separators and control characters replaced.
fn staging_file_name(id: TransferId, name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    format!("{id}_{}", sanitized.trim_start_matches('.'))
}

/// An object in the bucket together with its public link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedArtifact {
    /// Object key
    pub name: String,
    /// Stored size in bytes
    pub size: u64,
    /// Publicly resolvable URL
    pub url: String,
}

/// Phases of the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Resolving the source and streaming it to the staging file
    Downloading,
    /// Pushing the staging file to the object store
    Uploading,
    /// Terminal success
    Published,
    /// Terminal, operator-initiated
    Cancelled,
    /// Terminal, any unhandled error
    Failed,
}

impl TransferPhase {
    /// Whether the state machine allows moving from `self` to `next`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Downloading, Self::Uploading) | (Self::Uploading, Self::Published) => true,
            (Self::Downloading | Self::Uploading, Self::Cancelled | Self::Failed) => true,
            _ => false,
        }
    }
}

/// What the status message should currently show
#[derive(Debug, Clone, PartialEq)]
pub enum StatusView {
    /// Download in progress. `progress` is `None` before the first chunk.
    Downloading {
        /// Media kind
        kind: MediaKind,
        /// Latest progress sample
        progress: Option<TransferProgress>,
    },
    /// Upload to the object store in progress
    Uploading,
    /// Upload finished and the artifact is public
    Published(PublishedArtifact),
    /// Operator cancelled the transfer
    Cancelled,
    /// Transfer failed with a short reason
    Failed(String),
}
