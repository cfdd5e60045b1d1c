//! Media extraction from inbound messages.

use crate::transfer::{IncomingMedia, MediaKind};
use teloxide::types::{FileMeta, Message};

/// Media attached to `msg`, checked in the order document, video, audio, voice.
///
/// Returns `None` for messages without a supported attachment.
#[must_use]
pub fn classify_media(msg: &Message) -> Option<IncomingMedia> {
    if let Some(doc) = msg.document() {
        return Some(incoming(
            MediaKind::Document,
            &doc.file,
            doc.file_name.clone(),
            doc.mime_type.as_ref().map(ToString::to_string),
        ));
    }
    if let Some(video) = msg.video() {
        return Some(incoming(
            MediaKind::Video,
            &video.file,
            video.file_name.clone(),
            video.mime_type.as_ref().map(ToString::to_string),
        ));
    }
    if let Some(audio) = msg.audio() {
        return Some(incoming(
            MediaKind::Audio,
            &audio.file,
            audio.file_name.clone(),
            audio.mime_type.as_ref().map(ToString::to_string),
        ));
    }
    msg.voice().map(|voice| {
        incoming(
            MediaKind::Voice,
            &voice.file,
            None,
            voice.mime_type.as_ref().map(ToString::to_string),
        )
    })
}

fn incoming(
    kind: MediaKind,
    file: &FileMeta,
    file_name: Option<String>,
    mime_type: Option<String>,
) -> IncomingMedia {
    IncomingMedia {
        kind,
        file_id: file.id.0.clone(),
        size: u64::from(file.size),
        file_name,
        mime_type,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use teloxide::types::{FileId, FileUniqueId};

    #[test]
    fn voice_notes_get_generated_names() {
        let meta = FileMeta {
            id: FileId("AwACAgIAAxkBAAI".to_string()),
            unique_id: FileUniqueId("AgADxw".to_string()),
            size: 4096,
        };
        let media = incoming(MediaKind::Voice, &meta, None, Some("audio/ogg".to_string()));

        assert_eq!(media.file_id, "AwACAgIAAxkBAAI");
        assert_eq!(media.size, 4096);
        assert_eq!(media.destination_name(1_700_000_000), "voice_1700000000");
    }
}
