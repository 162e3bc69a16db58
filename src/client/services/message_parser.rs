// Decoding of inbound socket frames and the small text helpers used for previews.
use chrono::{DateTime, Local};
use serde::de::DeserializeOwned;

use crate::client::services::websocket_client::WebSocketError;

/// Sidebar preview length (characters).
pub const SIDEBAR_PREVIEW_CHARS: usize = 30;
/// Header dropdown preview length (characters).
pub const DROPDOWN_PREVIEW_CHARS: usize = 25;
/// System notification body length (characters).
pub const SYSTEM_NOTIFICATION_CHARS: usize = 60;

/// Decode a text frame into the channel's frame type.
///
/// Unknown `type` values decode to the enum's catch-all variant; anything that
/// is not valid JSON or lacks a `type` field is an `InvalidMessage`.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, WebSocketError> {
    serde_json::from_str::<T>(text).map_err(|e| WebSocketError::InvalidMessage(format!("{} - raw: {}", e, abbreviate(text))))
}

fn abbreviate(text: &str) -> String {
    truncate_preview(text, 120)
}

/// Cut `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

/// Format an ISO-8601 timestamp as local `HH:MM`; unparseable values
/// (e.g. server-side relative strings) are returned unchanged.
pub fn format_timestamp(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Local).format("%H:%M").to_string(),
        Err(_) => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::models::messages::{ChatFrame, NotificationFrame};

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate_preview("kısa", 30), "kısa");
        let long = "ğ".repeat(40);
        let cut = truncate_preview(&long, SIDEBAR_PREVIEW_CHARS);
        assert_eq!(cut.chars().count(), SIDEBAR_PREVIEW_CHARS + 3);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn exact_length_is_not_cut() {
        let text = "a".repeat(SYSTEM_NOTIFICATION_CHARS);
        assert_eq!(truncate_preview(&text, SYSTEM_NOTIFICATION_CHARS), text);
    }

    #[test]
    fn malformed_frames_are_invalid_messages() {
        let err = decode::<ChatFrame>("{not json").unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidMessage(_)));

        let err = decode::<NotificationFrame>(r#"{"count": 3}"#).unwrap_err();
        assert!(matches!(err, WebSocketError::InvalidMessage(_)));
    }

    #[test]
    fn decodes_known_frames() {
        let frame: NotificationFrame = decode(r#"{"type":"unread_count","count":4}"#).unwrap();
        assert_eq!(frame, NotificationFrame::UnreadCount { count: 4 });
    }

    #[test]
    fn relative_timestamps_pass_through() {
        assert_eq!(format_timestamp("5 minutes ago"), "5 minutes ago");
        assert_eq!(format_timestamp("2024-05-01T10:30:00+00:00").len(), 5);
    }
}
