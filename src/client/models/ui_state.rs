// Presentation-facing types: what the channels report upward, and the scroll
// model used to keep the history view steady while older pages are prepended.
use crate::client::models::app_state::RoomEntry;
use crate::client::models::messages::{ChatMessage, MessageId, Notification, NotificationId, RoomId, UserId};
use crate::client::services::websocket_client::ConnectionState;

/// Events emitted by the chat channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    ConnectionChanged(ConnectionState),
    Identified { user_id: UserId },
    /// A message for the room being viewed.
    MessageAppended(ChatMessage),
    SidebarChanged(Vec<RoomEntry>),
    UnreadBadge(u32),
    HistoryLoading { room_id: RoomId, loading: bool },
    HistoryPrepended { room_id: RoomId, messages: Vec<ChatMessage>, has_more: bool },
    SystemNotification { title: String, body: String, room_id: RoomId },
    MessageRead { message_id: MessageId },
    UserError(String),
}

/// Events emitted by the notification channel.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    ConnectionChanged(ConnectionState),
    Badge(u32),
    ListChanged(Vec<Notification>),
    SystemNotification { title: String, body: String, url: Option<String> },
    /// The user opened a notification that carries a link.
    Navigate { notification_id: NotificationId, url: String },
}

/// Vertical scroll position of a history view, in pixels from the top.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrollViewport {
    pub offset: f64,
    pub content_height: f64,
}

impl ScrollViewport {
    pub fn new(offset: f64, content_height: f64) -> Self {
        ScrollViewport { offset, content_height }
    }

    /// Content grew above the viewport from `content_height` to `new_height`:
    /// shift the offset by the difference so the visible messages stay put.
    pub fn preserve_anchor(&mut self, new_height: f64) -> f64 {
        let delta = new_height - self.content_height;
        self.offset = (self.offset + delta).max(0.0);
        self.content_height = new_height;
        self.offset
    }

    /// Measure, run `insert`, measure again and adjust.
    pub fn preserve_scroll_position<F>(&mut self, insert: F) -> f64
    where
        F: FnOnce() -> f64,
    {
        let new_height = insert();
        self.preserve_anchor(new_height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anchor_shifts_by_height_delta() {
        let mut viewport = ScrollViewport::new(40.0, 1000.0);
        assert_eq!(viewport.preserve_anchor(1600.0), 640.0);
        assert_eq!(viewport.content_height, 1600.0);
    }

    #[test]
    fn closure_variant_measures_after_insert() {
        let mut viewport = ScrollViewport::new(0.0, 500.0);
        let mut rows = vec![50.0; 10];
        let offset = viewport.preserve_scroll_position(|| {
            rows.splice(0..0, vec![50.0; 20]);
            rows.iter().sum()
        });
        assert_eq!(offset, 1000.0);
    }
}
