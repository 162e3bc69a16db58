// Wire contract shared by the chat and notification sockets and the HTTP endpoints.
use serde::{Deserialize, Serialize};

pub type RoomId = i64;
pub type MessageId = i64;
pub type NotificationId = i64;
pub type UserId = i64;

/// Ids arrive either as JSON numbers or as numeric strings (room ids taken
/// from the socket route are strings on the server side).
mod lenient_id {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(i64),
        Text(String),
    }

    fn resolve<E: Error>(raw: Raw) -> Result<i64, E> {
        match raw {
            Raw::Num(n) => Ok(n),
            Raw::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid id: {}", s))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        resolve(Raw::deserialize(d)?)
    }

    pub mod option {
        use super::{resolve, Raw};
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
            match Option::<Raw>::deserialize(d)? {
                Some(raw) => resolve(raw).map(Some),
                None => Ok(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Command frames sent over either socket: `{"command": "...", ...fields}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum OutboundCommand {
    GetUnreadCount,
    GetRecentRooms,
    GetNotifications,
    MarkAsRead {
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        notification_id: Option<NotificationId>,
    },
    MarkRoomAsRead {
        room_id: RoomId,
    },
    MarkAllAsRead,
    SendMessage {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },
    MessageWithAttachments {
        message_id: MessageId,
    },
    Ping,
}

impl OutboundCommand {
    pub fn mark_message_read(message_id: MessageId) -> Self {
        OutboundCommand::MarkAsRead { message_id: Some(message_id), notification_id: None }
    }

    pub fn mark_notification_read(notification_id: NotificationId) -> Self {
        OutboundCommand::MarkAsRead { message_id: None, notification_id: Some(notification_id) }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundCommand::GetUnreadCount => "get_unread_count",
            OutboundCommand::GetRecentRooms => "get_recent_rooms",
            OutboundCommand::GetNotifications => "get_notifications",
            OutboundCommand::MarkAsRead { .. } => "mark_as_read",
            OutboundCommand::MarkRoomAsRead { .. } => "mark_room_as_read",
            OutboundCommand::MarkAllAsRead => "mark_all_as_read",
            OutboundCommand::SendMessage { .. } => "send_message",
            OutboundCommand::MessageWithAttachments { .. } => "message_with_attachments",
            OutboundCommand::Ping => "ping",
        }
    }
}

// ---------------------------------------------------------------------------
// Inbound: chat socket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatFrame {
    ConnectionEstablished {
        #[serde(deserialize_with = "lenient_id::deserialize")]
        user_id: UserId,
        #[serde(default)]
        personal_group: Option<String>,
    },
    NewMessage {
        message: SocketMessage,
    },
    MessageNotification {
        message: SocketMessage,
        #[serde(deserialize_with = "lenient_id::deserialize")]
        room_id: RoomId,
    },
    AllMessagesRead,
    UnreadCount {
        count: u32,
    },
    RecentRooms {
        #[serde(default)]
        rooms: Vec<RoomSummary>,
    },
    RoomMessagesRead {
        #[serde(deserialize_with = "lenient_id::deserialize")]
        room_id: RoomId,
    },
    MessagesReadNotification {
        #[serde(deserialize_with = "lenient_id::deserialize")]
        room_id: RoomId,
        unread_count: u32,
        #[serde(default, deserialize_with = "lenient_id::option::deserialize")]
        message_id: Option<MessageId>,
    },
    MessageRead {
        #[serde(deserialize_with = "lenient_id::deserialize")]
        message_id: MessageId,
    },
    MessageBlocked {
        #[serde(default)]
        error: Option<String>,
        #[serde(default, deserialize_with = "lenient_id::option::deserialize")]
        room_id: Option<RoomId>,
    },
    #[serde(other)]
    Unknown,
}

/// A chat message as pushed over the socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SocketMessage {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: MessageId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_full_name: Option<String>,
    #[serde(default)]
    pub sender_avatar: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default, deserialize_with = "lenient_id::option::deserialize")]
    pub chat_room_id: Option<RoomId>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(alias = "url")]
    pub file: String,
    #[serde(default, alias = "type")]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoomSummary {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LastMessage {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: MessageId,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub sender_full_name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub is_read: bool,
}

// ---------------------------------------------------------------------------
// Inbound: notification socket
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationFrame {
    NewNotification {
        notification: Notification,
    },
    UnreadCount {
        count: u32,
    },
    NotificationRead {
        #[serde(deserialize_with = "lenient_id::deserialize")]
        notification_id: NotificationId,
    },
    NotificationsList {
        #[serde(default)]
        notifications: Vec<Notification>,
    },
    AllNotificationsRead,
    Pong {
        #[serde(default)]
        timestamp: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Notification {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: NotificationId,
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "body")]
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub icon_class: Option<String>,
}

impl Notification {
    /// Target URL, ignoring blank values.
    pub fn target(&self) -> Option<&str> {
        self.url.as_deref().map(str::trim).filter(|u| !u.is_empty())
    }
}

// ---------------------------------------------------------------------------
// HTTP payloads
// ---------------------------------------------------------------------------

/// `GET /chat/{room}/messages/` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct HistoryPage {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
    #[serde(default)]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub has_more: bool,
    #[serde(default, deserialize_with = "lenient_id::option::deserialize")]
    pub oldest_message_id: Option<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryMessage {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: MessageId,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub formatted_time: Option<String>,
    #[serde(default)]
    pub is_mine: bool,
    pub sender: HistorySender,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistorySender {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: UserId,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserSummary {
    #[serde(deserialize_with = "lenient_id::deserialize")]
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

// ---------------------------------------------------------------------------
// Domain message
// ---------------------------------------------------------------------------

/// A chat message as held by the client, whichever endpoint delivered it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: Option<RoomId>,
    pub sender_id: UserId,
    pub sender_name: String,
    pub body: Option<String>,
    pub attachments: Vec<Attachment>,
    pub timestamp: Option<String>,
    pub read: bool,
}

impl From<SocketMessage> for ChatMessage {
    fn from(m: SocketMessage) -> Self {
        let sender_name = m
            .sender_full_name
            .filter(|n| !n.trim().is_empty())
            .or(m.sender_name)
            .unwrap_or_else(|| "User".to_string());
        ChatMessage {
            id: m.id,
            room_id: m.chat_room_id,
            sender_id: m.sender_id,
            sender_name,
            body: m.content.filter(|c| !c.trim().is_empty()),
            attachments: m.attachments,
            timestamp: m.created_at,
            read: m.is_read,
        }
    }
}

impl ChatMessage {
    pub fn from_history(room_id: RoomId, m: HistoryMessage) -> Self {
        ChatMessage {
            id: m.id,
            room_id: Some(room_id),
            sender_id: m.sender.id,
            sender_name: m.sender.username,
            body: m.text.filter(|t| !t.trim().is_empty()),
            attachments: m.attachments,
            timestamp: m.timestamp,
            read: true,
        }
    }

    pub fn text(&self) -> &str {
        self.body.as_deref().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outbound_commands_use_command_tag() {
        let json = serde_json::to_value(OutboundCommand::GetUnreadCount).unwrap();
        assert_eq!(json, serde_json::json!({"command": "get_unread_count"}));

        let json = serde_json::to_value(OutboundCommand::mark_message_read(42)).unwrap();
        assert_eq!(json, serde_json::json!({"command": "mark_as_read", "message_id": 42}));

        let json = serde_json::to_value(OutboundCommand::mark_notification_read(7)).unwrap();
        assert_eq!(json, serde_json::json!({"command": "mark_as_read", "notification_id": 7}));

        let json = serde_json::to_value(OutboundCommand::SendMessage {
            message: "hi".into(),
            room_id: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"command": "send_message", "message": "hi"}));
    }

    #[test]
    fn unknown_chat_kind_is_not_an_error() {
        let frame: ChatFrame = serde_json::from_str(r#"{"type":"typing","user":3}"#).unwrap();
        assert_eq!(frame, ChatFrame::Unknown);
    }

    #[test]
    fn room_ids_accept_strings() {
        let raw = r#"{"type":"message_notification","room_id":"12",
            "message":{"id":5,"content":"hey","sender_id":"3","sender_name":"ayse"}}"#;
        match serde_json::from_str::<ChatFrame>(raw).unwrap() {
            ChatFrame::MessageNotification { message, room_id } => {
                assert_eq!(room_id, 12);
                assert_eq!(message.sender_id, 3);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn socket_message_prefers_full_name() {
        let raw = r#"{"id":1,"content":"  ","sender_id":2,"sender_name":"mehmet",
            "sender_full_name":"Mehmet Y","chat_room_id":9}"#;
        let msg: ChatMessage = serde_json::from_str::<SocketMessage>(raw).unwrap().into();
        assert_eq!(msg.sender_name, "Mehmet Y");
        assert_eq!(msg.body, None);
        assert_eq!(msg.room_id, Some(9));
    }

    #[test]
    fn history_page_parses_pagination() {
        let raw = r#"{"messages":[{"id":10,"text":"a","sender":{"id":1,"username":"x"},
            "attachments":[{"id":1,"url":"/m/a.png","type":"image/png"}]}],
            "pagination":{"has_more":true,"oldest_message_id":10}}"#;
        let page: HistoryPage = serde_json::from_str(raw).unwrap();
        assert!(page.pagination.has_more);
        assert_eq!(page.pagination.oldest_message_id, Some(10));
        assert_eq!(page.messages[0].attachments[0].file, "/m/a.png");
        assert_eq!(page.messages[0].attachments[0].file_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn notification_target_ignores_blank_url() {
        let raw = r#"{"type":"new_notification","notification":{"id":3,"title":"t","text":"b","url":" "}}"#;
        match serde_json::from_str::<NotificationFrame>(raw).unwrap() {
            NotificationFrame::NewNotification { notification } => assert_eq!(notification.target(), None),
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
