// Local read state for both channels.
//
// Authoritative values from the server always overwrite what is cached here.
// Local observations and mark-read actions update the cache optimistically and
// hand back a snapshot so the caller can roll back if the command never left.
use crate::client::models::messages::{ChatMessage, Notification, NotificationId, RoomId, RoomSummary, UserId};
use crate::client::services::message_parser::{truncate_preview, SIDEBAR_PREVIEW_CHARS};

/// A cached badge value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadCounter(u32);

impl UnreadCounter {
    pub fn get(&self) -> u32 {
        self.0
    }

    /// Authoritative push: replace, never merge.
    pub fn overwrite(&mut self, value: u32) {
        self.0 = value;
    }

    pub fn bump(&mut self) {
        self.0 = self.0.saturating_add(1);
    }

    pub fn decrement(&mut self) {
        self.0 = self.0.saturating_sub(1);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessagePreview {
    pub sender_name: String,
    pub text: String,
    pub timestamp: Option<String>,
}

impl MessagePreview {
    fn of(message: &ChatMessage) -> Self {
        let text = if message.text().is_empty() && !message.attachments.is_empty() {
            "[image]".to_string()
        } else {
            truncate_preview(message.text(), SIDEBAR_PREVIEW_CHARS)
        };
        MessagePreview {
            sender_name: message.sender_name.clone(),
            text,
            timestamp: message.timestamp.clone(),
        }
    }
}

/// One sidebar row.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomEntry {
    pub id: RoomId,
    pub name: String,
    pub unread_count: u32,
    pub last_message: Option<MessagePreview>,
}

impl From<RoomSummary> for RoomEntry {
    fn from(room: RoomSummary) -> Self {
        let last_message = room.last_message.map(|m| {
            let sender_name = m
                .sender_full_name
                .filter(|n| !n.trim().is_empty())
                .or(m.sender_name)
                .unwrap_or_else(|| "User".to_string());
            MessagePreview {
                sender_name,
                text: truncate_preview(m.content.as_deref().unwrap_or(""), SIDEBAR_PREVIEW_CHARS),
                timestamp: m.created_at,
            }
        });
        RoomEntry {
            id: room.id,
            name: room.name,
            unread_count: room.unread_count,
            last_message,
        }
    }
}

/// State before an optimistic room mark-read.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomReadSnapshot {
    room_id: RoomId,
    unread_count: u32,
    total: UnreadCounter,
}

/// State before an optimistic mark-all-read.
#[derive(Debug, Clone, PartialEq)]
pub struct AllReadSnapshot {
    counts: Vec<(RoomId, u32)>,
    total: UnreadCounter,
}

/// Chat side of the reconciler: sidebar rooms plus the header badge.
///
/// The header badge counts rooms with unread messages, matching what the
/// server sends in `unread_count` on the chat socket.
#[derive(Debug, Clone, Default)]
pub struct ChatState {
    pub current_user: Option<UserId>,
    pub active_room: Option<RoomId>,
    rooms: Vec<RoomEntry>,
    unread_total: UnreadCounter,
}

impl ChatState {
    pub fn new(current_user: Option<UserId>, active_room: Option<RoomId>) -> Self {
        ChatState { current_user, active_room, ..Default::default() }
    }

    /// Most recent first.
    pub fn rooms(&self) -> &[RoomEntry] {
        &self.rooms
    }

    pub fn room(&self, room_id: RoomId) -> Option<&RoomEntry> {
        self.rooms.iter().find(|r| r.id == room_id)
    }

    pub fn unread_total(&self) -> u32 {
        self.unread_total.get()
    }

    pub fn is_own(&self, message: &ChatMessage) -> bool {
        self.current_user == Some(message.sender_id)
    }

    pub fn replace_rooms(&mut self, rooms: Vec<RoomSummary>) {
        self.rooms = rooms.into_iter().map(RoomEntry::from).collect();
    }

    pub fn set_unread_total(&mut self, count: u32) {
        self.unread_total.overwrite(count);
    }

    /// A message arrived for `room_id`: move the room to the top and refresh
    /// its preview. `count_unread` adds one to its badge.
    pub fn record_incoming(&mut self, room_id: RoomId, message: &ChatMessage, count_unread: bool) {
        let mut entry = match self.rooms.iter().position(|r| r.id == room_id) {
            Some(idx) => self.rooms.remove(idx),
            None => RoomEntry {
                id: room_id,
                name: message.sender_name.clone(),
                unread_count: 0,
                last_message: None,
            },
        };
        entry.last_message = Some(MessagePreview::of(message));
        if count_unread {
            if entry.unread_count == 0 {
                self.unread_total.bump();
            }
            entry.unread_count += 1;
        }
        self.rooms.insert(0, entry);
    }

    /// Authoritative per-room count.
    pub fn set_room_unread(&mut self, room_id: RoomId, count: u32) {
        let Some(entry) = self.rooms.iter_mut().find(|r| r.id == room_id) else {
            return;
        };
        match (entry.unread_count, count) {
            (0, n) if n > 0 => self.unread_total.bump(),
            (p, 0) if p > 0 => self.unread_total.decrement(),
            _ => {}
        }
        entry.unread_count = count;
    }

    pub fn mark_room_read_optimistic(&mut self, room_id: RoomId) -> RoomReadSnapshot {
        let snapshot = RoomReadSnapshot {
            room_id,
            unread_count: self.room(room_id).map(|r| r.unread_count).unwrap_or(0),
            total: self.unread_total,
        };
        self.set_room_unread(room_id, 0);
        snapshot
    }

    pub fn rollback_room(&mut self, snapshot: RoomReadSnapshot) {
        if let Some(entry) = self.rooms.iter_mut().find(|r| r.id == snapshot.room_id) {
            entry.unread_count = snapshot.unread_count;
        }
        self.unread_total = snapshot.total;
    }

    pub fn mark_all_read_optimistic(&mut self) -> AllReadSnapshot {
        let snapshot = AllReadSnapshot {
            counts: self.rooms.iter().map(|r| (r.id, r.unread_count)).collect(),
            total: self.unread_total,
        };
        self.clear_all();
        snapshot
    }

    pub fn rollback_all(&mut self, snapshot: AllReadSnapshot) {
        for (room_id, count) in snapshot.counts {
            if let Some(entry) = self.rooms.iter_mut().find(|r| r.id == room_id) {
                entry.unread_count = count;
            }
        }
        self.unread_total = snapshot.total;
    }

    pub fn clear_all(&mut self) {
        for room in &mut self.rooms {
            room.unread_count = 0;
        }
        self.unread_total.overwrite(0);
    }
}

/// State before an optimistic notification mark-read.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationReadSnapshot {
    ids: Vec<(NotificationId, bool)>,
    unread: UnreadCounter,
}

/// Notification side of the reconciler. Newest first.
#[derive(Debug, Clone, Default)]
pub struct NotificationState {
    items: Vec<Notification>,
    unread: UnreadCounter,
}

impl NotificationState {
    pub fn items(&self) -> &[Notification] {
        &self.items
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.items.iter().find(|n| n.id == id)
    }

    pub fn unread(&self) -> u32 {
        self.unread.get()
    }

    pub fn set_unread(&mut self, count: u32) {
        self.unread.overwrite(count);
    }

    /// A pushed notification. A repeat of a listed one replaces it and only
    /// counts if the listed copy was already read.
    pub fn record_incoming(&mut self, notification: Notification) {
        let listed_unread = match self.items.iter().position(|n| n.id == notification.id) {
            Some(idx) => !self.items.remove(idx).is_read,
            None => false,
        };
        if !notification.is_read && !listed_unread {
            self.unread.bump();
        }
        self.items.insert(0, notification);
    }

    pub fn replace_list(&mut self, notifications: Vec<Notification>) {
        self.items = notifications;
    }

    pub fn mark_read_optimistic(&mut self, id: NotificationId) -> NotificationReadSnapshot {
        let snapshot = NotificationReadSnapshot {
            ids: self.items.iter().filter(|n| n.id == id).map(|n| (n.id, n.is_read)).collect(),
            unread: self.unread,
        };
        if let Some(item) = self.items.iter_mut().find(|n| n.id == id) {
            if !item.is_read {
                item.is_read = true;
                self.unread.decrement();
            }
        }
        snapshot
    }

    pub fn mark_all_read_optimistic(&mut self) -> NotificationReadSnapshot {
        let snapshot = NotificationReadSnapshot {
            ids: self.items.iter().map(|n| (n.id, n.is_read)).collect(),
            unread: self.unread,
        };
        self.apply_all_read();
        snapshot
    }

    pub fn rollback(&mut self, snapshot: NotificationReadSnapshot) {
        for (id, was_read) in snapshot.ids {
            if let Some(item) = self.items.iter_mut().find(|n| n.id == id) {
                item.is_read = was_read;
            }
        }
        self.unread = snapshot.unread;
    }

    /// Server confirmed one notification as read. The count follows in its
    /// own push.
    pub fn apply_read(&mut self, id: NotificationId) {
        if let Some(item) = self.items.iter_mut().find(|n| n.id == id) {
            item.is_read = true;
        }
    }

    pub fn apply_all_read(&mut self) {
        for item in &mut self.items {
            item.is_read = true;
        }
        self.unread.overwrite(0);
    }
}
