use std::collections::HashMap;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::time::{Duration, Instant};

use crate::client::models::messages::{ChatMessage, HistoryPage, MessageId, RoomId};
use crate::client::services::http_api::ApiError;

/// One older-page fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub room_id: RoomId,
    /// Exclusive upper bound; `None` for the newest page.
    pub before_id: Option<MessageId>,
    pub page_size: u32,
}

/// Where pages come from. Implemented by the HTTP client; tests use fakes.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_page(&self, request: PageRequest) -> Result<HistoryPage, ApiError>;
}

#[derive(Debug, Clone)]
struct RoomHistory {
    /// Ascending by id.
    messages: Vec<ChatMessage>,
    cursor: Option<MessageId>,
    has_more: bool,
    in_flight: bool,
}

impl Default for RoomHistory {
    fn default() -> Self {
        RoomHistory { messages: Vec::new(), cursor: None, has_more: true, in_flight: false }
    }
}

impl RoomHistory {
    fn contains(&self, id: MessageId) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    fn lower_cursor(&mut self, id: MessageId) {
        self.cursor = Some(self.cursor.map_or(id, |c| c.min(id)));
    }
}

/// Loaded history per room plus the pagination cursor and in-flight guard.
#[derive(Debug, Clone)]
pub struct HistoryPager {
    page_size: u32,
    rooms: HashMap<RoomId, RoomHistory>,
}

impl HistoryPager {
    pub fn new(page_size: u32) -> Self {
        HistoryPager { page_size, rooms: HashMap::new() }
    }

    pub fn messages(&self, room_id: RoomId) -> &[ChatMessage] {
        self.rooms.get(&room_id).map(|r| r.messages.as_slice()).unwrap_or(&[])
    }

    pub fn cursor(&self, room_id: RoomId) -> Option<MessageId> {
        self.rooms.get(&room_id).and_then(|r| r.cursor)
    }

    pub fn has_more(&self, room_id: RoomId) -> bool {
        self.rooms.get(&room_id).map_or(true, |r| r.has_more)
    }

    pub fn is_loading(&self, room_id: RoomId) -> bool {
        self.rooms.get(&room_id).map_or(false, |r| r.in_flight)
    }

    /// Start loading the next older page, unless one is already in flight
    /// for this room or the server said there is nothing left.
    pub fn begin(&mut self, room_id: RoomId) -> Option<PageRequest> {
        let page_size = self.page_size;
        let room = self.rooms.entry(room_id).or_default();
        if room.in_flight {
            debug!("[HISTORY] Room {} already loading", room_id);
            return None;
        }
        if !room.has_more {
            debug!("[HISTORY] Room {} has no more history", room_id);
            return None;
        }
        room.in_flight = true;
        Some(PageRequest { room_id, before_id: room.cursor, page_size })
    }

    /// Merge a fetched page. Returns the messages actually prepended, oldest
    /// first.
    pub fn complete(&mut self, request: PageRequest, page: HistoryPage) -> Vec<ChatMessage> {
        let room = self.rooms.entry(request.room_id).or_default();
        room.in_flight = false;

        let fetched = page.messages.len();
        let mut fresh: Vec<ChatMessage> = page
            .messages
            .into_iter()
            .filter(|m| room.cursor.map_or(true, |c| m.id < c))
            .filter(|m| !room.contains(m.id))
            .map(|m| ChatMessage::from_history(request.room_id, m))
            .collect();
        fresh.sort_by_key(|m| m.id);
        fresh.dedup_by_key(|m| m.id);

        if let Some(oldest) = fresh.first().map(|m| m.id) {
            room.lower_cursor(oldest);
        }
        room.has_more = page.pagination.has_more && fetched > 0;
        let newer = std::mem::replace(&mut room.messages, fresh.clone());
        room.messages.extend(newer);

        info!(
            "[HISTORY] Room {}: {} older messages (cursor {:?}, more: {})",
            request.room_id,
            fresh.len(),
            room.cursor,
            room.has_more
        );
        fresh
    }

    /// The fetch failed: leave the room as it was so a later scroll retries.
    pub fn fail(&mut self, request: PageRequest, error: &ApiError) {
        warn!("[HISTORY] Loading room {} failed: {}", request.room_id, error);
        if let Some(room) = self.rooms.get_mut(&request.room_id) {
            room.in_flight = false;
        }
    }

    /// A live message for this room arrived over the socket.
    pub fn append_live(&mut self, room_id: RoomId, message: ChatMessage) -> bool {
        let room = self.rooms.entry(room_id).or_default();
        if room.contains(message.id) {
            return false;
        }
        room.lower_cursor(message.id);
        let at = room.messages.partition_point(|m| m.id < message.id);
        room.messages.insert(at, message);
        true
    }

    pub fn mark_read(&mut self, message_id: MessageId) -> bool {
        self.set_read(message_id, true).is_some()
    }

    /// Set a loaded message's read flag. Returns the previous value, `None`
    /// if the message is not loaded.
    pub fn set_read(&mut self, message_id: MessageId, read: bool) -> Option<bool> {
        self.rooms
            .values_mut()
            .find_map(|room| room.messages.iter_mut().find(|m| m.id == message_id))
            .map(|message| std::mem::replace(&mut message.read, read))
    }

    /// Messages rendered by someone else before the pager took over.
    pub fn seed_from_ids(&mut self, room_id: RoomId, ids: impl IntoIterator<Item = MessageId>) {
        if let Some(min) = ids.into_iter().min() {
            self.rooms.entry(room_id).or_default().lower_cursor(min);
        }
    }
}

/// Debounced "near the top" detector for a history view.
#[derive(Debug, Clone)]
pub struct ScrollTrigger {
    threshold: f64,
    debounce: Duration,
    last_offset: Option<f64>,
    pending: Option<PendingScroll>,
}

#[derive(Debug, Clone, Copy)]
struct PendingScroll {
    due: Instant,
    offset: f64,
    upward: bool,
}

impl ScrollTrigger {
    pub fn new(threshold: f64, debounce: Duration) -> Self {
        ScrollTrigger { threshold, debounce, last_offset: None, pending: None }
    }

    /// Record a scroll position; restarts the debounce window.
    pub fn on_scroll(&mut self, offset: f64, now: Instant) {
        let upward = self.last_offset.map_or(true, |last| offset < last);
        let upward = upward || self.pending.map_or(false, |p| p.upward);
        self.last_offset = Some(offset);
        self.pending = Some(PendingScroll { due: now + self.debounce, offset, upward });
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.pending.map(|p| p.due)
    }

    /// Whether the settled gesture should load an older page.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending {
            Some(p) if now >= p.due => {
                self.pending = None;
                p.upward && p.offset < self.threshold
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::models::messages::{HistoryMessage, HistorySender, Pagination};
    use proptest::prelude::*;

    fn page(ids: &[i64], has_more: bool) -> HistoryPage {
        HistoryPage {
            messages: ids
                .iter()
                .map(|&id| HistoryMessage {
                    id,
                    text: Some(format!("m{}", id)),
                    timestamp: None,
                    formatted_time: None,
                    is_mine: false,
                    sender: HistorySender { id: 1, username: "u".into(), avatar: None },
                    attachments: vec![],
                })
                .collect(),
            pagination: Pagination { has_more, oldest_message_id: ids.iter().min().copied() },
        }
    }

    #[test]
    fn first_page_then_older_page() {
        let mut pager = HistoryPager::new(20);
        let req = pager.begin(1).unwrap();
        assert_eq!(req.before_id, None);
        assert!(pager.begin(1).is_none(), "second begin while in flight");

        pager.complete(req, page(&[50, 51, 52], true));
        assert_eq!(pager.cursor(1), Some(50));

        let req = pager.begin(1).unwrap();
        assert_eq!(req.before_id, Some(50));
        let added = pager.complete(req, page(&[49, 48, 50, 60], true));
        let ids: Vec<_> = added.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![48, 49]);
        let all: Vec<_> = pager.messages(1).iter().map(|m| m.id).collect();
        assert_eq!(all, vec![48, 49, 50, 51, 52]);
        assert_eq!(pager.cursor(1), Some(48));
    }

    #[test]
    fn exhausted_history_stops_requests() {
        let mut pager = HistoryPager::new(20);
        let req = pager.begin(1).unwrap();
        pager.complete(req, page(&[3, 4], false));
        assert!(pager.begin(1).is_none());

        let mut pager = HistoryPager::new(20);
        let req = pager.begin(2).unwrap();
        pager.complete(req, page(&[], true));
        assert!(!pager.has_more(2));
    }

    #[test]
    fn failure_leaves_room_retryable() {
        let mut pager = HistoryPager::new(20);
        pager.seed_from_ids(1, vec![30, 12, 40]);
        let req = pager.begin(1).unwrap();
        assert_eq!(req.before_id, Some(12));
        pager.fail(req, &ApiError::Rejected("boom".into()));
        assert!(!pager.is_loading(1));
        assert_eq!(pager.cursor(1), Some(12));
        assert_eq!(pager.begin(1), Some(req));
    }

    #[test]
    fn live_messages_merge_in_order() {
        let mut pager = HistoryPager::new(20);
        let req = pager.begin(1).unwrap();
        pager.complete(req, page(&[10, 11], true));
        let live = ChatMessage::from_history(1, page(&[12], false).messages.remove(0));
        assert!(pager.append_live(1, live.clone()));
        assert!(!pager.append_live(1, live));
        assert!(pager.mark_read(12));
        assert_eq!(pager.set_read(12, false), Some(true));
        assert_eq!(pager.set_read(99, true), None);
        assert_eq!(pager.messages(1).last().unwrap().id, 12);
        assert_eq!(pager.cursor(1), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_trigger_debounces_upward_gestures() {
        let mut trigger = ScrollTrigger::new(150.0, Duration::from_millis(200));
        let t0 = Instant::now();
        trigger.on_scroll(400.0, t0);
        trigger.on_scroll(300.0, t0 + Duration::from_millis(50));
        trigger.on_scroll(100.0, t0 + Duration::from_millis(100));
        assert!(!trigger.poll(t0 + Duration::from_millis(250)));
        assert_eq!(trigger.deadline(), Some(t0 + Duration::from_millis(300)));
        assert!(trigger.poll(t0 + Duration::from_millis(300)));
        assert!(!trigger.poll(t0 + Duration::from_millis(400)));

        // settling far from the top does nothing
        trigger.on_scroll(90.0, t0 + Duration::from_secs(1));
        trigger.on_scroll(500.0, t0 + Duration::from_millis(1100));
        assert!(!trigger.poll(t0 + Duration::from_secs(2)));

        // scrolling down inside the threshold does nothing
        let mut trigger = ScrollTrigger::new(150.0, Duration::from_millis(200));
        trigger.on_scroll(10.0, t0);
        trigger.poll(t0 + Duration::from_secs(1));
        trigger.on_scroll(60.0, t0 + Duration::from_secs(2));
        assert!(!trigger.poll(t0 + Duration::from_secs(3)));
    }

    proptest! {
        #[test]
        fn cursor_never_increases(pages in prop::collection::vec(prop::collection::vec(1i64..500, 0..25), 1..10)) {
            let mut pager = HistoryPager::new(20);
            let mut previous: Option<i64> = None;
            for ids in pages {
                let Some(req) = pager.begin(7) else { break };
                prop_assert_eq!(req.before_id, previous);
                let added = pager.complete(req, page(&ids, true));
                if let Some(c) = previous {
                    prop_assert!(added.iter().all(|m| m.id < c));
                }
                let loaded = pager.messages(7);
                let mut seen: Vec<_> = loaded.iter().map(|m| m.id).collect();
                seen.dedup();
                prop_assert_eq!(seen.len(), loaded.len());
                let cursor = pager.cursor(7);
                prop_assert_eq!(cursor, loaded.iter().map(|m| m.id).min());
                if let (Some(p), Some(c)) = (previous, cursor) {
                    prop_assert!(c <= p);
                }
                previous = cursor;
            }
        }
    }
}
