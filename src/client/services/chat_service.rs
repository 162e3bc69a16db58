// Chat channel: sidebar, header badge, the open room and its history.
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::client::config::ClientConfig;
use crate::client::models::app_state::ChatState;
use crate::client::models::attachments::{validate_message, StagedAttachments};
use crate::client::models::messages::{ChatFrame, ChatMessage, HistoryPage, MessageId, OutboundCommand, RoomId};
use crate::client::models::ui_state::ChatEvent;
use crate::client::services::history_pager::{HistoryPager, HistorySource, PageRequest, ScrollTrigger};
use crate::client::services::http_api::{ApiClient, ApiError};
use crate::client::services::message_parser::{truncate_preview, SYSTEM_NOTIFICATION_CHARS};
use crate::client::services::realtime_channel::{ChannelContext, ChannelHandler, ChannelSender};
use crate::client::services::websocket_client::ConnectionState;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Open a room: it becomes the active room, is marked read and its
    /// first history page is requested.
    SelectRoom(RoomId),
    SendText(String),
    /// A message created by an attachment upload; tell the room about it.
    AnnounceAttachments(MessageId),
    MarkMessageRead(MessageId),
    MarkRoomRead(RoomId),
    MarkAllRead,
    Scrolled { offset: f64 },
    LoadOlder,
    RefreshSidebar,
}

pub enum ChatCompletion {
    HistoryLoaded {
        request: PageRequest,
        result: Result<HistoryPage, ApiError>,
    },
}

pub struct ChatService {
    state: ChatState,
    pager: HistoryPager,
    scroll: ScrollTrigger,
    history: Arc<dyn HistorySource>,
    max_message_chars: usize,
    events: mpsc::UnboundedSender<ChatEvent>,
}

type Ctx<'a> = ChannelContext<'a, ChatCompletion>;

impl ChatService {
    pub fn new(config: &ClientConfig, history: Arc<dyn HistorySource>, events: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self {
            state: ChatState::new(config.current_user_id, config.chat_room_id),
            pager: HistoryPager::new(config.history_page_size),
            scroll: ScrollTrigger::new(config.scroll_threshold_px, config.scroll_debounce),
            history,
            max_message_chars: config.max_message_chars,
            events,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn pager(&self) -> &HistoryPager {
        &self.pager
    }

    fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn emit_counts(&self) {
        self.emit(ChatEvent::SidebarChanged(self.state.rooms().to_vec()));
        self.emit(ChatEvent::UnreadBadge(self.state.unread_total()));
    }

    fn refresh(&self, ctx: &mut Ctx<'_>) {
        ctx.send(OutboundCommand::GetUnreadCount);
        ctx.send(OutboundCommand::GetRecentRooms);
    }

    fn on_new_message(&mut self, message: ChatMessage, ctx: &mut Ctx<'_>) {
        let own = self.state.is_own(&message);
        let room_id = message.room_id.or(self.state.active_room);
        match room_id {
            Some(room_id) if Some(room_id) == self.state.active_room => {
                self.state.record_incoming(room_id, &message, false);
                if self.pager.append_live(room_id, message.clone()) {
                    self.emit(ChatEvent::MessageAppended(message.clone()));
                }
                if !own {
                    ctx.send(OutboundCommand::mark_message_read(message.id));
                }
            }
            Some(room_id) => self.state.record_incoming(room_id, &message, !own),
            None => {
                debug!("[WS:CHAT] new_message without a room, ignoring");
                return;
            }
        }
        self.emit_counts();
    }

    fn on_message_notification(&mut self, message: ChatMessage, room_id: RoomId, ctx: &mut Ctx<'_>) {
        let own = self.state.is_own(&message);
        if Some(room_id) == self.state.active_room {
            if !own {
                ctx.send(OutboundCommand::mark_message_read(message.id));
            }
            return;
        }
        self.state.record_incoming(room_id, &message, !own);
        self.emit_counts();
        if !own {
            let body = if message.text().is_empty() { "[image]".to_string() } else { message.text().to_string() };
            self.emit(ChatEvent::SystemNotification {
                title: format!("New message: {}", message.sender_name),
                body: truncate_preview(&body, SYSTEM_NOTIFICATION_CHARS),
                room_id,
            });
        }
        self.refresh(ctx);
    }

    fn mark_room_read(&mut self, room_id: RoomId, ctx: &mut Ctx<'_>) {
        let snapshot = self.state.mark_room_read_optimistic(room_id);
        if !ctx.send(OutboundCommand::MarkRoomAsRead { room_id }) {
            warn!("[WS:CHAT] Could not mark room {} as read, restoring badge", room_id);
            self.state.rollback_room(snapshot);
            ctx.reconnect();
        }
        self.emit_counts();
    }

    fn mark_all_read(&mut self, ctx: &mut Ctx<'_>) {
        let snapshot = self.state.mark_all_read_optimistic();
        if !ctx.send(OutboundCommand::MarkAllAsRead) {
            warn!("[WS:CHAT] Could not mark all rooms as read, restoring badges");
            self.state.rollback_all(snapshot);
            ctx.reconnect();
        }
        self.emit_counts();
    }

    fn send_text(&mut self, text: String, ctx: &mut Ctx<'_>) {
        if let Err(e) = validate_message(&text, self.max_message_chars, false) {
            self.emit(ChatEvent::UserError(e.to_string()));
            return;
        }
        let command = OutboundCommand::SendMessage { message: text, room_id: self.state.active_room };
        if !ctx.send(command) {
            self.emit(ChatEvent::UserError("Not connected, message was not sent".to_string()));
            ctx.reconnect();
        }
    }

    fn load_older(&mut self, ctx: &mut Ctx<'_>) {
        let Some(room_id) = self.state.active_room else {
            return;
        };
        let Some(request) = self.pager.begin(room_id) else {
            return;
        };
        self.emit(ChatEvent::HistoryLoading { room_id, loading: true });
        let history = Arc::clone(&self.history);
        ctx.spawn(async move {
            let result = history.fetch_page(request).await;
            ChatCompletion::HistoryLoaded { request, result }
        });
    }
}

impl ChannelHandler for ChatService {
    type Frame = ChatFrame;
    type Command = ChatCommand;
    type Completion = ChatCompletion;

    const NAME: &'static str = "CHAT";

    fn on_state_change(&mut self, state: ConnectionState) {
        self.emit(ChatEvent::ConnectionChanged(state));
    }

    fn on_open(&mut self, ctx: &mut Ctx<'_>) {
        self.refresh(ctx);
    }

    fn on_frame(&mut self, frame: ChatFrame, ctx: &mut Ctx<'_>) {
        match frame {
            ChatFrame::ConnectionEstablished { user_id, .. } => {
                info!("[WS:CHAT] Connection established for user {}", user_id);
                if self.state.current_user.is_none() {
                    self.state.current_user = Some(user_id);
                }
                self.emit(ChatEvent::Identified { user_id });
            }
            ChatFrame::NewMessage { message } => self.on_new_message(message.into(), ctx),
            ChatFrame::MessageNotification { message, room_id } => {
                self.on_message_notification(message.into(), room_id, ctx)
            }
            ChatFrame::AllMessagesRead => {
                self.state.clear_all();
                self.emit_counts();
                ctx.send(OutboundCommand::GetRecentRooms);
            }
            ChatFrame::UnreadCount { count } => {
                self.state.set_unread_total(count);
                self.emit(ChatEvent::UnreadBadge(count));
            }
            ChatFrame::RecentRooms { rooms } => {
                self.state.replace_rooms(rooms);
                self.emit(ChatEvent::SidebarChanged(self.state.rooms().to_vec()));
            }
            ChatFrame::RoomMessagesRead { room_id } => {
                self.state.set_room_unread(room_id, 0);
                self.emit_counts();
            }
            ChatFrame::MessagesReadNotification { room_id, unread_count, .. } => {
                self.state.set_room_unread(room_id, unread_count);
                self.emit_counts();
            }
            ChatFrame::MessageRead { message_id } => {
                if self.pager.mark_read(message_id) {
                    self.emit(ChatEvent::MessageRead { message_id });
                }
            }
            ChatFrame::MessageBlocked { error, room_id } => {
                warn!("[WS:CHAT] Message blocked in room {:?}: {:?}", room_id, error);
                self.emit(ChatEvent::UserError(error.unwrap_or_else(|| "Message could not be sent".to_string())));
            }
            ChatFrame::Unknown => debug!("[WS:CHAT] Ignoring unknown frame kind"),
        }
    }

    fn on_command(&mut self, command: ChatCommand, ctx: &mut Ctx<'_>) {
        match command {
            ChatCommand::SelectRoom(room_id) => {
                self.state.active_room = Some(room_id);
                self.mark_room_read(room_id, ctx);
                if self.pager.messages(room_id).is_empty() {
                    self.load_older(ctx);
                }
            }
            ChatCommand::SendText(text) => self.send_text(text, ctx),
            ChatCommand::AnnounceAttachments(message_id) => {
                if !ctx.send(OutboundCommand::MessageWithAttachments { message_id }) {
                    warn!("[WS:CHAT] Upload {} could not be announced", message_id);
                    self.emit(ChatEvent::UserError(
                        "Not connected, attachments were uploaded but the room was not notified".to_string(),
                    ));
                    ctx.reconnect();
                }
            }
            ChatCommand::MarkMessageRead(message_id) => {
                let previous = self.pager.set_read(message_id, true);
                if !ctx.send(OutboundCommand::mark_message_read(message_id)) {
                    if let Some(read) = previous {
                        self.pager.set_read(message_id, read);
                    }
                    ctx.reconnect();
                }
            }
            ChatCommand::MarkRoomRead(room_id) => self.mark_room_read(room_id, ctx),
            ChatCommand::MarkAllRead => self.mark_all_read(ctx),
            ChatCommand::Scrolled { offset } => self.scroll.on_scroll(offset, Instant::now()),
            ChatCommand::LoadOlder => self.load_older(ctx),
            ChatCommand::RefreshSidebar => self.refresh(ctx),
        }
    }

    fn on_completion(&mut self, completion: ChatCompletion, _ctx: &mut Ctx<'_>) {
        match completion {
            ChatCompletion::HistoryLoaded { request, result } => {
                let room_id = request.room_id;
                match result {
                    Ok(page) => {
                        let messages = self.pager.complete(request, page);
                        self.emit(ChatEvent::HistoryLoading { room_id, loading: false });
                        self.emit(ChatEvent::HistoryPrepended {
                            room_id,
                            messages,
                            has_more: self.pager.has_more(room_id),
                        });
                    }
                    Err(e) => {
                        self.pager.fail(request, &e);
                        self.emit(ChatEvent::HistoryLoading { room_id, loading: false });
                        self.emit(ChatEvent::UserError(format!("Could not load older messages: {}", e)));
                    }
                }
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.scroll.deadline()
    }

    fn on_deadline(&mut self, now: Instant, ctx: &mut Ctx<'_>) {
        if self.scroll.poll(now) {
            self.load_older(ctx);
        }
    }
}

/// Upload the staged images (with `text` as caption) and announce the new
/// message on the chat socket.
///
/// The caption is validated before anything is sent. The staged set is
/// cleared once the upload succeeded, since the images then live on the
/// server; a failed announcement is still reported as an error.
pub async fn send_with_attachments(
    api: &ApiClient,
    chat: &ChannelSender<ChatCommand>,
    room_id: RoomId,
    text: &str,
    max_message_chars: usize,
    staged: &mut StagedAttachments,
) -> anyhow::Result<MessageId> {
    validate_message(text, max_message_chars, !staged.is_empty())?;
    let message_id = api.upload_attachments(room_id, text, staged).await?;
    staged.clear();
    if !chat.send(ChatCommand::AnnounceAttachments(message_id)) {
        anyhow::bail!("Message {} was uploaded but the chat channel is stopped", message_id);
    }
    Ok(message_id)
}
