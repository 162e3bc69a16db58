// Notification channel: header badge and dropdown list.
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::client::models::app_state::NotificationState;
use crate::client::models::messages::{Notification, NotificationFrame, NotificationId, OutboundCommand};
use crate::client::models::ui_state::NotificationEvent;
use crate::client::services::message_parser::{truncate_preview, SYSTEM_NOTIFICATION_CHARS};
use crate::client::services::realtime_channel::{ChannelContext, ChannelHandler};
use crate::client::services::websocket_client::ConnectionState;

#[derive(Debug, Clone, PartialEq)]
pub enum NotificationCommand {
    MarkRead(NotificationId),
    MarkAllRead,
    /// Mark read, then report where the notification points to.
    Open(NotificationId),
    Refresh,
}

pub struct NotificationService {
    state: NotificationState,
    events: mpsc::UnboundedSender<NotificationEvent>,
}

type Ctx<'a> = ChannelContext<'a, ()>;

impl NotificationService {
    pub fn new(events: mpsc::UnboundedSender<NotificationEvent>) -> Self {
        Self { state: NotificationState::default(), events }
    }

    pub fn state(&self) -> &NotificationState {
        &self.state
    }

    fn emit(&self, event: NotificationEvent) {
        let _ = self.events.send(event);
    }

    fn emit_all(&self) {
        self.emit(NotificationEvent::Badge(self.state.unread()));
        self.emit(NotificationEvent::ListChanged(self.state.items().to_vec()));
    }

    fn request_list(&self, ctx: &mut Ctx<'_>) {
        ctx.send(OutboundCommand::GetUnreadCount);
        if !ctx.send(OutboundCommand::GetNotifications) {
            ctx.reconnect();
        }
    }

    fn on_new_notification(&mut self, notification: Notification, ctx: &mut Ctx<'_>) {
        let title = if notification.title.trim().is_empty() {
            "New notification".to_string()
        } else {
            notification.title.clone()
        };
        self.emit(NotificationEvent::SystemNotification {
            title,
            body: truncate_preview(&notification.text, SYSTEM_NOTIFICATION_CHARS),
            url: notification.target().map(str::to_string),
        });
        self.state.record_incoming(notification);
        self.emit_all();
        self.request_list(ctx);
    }

    fn mark_read(&mut self, id: NotificationId, ctx: &mut Ctx<'_>) {
        let snapshot = self.state.mark_read_optimistic(id);
        if !ctx.send(OutboundCommand::mark_notification_read(id)) {
            warn!("[WS:NOTIFICATIONS] Could not mark {} as read, restoring", id);
            self.state.rollback(snapshot);
            ctx.reconnect();
        }
        self.emit_all();
    }
}

impl ChannelHandler for NotificationService {
    type Frame = NotificationFrame;
    type Command = NotificationCommand;
    type Completion = ();

    const NAME: &'static str = "NOTIFICATIONS";

    fn on_state_change(&mut self, state: ConnectionState) {
        self.emit(NotificationEvent::ConnectionChanged(state));
    }

    fn on_open(&mut self, ctx: &mut Ctx<'_>) {
        self.request_list(ctx);
    }

    fn on_frame(&mut self, frame: NotificationFrame, ctx: &mut Ctx<'_>) {
        match frame {
            NotificationFrame::NewNotification { notification } => self.on_new_notification(notification, ctx),
            NotificationFrame::UnreadCount { count } => {
                self.state.set_unread(count);
                self.emit(NotificationEvent::Badge(count));
            }
            NotificationFrame::NotificationRead { notification_id } => {
                self.state.apply_read(notification_id);
                self.emit(NotificationEvent::ListChanged(self.state.items().to_vec()));
                ctx.send(OutboundCommand::GetUnreadCount);
            }
            NotificationFrame::NotificationsList { notifications } => {
                self.state.replace_list(notifications);
                self.emit(NotificationEvent::ListChanged(self.state.items().to_vec()));
            }
            NotificationFrame::AllNotificationsRead => {
                self.state.apply_all_read();
                self.emit_all();
            }
            NotificationFrame::Pong { timestamp } => debug!("[WS:NOTIFICATIONS] pong {:?}", timestamp),
            NotificationFrame::Unknown => debug!("[WS:NOTIFICATIONS] Ignoring unknown frame kind"),
        }
    }

    fn on_command(&mut self, command: NotificationCommand, ctx: &mut Ctx<'_>) {
        match command {
            NotificationCommand::MarkRead(id) => self.mark_read(id, ctx),
            NotificationCommand::MarkAllRead => {
                let snapshot = self.state.mark_all_read_optimistic();
                if !ctx.send(OutboundCommand::MarkAllAsRead) {
                    warn!("[WS:NOTIFICATIONS] Could not mark all as read, restoring");
                    self.state.rollback(snapshot);
                    ctx.reconnect();
                }
                self.emit_all();
            }
            NotificationCommand::Open(id) => {
                let target = self.state.get(id).and_then(|n| n.target()).map(str::to_string);
                self.mark_read(id, ctx);
                if let Some(url) = target {
                    self.emit(NotificationEvent::Navigate { notification_id: id, url });
                }
            }
            NotificationCommand::Refresh => self.request_list(ctx),
        }
    }

    fn on_liveness(&mut self, ctx: &mut Ctx<'_>) {
        ctx.send(OutboundCommand::Ping);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::services::chat_service::testing::RecordingOutbox;

    fn notification(id: i64, url: Option<&str>) -> Notification {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "title": "",
            "text": "Someone liked your post",
            "url": url,
            "is_read": false,
        }))
        .unwrap()
    }

    fn run(service: &mut NotificationService, outbox: &mut RecordingOutbox, frame: NotificationFrame) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctx = ChannelContext::new(outbox, &tx);
        service.on_frame(frame, &mut ctx);
    }

    fn command(service: &mut NotificationService, outbox: &mut RecordingOutbox, command: NotificationCommand) {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut ctx = ChannelContext::new(outbox, &tx);
        service.on_command(command, &mut ctx);
    }

    #[test]
    fn new_notification_bumps_badge_and_refreshes() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut service = NotificationService::new(tx);
        let mut outbox = RecordingOutbox::open();
        run(&mut service, &mut outbox, NotificationFrame::NewNotification { notification: notification(1, None) });

        assert_eq!(service.state().unread(), 1);
        assert_eq!(outbox.sent, vec![OutboundCommand::GetUnreadCount, OutboundCommand::GetNotifications]);
        match events.try_recv().unwrap() {
            NotificationEvent::SystemNotification { title, .. } => assert_eq!(title, "New notification"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn count_push_overwrites_and_list_replaces() {
        let (tx, _events) = mpsc::unbounded_channel();
        let mut service = NotificationService::new(tx);
        let mut outbox = RecordingOutbox::open();
        for id in 1..=3 {
            run(&mut service, &mut outbox, NotificationFrame::NewNotification { notification: notification(id, None) });
        }
        run(&mut service, &mut outbox, NotificationFrame::UnreadCount { count: 7 });
        assert_eq!(service.state().unread(), 7);

        run(
            &mut service,
            &mut outbox,
            NotificationFrame::NotificationsList { notifications: vec![notification(9, None)] },
        );
        assert_eq!(service.state().items().len(), 1);

        run(&mut service, &mut outbox, NotificationFrame::AllNotificationsRead);
        assert_eq!(service.state().unread(), 0);
    }

    #[test]
    fn open_marks_read_and_navigates() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut service = NotificationService::new(tx);
        let mut outbox = RecordingOutbox::open();
        run(
            &mut service,
            &mut outbox,
            NotificationFrame::NotificationsList { notifications: vec![notification(4, Some("/posts/4/"))] },
        );
        run(&mut service, &mut outbox, NotificationFrame::UnreadCount { count: 1 });
        command(&mut service, &mut outbox, NotificationCommand::Open(4));

        assert!(outbox.sent.contains(&OutboundCommand::mark_notification_read(4)));
        assert_eq!(service.state().unread(), 0);
        let navigated = std::iter::from_fn(|| events.try_recv().ok()).any(|e| {
            e == NotificationEvent::Navigate { notification_id: 4, url: "/posts/4/".to_string() }
        });
        assert!(navigated);
    }

    #[test]
    fn closed_channel_rolls_back_mark_read() {
        let (tx, _events) = mpsc::unbounded_channel();
        let mut service = NotificationService::new(tx);
        let mut outbox = RecordingOutbox::open();
        run(&mut service, &mut outbox, NotificationFrame::NewNotification { notification: notification(1, None) });

        let mut closed = RecordingOutbox::closed();
        command(&mut service, &mut closed, NotificationCommand::MarkRead(1));
        assert_eq!(service.state().unread(), 1);
        assert!(!service.state().get(1).unwrap().is_read);
        command(&mut service, &mut closed, NotificationCommand::MarkAllRead);
        assert_eq!(service.state().unread(), 1);
        assert_eq!(closed.reconnects, 2);
    }

    #[test]
    fn liveness_pings_and_pong_is_quiet() {
        let (tx, mut events) = mpsc::unbounded_channel();
        let mut service = NotificationService::new(tx);
        let mut outbox = RecordingOutbox::open();
        let (ctx_tx, _rx) = mpsc::unbounded_channel();
        service.on_liveness(&mut ChannelContext::new(&mut outbox, &ctx_tx));
        assert_eq!(outbox.sent, vec![OutboundCommand::Ping]);
        run(&mut service, &mut outbox, NotificationFrame::Pong { timestamp: None });
        assert!(events.try_recv().is_err());
    }
}
