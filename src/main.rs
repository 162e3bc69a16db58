use std::path::PathBuf;
use std::sync::Arc;

use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use social_realtime::client::config::ClientConfig;
use social_realtime::client::models::attachments::{StagedAttachments, StagedFile, ValidationError};
use social_realtime::client::models::messages::RoomId;
use social_realtime::client::models::ui_state::{ChatEvent, NotificationEvent, ScrollViewport};
use social_realtime::client::services::chat_service::{send_with_attachments, ChatCommand, ChatService};
use social_realtime::client::services::http_api::{ApiClient, ReactionBoard, ReactionTarget, MIN_SEARCH_CHARS};
use social_realtime::client::services::message_parser::{format_timestamp, truncate_preview, DROPDOWN_PREVIEW_CHARS};
use social_realtime::client::services::notification_service::{NotificationCommand, NotificationService};
use social_realtime::client::services::realtime_channel::{self, ChannelConfig};
use social_realtime::client::services::websocket_client::WsConnector;
use social_realtime::client::utils::session_store::{self, SessionCredentials};

const HELP: &str = "Commands: /room <id>, /send <text>, /read, /readall, /nread <id>, /nreadall, /open <id>, \
/older, /scroll <px>, /foreground, /search <q>, /attach <path> <mime>, /sendfiles <text>, \
/like <app> <model> <id>, /bookmark <app> <model> <id>, /likes <app> <model> <id>, /logout, /help, /quit";

/// Height of one rendered message line in the virtual history view.
const ROW_PX: f64 = 20.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    env_logger::init();

    let credentials = SessionCredentials {
        session_cookie: config.session_cookie.clone(),
        csrf_token: config.csrf_token.clone(),
    }
    .or(session_store::load_session().unwrap_or_default());
    if credentials.is_empty() {
        println!("[CLIENT] No session configured (SESSION_COOKIE / CSRF_TOKEN); sockets will connect anonymously");
    } else if config.session_cookie.is_some() {
        if let Err(e) = session_store::save_session(&credentials) {
            log::warn!("[SESSION_STORE] {}", e);
        }
    }

    let api = Arc::new(ApiClient::new(
        config.base_url.clone(),
        credentials.csrf_token.clone(),
        credentials.session_cookie.clone(),
    ));
    let connector = WsConnector::with_cookie(api.cookie_header());

    let (chat_tx, mut chat_events) = mpsc::unbounded_channel();
    let (notif_tx, mut notif_events) = mpsc::unbounded_channel();
    let chat = realtime_channel::spawn(
        ChatService::new(&config, api.clone(), chat_tx),
        ChannelConfig {
            url: config.chat_socket_url()?,
            reconnect_delay: config.reconnect_delay,
            liveness_interval: config.liveness_interval,
        },
        connector.clone(),
    );
    let notifications = realtime_channel::spawn(
        NotificationService::new(notif_tx),
        ChannelConfig {
            url: config.notification_socket_url()?,
            reconnect_delay: config.reconnect_delay,
            liveness_interval: config.liveness_interval,
        },
        connector,
    );
    info!("[CLIENT] Monitoring {}", config.base_url);
    println!("{}", HELP);

    let mut room: Option<RoomId> = config.chat_room_id;
    let mut staged = StagedAttachments::default();
    let reactions = ReactionBoard::default();
    let mut viewport = ScrollViewport::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            Some(event) = chat_events.recv() => print_chat_event(event, &mut viewport),
            Some(event) = notif_events.recv() => print_notification_event(event),
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
                let rest = rest.trim();
                let args: Vec<&str> = rest.split_whitespace().collect();
                match command {
                    "/quit" => break,
                    "/help" => println!("{}", HELP),
                    "/room" => match rest.parse::<RoomId>() {
                        Ok(id) => {
                            room = Some(id);
                            viewport = ScrollViewport::default();
                            chat.send(ChatCommand::SelectRoom(id));
                        }
                        Err(_) => println!("[CLIENT] Usage: /room <id>"),
                    },
                    "/send" => {
                        chat.send(ChatCommand::SendText(rest.to_string()));
                    }
                    "/read" => match room {
                        Some(id) => {
                            chat.send(ChatCommand::MarkRoomRead(id));
                        }
                        None => println!("[CLIENT] Select a room first"),
                    },
                    "/readall" => {
                        chat.send(ChatCommand::MarkAllRead);
                    }
                    "/nread" | "/open" => match rest.parse() {
                        Ok(id) if command == "/open" => {
                            notifications.send(NotificationCommand::Open(id));
                        }
                        Ok(id) => {
                            notifications.send(NotificationCommand::MarkRead(id));
                        }
                        Err(_) => println!("[CLIENT] Usage: {} <notification id>", command),
                    },
                    "/nreadall" => {
                        notifications.send(NotificationCommand::MarkAllRead);
                    }
                    "/older" => {
                        chat.send(ChatCommand::LoadOlder);
                    }
                    "/scroll" => match rest.parse::<f64>() {
                        Ok(offset) => {
                            viewport.offset = offset;
                            chat.send(ChatCommand::Scrolled { offset });
                        }
                        Err(_) => println!("[CLIENT] Usage: /scroll <px from top>"),
                    },
                    "/foreground" => {
                        chat.foregrounded();
                        notifications.foregrounded();
                    }
                    "/search" => {
                        if rest.chars().count() < MIN_SEARCH_CHARS {
                            println!("[CLIENT] {}", ValidationError::QueryTooShort { min: MIN_SEARCH_CHARS });
                            continue;
                        }
                        match api.search_users(rest).await {
                            Ok(users) if users.is_empty() => println!("[CLIENT] No users found"),
                            Ok(users) => {
                                for user in users {
                                    println!("  #{} {} ({})", user.id, user.username, user.full_name);
                                }
                            }
                            Err(e) => println!("[CLIENT] Search failed: {}", e),
                        }
                    }
                    "/attach" if args.len() == 2 => {
                        match StagedFile::from_path(PathBuf::from(args[0]), args[1]).await {
                            Ok(file) => match staged.add(vec![file]) {
                                Ok(0) => println!("[CLIENT] Only images can be attached"),
                                Ok(_) => println!("[CLIENT] {} image(s) staged", staged.len()),
                                Err(e) => println!("[CLIENT] {}", e),
                            },
                            Err(e) => println!("[CLIENT] Cannot read {}: {}", args[0], e),
                        }
                    }
                    "/sendfiles" => match room {
                        Some(id) if !staged.is_empty() => {
                            let sent =
                                send_with_attachments(&api, &chat.sender(), id, rest, config.max_message_chars, &mut staged)
                                    .await;
                            match sent {
                                Ok(message_id) => println!("[CLIENT] Uploaded message #{}", message_id),
                                Err(e) => println!("[CLIENT] Upload failed: {}", e),
                            }
                        }
                        Some(_) => println!("[CLIENT] Nothing staged, use /attach first"),
                        None => println!("[CLIENT] Select a room first"),
                    },
                    "/like" | "/bookmark" | "/likes" if args.len() == 3 => {
                        let Ok(object_id) = args[2].parse() else {
                            println!("[CLIENT] Object id must be a number");
                            continue;
                        };
                        let target = ReactionTarget::new(args[0], args[1], object_id);
                        let (api, reactions) = (api.clone(), reactions.clone());
                        let command = command.to_string();
                        // toggles run in the background; a repeat while one is pending is refused
                        tokio::spawn(async move {
                            match command.as_str() {
                                "/like" => match reactions.toggle_like(&api, &target).await {
                                    Some(Ok(state)) => println!("[CLIENT] liked={} ({})", state.liked, state.like_count),
                                    Some(Err(e)) => println!("[CLIENT] Like failed: {}", e),
                                    None => println!("[CLIENT] Already in progress"),
                                },
                                "/bookmark" => match reactions.toggle_bookmark(&api, &target).await {
                                    Some(Ok(state)) => {
                                        println!("[CLIENT] bookmarked={} ({})", state.is_bookmarked, state.bookmark_count)
                                    }
                                    Some(Err(e)) => println!("[CLIENT] Bookmark failed: {}", e),
                                    None => println!("[CLIENT] Already in progress"),
                                },
                                _ => match reactions.refresh_like(&api, &target).await {
                                    Ok(state) => println!("[CLIENT] liked={} ({})", state.liked, state.like_count),
                                    Err(e) => println!("[CLIENT] Like status failed: {}", e),
                                },
                            }
                        });
                    }
                    "/logout" => match session_store::clear_session() {
                        Ok(()) => println!("[CLIENT] Stored session removed; restart to connect without it"),
                        Err(e) => println!("[CLIENT] Could not remove stored session: {}", e),
                    },
                    _ => println!("[CLIENT] Unknown command. {}", HELP),
                }
            }
        }
    }

    info!("[CLIENT] Shutting down");
    chat.shutdown().await;
    notifications.shutdown().await;
    Ok(())
}

fn print_chat_event(event: ChatEvent, viewport: &mut ScrollViewport) {
    match event {
        ChatEvent::ConnectionChanged(state) => println!("[CHAT] connection {:?}", state),
        ChatEvent::Identified { user_id } => println!("[CHAT] signed in as user #{}", user_id),
        ChatEvent::MessageAppended(m) => {
            viewport.content_height += ROW_PX;
            println!(
                "[CHAT] {} {}: {}{}",
                m.timestamp.as_deref().map(format_timestamp).unwrap_or_default(),
                m.sender_name,
                m.text(),
                if m.attachments.is_empty() { String::new() } else { format!(" [{} image(s)]", m.attachments.len()) }
            )
        }
        ChatEvent::SidebarChanged(rooms) => {
            for r in rooms.iter().take(5) {
                let preview = r
                    .last_message
                    .as_ref()
                    .map(|p| format!("{}: {}", p.sender_name, p.text))
                    .unwrap_or_default();
                println!("  #{} {} ({}) {}", r.id, r.name, r.unread_count, preview);
            }
        }
        ChatEvent::UnreadBadge(n) => println!("[CHAT] unread rooms: {}", n),
        ChatEvent::HistoryLoading { room_id, loading } => {
            if loading {
                println!("[CHAT] loading older messages for #{}...", room_id);
            }
        }
        ChatEvent::HistoryPrepended { room_id, messages, has_more } => {
            let before = viewport.content_height;
            let offset = viewport.preserve_scroll_position(|| before + ROW_PX * messages.len() as f64);
            println!(
                "[CHAT] #{}: {} older messages (more: {}), view kept at {}px",
                room_id,
                messages.len(),
                has_more,
                offset
            );
            for m in messages {
                println!("  {} {}", m.sender_name, m.text());
            }
        }
        ChatEvent::SystemNotification { title, body, room_id } => println!("[ALERT] {} (room #{}): {}", title, room_id, body),
        ChatEvent::MessageRead { message_id } => println!("[CHAT] message #{} was read", message_id),
        ChatEvent::UserError(msg) => println!("[CHAT] {}", msg),
    }
}

fn print_notification_event(event: NotificationEvent) {
    match event {
        NotificationEvent::ConnectionChanged(state) => println!("[NOTIFICATIONS] connection {:?}", state),
        NotificationEvent::Badge(n) => println!("[NOTIFICATIONS] unread: {}", n),
        NotificationEvent::ListChanged(items) => {
            for n in items.iter().take(5) {
                println!(
                    "  {} #{} {}",
                    if n.is_read { " " } else { "*" },
                    n.id,
                    truncate_preview(&n.text, DROPDOWN_PREVIEW_CHARS)
                );
            }
        }
        NotificationEvent::SystemNotification { title, body, .. } => println!("[ALERT] {}: {}", title, body),
        NotificationEvent::Navigate { url, .. } => println!("[NOTIFICATIONS] open {}", url),
    }
}
