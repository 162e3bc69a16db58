// Print a room's history, oldest first. With a second argument, only the
// messages older than that id (the part a page has not rendered yet).
use anyhow::Context;
use log::info;

use social_realtime::client::config::ClientConfig;
use social_realtime::client::models::messages::{MessageId, RoomId};
use social_realtime::client::services::history_pager::{HistoryPager, HistorySource};
use social_realtime::client::services::http_api::ApiClient;
use social_realtime::client::services::message_parser::format_timestamp;
use social_realtime::client::utils::session_store::{self, SessionCredentials};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ClientConfig::from_env();
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", &config.log_level);
    }
    env_logger::init();

    let room_id: RoomId = std::env::args()
        .nth(1)
        .or_else(|| config.chat_room_id.map(|r| r.to_string()))
        .context("usage: history_dump <room_id> [before_id] (or set CHAT_ROOM_ID)")?
        .parse()
        .context("room id must be a number")?;

    let credentials = SessionCredentials {
        session_cookie: config.session_cookie.clone(),
        csrf_token: config.csrf_token.clone(),
    }
    .or(session_store::load_session().unwrap_or_default());
    let api = ApiClient::new(config.base_url.clone(), credentials.csrf_token, credentials.session_cookie);

    let rendered: Option<MessageId> = std::env::args()
        .nth(2)
        .map(|id| id.parse())
        .transpose()
        .context("before_id must be a number")?;

    let mut pager = HistoryPager::new(config.history_page_size);
    pager.seed_from_ids(room_id, rendered);
    while let Some(request) = pager.begin(room_id) {
        match api.fetch_page(request).await {
            Ok(page) => {
                if pager.complete(request, page).is_empty() {
                    break;
                }
            }
            Err(e) => {
                pager.fail(request, &e);
                return Err(e).with_context(|| format!("loading history of room {}", room_id));
            }
        }
    }

    let messages = pager.messages(room_id);
    info!("[HISTORY] Room {}: {} messages", room_id, messages.len());
    for m in messages {
        let time = m.timestamp.as_deref().map(format_timestamp).unwrap_or_default();
        let files = if m.attachments.is_empty() {
            String::new()
        } else {
            format!(" [{} attachment(s)]", m.attachments.len())
        };
        println!("#{} {} {}: {}{}", m.id, time, m.sender_name, m.text(), files);
    }
    Ok(())
}
