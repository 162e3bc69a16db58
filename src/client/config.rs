use std::env;
use std::str::FromStr;

use tokio::time::Duration;
use url::Url;

use crate::client::models::attachments::DEFAULT_MAX_MESSAGE_CHARS;
use crate::client::models::messages::{RoomId, UserId};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub chat_room_id: Option<RoomId>,
    pub current_user_id: Option<UserId>,
    pub session_cookie: Option<String>,
    pub csrf_token: Option<String>,
    pub reconnect_delay: Duration,
    pub liveness_interval: Duration,
    pub history_page_size: u32,
    pub scroll_threshold_px: f64,
    pub scroll_debounce: Duration,
    pub max_message_chars: usize,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            base_url: get("APP_BASE_URL").unwrap_or_else(|| "http://127.0.0.1:8000".to_string()),
            chat_room_id: parse_var(get("CHAT_ROOM_ID")),
            current_user_id: parse_var(get("CURRENT_USER_ID")),
            session_cookie: non_empty("SESSION_COOKIE"),
            csrf_token: non_empty("CSRF_TOKEN"),
            reconnect_delay: Duration::from_secs(parse_var(get("RECONNECT_DELAY_SECS")).unwrap_or(3)),
            liveness_interval: Duration::from_secs(parse_var(get("LIVENESS_INTERVAL_SECS")).unwrap_or(30)),
            history_page_size: parse_var(get("HISTORY_PAGE_SIZE")).unwrap_or(20),
            scroll_threshold_px: parse_var(get("SCROLL_THRESHOLD_PX")).unwrap_or(150.0),
            scroll_debounce: Duration::from_millis(parse_var(get("SCROLL_DEBOUNCE_MS")).unwrap_or(200)),
            max_message_chars: parse_var(get("MAX_MESSAGE_LENGTH")).unwrap_or(DEFAULT_MAX_MESSAGE_CHARS),
            log_level: get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// `http://host/` becomes `ws://host/<path>`, `https` becomes `wss`.
    fn socket_url(&self, path: &str) -> anyhow::Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => anyhow::bail!("unsupported scheme in APP_BASE_URL: {}", other),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow::anyhow!("cannot use scheme {} for {}", scheme, self.base_url))?;
        url.set_path(path);
        url.set_query(None);
        Ok(url)
    }

    /// Room-specific endpoint when a room is configured, the personal one otherwise.
    pub fn chat_socket_url(&self) -> anyhow::Result<Url> {
        match self.chat_room_id {
            Some(room) => self.socket_url(&format!("/ws/chat/{}/", room)),
            None => self.socket_url("/ws/chat/"),
        }
    }

    pub fn notification_socket_url(&self) -> anyhow::Result<Url> {
        self.socket_url("/ws/notifications/")
    }
}

fn parse_var<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}
