use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

use crate::client::models::messages::OutboundCommand;

/// Close code for a normal, intentional shutdown. Anything else reconnects.
pub const NORMAL_CLOSE: u16 = 1000;

#[derive(Debug, Clone)]
pub enum WebSocketError {
    ConnectionFailed(String),
    MessageSendFailed(String),
    Disconnected,
    InvalidMessage(String),
}

impl std::fmt::Display for WebSocketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WebSocketError::ConnectionFailed(msg) => write!(f, "Connection failed: {}", msg),
            WebSocketError::MessageSendFailed(msg) => write!(f, "Message send failed: {}", msg),
            WebSocketError::Disconnected => write!(f, "WebSocket disconnected"),
            WebSocketError::InvalidMessage(msg) => write!(f, "Invalid message: {}", msg),
        }
    }
}

impl std::error::Error for WebSocketError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    /// `code` is `None` when the socket went away without a close frame.
    Closed { code: Option<u16> },
}

/// A transport event tagged with the dial it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Transported {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Opens sockets. `dial` must return immediately; the connection itself is
/// driven in the background and reports through `events`.
pub trait Connector: Send + 'static {
    fn dial(
        &mut self,
        url: &Url,
        generation: u64,
        events: mpsc::UnboundedSender<Transported>,
    ) -> mpsc::UnboundedSender<Message>;
}

/// The outbound half of a channel as seen by message handlers.
pub trait Outbox {
    /// Send a command if the connection is open. Never blocks; `false` means
    /// nothing was transmitted.
    fn send(&mut self, command: &OutboundCommand) -> bool;
    fn is_open(&self) -> bool;
    /// Ask for a connection if there is none.
    fn reconnect(&mut self);
}

/// Real connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone)]
pub struct WsConnector {
    /// Sent as the `Cookie` header; the server authenticates sockets by session.
    cookie: Option<String>,
}

impl WsConnector {
    pub fn with_cookie(cookie: Option<String>) -> Self {
        Self { cookie }
    }

    fn request(&self, url: &Url) -> Result<Request, WebSocketError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string()))?;
        if let Some(cookie) = &self.cookie {
            let value = HeaderValue::from_str(cookie)
                .map_err(|e| WebSocketError::ConnectionFailed(format!("Invalid cookie header: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }
        Ok(request)
    }
}

impl Connector for WsConnector {
    fn dial(
        &mut self,
        url: &Url,
        generation: u64,
        events: mpsc::UnboundedSender<Transported>,
    ) -> mpsc::UnboundedSender<Message> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let request = self.request(url);
        tokio::spawn(async move {
            run_socket(request, generation, events, outgoing_rx).await;
        });
        outgoing_tx
    }
}

async fn run_socket(
    request: Result<Request, WebSocketError>,
    generation: u64,
    events: mpsc::UnboundedSender<Transported>,
    mut outgoing_rx: mpsc::UnboundedReceiver<Message>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send(Transported { generation, event });
    };

    let connected = match request {
        Ok(request) => connect_async(request)
            .await
            .map_err(|e| WebSocketError::ConnectionFailed(e.to_string())),
        Err(e) => Err(e),
    };
    let ws_stream = match connected {
        Ok((stream, _)) => stream,
        Err(e) => {
            report(TransportEvent::Error(e.to_string()));
            report(TransportEvent::Closed { code: None });
            return;
        }
    };
    report(TransportEvent::Opened);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    loop {
        tokio::select! {
            outgoing = outgoing_rx.recv() => match outgoing {
                Some(msg) => {
                    let closing = matches!(msg, Message::Close(_));
                    if let Err(e) = ws_sender.send(msg).await {
                        report(TransportEvent::Error(format!("Failed to send: {}", e)));
                        report(TransportEvent::Closed { code: None });
                        return;
                    }
                    if closing {
                        return;
                    }
                }
                None => {
                    // Manager dropped this connection.
                    let _ = ws_sender.send(Message::Close(None)).await;
                    return;
                }
            },
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => report(TransportEvent::Frame(text)),
                Some(Ok(Message::Close(frame))) => {
                    report(TransportEvent::Closed { code: frame.map(|f| u16::from(f.code)) });
                    return;
                }
                Some(Ok(_)) => {
                    // binary, ping, pong
                }
                Some(Err(e)) => {
                    report(TransportEvent::Error(e.to_string()));
                    report(TransportEvent::Closed { code: None });
                    return;
                }
                None => {
                    report(TransportEvent::Closed { code: None });
                    return;
                }
            },
        }
    }
}

/// Owns the single connection of one channel.
///
/// `Disconnected -> Connecting -> Open -> Disconnected`, with a fixed-delay
/// reconnect after any close that is not a normal close. Every dial gets a new
/// generation; events from older generations are dropped, so at most one
/// connection is ever live.
pub struct ConnectionManager<C: Connector> {
    channel: &'static str,
    url: Url,
    connector: C,
    events: mpsc::UnboundedSender<Transported>,
    state: ConnectionState,
    generation: u64,
    outgoing: Option<mpsc::UnboundedSender<Message>>,
    reconnect_delay: Duration,
    reconnect_at: Option<Instant>,
    retry_attempts: u32,
    torn_down: bool,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        channel: &'static str,
        url: Url,
        connector: C,
        events: mpsc::UnboundedSender<Transported>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            channel,
            url,
            connector,
            events,
            state: ConnectionState::Disconnected,
            generation: 0,
            outgoing: None,
            reconnect_delay,
            reconnect_at: None,
            retry_attempts: 0,
            torn_down: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn get_retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn reconnect_deadline(&self) -> Option<Instant> {
        self.reconnect_at
    }

    /// Dial unless a connection is already open or being opened.
    /// Returns whether a new attempt was started.
    pub fn connect(&mut self) -> bool {
        if self.torn_down || self.state != ConnectionState::Disconnected {
            return false;
        }
        self.generation += 1;
        self.state = ConnectionState::Connecting;
        self.reconnect_at = None;
        info!("[WS:{}] Connecting to {} (attempt #{})", self.channel, self.url, self.generation);
        self.outgoing = Some(self.connector.dial(&self.url, self.generation, self.events.clone()));
        true
    }

    /// Liveness check: reconnect if the connection is not open.
    pub fn ensure_connected(&mut self) -> bool {
        if self.state == ConnectionState::Open {
            return false;
        }
        debug!("[WS:{}] Liveness check found state {:?}", self.channel, self.state);
        self.connect()
    }

    /// Apply a transport event. Returns the event if it belongs to the current
    /// connection, `None` if it was stale.
    pub fn handle(&mut self, transported: Transported) -> Option<TransportEvent> {
        if transported.generation != self.generation || self.torn_down {
            debug!(
                "[WS:{}] Ignoring event from superseded connection #{}",
                self.channel, transported.generation
            );
            return None;
        }
        match &transported.event {
            TransportEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    return None;
                }
                info!("[WS:{}] Connected to {}", self.channel, self.url);
                self.state = ConnectionState::Open;
                self.retry_attempts = 0;
            }
            TransportEvent::Frame(_) => {
                if self.state != ConnectionState::Open {
                    return None;
                }
            }
            TransportEvent::Error(e) => {
                error!("[WS:{}] WebSocket error: {}", self.channel, e);
            }
            TransportEvent::Closed { code } => {
                if self.state == ConnectionState::Disconnected {
                    return None;
                }
                self.state = ConnectionState::Disconnected;
                self.outgoing = None;
                if *code == Some(NORMAL_CLOSE) {
                    info!("[WS:{}] Connection closed normally", self.channel);
                } else if self.reconnect_at.is_none() {
                    self.retry_attempts += 1;
                    self.reconnect_at = Some(Instant::now() + self.reconnect_delay);
                    warn!(
                        "[WS:{}] Connection lost (code {:?}), retrying in {:?}",
                        self.channel, code, self.reconnect_delay
                    );
                }
            }
        }
        Some(transported.event)
    }

    /// Fire the scheduled reconnect, if any.
    pub fn on_reconnect_due(&mut self) -> bool {
        if self.reconnect_at.take().is_none() {
            return false;
        }
        self.connect()
    }

    /// Close with a normal status and stop reconnecting for good.
    pub fn teardown(&mut self) {
        self.torn_down = true;
        self.reconnect_at = None;
        if let Some(outgoing) = self.outgoing.take() {
            let _ = outgoing.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            })));
        }
        self.state = ConnectionState::Disconnected;
        info!("[WS:{}] Connection torn down", self.channel);
    }

    pub fn try_send(&mut self, command: &OutboundCommand) -> Result<(), WebSocketError> {
        if self.state != ConnectionState::Open {
            return Err(WebSocketError::Disconnected);
        }
        let json = serde_json::to_string(command)
            .map_err(|e| WebSocketError::MessageSendFailed(format!("Failed to serialize: {}", e)))?;
        let outgoing = self.outgoing.as_ref().ok_or(WebSocketError::Disconnected)?;
        outgoing
            .send(Message::Text(json))
            .map_err(|_| WebSocketError::MessageSendFailed("socket task ended".to_string()))
    }
}

impl<C: Connector> Outbox for ConnectionManager<C> {
    fn send(&mut self, command: &OutboundCommand) -> bool {
        match self.try_send(command) {
            Ok(()) => {
                debug!("[WS:{}] Command sent: {}", self.channel, command.name());
                true
            }
            Err(e) => {
                warn!("[WS:{}] Command {} not sent: {}", self.channel, command.name(), e);
                false
            }
        }
    }

    fn is_open(&self) -> bool {
        self.state == ConnectionState::Open
    }

    fn reconnect(&mut self) {
        self.connect();
    }
}
