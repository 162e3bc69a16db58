//! One task per real-time channel.
//!
//! The task owns the connection manager and the channel's handler and
//! processes transport events, caller requests, async completions and timers
//! strictly one at a time, so handler state needs no locking.
use std::fmt::Debug;
use std::future::Future;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use url::Url;

use crate::client::models::messages::OutboundCommand;
use crate::client::services::message_parser;
use crate::client::services::websocket_client::{
    ConnectionManager, ConnectionState, Connector, Outbox, TransportEvent, Transported,
};

/// Everything a handler may do while processing an input.
pub struct ChannelContext<'a, T> {
    outbox: &'a mut dyn Outbox,
    completions: &'a mpsc::UnboundedSender<T>,
}

impl<'a, T: Send + 'static> ChannelContext<'a, T> {
    pub fn new(outbox: &'a mut dyn Outbox, completions: &'a mpsc::UnboundedSender<T>) -> Self {
        Self { outbox, completions }
    }

    pub fn send(&mut self, command: OutboundCommand) -> bool {
        self.outbox.send(&command)
    }

    pub fn is_open(&self) -> bool {
        self.outbox.is_open()
    }

    pub fn reconnect(&mut self) {
        self.outbox.reconnect();
    }

    /// Run `work` in the background and feed its output back through
    /// `ChannelHandler::on_completion`.
    pub fn spawn<F>(&self, work: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let completions = self.completions.clone();
        tokio::spawn(async move {
            let _ = completions.send(work.await);
        });
    }
}

/// Per-channel behaviour: which frames exist and how they change local state.
pub trait ChannelHandler: Send + 'static {
    type Frame: DeserializeOwned + Debug + Send;
    type Command: Send + 'static;
    type Completion: Send + 'static;

    const NAME: &'static str;

    fn on_state_change(&mut self, _state: ConnectionState) {}
    fn on_open(&mut self, ctx: &mut ChannelContext<'_, Self::Completion>);
    fn on_frame(&mut self, frame: Self::Frame, ctx: &mut ChannelContext<'_, Self::Completion>);
    fn on_command(&mut self, command: Self::Command, ctx: &mut ChannelContext<'_, Self::Completion>);

    fn on_completion(&mut self, _completion: Self::Completion, _ctx: &mut ChannelContext<'_, Self::Completion>) {}

    /// Called on every liveness tick while the connection is open.
    fn on_liveness(&mut self, _ctx: &mut ChannelContext<'_, Self::Completion>) {}

    /// Handler-owned timer (e.g. a debounce).
    fn next_deadline(&self) -> Option<Instant> {
        None
    }

    fn on_deadline(&mut self, _now: Instant, _ctx: &mut ChannelContext<'_, Self::Completion>) {}
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: Url,
    pub reconnect_delay: Duration,
    pub liveness_interval: Duration,
}

#[derive(Debug)]
pub enum ChannelRequest<C> {
    Command(C),
    /// The host became visible again: reconnect now instead of waiting.
    Foregrounded,
    Shutdown,
}

/// Caller side of a running channel.
pub struct ChannelHandle<C> {
    requests: mpsc::UnboundedSender<ChannelRequest<C>>,
    task: JoinHandle<()>,
}

impl<C: Send + 'static> ChannelHandle<C> {
    pub fn send(&self, command: C) -> bool {
        self.requests.send(ChannelRequest::Command(command)).is_ok()
    }

    pub fn foregrounded(&self) -> bool {
        self.requests.send(ChannelRequest::Foregrounded).is_ok()
    }

    pub fn sender(&self) -> ChannelSender<C> {
        ChannelSender { requests: self.requests.clone() }
    }

    /// Close the connection normally and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.requests.send(ChannelRequest::Shutdown);
        let _ = self.task.await;
    }
}

/// Cloneable command sender for tasks that outlive a borrow of the handle.
pub struct ChannelSender<C> {
    requests: mpsc::UnboundedSender<ChannelRequest<C>>,
}

impl<C> Clone for ChannelSender<C> {
    fn clone(&self) -> Self {
        Self { requests: self.requests.clone() }
    }
}

impl<C> ChannelSender<C> {
    pub fn send(&self, command: C) -> bool {
        self.requests.send(ChannelRequest::Command(command)).is_ok()
    }
}

pub fn spawn<H, K>(handler: H, config: ChannelConfig, connector: K) -> ChannelHandle<H::Command>
where
    H: ChannelHandler,
    K: Connector,
{
    let (requests_tx, requests_rx) = mpsc::unbounded_channel();
    let channel = RealtimeChannel::new(handler, config, connector, requests_rx);
    let task = tokio::spawn(channel.run());
    ChannelHandle { requests: requests_tx, task }
}

pub struct RealtimeChannel<H: ChannelHandler, K: Connector> {
    handler: H,
    manager: ConnectionManager<K>,
    transport_rx: mpsc::UnboundedReceiver<Transported>,
    requests: mpsc::UnboundedReceiver<ChannelRequest<H::Command>>,
    completions_tx: mpsc::UnboundedSender<H::Completion>,
    completions_rx: mpsc::UnboundedReceiver<H::Completion>,
    liveness_interval: Duration,
}

impl<H: ChannelHandler, K: Connector> RealtimeChannel<H, K> {
    pub fn new(
        handler: H,
        config: ChannelConfig,
        connector: K,
        requests: mpsc::UnboundedReceiver<ChannelRequest<H::Command>>,
    ) -> Self {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(H::NAME, config.url, connector, transport_tx, config.reconnect_delay);
        Self {
            handler,
            manager,
            transport_rx,
            requests,
            completions_tx,
            completions_rx,
            liveness_interval: config.liveness_interval,
        }
    }

    pub async fn run(mut self) {
        self.connect();
        let mut liveness = time::interval_at(Instant::now() + self.liveness_interval, self.liveness_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let reconnect_at = self.manager.reconnect_deadline();
            let handler_deadline = self.handler.next_deadline();
            tokio::select! {
                Some(transported) = self.transport_rx.recv() => self.on_transport(transported),
                request = self.requests.recv() => match request {
                    Some(ChannelRequest::Command(command)) => {
                        let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                        self.handler.on_command(command, &mut ctx);
                    }
                    Some(ChannelRequest::Foregrounded) => {
                        debug!("[WS:{}] Foregrounded, checking connection", H::NAME);
                        self.ensure_connected();
                    }
                    Some(ChannelRequest::Shutdown) | None => {
                        self.manager.teardown();
                        self.handler.on_state_change(ConnectionState::Disconnected);
                        break;
                    }
                },
                Some(completion) = self.completions_rx.recv() => {
                    let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                    self.handler.on_completion(completion, &mut ctx);
                }
                _ = liveness.tick() => {
                    if self.manager.state() == ConnectionState::Open {
                        let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                        self.handler.on_liveness(&mut ctx);
                    } else {
                        debug!("[WS:{}] Periodic check: reconnecting", H::NAME);
                        self.ensure_connected();
                    }
                }
                _ = sleep_until_opt(reconnect_at) => {
                    if self.manager.on_reconnect_due() {
                        self.handler.on_state_change(ConnectionState::Connecting);
                    }
                }
                _ = sleep_until_opt(handler_deadline) => {
                    let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                    self.handler.on_deadline(Instant::now(), &mut ctx);
                }
            }
        }
    }

    fn connect(&mut self) {
        if self.manager.connect() {
            self.handler.on_state_change(ConnectionState::Connecting);
        }
    }

    fn ensure_connected(&mut self) {
        if self.manager.ensure_connected() {
            self.handler.on_state_change(ConnectionState::Connecting);
        }
    }

    fn on_transport(&mut self, transported: Transported) {
        let Some(event) = self.manager.handle(transported) else {
            return;
        };
        match event {
            TransportEvent::Opened => {
                self.handler.on_state_change(ConnectionState::Open);
                let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                self.handler.on_open(&mut ctx);
            }
            TransportEvent::Frame(text) => match message_parser::decode::<H::Frame>(&text) {
                Ok(frame) => {
                    debug!("[WS:{}] Received {:?}", H::NAME, frame);
                    let mut ctx = ChannelContext::new(&mut self.manager, &self.completions_tx);
                    self.handler.on_frame(frame, &mut ctx);
                }
                Err(e) => warn!("[WS:{}] Dropping frame: {}", H::NAME, e),
            },
            TransportEvent::Error(_) => {}
            TransportEvent::Closed { .. } => self.handler.on_state_change(ConnectionState::Disconnected),
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
