//! Event-stream connection supervision.
//!
//! Owns the WebSocket lifecycle: connect, ping, reconnect with exponential
//! backoff, teardown. Connection trouble never surfaces as a synchronous
//! error after `start()` has resolved; it is reported through locally
//! synthesized notification frames (`WebSocketReconnecting` per attempt,
//! exactly one `WebSocketMaxRetries` when retries are exhausted) delivered
//! through the normal dispatch path with no resource correlation.

use futures_util::{SinkExt, StreamExt};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{AriError, AriResult};
use crate::event::{Dispatcher, EventFrame};
use crate::registry::Registry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnection tuning for the event stream
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    /// Retry attempts after a failed connect or an unexpected close
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt
    pub base_delay: Duration,
    /// Upper bound on the backoff delay
    pub max_delay: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Event-stream connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Never started, or stopped before a start
    Disconnected,
    /// `start()` in progress
    Connecting,
    /// Event stream open
    Connected,
    /// Connection lost; backoff retries in progress
    Reconnecting,
    /// Stopped, or retries exhausted; `start()` must be called again
    Closed,
}

enum SupervisorCommand {
    Ping,
}

/// Supervises one event-stream connection.
pub(crate) struct Supervisor {
    config: ConnectionConfig,
    status: Arc<Mutex<ConnectionStatus>>,
    dispatcher: Dispatcher,
    registry: Registry,
    shutdown: Option<Arc<Notify>>,
    command_tx: Option<mpsc::UnboundedSender<SupervisorCommand>>,
    task: Option<JoinHandle<()>>,
}

impl Supervisor {
    pub(crate) fn new(
        config: ConnectionConfig,
        status: Arc<Mutex<ConnectionStatus>>,
        dispatcher: Dispatcher,
        registry: Registry,
    ) -> Self {
        Self {
            config,
            status,
            dispatcher,
            registry,
            shutdown: None,
            command_tx: None,
            task: None,
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.lock().unwrap()
    }

    /// Open the event stream. Resolves only once the WebSocket is actually
    /// open; initial connect failures run through the same backoff loop as
    /// later drops and end in `RetriesExhausted` when the retry budget is
    /// spent.
    pub(crate) async fn start(&mut self, events_url: Url) -> AriResult<()> {
        match self.status() {
            ConnectionStatus::Connected
            | ConnectionStatus::Connecting
            | ConnectionStatus::Reconnecting => {
                warn!("start() called while event stream already active");
                return Ok(());
            }
            ConnectionStatus::Disconnected | ConnectionStatus::Closed => {}
        }

        self.set_status(ConnectionStatus::Connecting);
        let shutdown = Arc::new(Notify::new());
        self.shutdown = Some(Arc::clone(&shutdown));

        let ws = match self.establish(&events_url, &shutdown).await {
            Ok(ws) => ws,
            Err(e) => {
                self.shutdown = None;
                return Err(e);
            }
        };

        info!("Event stream connected to {}", redacted(&events_url));
        self.set_status(ConnectionStatus::Connected);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.command_tx = Some(command_tx);

        let worker = Worker {
            events_url,
            config: self.config,
            status: Arc::clone(&self.status),
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            shutdown,
        };
        self.task = Some(tokio::spawn(worker.run(ws, command_rx)));
        Ok(())
    }

    /// First connect, with the same backoff/notification discipline the
    /// worker uses for reconnects.
    async fn establish(&self, events_url: &Url, shutdown: &Notify) -> AriResult<WsStream> {
        let mut attempt: u32 = 0;
        loop {
            match connect_async(events_url.as_str()).await {
                Ok((ws, _response)) => return Ok(ws),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    self.set_status(ConnectionStatus::Reconnecting);
                    emit_reconnecting(&self.dispatcher, &self.registry, attempt, self.config.max_retries, &e.to_string());
                    let delay = backoff_delay(&self.config, attempt);
                    debug!("Connect attempt {} failed ({}); retrying in {:?}", attempt, e, delay);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.notified() => {
                            self.set_status(ConnectionStatus::Closed);
                            return Err(AriError::Closed);
                        }
                    }
                }
                Err(e) => {
                    warn!("Giving up connecting after {} retries: {}", attempt, e);
                    emit_max_retries(&self.dispatcher, &self.registry, attempt);
                    self.set_status(ConnectionStatus::Closed);
                    return Err(AriError::RetriesExhausted { attempts: attempt });
                }
            }
        }
    }

    /// Send a liveness probe. The observed pong surfaces as a `Pong`
    /// notification with no resource correlation.
    pub(crate) fn ping(&self) -> AriResult<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(AriError::NotConnected);
        }
        let tx = self.command_tx.as_ref().ok_or(AriError::NotConnected)?;
        tx.send(SupervisorCommand::Ping)
            .map_err(|_| AriError::NotConnected)
    }

    /// Deterministic close from any state, cancelling in-flight reconnect
    /// attempts. Always ends in `Closed`.
    pub(crate) async fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.notify_waiters();
            shutdown.notify_one();
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.command_tx = None;
        self.set_status(ConnectionStatus::Closed);
        info!("Event stream stopped");
    }
}

/// Background task owning the WebSocket after a successful `start()`.
struct Worker {
    events_url: Url,
    config: ConnectionConfig,
    status: Arc<Mutex<ConnectionStatus>>,
    dispatcher: Dispatcher,
    registry: Registry,
    shutdown: Arc<Notify>,
}

impl Worker {
    async fn run(self, ws: WsStream, mut command_rx: mpsc::UnboundedReceiver<SupervisorCommand>) {
        let (mut sink, mut stream) = ws.split();
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    let _ = sink.send(Message::Close(None)).await;
                    self.set_status(ConnectionStatus::Closed);
                    debug!("Event stream worker shut down");
                    return;
                }
                command = command_rx.recv() => {
                    match command {
                        Some(SupervisorCommand::Ping) => {
                            if let Err(e) = sink.send(Message::Ping(Vec::new())).await {
                                warn!("Ping failed: {}", e);
                            }
                        }
                        // Supervisor dropped; treat as shutdown
                        None => {
                            let _ = sink.send(Message::Close(None)).await;
                            self.set_status(ConnectionStatus::Closed);
                            return;
                        }
                    }
                }
                message = stream.next() => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            self.dispatcher.handle_text(&text, &self.registry);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            debug!("Pong received");
                            self.dispatcher.dispatch(
                                EventFrame::synthetic("Pong", Map::new()),
                                &self.registry,
                            );
                        }
                        // tungstenite answers pings itself
                        Some(Ok(Message::Ping(_))) => {}
                        Some(Ok(Message::Binary(_))) | Some(Ok(Message::Frame(_))) => {
                            warn!("Ignoring unexpected non-text frame");
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("Event stream closed by server");
                            match self.reconnect().await {
                                Some(new_ws) => (sink, stream) = new_ws.split(),
                                None => return,
                            }
                        }
                        Some(Err(e)) => {
                            warn!("Event stream error: {}", e);
                            match self.reconnect().await {
                                Some(new_ws) => (sink, stream) = new_ws.split(),
                                None => return,
                            }
                        }
                    }
                }
            }
        }
    }

    /// Backoff retry loop after an unexpected close. `None` means the
    /// worker must exit (shutdown, or retries exhausted → `Closed`).
    async fn reconnect(&self) -> Option<WsStream> {
        self.set_status(ConnectionStatus::Reconnecting);

        for attempt in 1..=self.config.max_retries {
            emit_reconnecting(
                &self.dispatcher,
                &self.registry,
                attempt,
                self.config.max_retries,
                "connection lost",
            );
            let delay = backoff_delay(&self.config, attempt);
            debug!("Reconnect attempt {}/{} in {:?}", attempt, self.config.max_retries, delay);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified() => {
                    self.set_status(ConnectionStatus::Closed);
                    return None;
                }
            }

            match connect_async(self.events_url.as_str()).await {
                Ok((ws, _response)) => {
                    info!("Event stream reconnected");
                    self.set_status(ConnectionStatus::Connected);
                    return Some(ws);
                }
                Err(e) => {
                    warn!("Reconnect attempt {} failed: {}", attempt, e);
                }
            }
        }

        warn!("Retries exhausted; event stream closed");
        emit_max_retries(&self.dispatcher, &self.registry, self.config.max_retries);
        self.set_status(ConnectionStatus::Closed);
        None
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().unwrap() = status;
    }
}

fn backoff_delay(config: &ConnectionConfig, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
    config
        .base_delay
        .checked_mul(factor)
        .map(|d| d.min(config.max_delay))
        .unwrap_or(config.max_delay)
}

fn emit_reconnecting(
    dispatcher: &Dispatcher,
    registry: &Registry,
    attempt: u32,
    max_retries: u32,
    reason: &str,
) {
    let mut fields = Map::new();
    fields.insert("attempt".to_string(), Value::from(attempt));
    fields.insert("max_retries".to_string(), Value::from(max_retries));
    fields.insert("reason".to_string(), Value::String(reason.to_string()));
    dispatcher.dispatch(EventFrame::synthetic("WebSocketReconnecting", fields), registry);
}

fn emit_max_retries(dispatcher: &Dispatcher, registry: &Registry, attempts: u32) {
    let mut fields = Map::new();
    fields.insert("attempts".to_string(), Value::from(attempts));
    dispatcher.dispatch(EventFrame::synthetic("WebSocketMaxRetries", fields), registry);
}

/// Events URL with the api_key value masked, for logging.
fn redacted(url: &Url) -> String {
    let mut clean = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            if k == "api_key" {
                (k.to_string(), "***".to_string())
            } else {
                (k.to_string(), v.to_string())
            }
        })
        .collect();
    clean.set_query(None);
    if !pairs.is_empty() {
        let mut serializer = clean.query_pairs_mut();
        for (k, v) in &pairs {
            serializer.append_pair(k, v);
        }
    }
    clean.to_string()
}
