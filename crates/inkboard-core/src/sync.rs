//! Relay wire protocol and WebSocket client.
//!
//! Frames are JSON text tagged by `type`. Document updates travel as base64
//! encoded Loro bytes; the relay never looks inside them.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join { room: String },
    /// Leave current room
    Leave,
    /// Document update (base64 encoded Loro bytes)
    Update { data: String },
    /// Presence update for this connection
    Awareness { state: AwarenessState },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        /// Id the relay assigned to this connection
        peer_id: String,
        peer_count: usize,
        /// Merged room document (if the room has history)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
        /// Presence of the peers already in the room
        #[serde(default)]
        presence: HashMap<String, AwarenessState>,
    },
    /// Peer joined the room
    PeerJoined { peer_id: String },
    /// Peer left the room
    PeerLeft { peer_id: String },
    /// Document update from another peer
    Update { from: String, data: String },
    /// Presence update from another peer
    Awareness { from: String, state: AwarenessState },
    /// This connection missed relayed messages and must rejoin to resync
    Resync { missed: u64 },
    /// Error message
    Error { message: String },
}

/// Default display name of a participant.
pub const DEFAULT_NAME: &str = "Guest";
/// Default cursor color of a participant.
pub const DEFAULT_COLOR: &str = "#22d3ee";

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_color() -> String {
    DEFAULT_COLOR.to_string()
}

/// Presence record of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AwarenessState {
    /// Cursor position; `None` while the pointer is off the canvas
    #[serde(default)]
    pub cursor: Option<CursorPosition>,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_color")]
    pub color: String,
}

impl Default for AwarenessState {
    fn default() -> Self {
        Self {
            cursor: None,
            name: default_name(),
            color: default_color(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorPosition {
    pub x: f64,
    pub y: f64,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Events from the WebSocket client
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected to server
    Connected,
    /// Disconnected from server
    Disconnected,
    /// Joined a room
    JoinedRoom {
        room: String,
        peer_id: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
        presence: HashMap<String, AwarenessState>,
    },
    /// A peer joined the room
    PeerJoined { peer_id: String },
    /// A peer left the room
    PeerLeft { peer_id: String },
    /// Received a document update from a peer
    UpdateReceived { from: String, data: Vec<u8> },
    /// Received presence from a peer
    AwarenessReceived { from: String, state: AwarenessState },
    /// The relay dropped messages for this connection
    ResyncRequired { missed: u64 },
    /// Error occurred
    Error { message: String },
}

impl SyncEvent {
    /// Decode a server frame into an event. Updates whose payload is not
    /// valid base64 are dropped.
    pub fn from_server(msg: ServerMessage) -> Option<Self> {
        let event = match msg {
            ServerMessage::Joined {
                room,
                peer_id,
                peer_count,
                initial_sync,
                presence,
            } => SyncEvent::JoinedRoom {
                room,
                peer_id,
                peer_count,
                initial_sync: initial_sync.and_then(|s| base64_decode(&s)),
                presence,
            },
            ServerMessage::PeerJoined { peer_id } => SyncEvent::PeerJoined { peer_id },
            ServerMessage::PeerLeft { peer_id } => SyncEvent::PeerLeft { peer_id },
            ServerMessage::Update { from, data } => match base64_decode(&data) {
                Some(data) => SyncEvent::UpdateReceived { from, data },
                None => {
                    log::warn!("Dropping update from {} with invalid payload", from);
                    return None;
                }
            },
            ServerMessage::Awareness { from, state } => SyncEvent::AwarenessReceived { from, state },
            ServerMessage::Resync { missed } => SyncEvent::ResyncRequired { missed },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        };
        Some(event)
    }
}

/// Errors raised by the WebSocket client.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Invalid WebSocket URL scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: connection thread has exited")]
    ChannelClosed,
    #[error("Encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Base64 decoding
pub fn base64_decode(input: &str) -> Option<Vec<u8>> {
    STANDARD.decode(input).ok()
}

/// Base64 encoding
pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Exponential reconnect delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    factor: u32,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, factor: u32, max: Duration) -> Self {
        Self {
            base,
            factor: factor.max(1),
            max,
            attempt: 0,
        }
    }

    /// Delay before the next attempt.
    pub fn next_delay(&mut self) -> Duration {
        let scale = self.factor.saturating_pow(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(scale).min(self.max)
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), 2, Duration::from_secs(30))
    }
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use tungstenite::{Message, connect};
    use url::Url;

    /// Commands sent to the WebSocket thread.
    enum WsCommand {
        Send(String),
        Close,
    }

    /// WebSocket client for native platforms.
    ///
    /// Uses a background thread for non-blocking operation.
    pub struct NativeWebSocket {
        state: ConnectionState,
        events: Vec<SyncEvent>,
        /// Channel to send commands to the WebSocket thread.
        cmd_tx: Option<Sender<WsCommand>>,
        /// Channel to receive events from the WebSocket thread.
        event_rx: Option<Receiver<SyncEvent>>,
        /// Handle to the WebSocket thread.
        _thread: Option<JoinHandle<()>>,
    }

    impl NativeWebSocket {
        /// Create a new disconnected WebSocket client.
        pub fn new() -> Self {
            Self {
                state: ConnectionState::Disconnected,
                events: Vec::new(),
                cmd_tx: None,
                event_rx: None,
                _thread: None,
            }
        }

        /// Connect to a WebSocket server.
        pub fn connect(&mut self, url: &str) -> Result<(), SyncError> {
            if self.cmd_tx.is_some() {
                return Err(SyncError::AlreadyConnected);
            }

            let parsed_url = Url::parse(url)?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(SyncError::UnsupportedScheme(parsed_url.scheme().to_string()));
            }

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();

            let url = url.to_string();

            let handle = thread::spawn(move || {
                log::info!("WebSocket thread: connecting to {}", url);

                let (mut socket, response) = match connect(&url) {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::error!("WebSocket connection failed: {}", e);
                        let _ = event_tx.send(SyncEvent::Error {
                            message: format!("Connection failed: {}", e),
                        });
                        let _ = event_tx.send(SyncEvent::Disconnected);
                        return;
                    }
                };

                log::info!("WebSocket connected, status: {}", response.status());
                let _ = event_tx.send(SyncEvent::Connected);

                // Short read timeout so the loop can service outgoing commands
                if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
                    let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                    let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                }

                loop {
                    match cmd_rx.try_recv() {
                        Ok(WsCommand::Send(msg)) => {
                            log::debug!("WebSocket sending {} bytes", msg.len());
                            if let Err(e) = socket.send(Message::Text(msg.into())) {
                                log::error!("WebSocket send error: {}", e);
                                break;
                            }
                        }
                        Ok(WsCommand::Close) => {
                            log::info!("WebSocket close requested");
                            let _ = socket.close(None);
                            break;
                        }
                        Err(TryRecvError::Disconnected) => {
                            log::info!("WebSocket command channel disconnected");
                            break;
                        }
                        Err(TryRecvError::Empty) => {}
                    }

                    match socket.read() {
                        Ok(Message::Text(txt)) => {
                            match serde_json::from_str::<ServerMessage>(&txt) {
                                Ok(server_msg) => {
                                    if let Some(event) = SyncEvent::from_server(server_msg) {
                                        let _ = event_tx.send(event);
                                    }
                                }
                                Err(e) => log::warn!("Failed to parse server message: {}", e),
                            }
                        }
                        Ok(Message::Ping(data)) => {
                            let _ = socket.send(Message::Pong(data));
                        }
                        Ok(Message::Close(_)) => {
                            log::info!("WebSocket received close frame");
                            break;
                        }
                        Ok(_) => {}
                        Err(tungstenite::Error::Io(ref e))
                            if e.kind() == std::io::ErrorKind::WouldBlock
                                || e.kind() == std::io::ErrorKind::TimedOut =>
                        {
                            continue;
                        }
                        Err(e) => {
                            log::error!("WebSocket read error: {}", e);
                            break;
                        }
                    }
                }

                log::info!("WebSocket thread exiting");
                let _ = event_tx.send(SyncEvent::Disconnected);
            });

            self.cmd_tx = Some(cmd_tx);
            self.event_rx = Some(event_rx);
            self._thread = Some(handle);

            Ok(())
        }

        /// Disconnect from the server.
        pub fn disconnect(&mut self) {
            if let Some(tx) = self.cmd_tx.take() {
                let _ = tx.send(WsCommand::Close);
            }
            self.event_rx = None;
            self._thread = None;
            self.events.clear();
            self.state = ConnectionState::Disconnected;
        }

        /// Send a raw text frame.
        pub fn send(&self, msg: &str) -> Result<(), SyncError> {
            let tx = self.cmd_tx.as_ref().ok_or(SyncError::NotConnected)?;
            tx.send(WsCommand::Send(msg.to_string()))
                .map_err(|_| SyncError::ChannelClosed)
        }

        /// Serialize and send a protocol message.
        pub fn send_message(&self, msg: &ClientMessage) -> Result<(), SyncError> {
            let json = serde_json::to_string(msg)?;
            self.send(&json)
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        // Relay errors on a live connection leave it usable
                        SyncEvent::Error { .. } if self.state == ConnectionState::Connecting => {
                            self.state = ConnectionState::Error
                        }
                        _ => {}
                    }
                    self.events.push(event);
                }
            }

            std::mem::take(&mut self.events)
        }

        /// Get current connection state.
        pub fn state(&self) -> ConnectionState {
            self.state
        }

        /// Check if connected.
        pub fn is_connected(&self) -> bool {
            self.state == ConnectionState::Connected
        }
    }

    impl Default for NativeWebSocket {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Drop for NativeWebSocket {
        fn drop(&mut self) {
            self.disconnect();
        }
    }
}

pub use native_client::NativeWebSocket;

/// [`NativeWebSocket`] that reconnects with [`Backoff`] after the connection
/// drops or fails to open.
pub struct SyncClient {
    url: String,
    ws: NativeWebSocket,
    backoff: Backoff,
    retry_at: Option<Instant>,
}

impl SyncClient {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_backoff(url, Backoff::default())
    }

    pub fn with_backoff(url: impl Into<String>, backoff: Backoff) -> Self {
        Self {
            url: url.into(),
            ws: NativeWebSocket::new(),
            backoff,
            retry_at: None,
        }
    }

    /// Open the first connection.
    pub fn connect(&mut self) -> Result<(), SyncError> {
        self.retry_at = None;
        self.ws.connect(&self.url)
    }

    /// Drain socket events and reconnect once a scheduled retry is due.
    pub fn poll(&mut self, now: Instant) -> Vec<SyncEvent> {
        let events = self.ws.poll_events();
        for event in &events {
            match event {
                SyncEvent::Connected => self.backoff.reset(),
                SyncEvent::Disconnected => {
                    let delay = self.backoff.next_delay();
                    log::info!("Reconnecting to {} in {:?}", self.url, delay);
                    self.retry_at = Some(now + delay);
                }
                _ => {}
            }
        }

        if self.retry_at.is_some_and(|at| now >= at) {
            self.retry_at = None;
            self.ws.disconnect();
            if let Err(e) = self.ws.connect(&self.url) {
                log::error!("Reconnect to {} failed: {}", self.url, e);
            }
        }
        events
    }

    /// Send text frames, logging the ones that could not be queued.
    pub fn send_all(&self, frames: impl IntoIterator<Item = String>) {
        for frame in frames {
            if let Err(e) = self.ws.send(&frame) {
                log::warn!("Dropping outgoing frame: {}", e);
            }
        }
    }

    /// When the next reconnect attempt is scheduled.
    pub fn retry_at(&self) -> Option<Instant> {
        self.retry_at
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    pub fn is_connected(&self) -> bool {
        self.ws.is_connected()
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&mut self) {
        self.retry_at = None;
        self.ws.disconnect();
    }
}
