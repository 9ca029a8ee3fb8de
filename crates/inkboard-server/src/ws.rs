//! WebSocket relay connection handling.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use inkboard_core::sync::{ClientMessage, ServerMessage, base64_decode};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::room::{AppState, RelayError, RoomEvent};

type Sender = SplitSink<WebSocket, Message>;

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Send one frame. Returns false once the socket is gone.
async fn send(sender: &mut Sender, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode server message: {}", e);
            true
        }
    }
}

async fn send_error(sender: &mut Sender, message: impl Into<String>) -> bool {
    send(
        sender,
        &ServerMessage::Error {
            message: message.into(),
        },
    )
    .await
}

/// What to do with one event from the room channel.
#[derive(Debug, PartialEq)]
enum Outbound {
    Send(ServerMessage),
    Skip,
    Closed,
}

fn outbound(peer_id: &str, event: Result<RoomEvent, RecvError>) -> Outbound {
    match event {
        // Don't echo back to sender
        Ok((from, _)) if from == peer_id => Outbound::Skip,
        Ok((_, msg)) => Outbound::Send(msg),
        Err(RecvError::Lagged(missed)) => {
            warn!("Peer {} lagged by {} messages", peer_id, missed);
            Outbound::Send(ServerMessage::Resync { missed })
        }
        Err(RecvError::Closed) => Outbound::Closed,
    }
}

/// Per-connection state.
struct Connection {
    peer_id: String,
    room: Option<String>,
    room_rx: Option<broadcast::Receiver<RoomEvent>>,
}

impl Connection {
    fn leave(&mut self, state: &AppState) {
        if let Some(room) = self.room.take() {
            state.leave_room(&room, &self.peer_id);
            info!("Peer {} left room {}", self.peer_id, room);
        }
        self.room_rx = None;
    }

    fn apply_update(&self, state: &AppState, bytes: &[u8]) -> Result<(), RelayError> {
        let room = self.room.as_deref().ok_or(RelayError::NotInRoom)?;
        state.apply_update(room, &self.peer_id, bytes)
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let peer_id = Uuid::new_v4().to_string();
    info!("New connection: {}", peer_id);

    let (mut sender, mut receiver) = socket.split();
    let mut conn = Connection {
        peer_id: peer_id.clone(),
        room: None,
        room_rx: None,
    };

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(m) => m,
                            Err(e) => {
                                warn!("Invalid message from {}: {}", peer_id, e);
                                if !send_error(&mut sender, format!("Invalid message: {}", e)).await {
                                    break;
                                }
                                continue;
                            }
                        };
                        match client_msg {
                            ClientMessage::Join { room } => {
                                // Joining the current room again only refreshes the state
                                let rejoin = conn.room.as_deref() == Some(room.as_str());
                                if !rejoin {
                                    conn.leave(&state);
                                }

                                let joined = state.join_room(&room, &peer_id);
                                conn.room_rx = Some(joined.rx);
                                conn.room = Some(room.clone());

                                let reply = ServerMessage::Joined {
                                    room: room.clone(),
                                    peer_id: peer_id.clone(),
                                    peer_count: joined.peer_count,
                                    initial_sync: joined.initial_sync,
                                    presence: joined.presence,
                                };
                                if !send(&mut sender, &reply).await {
                                    break;
                                }

                                if rejoin {
                                    info!("Peer {} resynced room {}", peer_id, room);
                                } else {
                                    state.broadcast(&room, &peer_id, ServerMessage::PeerJoined {
                                        peer_id: peer_id.clone(),
                                    });
                                    info!("Peer {} joined room {}", peer_id, room);
                                }
                            }
                            ClientMessage::Leave => conn.leave(&state),
                            ClientMessage::Update { data } => {
                                let result = match base64_decode(&data) {
                                    Some(bytes) => conn.apply_update(&state, &bytes),
                                    None => Err(RelayError::InvalidUpdate("not base64".to_string())),
                                };
                                if let Err(e) = result {
                                    warn!("Rejected update from {}: {}", peer_id, e);
                                    if !send_error(&mut sender, e.to_string()).await {
                                        break;
                                    }
                                }
                            }
                            ClientMessage::Awareness { state: awareness } => {
                                if let Some(room) = conn.room.as_deref() {
                                    let _ = state.set_presence(room, &peer_id, awareness);
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        // Binary messages are treated as raw update bytes
                        if let Err(e) = conn.apply_update(&state, &data) {
                            warn!("Rejected binary update from {}: {}", peer_id, e);
                            if !send_error(&mut sender, e.to_string()).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {} // Ignore ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break;
                    }
                }
            }

            // Handle broadcast messages from room
            event = async {
                match &mut conn.room_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending::<Result<RoomEvent, RecvError>>().await,
                }
            } => {
                match outbound(&peer_id, event) {
                    Outbound::Send(msg) => {
                        if !send(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Outbound::Skip => {}
                    Outbound::Closed => conn.room_rx = None,
                }
            }
        }
    }

    // Cleanup on disconnect
    conn.leave(&state);
    info!("Connection closed: {}", peer_id);
}
