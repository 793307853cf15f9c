//! Penpool WebSocket Relay Server
//!
//! Relays tool traffic between the participants of a room and keeps a
//! per-room [`SessionSnapshot`] of committed strokes and tool ownership so
//! late joiners start from the current state.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id", "participant": "p-1", "name": "Ada" }
//! { "type": "tool", "tool": 0, "message": { "kind": "usage", "in_use": true } }
//! { "type": "leave" }
//! ```

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use penpool_core::sync::{ClientMessage, ParticipantId, PeerInfo, ServerMessage, SessionSnapshot};
use std::{
    collections::HashMap,
    net::{AddrParseError, SocketAddr},
    sync::Arc,
};
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

const CHANNEL_CAPACITY: usize = 256;
const DEFAULT_ADDR: &str = "0.0.0.0:3030";

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// Read the configuration from `PENPOOL_ADDR`.
    pub fn from_env() -> Result<Self, AddrParseError> {
        let addr = std::env::var("PENPOOL_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        Self::parse(&addr)
    }

    pub fn parse(addr: &str) -> Result<Self, AddrParseError> {
        Ok(Self { addr: addr.parse()? })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 3030)),
        }
    }
}

type RoomMessage = (ParticipantId, ServerMessage);

/// Room state
struct Room {
    /// Broadcast channel for this room
    tx: broadcast::Sender<RoomMessage>,
    /// Connected participants and their display names
    peers: HashMap<ParticipantId, Option<String>>,
    /// Committed state for new joiners
    snapshot: SessionSnapshot,
}

impl Room {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            peers: HashMap::new(),
            snapshot: SessionSnapshot::default(),
        }
    }
}

/// Shared application state
#[derive(Default)]
pub struct AppState {
    /// Active rooms
    rooms: DashMap<String, Room>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Add a participant to a room. Returns the room feed, the peers already
    /// present and the room's snapshot.
    fn join_room(
        &self,
        room_id: &str,
        peer: &PeerInfo,
    ) -> (broadcast::Receiver<RoomMessage>, Vec<PeerInfo>, SessionSnapshot) {
        let mut room = self.rooms.entry(room_id.to_string()).or_insert_with(Room::new);
        let peers = room
            .peers
            .iter()
            .filter(|(id, _)| **id != peer.participant)
            .map(|(id, name)| PeerInfo {
                participant: id.clone(),
                name: name.clone(),
            })
            .collect();
        room.peers.insert(peer.participant.clone(), peer.name.clone());
        (room.tx.subscribe(), peers, room.snapshot.clone())
    }

    /// Remove a participant from a room, releasing the tools it owned.
    fn leave_room(&self, room_id: &str, participant: &ParticipantId) {
        if let Some(mut room) = self.rooms.get_mut(room_id) {
            room.peers.remove(participant);
            room.snapshot.forget_owner(participant);
            // Clean up empty rooms
            if room.peers.is_empty() {
                drop(room);
                self.rooms.remove(room_id);
            }
        }
    }

    /// Fold relayed tool traffic into the room snapshot.
    fn record(&self, room_id: &str, from: &ParticipantId, msg: &ServerMessage) {
        if let ServerMessage::Tool { tool, message, .. } = msg {
            if let Some(mut room) = self.rooms.get_mut(room_id) {
                room.snapshot.record(from, *tool, message);
            }
        }
    }

    /// Broadcast message to room
    fn broadcast(&self, room_id: &str, from: &ParticipantId, msg: ServerMessage) {
        if let Some(room) = self.rooms.get(room_id) {
            let _ = room.tx.send((from.clone(), msg));
        }
    }

    /// Committed state of a room, if it exists.
    pub fn snapshot(&self, room_id: &str) -> Option<SessionSnapshot> {
        self.rooms.get(room_id).map(|room| room.snapshot.clone())
    }
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Index page
async fn index() -> &'static str {
    "Penpool Relay Server - Connect via WebSocket at /ws"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn encode(msg: &ServerMessage) -> Option<Message> {
    match serde_json::to_string(msg) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            warn!("Failed to serialize {:?}: {}", msg, e);
            None
        }
    }
}

/// A connection's membership in a room.
struct Membership {
    room: String,
    participant: ParticipantId,
}

impl Membership {
    fn leave(&self, state: &AppState) {
        state.leave_room(&self.room, &self.participant);
        state.broadcast(
            &self.room,
            &self.participant,
            ServerMessage::PeerLeft {
                participant: self.participant.clone(),
            },
        );
        info!("Participant {} left room {}", self.participant, self.room);
    }
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    debug!("New connection");

    let (mut sender, mut receiver) = socket.split();
    let mut membership: Option<Membership> = None;
    let mut room_rx: Option<broadcast::Receiver<RoomMessage>> = None;

    loop {
        tokio::select! {
            // Handle incoming messages from client
            msg = receiver.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // Ignore binary/ping/pong
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                };

                let client_msg = match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => client_msg,
                    Err(e) => {
                        warn!("Invalid message: {}", e);
                        let err = ServerMessage::Error {
                            message: format!("Invalid message: {}", e),
                        };
                        if let Some(reply) = encode(&err) {
                            let _ = sender.send(reply).await;
                        }
                        continue;
                    }
                };

                match client_msg {
                    ClientMessage::Join { room, participant, name } => {
                        // Leave current room if any
                        if let Some(old) = membership.take() {
                            old.leave(&state);
                        }

                        let peer = PeerInfo { participant, name };
                        let (rx, peers, snapshot) = state.join_room(&room, &peer);
                        room_rx = Some(rx);

                        let joined = ServerMessage::Joined {
                            room: room.clone(),
                            peers,
                            snapshot,
                        };
                        if let Some(reply) = encode(&joined) {
                            if sender.send(reply).await.is_err() {
                                membership = Some(Membership { room, participant: peer.participant });
                                break;
                            }
                        }

                        // Notify others
                        state.broadcast(&room, &peer.participant, ServerMessage::PeerJoined { peer: peer.clone() });
                        info!("Participant {} joined room {}", peer.participant, room);
                        membership = Some(Membership { room, participant: peer.participant });
                    }
                    ClientMessage::Leave => {
                        if let Some(old) = membership.take() {
                            old.leave(&state);
                        }
                        room_rx = None;
                    }
                    ClientMessage::Tool { tool, message } => {
                        let Some(m) = &membership else {
                            debug!("Dropping tool message outside a room");
                            continue;
                        };
                        let relayed = ServerMessage::Tool {
                            from: m.participant.clone(),
                            tool,
                            message,
                        };
                        state.record(&m.room, &m.participant, &relayed);
                        state.broadcast(&m.room, &m.participant, relayed);
                    }
                }
            }

            // Handle broadcast messages from room
            msg = async {
                match &mut room_rx {
                    Some(rx) => rx.recv().await,
                    None => std::future::pending().await,
                }
            } => {
                let (from, server_msg) = match msg {
                    Ok(item) => item,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Connection lagged, {} messages skipped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        room_rx = None;
                        continue;
                    }
                };
                // Don't echo back to sender
                let own = membership.as_ref().is_some_and(|m| m.participant == from);
                if own {
                    continue;
                }
                if let Some(out) = encode(&server_msg) {
                    if sender.send(out).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    // Cleanup on disconnect
    if let Some(m) = membership {
        m.leave(&state);
    }
    debug!("Connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use penpool_core::sync::ToolMessage;

    fn peer(id: &str) -> PeerInfo {
        PeerInfo {
            participant: id.into(),
            name: Some(id.to_uppercase()),
        }
    }

    #[test]
    fn test_config_parse() {
        let config = ServerConfig::parse("127.0.0.1:4040").unwrap();
        assert_eq!(config.addr.port(), 4040);
        assert!(ServerConfig::parse("not an address").is_err());
        assert_eq!(ServerConfig::default().addr.port(), 3030);
    }

    #[test]
    fn test_join_lists_existing_peers() {
        let state = AppState::new();
        let (_rx, peers, _) = state.join_room("r", &peer("a"));
        assert!(peers.is_empty());
        let (_rx, peers, _) = state.join_room("r", &peer("b"));
        assert_eq!(peers, vec![peer("a")]);
    }

    #[test]
    fn test_snapshot_follows_relayed_traffic() {
        let state = AppState::new();
        let (_rx, _, _) = state.join_room("r", &peer("a"));
        let a = ParticipantId::from("a");
        for message in [
            ToolMessage::TakeOwnership,
            ToolMessage::StrokeCommit { seq: 0, points: vec![] },
            ToolMessage::StrokeCommit { seq: 1, points: vec![] },
            ToolMessage::StrokeRemoved { seq: 0 },
        ] {
            state.record("r", &a, &ServerMessage::Tool { from: a.clone(), tool: 0, message });
        }
        let snapshot = state.snapshot("r").unwrap();
        assert_eq!(snapshot.stroke_count(), 1);
        assert_eq!(snapshot.tools[&0].owner, Some(a));
    }

    #[test]
    fn test_leave_releases_ownership_and_empty_rooms() {
        let state = AppState::new();
        let (_ra, _, _) = state.join_room("r", &peer("a"));
        let (_rb, _, _) = state.join_room("r", &peer("b"));
        let a = ParticipantId::from("a");
        state.record("r", &a, &ServerMessage::Tool {
            from: a.clone(),
            tool: 1,
            message: ToolMessage::TakeOwnership,
        });

        state.leave_room("r", &a);
        assert_eq!(state.snapshot("r").unwrap().tools[&1].owner, None);
        state.leave_room("r", &"b".into());
        assert_eq!(state.room_count(), 0);
    }
}
