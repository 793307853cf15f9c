//! Wire protocol and WebSocket transport.
//!
//! Clients talk to the relay server with JSON messages. Tool traffic is
//! wrapped in [`ClientMessage::Tool`] and fanned out by the server to every
//! other participant of the room as [`ServerMessage::Tool`].

use crate::ToolId;
use crate::stroke::StrokeSeq;
use crate::tools::Transition;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Identity of a session participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ParticipantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ParticipantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant as announced to the room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub participant: ParticipantId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Replicated traffic of one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolMessage {
    /// Sender takes the ownership token (always granted).
    TakeOwnership,
    /// Mode transition to apply on every replica.
    Transition { transition: Transition },
    /// Occupancy announcement.
    Usage { in_use: bool },
    /// A finished stroke, points oldest first.
    StrokeCommit { seq: StrokeSeq, points: Vec<Vec3> },
    /// A stroke was deleted.
    StrokeRemoved { seq: StrokeSeq },
    /// Every stroke of the tool was deleted.
    PoolCleared,
}

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room
    Join {
        room: String,
        participant: ParticipantId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Leave current room
    Leave,
    /// Tool traffic to relay
    Tool { tool: ToolId, message: ToolMessage },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with the current session state
    Joined {
        room: String,
        peers: Vec<PeerInfo>,
        #[serde(default)]
        snapshot: SessionSnapshot,
    },
    /// Peer joined the room
    PeerJoined { peer: PeerInfo },
    /// Peer left the room
    PeerLeft { participant: ParticipantId },
    /// Tool traffic from another peer
    Tool {
        from: ParticipantId,
        tool: ToolId,
        message: ToolMessage,
    },
    /// Error message
    Error { message: String },
}

/// Committed state of one tool, as seen by the relay.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<ParticipantId>,
    #[serde(default)]
    pub strokes: BTreeMap<StrokeSeq, Vec<Vec3>>,
}

/// Committed state of a whole session, handed to late joiners.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    #[serde(default)]
    pub tools: BTreeMap<ToolId, ToolSnapshot>,
}

impl SessionSnapshot {
    /// Fold one relayed tool message into the snapshot.
    pub fn record(&mut self, from: &ParticipantId, tool: ToolId, message: &ToolMessage) {
        match message {
            ToolMessage::TakeOwnership => {
                self.tools.entry(tool).or_default().owner = Some(from.clone());
            }
            ToolMessage::StrokeCommit { seq, points } => {
                self.tools
                    .entry(tool)
                    .or_default()
                    .strokes
                    .insert(*seq, points.clone());
            }
            ToolMessage::StrokeRemoved { seq } => {
                if let Some(t) = self.tools.get_mut(&tool) {
                    t.strokes.remove(seq);
                }
            }
            ToolMessage::PoolCleared => {
                if let Some(t) = self.tools.get_mut(&tool) {
                    t.strokes.clear();
                }
            }
            ToolMessage::Transition { .. } | ToolMessage::Usage { .. } => {}
        }
    }

    /// Drop ownership held by a departed participant.
    pub fn forget_owner(&mut self, participant: &ParticipantId) {
        for t in self.tools.values_mut() {
            if t.owner.as_ref() == Some(participant) {
                t.owner = None;
            }
        }
    }

    pub fn stroke_count(&self) -> usize {
        self.tools.values().map(|t| t.strokes.len()).sum()
    }
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
    /// A message arrived from the server
    Received(ServerMessage),
    /// Error occurred
    Error { message: String },
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Already connected")]
    AlreadyConnected,
    #[error("Not connected")]
    NotConnected,
    #[error("Send failed: {0}")]
    Send(String),
}

/// At most `max_chars` leading characters of a message, for logging.
#[cfg(not(target_arch = "wasm32"))]
fn preview(msg: &str, max_chars: usize) -> &str {
    msg.char_indices().nth(max_chars).map_or(msg, |(i, _)| &msg[..i])
}

/// Anything that can carry outgoing JSON messages to the relay.
pub trait Transport {
    fn send(&self, msg: &str) -> Result<(), SyncError>;
}

// ============================================================================
// Native WebSocket Client
// ============================================================================

#[cfg(not(target_arch = "wasm32"))]
mod native_client {
    use super::*;
    use std::sync::mpsc::{Receiver, Sender, TryRecvError, channel};
    use std::thread::{self, JoinHandle};
    use std::time::Duration;
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

            let parsed_url = Url::parse(url).map_err(|e| SyncError::InvalidUrl(e.to_string()))?;
            if parsed_url.scheme() != "ws" && parsed_url.scheme() != "wss" {
                return Err(SyncError::InvalidUrl(format!(
                    "unsupported scheme {}",
                    parsed_url.scheme()
                )));
            }

            self.state = ConnectionState::Connecting;

            let (cmd_tx, cmd_rx) = channel::<WsCommand>();
            let (event_tx, event_rx) = channel::<SyncEvent>();

            let url = url.to_string();

            let handle = thread::spawn(move || {
                log::info!("WebSocket thread: connecting to {}", url);

                match connect(&url) {
                    Ok((mut socket, response)) => {
                        log::info!("WebSocket connected, status: {}", response.status());
                        let _ = event_tx.send(SyncEvent::Connected);

                        // Short read timeout keeps the command loop responsive.
                        if let tungstenite::stream::MaybeTlsStream::Plain(tcp) = socket.get_mut() {
                            let _ = tcp.set_read_timeout(Some(Duration::from_millis(50)));
                            let _ = tcp.set_write_timeout(Some(Duration::from_secs(5)));
                        }

                        loop {
                            match cmd_rx.try_recv() {
                                Ok(WsCommand::Send(msg)) => {
                                    log::debug!("WebSocket sending: {}", preview(&msg, 100));
                                    if let Err(e) = socket.send(Message::Text(msg)) {
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
                                        Ok(msg) => {
                                            let _ = event_tx.send(SyncEvent::Received(msg));
                                        }
                                        Err(e) => {
                                            log::warn!("Failed to parse server message: {}", e);
                                        }
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
                    }
                    Err(e) => {
                        log::error!("WebSocket connection failed: {}", e);
                        let _ = event_tx.send(SyncEvent::Error {
                            message: format!("Connection failed: {}", e),
                        });
                    }
                }
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
            self.state = ConnectionState::Disconnected;
        }

        /// Poll for pending events (non-blocking).
        pub fn poll_events(&mut self) -> Vec<SyncEvent> {
            if let Some(ref rx) = self.event_rx {
                while let Ok(event) = rx.try_recv() {
                    match &event {
                        SyncEvent::Connected => self.state = ConnectionState::Connected,
                        SyncEvent::Disconnected => self.state = ConnectionState::Disconnected,
                        SyncEvent::Error { .. } => self.state = ConnectionState::Error,
                        SyncEvent::Received(_) => {}
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

    impl Transport for NativeWebSocket {
        fn send(&self, msg: &str) -> Result<(), SyncError> {
            match self.cmd_tx {
                Some(ref tx) => tx
                    .send(WsCommand::Send(msg.to_string()))
                    .map_err(|e| SyncError::Send(e.to_string())),
                None => Err(SyncError::NotConnected),
            }
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

#[cfg(not(target_arch = "wasm32"))]
pub use native_client::NativeWebSocket;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Join {
            room: "test-room".to_string(),
            participant: "alice".into(),
            name: None,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"join","room":"test-room","participant":"alice"}"#);
    }

    #[test]
    fn test_tool_message_wire_format() {
        let msg = ClientMessage::Tool {
            tool: 2,
            message: ToolMessage::StrokeCommit {
                seq: 7,
                points: vec![Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO],
            },
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            json,
            r#"{"type":"tool","tool":2,"message":{"kind":"stroke_commit","seq":7,"points":[[0.0,0.0,1.0],[0.0,0.0,0.0]]}}"#
        );
    }

    #[test]
    fn test_transition_message_deserialize() {
        let json = r#"{"type":"tool","from":"bob","tool":0,"message":{"kind":"transition","transition":"to_pen_using"}}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Tool {
                from: "bob".into(),
                tool: 0,
                message: ToolMessage::Transition { transition: Transition::ToPenUsing },
            }
        );
    }

    #[test]
    fn test_joined_without_snapshot() {
        let json = r#"{"type":"joined","room":"test","peers":[]}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        match msg {
            ServerMessage::Joined { room, peers, snapshot } => {
                assert_eq!(room, "test");
                assert!(peers.is_empty());
                assert_eq!(snapshot.stroke_count(), 0);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_snapshot_records_commits_and_removals() {
        let alice = ParticipantId::from("alice");
        let mut snapshot = SessionSnapshot::default();

        snapshot.record(&alice, 0, &ToolMessage::TakeOwnership);
        snapshot.record(&alice, 0, &ToolMessage::StrokeCommit { seq: 0, points: vec![Vec3::ZERO] });
        snapshot.record(&alice, 0, &ToolMessage::StrokeCommit { seq: 1, points: vec![Vec3::X] });
        snapshot.record(&alice, 0, &ToolMessage::StrokeCommit { seq: 1, points: vec![Vec3::X] });
        assert_eq!(snapshot.stroke_count(), 2);
        assert_eq!(snapshot.tools[&0].owner, Some(alice.clone()));

        snapshot.record(&alice, 0, &ToolMessage::StrokeRemoved { seq: 0 });
        assert_eq!(snapshot.stroke_count(), 1);

        snapshot.record(&alice, 0, &ToolMessage::PoolCleared);
        assert_eq!(snapshot.stroke_count(), 0);

        snapshot.forget_owner(&alice);
        assert_eq!(snapshot.tools[&0].owner, None);
    }

    #[test]
    fn test_snapshot_roundtrips_through_json() {
        let mut snapshot = SessionSnapshot::default();
        snapshot.record(&"a".into(), 3, &ToolMessage::StrokeCommit { seq: 5, points: vec![Vec3::ONE] });
        let json = serde_json::to_string(&snapshot).unwrap();
        let back: SessionSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }

    #[test]
    fn test_preview_cuts_on_char_boundary() {
        let name = format!("x{}", "é".repeat(60));
        let msg = serde_json::to_string(&ClientMessage::Join {
            room: "test-room".to_string(),
            participant: "alice".into(),
            name: Some(name),
        })
        .unwrap();
        let cut = preview(&msg, 100);
        assert_eq!(cut.chars().count(), 100);
        assert!(msg.starts_with(cut));
        assert_eq!(preview("short", 100), "short");
    }

    #[test]
    fn test_send_without_connection_fails() {
        let ws = NativeWebSocket::new();
        assert!(matches!(ws.send("{}"), Err(SyncError::NotConnected)));
    }

    #[test]
    fn test_connect_rejects_bad_scheme() {
        let mut ws = NativeWebSocket::new();
        assert!(matches!(ws.connect("http://localhost:3030/ws"), Err(SyncError::InvalidUrl(_))));
        assert_eq!(ws.state(), ConnectionState::Disconnected);
    }
}
