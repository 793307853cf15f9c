//! Session-wide replication of shared tools.
//!
//! The coordinator keeps one [`ToolManager`] replica per tool, tracks who owns
//! each tool, turns local operations into queued outgoing messages and applies
//! incoming relay messages to the local replicas.

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;

use crate::ToolId;
use crate::config::Settings;
use crate::eraser::Overlap;
use crate::manager::{ToolEvent, ToolManager};
use crate::stroke::StrokeSeq;
use crate::sync::{
    ClientMessage, ParticipantId, PeerInfo, ServerMessage, SessionSnapshot, ToolMessage,
    ToolSnapshot, Transport,
};
use crate::tools::{Gesture, Instant};

/// Something the host should react to.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Joined a room and reconciled with its snapshot.
    JoinedRoom { room: String, peer_count: usize },
    PeerJoined { participant: ParticipantId },
    PeerLeft { participant: ParticipantId },
    /// Ownership of a tool changed hands.
    OwnerChanged { tool: ToolId, owner: Option<ParticipantId> },
    /// A tool replica changed.
    Tool { tool: ToolId, event: ToolEvent },
    /// The server reported an error.
    Error { message: String },
}

/// Coordinates tool replicas of one participant.
pub struct SessionCoordinator {
    settings: Settings,
    /// This participant.
    local: ParticipantId,
    /// Display name announced on join.
    name: Option<String>,
    tools: BTreeMap<ToolId, ToolManager>,
    /// Current owner of each tool's ownership token.
    owners: HashMap<ToolId, ParticipantId>,
    /// Known display names.
    names: HashMap<ParticipantId, String>,
    current_room: Option<String>,
    /// Pending outgoing messages (JSON strings).
    outgoing: Vec<String>,
    events: Vec<SessionEvent>,
}

impl SessionCoordinator {
    /// Create a coordinator for the local participant.
    pub fn new(settings: Settings, local: ParticipantId) -> Self {
        Self {
            settings,
            local,
            name: None,
            tools: BTreeMap::new(),
            owners: HashMap::new(),
            names: HashMap::new(),
            current_room: None,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Set the display name announced to other participants.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.names.insert(self.local.clone(), name.clone());
        self.name = Some(name);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn local(&self) -> &ParticipantId {
        &self.local
    }

    /// Register a tool. Registering an existing id keeps the existing replica.
    pub fn add_tool(&mut self, id: ToolId) -> &mut ToolManager {
        let settings = &self.settings;
        self.tools
            .entry(id)
            .or_insert_with(|| ToolManager::new(id, settings))
    }

    /// Register a standalone eraser.
    pub fn add_eraser(&mut self, id: ToolId) -> &mut ToolManager {
        let settings = &self.settings;
        self.tools
            .entry(id)
            .or_insert_with(|| ToolManager::eraser(id, settings))
    }

    pub fn tool(&self, id: ToolId) -> Option<&ToolManager> {
        self.tools.get(&id)
    }

    pub fn tool_mut(&mut self, id: ToolId) -> Option<&mut ToolManager> {
        self.tools.get_mut(&id)
    }

    pub fn tools(&self) -> impl Iterator<Item = &ToolManager> {
        self.tools.values()
    }

    // --- Ownership ---

    pub fn owner(&self, tool: ToolId) -> Option<&ParticipantId> {
        self.owners.get(&tool)
    }

    /// Whether the local participant holds the tool's ownership token.
    pub fn is_owner(&self, tool: ToolId) -> bool {
        self.owners.get(&tool) == Some(&self.local)
    }

    /// Ownership requests are always granted.
    pub fn on_ownership_request(&self, tool: ToolId, requester: &ParticipantId) -> bool {
        log::debug!("Ownership of tool {} requested by {}", tool, requester);
        true
    }

    /// Take the ownership token before originating a transition.
    fn ensure_owner(&mut self, tool: ToolId) {
        if self.is_owner(tool) {
            return;
        }
        let local = self.local.clone();
        if self.on_ownership_request(tool, &local) {
            self.set_owner(tool, Some(local));
            self.queue(tool, vec![ToolMessage::TakeOwnership]);
        }
    }

    fn set_owner(&mut self, tool: ToolId, owner: Option<ParticipantId>) {
        let changed = match &owner {
            Some(p) => self.owners.insert(tool, p.clone()).as_ref() != Some(p),
            None => self.owners.remove(&tool).is_some(),
        };
        if changed {
            log::info!("Tool {} ownership transferred to {:?}", tool, owner);
            self.events.push(SessionEvent::OwnerChanged { tool, owner });
        }
    }

    /// Label shown on a tool's stand: its owner's name, if known.
    fn holder_label(&self, tool: ToolId) -> String {
        self.owners
            .get(&tool)
            .and_then(|owner| self.names.get(owner))
            .cloned()
            .unwrap_or_default()
    }

    // --- Local operations ---

    /// Handle a gesture from the local operator of a tool.
    pub fn gesture(&mut self, tool: ToolId, gesture: Gesture, now: Instant) {
        if !self.tools.contains_key(&tool) {
            log::warn!("Gesture {:?} for unknown tool {}", gesture, tool);
            return;
        }
        self.ensure_owner(tool);
        let holder = self.holder_label(tool);
        let messages = match self.tools.get_mut(&tool) {
            Some(t) => t.gesture(gesture, now, &holder),
            None => return,
        };
        self.queue(tool, messages);
    }

    /// Record a pen-tip sample for a tool being drawn with.
    pub fn sample(&mut self, tool: ToolId, point: Vec3) {
        if let Some(t) = self.tools.get_mut(&tool) {
            t.sample(point);
        }
    }

    pub fn set_double_click_enabled(&mut self, tool: ToolId, enabled: bool) {
        let owned = self.is_owner(tool);
        if let Some(t) = self.tools.get_mut(&tool) {
            let messages = t.set_double_click_enabled(enabled, owned);
            self.queue(tool, messages);
        }
    }

    /// Return a tool home and clear its ink.
    pub fn reset(&mut self, tool: ToolId, now: Instant) {
        let owned = self.is_owner(tool);
        if let Some(t) = self.tools.get_mut(&tool) {
            let messages = t.reset(now, owned);
            self.queue(tool, messages);
        }
    }

    /// Clear a tool's ink on every replica.
    pub fn clear_all(&mut self, tool: ToolId) {
        if let Some(t) = self.tools.get_mut(&tool) {
            let messages = t.clear_all();
            self.queue(tool, messages);
        }
    }

    /// Reset every tool.
    pub fn reset_all(&mut self, now: Instant) {
        let ids: Vec<ToolId> = self.tools.keys().copied().collect();
        for id in ids {
            self.reset(id, now);
        }
    }

    pub fn is_held(&self, tool: ToolId) -> bool {
        self.tools.get(&tool).is_some_and(ToolManager::is_held)
    }

    /// An erase volume of `tool` overlapped a scene object.
    ///
    /// Any pool of this session may hold the touched stroke. The deletion is
    /// applied locally and broadcast; the detecting participant does not need
    /// to own either tool.
    pub fn eraser_overlap(&mut self, tool: ToolId, overlap: &Overlap) -> Option<(ToolId, StrokeSeq)> {
        let erasing = self.tools.get(&tool)?.is_erasing();
        let (target, seq) = self
            .tools
            .values_mut()
            .find_map(|t| t.erase(erasing, overlap).map(|seq| (t.id(), seq)))?;
        self.queue(target, vec![ToolMessage::StrokeRemoved { seq }]);
        Some((target, seq))
    }

    /// Erase every stroke touched by `tool`'s erase volume at `center`.
    pub fn erase_at(&mut self, tool: ToolId, center: Vec3) -> Vec<(ToolId, StrokeSeq)> {
        let radius = self.settings.eraser_radius;
        let overlaps: Vec<Overlap> = self
            .tools
            .values()
            .flat_map(|t| t.overlaps_at(center, radius))
            .collect();
        overlaps
            .iter()
            .filter_map(|overlap| self.eraser_overlap(tool, overlap))
            .collect()
    }

    // --- Room/Connection Management ---

    pub fn current_room(&self) -> Option<&str> {
        self.current_room.as_deref()
    }

    pub fn is_in_room(&self) -> bool {
        self.current_room.is_some()
    }

    /// Request to join a room. Queues the join message.
    pub fn join_room(&mut self, room: &str) {
        self.push(&ClientMessage::Join {
            room: room.to_string(),
            participant: self.local.clone(),
            name: self.name.clone(),
        });
    }

    /// Request to leave the current room. Queues the leave message.
    pub fn leave_room(&mut self) {
        if self.current_room.take().is_some() {
            self.push(&ClientMessage::Leave);
        }
    }

    /// Take pending outgoing messages (drains the queue).
    pub fn take_outgoing(&mut self) -> Vec<String> {
        std::mem::take(&mut self.outgoing)
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    /// Send every queued message. Failures are logged and not retried.
    pub fn flush(&mut self, transport: &dyn Transport) -> usize {
        let mut sent = 0;
        for msg in self.take_outgoing() {
            match transport.send(&msg) {
                Ok(()) => {
                    log::debug!("Sent {} bytes", msg.len());
                    sent += 1;
                }
                Err(e) => log::warn!("Dropping outgoing message ({} bytes): {}", msg.len(), e),
            }
        }
        sent
    }

    /// Take the events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        for (&tool, t) in self.tools.iter_mut() {
            self.events
                .extend(t.take_events().into_iter().map(|event| SessionEvent::Tool { tool, event }));
        }
        std::mem::take(&mut self.events)
    }

    fn queue(&mut self, tool: ToolId, messages: Vec<ToolMessage>) {
        if self.current_room.is_none() {
            return;
        }
        for message in messages {
            self.push(&ClientMessage::Tool { tool, message });
        }
    }

    fn push(&mut self, msg: &ClientMessage) {
        match serde_json::to_string(msg) {
            Ok(json) => self.outgoing.push(json),
            Err(e) => log::warn!("Failed to serialize {:?}: {}", msg, e),
        }
    }

    // --- Incoming Message Handling ---

    /// Handle an incoming server message (JSON). Returns the resulting events.
    pub fn handle_message(&mut self, json: &str) -> Vec<SessionEvent> {
        match serde_json::from_str::<ServerMessage>(json) {
            Ok(msg) => self.handle_server_message(msg),
            Err(e) => {
                log::warn!("Ignoring malformed server message: {}", e);
                Vec::new()
            }
        }
    }

    /// Handle a decoded server message. Returns the resulting events.
    pub fn handle_server_message(&mut self, msg: ServerMessage) -> Vec<SessionEvent> {
        match msg {
            ServerMessage::Joined { room, peers, snapshot } => {
                log::info!("Joined room {} with {} peers", room, peers.len());
                self.current_room = Some(room.clone());
                for peer in &peers {
                    self.remember(peer);
                }
                self.import_snapshot(&snapshot);
                self.events.push(SessionEvent::JoinedRoom {
                    room,
                    peer_count: peers.len(),
                });
            }
            ServerMessage::PeerJoined { peer } => {
                self.remember(&peer);
                let ids: Vec<ToolId> = self.tools.keys().copied().collect();
                for id in ids {
                    let owned = self.is_owner(id);
                    if let Some(t) = self.tools.get_mut(&id) {
                        let messages = t.on_participant_joined(owned);
                        self.queue(id, messages);
                    }
                }
                self.events.push(SessionEvent::PeerJoined { participant: peer.participant });
            }
            ServerMessage::PeerLeft { participant } => {
                self.names.remove(&participant);
                let ids: Vec<ToolId> = self.tools.keys().copied().collect();
                for id in ids {
                    if self.owners.get(&id) == Some(&participant) {
                        self.set_owner(id, None);
                        if let Some(t) = self.tools.get_mut(&id) {
                            t.owner_departed();
                        }
                    }
                    let owned = self.is_owner(id);
                    if let Some(t) = self.tools.get_mut(&id) {
                        let messages = t.on_participant_left(owned);
                        self.queue(id, messages);
                    }
                }
                self.events.push(SessionEvent::PeerLeft { participant });
            }
            ServerMessage::Tool { from, tool, message } => self.apply_tool_message(from, tool, message),
            ServerMessage::Error { message } => {
                log::warn!("Server error: {}", message);
                self.events.push(SessionEvent::Error { message });
            }
        }
        self.take_events()
    }

    fn apply_tool_message(&mut self, from: ParticipantId, tool: ToolId, message: ToolMessage) {
        if !self.tools.contains_key(&tool) {
            log::warn!("Message for unknown tool {} from {}", tool, from);
            return;
        }
        if message == ToolMessage::TakeOwnership {
            if self.on_ownership_request(tool, &from) {
                self.set_owner(tool, Some(from));
            }
            return;
        }
        let holder = self.holder_label(tool);
        if let Some(t) = self.tools.get_mut(&tool) {
            t.apply_remote(&message, &holder);
        }
    }

    fn remember(&mut self, peer: &PeerInfo) {
        if let Some(name) = &peer.name {
            self.names.insert(peer.participant.clone(), name.clone());
        }
    }

    // --- Snapshots ---

    /// Committed state of every local replica.
    pub fn snapshot(&self) -> SessionSnapshot {
        let tools = self
            .tools
            .iter()
            .map(|(&id, t)| {
                let strokes = t
                    .pool()
                    .iter()
                    .map(|stroke| (stroke.seq(), stroke.points().to_vec()))
                    .collect();
                let snapshot = ToolSnapshot {
                    owner: self.owners.get(&id).cloned(),
                    strokes,
                };
                (id, snapshot)
            })
            .collect();
        SessionSnapshot { tools }
    }

    /// Replace local replicas' committed state with a session snapshot.
    fn import_snapshot(&mut self, snapshot: &SessionSnapshot) {
        for (&id, tool_snapshot) in &snapshot.tools {
            if !self.tools.contains_key(&id) {
                log::warn!("Snapshot contains unknown tool {}", id);
                continue;
            }
            self.set_owner(id, tool_snapshot.owner.clone());
            if let Some(t) = self.tools.get_mut(&id) {
                t.replace_strokes(&tool_snapshot.strokes);
            }
        }
    }
}
