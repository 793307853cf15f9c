//! Per-tool facade.
//!
//! A [`ToolManager`] bundles everything one shared tool owns: its mode
//! machine, its stroke pool, its erase detector, the occupancy shown on its
//! stand and its pose. Operations apply their local effects immediately and
//! return the [`ToolMessage`]s the caller must broadcast.

use crate::ToolId;
use crate::config::Settings;
use crate::eraser::{EraseDetector, Overlap};
use crate::stroke::{StrokePool, StrokeSeq};
use crate::sync::ToolMessage;
use crate::tools::{Gesture, Instant, Mode, Outcome, ToolKind, ToolStateMachine, Transition};
use glam::{Quat, Vec3};
use std::collections::BTreeMap;

/// Label shown while the holder's name is unknown.
pub const OCCUPIED_LABEL: &str = "Occupied";

/// Whether someone is holding the tool, as shown to everyone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Occupancy {
    pub in_use: bool,
    /// Holder's display name while in use, empty otherwise.
    pub label: String,
}

/// Position and orientation of a tool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

/// Something that changed on a tool replica.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolEvent {
    ModeChanged(Mode),
    StrokeCommitted(StrokeSeq),
    StrokeRemoved(StrokeSeq),
    PoolCleared,
    OccupancyChanged(Occupancy),
}

/// Facade over one shared tool.
#[derive(Debug, Clone)]
pub struct ToolManager {
    id: ToolId,
    machine: ToolStateMachine,
    pool: StrokePool,
    detector: EraseDetector,
    occupancy: Occupancy,
    pose: Pose,
    home: Pose,
    events: Vec<ToolEvent>,
}

impl ToolManager {
    /// A pen with its embedded eraser.
    pub fn new(id: ToolId, settings: &Settings) -> Self {
        Self::with_machine(id, ToolStateMachine::new(settings.double_click_enabled), settings)
    }

    /// A standalone eraser.
    pub fn eraser(id: ToolId, settings: &Settings) -> Self {
        Self::with_machine(id, ToolStateMachine::standalone_eraser(), settings)
    }

    fn with_machine(id: ToolId, machine: ToolStateMachine, settings: &Settings) -> Self {
        Self {
            id,
            machine,
            pool: StrokePool::new(settings.pool_name(id), &settings.ink_prefix, settings.ink_width),
            detector: EraseDetector::new(settings),
            occupancy: Occupancy::default(),
            pose: Pose::default(),
            home: Pose::default(),
            events: Vec::new(),
        }
    }

    /// Set the pose the tool returns to on reset.
    pub fn with_home(mut self, home: Pose) -> Self {
        self.home = home;
        self.pose = home;
        self
    }

    pub fn id(&self) -> ToolId {
        self.id
    }

    pub fn kind(&self) -> ToolKind {
        self.machine.kind()
    }

    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }

    pub fn machine(&self) -> &ToolStateMachine {
        &self.machine
    }

    pub fn pool(&self) -> &StrokePool {
        &self.pool
    }

    pub fn occupancy(&self) -> &Occupancy {
        &self.occupancy
    }

    /// Whether anyone is holding the tool.
    pub fn is_held(&self) -> bool {
        self.occupancy.in_use
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    /// Update the pose as reported by the scene.
    pub fn set_pose(&mut self, pose: Pose) {
        self.pose = pose;
    }

    /// Drain the change events recorded since the last call.
    pub fn take_events(&mut self) -> Vec<ToolEvent> {
        std::mem::take(&mut self.events)
    }

    // --- Owner side ---

    /// Handle a gesture from the local operator.
    ///
    /// `holder` is the label shown on the stand when the tool is picked up.
    pub fn gesture(&mut self, gesture: Gesture, now: Instant, holder: &str) -> Vec<ToolMessage> {
        let mut messages = Vec::new();
        match gesture {
            Gesture::PickedUp => {
                self.start_using(holder);
                messages.push(ToolMessage::Usage { in_use: true });
            }
            Gesture::Dropped => {
                self.end_using();
                messages.push(ToolMessage::Usage { in_use: false });
            }
            Gesture::PressStart | Gesture::PressEnd => {}
        }

        let before = self.machine.mode();
        let handled = self.machine.handle(gesture, now, &mut self.pool);
        self.note_mode(before);

        messages.extend(
            handled
                .transitions
                .into_iter()
                .map(|transition| ToolMessage::Transition { transition }),
        );
        messages.extend(self.outcome_messages(handled.outcomes));
        messages
    }

    /// Record a pen-tip sample while drawing.
    pub fn sample(&mut self, point: Vec3) {
        self.machine.sample(point);
    }

    /// Change double-click detection.
    ///
    /// The owner also sends the tool back to idle on every replica; other
    /// participants only change their local preference.
    pub fn set_double_click_enabled(&mut self, enabled: bool, locally_owned: bool) -> Vec<ToolMessage> {
        let transition = self.machine.set_double_click_enabled(enabled);
        if !locally_owned {
            return Vec::new();
        }
        let mut messages = vec![ToolMessage::Transition { transition }];
        let outcomes = self.apply_transition(transition);
        messages.extend(self.outcome_messages(outcomes));
        messages
    }

    /// Drop the tool if held locally and send it home if owned. A pen also
    /// clears its ink.
    pub fn reset(&mut self, now: Instant, locally_owned: bool) -> Vec<ToolMessage> {
        let mut messages = Vec::new();
        if self.machine.is_operator() {
            messages.extend(self.gesture(Gesture::Dropped, now, ""));
        }
        if locally_owned {
            self.pose = self.home;
        }
        if self.kind() == ToolKind::Pen {
            messages.extend(self.clear_all());
        }
        messages
    }

    /// Remove every stroke of this tool.
    pub fn clear_all(&mut self) -> Vec<ToolMessage> {
        self.pool.clear();
        self.events.push(ToolEvent::PoolCleared);
        vec![ToolMessage::PoolCleared]
    }

    /// Re-announce occupancy to a newcomer.
    pub fn on_participant_joined(&mut self, locally_owned: bool) -> Vec<ToolMessage> {
        if locally_owned && self.is_held() {
            vec![ToolMessage::Usage { in_use: true }]
        } else {
            Vec::new()
        }
    }

    /// Settle occupancy after someone left.
    pub fn on_participant_left(&mut self, locally_owned: bool) -> Vec<ToolMessage> {
        if locally_owned && !self.is_held() {
            self.end_using();
            vec![ToolMessage::Usage { in_use: false }]
        } else {
            Vec::new()
        }
    }

    // --- Erasing ---

    /// Whether this tool's erase volume currently deletes ink.
    pub fn is_erasing(&self) -> bool {
        self.machine.is_erasing()
    }

    /// Delete the stroke an erase overlap points at, if it lives in this pool.
    pub fn erase(&mut self, erasing: bool, overlap: &Overlap) -> Option<StrokeSeq> {
        let seq = self.detector.resolve(erasing, overlap, &self.pool)?;
        self.pool.remove(seq)?;
        self.events.push(ToolEvent::StrokeRemoved(seq));
        Some(seq)
    }

    /// Overlaps of a sphere with this tool's ink.
    pub fn overlaps_at(&self, center: Vec3, radius: f32) -> Vec<Overlap> {
        self.detector.overlaps_at(center, radius, &self.pool)
    }

    // --- Replica side ---

    /// Apply tool traffic from another participant.
    ///
    /// `holder` labels the stand when the message announces occupancy.
    pub fn apply_remote(&mut self, message: &ToolMessage, holder: &str) {
        match message {
            ToolMessage::Transition { transition } => {
                self.apply_transition(*transition);
            }
            ToolMessage::StrokeCommit { seq, .. } if *seq == StrokeSeq::MAX => {
                log::warn!("Ignoring stroke commit with reserved seq {} on tool {}", seq, self.id);
            }
            ToolMessage::StrokeCommit { seq, points } => {
                self.pool.insert(*seq, points.clone());
                self.events.push(ToolEvent::StrokeCommitted(*seq));
            }
            ToolMessage::StrokeRemoved { seq } => {
                if self.pool.remove(*seq).is_some() {
                    self.events.push(ToolEvent::StrokeRemoved(*seq));
                }
            }
            ToolMessage::PoolCleared => {
                self.pool.clear();
                self.events.push(ToolEvent::PoolCleared);
            }
            ToolMessage::Usage { in_use: true } => self.start_using(holder),
            ToolMessage::Usage { in_use: false } => self.end_using(),
            // Ownership is tracked by the coordinator.
            ToolMessage::TakeOwnership => {}
        }
    }

    /// The owner vanished: return to idle and free the stand.
    pub fn owner_departed(&mut self) {
        let before = self.machine.mode();
        let outcomes = self.machine.force_idle(&mut self.pool);
        self.note_mode(before);
        self.record_outcomes(&outcomes);
        self.end_using();
    }

    /// Replace the pool contents with a session snapshot.
    pub fn replace_strokes(&mut self, strokes: &BTreeMap<StrokeSeq, Vec<Vec3>>) {
        self.pool.clear();
        self.events.push(ToolEvent::PoolCleared);
        for (&seq, points) in strokes {
            if seq == StrokeSeq::MAX {
                log::warn!("Skipping snapshot stroke with reserved seq on tool {}", self.id);
                continue;
            }
            self.pool.insert(seq, points.clone());
            self.events.push(ToolEvent::StrokeCommitted(seq));
        }
    }

    // --- Occupancy ---

    pub fn start_using(&mut self, holder: &str) {
        let label = if holder.is_empty() { OCCUPIED_LABEL } else { holder };
        self.set_occupancy(Occupancy {
            in_use: true,
            label: label.to_string(),
        });
    }

    pub fn end_using(&mut self) {
        self.set_occupancy(Occupancy::default());
    }

    fn set_occupancy(&mut self, occupancy: Occupancy) {
        if self.occupancy != occupancy {
            self.occupancy = occupancy.clone();
            self.events.push(ToolEvent::OccupancyChanged(occupancy));
        }
    }

    // --- Helpers ---

    fn apply_transition(&mut self, transition: Transition) -> Vec<Outcome> {
        let before = self.machine.mode();
        let outcomes = self.machine.apply(transition, &mut self.pool);
        self.note_mode(before);
        self.record_outcomes(&outcomes);
        outcomes
    }

    fn note_mode(&mut self, before: Mode) {
        let after = self.machine.mode();
        if after != before {
            self.events.push(ToolEvent::ModeChanged(after));
        }
    }

    fn record_outcomes(&mut self, outcomes: &[Outcome]) {
        for outcome in outcomes {
            let event = match outcome {
                Outcome::Committed { seq, .. } => ToolEvent::StrokeCommitted(*seq),
                Outcome::Removed { seq } => ToolEvent::StrokeRemoved(*seq),
            };
            self.events.push(event);
        }
    }

    fn outcome_messages(&mut self, outcomes: Vec<Outcome>) -> Vec<ToolMessage> {
        self.record_outcomes(&outcomes);
        outcomes
            .into_iter()
            .map(|outcome| match outcome {
                Outcome::Committed { seq, points } => ToolMessage::StrokeCommit { seq, points },
                Outcome::Removed { seq } => ToolMessage::StrokeRemoved { seq },
            })
            .collect()
    }
}
