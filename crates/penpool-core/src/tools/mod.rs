//! Pen/eraser mode state machine.
//!
//! Every replica of a tool runs the same machine. The owner turns raw gestures
//! into [`Transition`] tokens with [`ToolStateMachine::handle`]; every other
//! replica receives those tokens and feeds them to [`ToolStateMachine::apply`].
//! The effects of a token are recomputed from the local mode, so the token
//! itself carries no data.

use crate::stroke::{StrokePool, StrokeSeq};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Use web-time on WASM, std::time otherwise
#[cfg(not(target_arch = "wasm32"))]
pub use std::time::Instant;
#[cfg(target_arch = "wasm32")]
pub use web_time::Instant;

/// Two presses closer together than this form a double-click.
pub const DOUBLE_CLICK_WINDOW: Duration = Duration::from_millis(184);

/// Mode of a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    PenIdle,
    PenUsing,
    EraserIdle,
    EraserUsing,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::PenIdle => "pen idle",
            Mode::PenUsing => "pen using",
            Mode::EraserIdle => "eraser idle",
            Mode::EraserUsing => "eraser using",
        };
        f.write_str(name)
    }
}

/// Kind of shared tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Pen with an embedded eraser, toggled by double-click.
    #[default]
    Pen,
    /// Standalone eraser. Only ever erase idle or erase using.
    Eraser,
}

impl ToolKind {
    /// Mode a fresh or released tool rests in.
    pub fn idle_mode(self) -> Mode {
        match self {
            ToolKind::Pen => Mode::PenIdle,
            ToolKind::Eraser => Mode::EraserIdle,
        }
    }

    /// Transition that returns the tool to its idle mode.
    pub fn idle_transition(self) -> Transition {
        match self {
            ToolKind::Pen => Transition::ToPenIdle,
            ToolKind::Eraser => Transition::ToEraserIdle,
        }
    }

    /// Whether replicas of this kind apply a transition.
    pub fn accepts(self, transition: Transition) -> bool {
        match self {
            ToolKind::Pen => true,
            ToolKind::Eraser => matches!(transition, Transition::ToEraserIdle | Transition::ToEraserUsing),
        }
    }
}

/// Raw input on a held tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gesture {
    PickedUp,
    Dropped,
    PressStart,
    PressEnd,
}

/// Replicated transition token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    ToPenIdle,
    ToPenUsing,
    ToEraserIdle,
    ToEraserUsing,
    RemoveLastStroke,
}

/// Side effect of a transition on one replica.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    StartDrawing,
    FinishDrawing,
    StartErasing,
    FinishErasing,
    ShowPen,
    ShowEraser,
    RemoveLastStroke,
}

/// What applying a transition did to the stroke pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The local operator finished a stroke.
    Committed { seq: StrokeSeq, points: Vec<Vec3> },
    /// A stroke was removed by undo.
    Removed { seq: StrokeSeq },
}

/// Compute the next mode and the effects of a transition.
pub fn transition(mode: Mode, transition: Transition) -> (Mode, Vec<Effect>) {
    use Effect::*;

    match transition {
        Transition::ToPenIdle => {
            let effects = match mode {
                Mode::PenIdle => vec![],
                Mode::PenUsing => vec![FinishDrawing],
                Mode::EraserIdle => vec![ShowPen],
                Mode::EraserUsing => vec![FinishErasing, ShowPen],
            };
            (Mode::PenIdle, effects)
        }
        Transition::ToPenUsing => {
            let effects = match mode {
                Mode::PenIdle => vec![StartDrawing],
                Mode::PenUsing => vec![],
                Mode::EraserIdle => vec![ShowPen, StartDrawing],
                Mode::EraserUsing => vec![FinishErasing, ShowPen, StartDrawing],
            };
            (Mode::PenUsing, effects)
        }
        Transition::ToEraserIdle => {
            let effects = match mode {
                Mode::PenIdle => vec![ShowEraser],
                Mode::PenUsing => vec![FinishDrawing, ShowEraser],
                Mode::EraserIdle => vec![],
                Mode::EraserUsing => vec![FinishErasing],
            };
            (Mode::EraserIdle, effects)
        }
        Transition::ToEraserUsing => {
            let effects = match mode {
                Mode::PenIdle => vec![ShowEraser, StartErasing],
                Mode::PenUsing => vec![FinishDrawing, ShowEraser, StartErasing],
                Mode::EraserIdle => vec![StartErasing],
                Mode::EraserUsing => vec![],
            };
            (Mode::EraserUsing, effects)
        }
        Transition::RemoveLastStroke => (mode, vec![RemoveLastStroke]),
    }
}

/// Whether a press was a single press or the second half of a double-click.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    Single,
    Double,
}

/// Visual state of the embedded eraser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EraserVisual {
    /// Eraser tip shown instead of the pen tip.
    pub visible: bool,
    /// Erase highlight active; overlaps delete ink.
    pub erasing: bool,
}

/// Result of handling one gesture on the owner's replica.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Handled {
    /// Tokens to broadcast, already applied locally.
    pub transitions: Vec<Transition>,
    pub outcomes: Vec<Outcome>,
}

/// Local replica of one tool's mode machine.
#[derive(Debug, Clone)]
pub struct ToolStateMachine {
    kind: ToolKind,
    mode: Mode,
    double_click_enabled: bool,
    last_press: Option<Instant>,
    /// The local participant is holding and operating this tool.
    operator: bool,
    trail: Vec<Vec3>,
    trail_visible: bool,
    eraser: EraserVisual,
}

impl Default for ToolStateMachine {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ToolStateMachine {
    pub fn new(double_click_enabled: bool) -> Self {
        Self {
            kind: ToolKind::Pen,
            mode: Mode::PenIdle,
            double_click_enabled,
            last_press: None,
            operator: false,
            trail: Vec::new(),
            trail_visible: false,
            eraser: EraserVisual::default(),
        }
    }

    /// Machine of a standalone eraser.
    pub fn standalone_eraser() -> Self {
        Self {
            kind: ToolKind::Eraser,
            mode: Mode::EraserIdle,
            eraser: EraserVisual {
                visible: true,
                erasing: false,
            },
            ..Self::new(false)
        }
    }

    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_operator(&self) -> bool {
        self.operator
    }

    pub fn double_click_enabled(&self) -> bool {
        self.double_click_enabled
    }

    /// Whether erase overlaps currently delete ink.
    pub fn is_erasing(&self) -> bool {
        self.eraser.erasing
    }

    pub fn eraser(&self) -> EraserVisual {
        self.eraser
    }

    pub fn trail_visible(&self) -> bool {
        self.trail_visible
    }

    /// Points captured so far for the stroke being drawn, in capture order.
    pub fn trail(&self) -> &[Vec3] {
        &self.trail
    }

    /// Record a pen-tip sample. Ignored unless the local operator is drawing.
    pub fn sample(&mut self, point: Vec3) {
        if self.operator && self.mode == Mode::PenUsing {
            self.trail.push(point);
        }
    }

    /// Enable or disable double-click detection.
    ///
    /// Returns the synthetic return-to-pen transition the owner broadcasts
    /// after a settings change.
    pub fn set_double_click_enabled(&mut self, enabled: bool) -> Transition {
        self.double_click_enabled = enabled;
        self.last_press = None;
        self.kind.idle_transition()
    }

    /// Classify a press against the double-click window.
    pub fn classify_press(&mut self, now: Instant) -> Press {
        let within_window = self
            .last_press
            .is_some_and(|prev| now.saturating_duration_since(prev) < DOUBLE_CLICK_WINDOW);

        if self.double_click_enabled && within_window {
            // Reset so a third quick press starts a new pair.
            self.last_press = None;
            Press::Double
        } else {
            self.last_press = Some(now);
            Press::Single
        }
    }

    /// Map a gesture to the transitions the owner broadcasts.
    ///
    /// Operator bookkeeping for pick-up happens here; drop is finished by
    /// [`ToolStateMachine::handle`] after the stroke is committed.
    pub fn interpret(&mut self, gesture: Gesture, now: Instant) -> Vec<Transition> {
        if self.kind == ToolKind::Eraser {
            return self.interpret_eraser(gesture);
        }
        match gesture {
            Gesture::PickedUp => {
                self.operator = true;
                vec![Transition::ToPenIdle]
            }
            Gesture::Dropped => vec![Transition::ToPenIdle],
            Gesture::PressStart => match (self.classify_press(now), self.mode) {
                (Press::Double, Mode::PenIdle) => {
                    vec![Transition::RemoveLastStroke, Transition::ToEraserIdle]
                }
                (Press::Double, Mode::EraserIdle) => vec![Transition::ToPenIdle],
                (Press::Single, Mode::PenIdle) => vec![Transition::ToPenUsing],
                (Press::Single, Mode::EraserIdle) => vec![Transition::ToEraserUsing],
                (press, mode) => {
                    log::error!("Unexpected state: {} on {:?} press", mode, press);
                    vec![]
                }
            },
            Gesture::PressEnd => match self.mode {
                Mode::PenUsing => vec![Transition::ToPenIdle],
                Mode::EraserUsing => vec![Transition::ToEraserIdle],
                Mode::PenIdle | Mode::EraserIdle => {
                    log::debug!("Release while {}, nothing to finish", self.mode);
                    vec![]
                }
            },
        }
    }

    fn interpret_eraser(&mut self, gesture: Gesture) -> Vec<Transition> {
        match (gesture, self.mode) {
            (Gesture::PickedUp, _) => {
                self.operator = true;
                vec![Transition::ToEraserIdle]
            }
            (Gesture::Dropped, _) => vec![Transition::ToEraserIdle],
            (Gesture::PressStart, Mode::EraserIdle) => vec![Transition::ToEraserUsing],
            (Gesture::PressEnd, Mode::EraserUsing) => vec![Transition::ToEraserIdle],
            (Gesture::PressStart, mode) => {
                log::error!("Unexpected state: eraser press while {}", mode);
                vec![]
            }
            (Gesture::PressEnd, mode) => {
                log::debug!("Release while {}, nothing to finish", mode);
                vec![]
            }
        }
    }

    /// Handle a gesture on the owner's replica: interpret it and apply the
    /// resulting transitions locally.
    pub fn handle(&mut self, gesture: Gesture, now: Instant, pool: &mut StrokePool) -> Handled {
        let transitions = self.interpret(gesture, now);
        let mut outcomes = Vec::new();
        for &t in &transitions {
            outcomes.extend(self.apply(t, pool));
        }
        if gesture == Gesture::Dropped {
            self.operator = false;
        }
        Handled { transitions, outcomes }
    }

    /// Apply a transition token to this replica.
    pub fn apply(&mut self, t: Transition, pool: &mut StrokePool) -> Vec<Outcome> {
        if !self.kind.accepts(t) {
            log::warn!("{:?} ignored by {:?} tool", t, self.kind);
            return Vec::new();
        }
        let (next, effects) = transition(self.mode, t);
        log::debug!("{:?}: {} -> {}", t, self.mode, next);

        let mut outcomes = Vec::new();
        for effect in effects {
            if let Some(outcome) = self.run(effect, pool) {
                outcomes.push(outcome);
            }
        }
        self.mode = next;
        outcomes
    }

    /// Return to the idle mode without broadcasting, used when the owner vanished.
    pub fn force_idle(&mut self, pool: &mut StrokePool) -> Vec<Outcome> {
        self.operator = false;
        self.apply(self.kind.idle_transition(), pool)
    }

    fn run(&mut self, effect: Effect, pool: &mut StrokePool) -> Option<Outcome> {
        match effect {
            Effect::StartDrawing => {
                self.trail.clear();
                self.trail_visible = true;
                None
            }
            Effect::FinishDrawing => self.finish_drawing(pool),
            Effect::StartErasing => {
                self.eraser.erasing = true;
                None
            }
            Effect::FinishErasing => {
                self.eraser.erasing = false;
                None
            }
            Effect::ShowPen => {
                self.eraser = EraserVisual::default();
                None
            }
            Effect::ShowEraser => {
                self.eraser.visible = true;
                None
            }
            Effect::RemoveLastStroke => pool
                .remove_last()
                .map(|stroke| Outcome::Removed { seq: stroke.seq() }),
        }
    }

    fn finish_drawing(&mut self, pool: &mut StrokePool) -> Option<Outcome> {
        self.trail_visible = false;
        let mut points = std::mem::take(&mut self.trail);

        // Only the operator's replica has captured points; others wait for
        // the replicated commit.
        if !self.operator || points.is_empty() {
            return None;
        }

        points.reverse();
        let seq = pool.append(points.clone());
        log::debug!("Committed stroke {} with {} points", seq, points.len());
        Some(Outcome::Committed { seq, points })
    }
}
