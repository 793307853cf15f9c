//! Penpool Core Library
//!
//! Shared pen and eraser tools for multi-user scenes: the tool mode machine, ink
//! ribbon geometry, stroke pools and the replication layer that keeps every
//! participant's replica in step.

pub mod collaboration;
pub mod config;
pub mod eraser;
pub mod geometry;
pub mod manager;
pub mod stroke;
pub mod sync;
pub mod tools;

/// Identifier of a shared tool within a session.
pub type ToolId = u32;

pub use collaboration::{SessionCoordinator, SessionEvent};
pub use config::{ConfigError, Settings};
pub use eraser::{EraseDetector, Overlap};
pub use geometry::{CollisionMesh, InkGeometry, Mesh, build_ink};
pub use manager::{Occupancy, Pose, ToolEvent, ToolManager};
pub use stroke::{Stroke, StrokePool, StrokeSeq};
#[cfg(not(target_arch = "wasm32"))]
pub use sync::NativeWebSocket;
pub use sync::{
    ClientMessage, ConnectionState, ParticipantId, ServerMessage, SessionSnapshot, SyncError, SyncEvent,
    ToolMessage, Transport,
};
pub use tools::{DOUBLE_CLICK_WINDOW, Gesture, Mode, ToolKind, ToolStateMachine, Transition};
