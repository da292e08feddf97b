//! Reference model for model-based testing.
//!
//! The model captures the room membership rules without timers, identities or
//! locking. It serves as the oracle against which the simulated sessions are
//! verified.
//!
//! # Design Principles
//!
//! - Simplicity: The model should be obviously correct
//! - Rules not mechanics: Captures WHAT membership results, not HOW
//! - Deterministic: Same inputs produce same outputs

pub mod operation;
mod registry;
mod world;

pub use operation::{ModelRoomId, Operation, ParticipantId, SmallMessage, room_code};
pub use registry::ModelRegistry;
pub use world::{ModelWorld, ObservableState};
