//! Deterministic simulation harness for tandem session testing.
//!
//! A seeded [`SimEnv`] and a virtual timer queue let [`SimWorld`] drive any
//! number of sessions over one room registry, reproducibly and without
//! waiting on real time.
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation of room
//! membership. Operations are applied to both the model and a `SimWorld`, and
//! their observable states are compared.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod sim_env;
pub mod world;

pub use model::{
    ModelRegistry, ModelRoomId, ModelWorld, ObservableState, Operation, ParticipantId,
    SmallMessage, room_code,
};
pub use sim_env::SimEnv;
pub use world::{SessionIdx, SimWorld, TimedEvent};
