//! Tandem core
//!
//! Sans-IO session engine for anonymous two-party chat pairing.
//!
//! # Architecture
//!
//! The session is a pure state machine that:
//! - Receives inputs from the caller (intents, elapsed timers, peer signals)
//! - Produces actions for the caller to execute (emit events, schedule or
//!   cancel timers, notify a peer session)
//! - Uses the `Environment` trait for time and randomness (deterministic
//!   testing)
//!
//! # Components
//!
//! - [`Session`]: Per-participant state machine
//! - [`RoomRegistry`]: Shared map of private rooms to their occupants
//! - [`EventChannel`]: Per-session publish/subscribe bus
//! - [`PayloadTransform`]: Reversible encoding applied to message content
//! - [`SessionConfig`]: Timing and discovery parameters

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod action;
mod config;
pub mod env;
mod event;
mod identity;
mod message;
mod room;
mod session;
mod transform;

pub use action::{PeerSignal, SessionAction, SessionInput, TimerId};
pub use config::{ConfigError, SessionConfig};
pub use env::Environment;
pub use event::{
    EventChannel, EventKind, Listener, SessionEvent, StatusEvent, StatusKind, SubscriptionId,
};
pub use identity::Identity;
pub use message::{Message, MessageId};
pub use room::{
    GENERATED_CODE_LEN, JoinOutcome, ROOM_CAPACITY, RoomCode, RoomCodeError, RoomRegistry,
};
pub use session::{ConnectionState, Session};
pub use transform::{HexTransform, PayloadTransform, Plaintext, TransformError};
