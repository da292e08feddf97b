//! Session inputs and actions.
//!
//! The session is a pure state machine: callers feed it [`SessionInput`]s and
//! execute the [`SessionAction`]s it returns. Time only enters through
//! `Schedule` actions and the matching `TimerFired` inputs.

use std::{fmt, time::Duration};

use crate::{event::SessionEvent, identity::Identity, message::Message, room::RoomCode};

/// Handle for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub(crate) u64);

impl TimerId {
    /// Raw timer number, unique within one session.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Signals exchanged between the two sessions of a private room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerSignal {
    /// The sender has bound the receiver as its partner in `room`.
    Paired {
        /// Room in which the pairing happened.
        room: RoomCode,
    },

    /// An encoded chat message.
    Message(Message),

    /// Typing indicator.
    Typing(bool),

    /// The sender has left the chat.
    Left,
}

/// Inputs processed by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Start a random chat: connect, announce, then discover.
    Bootstrap,

    /// Run one partner discovery.
    FindPartner,

    /// Reset the retry counter and discover again.
    RetryConnection,

    /// Create a private room, generating a code if none is given.
    CreateRoom {
        /// Caller-supplied code.
        code: Option<String>,
    },

    /// Join a private room.
    JoinRoom {
        /// Caller-supplied code.
        code: String,
    },

    /// Send a chat message to the partner.
    SendMessage {
        /// Plain text content.
        content: String,
    },

    /// Send a typing indicator to the partner.
    SendTyping(bool),

    /// End the session and leave any room.
    Disconnect,

    /// A scheduled timer elapsed.
    TimerFired(TimerId),

    /// A signal arrived from another session.
    Peer {
        /// Sending session.
        from: Identity,
        /// Signal payload.
        signal: PeerSignal,
    },
}

/// Actions returned by the session for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Publish an event to this session's listeners.
    Emit(SessionEvent),

    /// Feed `TimerFired(id)` back after `delay`.
    Schedule {
        /// Timer handle.
        id: TimerId,
        /// Delay from now.
        delay: Duration,
    },

    /// Drop a previously scheduled timer.
    Cancel {
        /// Timer handle.
        id: TimerId,
    },

    /// Deliver a signal to another session.
    Notify {
        /// Receiving session.
        to: Identity,
        /// Signal payload.
        signal: PeerSignal,
    },
}
