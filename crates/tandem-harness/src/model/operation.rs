//! Operations for model-based testing.
//!
//! Operations represent every intent a participant can issue plus the passage
//! of time. They are generated randomly by proptest (or decoded from fuzz
//! input via `Arbitrary`) and applied to both the model and the simulated
//! world.

use arbitrary::Arbitrary;
use tandem_core::SessionInput;

/// Participant identifier (0-indexed).
pub type ParticipantId = u8;

/// Room identifier (uses u8 to keep the code space small enough to collide).
pub type ModelRoomId = u8;

/// Operations that can be applied to the system.
#[derive(Debug, Clone, Arbitrary)]
pub enum Operation {
    /// Participant starts a random chat.
    Bootstrap {
        /// Participant performing the operation.
        participant: ParticipantId,
    },

    /// Participant runs one partner discovery.
    FindPartner {
        /// Participant performing the operation.
        participant: ParticipantId,
    },

    /// Participant retries discovery manually.
    RetryConnection {
        /// Participant performing the operation.
        participant: ParticipantId,
    },

    /// Participant creates a room.
    CreateRoom {
        /// Participant performing the operation.
        participant: ParticipantId,
        /// Room to create.
        room: ModelRoomId,
    },

    /// Participant joins a room.
    JoinRoom {
        /// Participant performing the operation.
        participant: ParticipantId,
        /// Room to join.
        room: ModelRoomId,
    },

    /// Participant sends a message to whoever is bound.
    SendMessage {
        /// Participant performing the operation.
        participant: ParticipantId,
        /// Message content (kept small for efficiency).
        content: SmallMessage,
    },

    /// Participant signals typing.
    SendTyping {
        /// Participant performing the operation.
        participant: ParticipantId,
        /// Typing flag.
        typing: bool,
    },

    /// Participant disconnects.
    Disconnect {
        /// Participant performing the operation.
        participant: ParticipantId,
    },

    /// Advance simulation time.
    AdvanceTime {
        /// Milliseconds to advance.
        millis: u16,
    },
}

impl Operation {
    /// Participant targeted by this operation, if any.
    pub fn participant(&self) -> Option<ParticipantId> {
        match self {
            Self::Bootstrap { participant }
            | Self::FindPartner { participant }
            | Self::RetryConnection { participant }
            | Self::CreateRoom { participant, .. }
            | Self::JoinRoom { participant, .. }
            | Self::SendMessage { participant, .. }
            | Self::SendTyping { participant, .. }
            | Self::Disconnect { participant } => Some(*participant),
            Self::AdvanceTime { .. } => None,
        }
    }

    /// Same operation with the participant wrapped into `0..count`.
    #[must_use]
    pub fn clamped(self, count: usize) -> Self {
        let count = u8::try_from(count.clamp(1, usize::from(u8::MAX))).unwrap_or(u8::MAX);
        let wrap = |p: ParticipantId| p % count;

        match self {
            Self::Bootstrap { participant } => Self::Bootstrap { participant: wrap(participant) },
            Self::FindPartner { participant } => Self::FindPartner { participant: wrap(participant) },
            Self::RetryConnection { participant } => {
                Self::RetryConnection { participant: wrap(participant) }
            },
            Self::CreateRoom { participant, room } => {
                Self::CreateRoom { participant: wrap(participant), room }
            },
            Self::JoinRoom { participant, room } => {
                Self::JoinRoom { participant: wrap(participant), room }
            },
            Self::SendMessage { participant, content } => {
                Self::SendMessage { participant: wrap(participant), content }
            },
            Self::SendTyping { participant, typing } => {
                Self::SendTyping { participant: wrap(participant), typing }
            },
            Self::Disconnect { participant } => Self::Disconnect { participant: wrap(participant) },
            other @ Self::AdvanceTime { .. } => other,
        }
    }

    /// Session input for this operation. `None` for `AdvanceTime`.
    pub fn to_input(&self) -> Option<SessionInput> {
        let input = match self {
            Self::Bootstrap { .. } => SessionInput::Bootstrap,
            Self::FindPartner { .. } => SessionInput::FindPartner,
            Self::RetryConnection { .. } => SessionInput::RetryConnection,
            Self::CreateRoom { room, .. } => SessionInput::CreateRoom { code: Some(room_code(*room)) },
            Self::JoinRoom { room, .. } => SessionInput::JoinRoom { code: room_code(*room) },
            Self::SendMessage { content, .. } => {
                SessionInput::SendMessage { content: content.to_text() }
            },
            Self::SendTyping { typing, .. } => SessionInput::SendTyping(*typing),
            Self::Disconnect { .. } => SessionInput::Disconnect,
            Self::AdvanceTime { .. } => return None,
        };

        Some(input)
    }
}

/// Room code for a model room, already in normalized form.
pub fn room_code(room: ModelRoomId) -> String {
    format!("R{room:02X}")
}

/// Small message content for testing.
///
/// The content is deterministic from the seed.
#[derive(Debug, Clone, Arbitrary)]
pub struct SmallMessage {
    /// Message seed.
    pub seed: u8,
    /// Message length hint (0-3 maps to empty/short/medium/long).
    pub size_class: u8,
}

impl SmallMessage {
    /// Expand to message text.
    pub fn to_text(&self) -> String {
        let len = match self.size_class % 4 {
            0 => 0,
            1 => 8,
            2 => 64,
            _ => 256,
        };

        // Printable ASCII, plus the odd multi-byte char to exercise the transform
        (0..len)
            .map(|i: u32| match (u32::from(self.seed) + i) % 97 {
                96 => 'é',
                n => char::from(b' ' + u8::try_from(n % 95).unwrap_or(0)),
            })
            .collect()
    }
}
