//! Model world - the reference for room membership.
//!
//! Tracks what the room registry and each participant's current room must be
//! after any operation sequence. Only the operations that touch rooms are
//! modelled; discovery, messages and typing never change membership, so the
//! model ignores them.

use std::time::Duration;

use super::{
    operation::{ParticipantId, Operation, room_code},
    registry::ModelRegistry,
};

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Rooms and occupants in join order, sorted by code.
    pub rooms: Vec<(String, Vec<ParticipantId>)>,
    /// Current room of each participant.
    pub current_rooms: Vec<Option<String>>,
}

/// A join waiting for its delay to elapse.
#[derive(Debug, Clone)]
struct PendingJoin {
    due: Duration,
    participant: ParticipantId,
    code: String,
}

/// Model world - the reference implementation.
#[derive(Debug, Clone)]
pub struct ModelWorld {
    registry: ModelRegistry,
    current_rooms: Vec<Option<String>>,
    /// In scheduling order; equal delays keep that order when firing.
    pending: Vec<PendingJoin>,
    join_delay: Duration,
    now: Duration,
}

impl ModelWorld {
    /// Create a model with `participants` idle participants.
    pub fn new(participants: usize, join_delay: Duration) -> Self {
        Self {
            registry: ModelRegistry::new(),
            current_rooms: vec![None; participants],
            pending: Vec::new(),
            join_delay,
            now: Duration::ZERO,
        }
    }

    /// Number of participants.
    pub fn participants(&self) -> usize {
        self.current_rooms.len()
    }

    /// The reference registry.
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Apply an operation.
    pub fn apply(&mut self, op: &Operation) {
        match op {
            Operation::CreateRoom { participant, room } => {
                let code = room_code(*room);
                self.switch_room(*participant, &code);
                self.registry.create(&code, *participant);
                self.current_rooms[usize::from(*participant)] = Some(code);
            },
            Operation::JoinRoom { participant, room } => {
                let code = room_code(*room);
                self.switch_room(*participant, &code);
                self.current_rooms[usize::from(*participant)] = Some(code.clone());
                self.pending.push(PendingJoin {
                    due: self.now + self.join_delay,
                    participant: *participant,
                    code,
                });
            },
            Operation::Disconnect { participant } => {
                self.leave(*participant);
                self.pending.retain(|j| j.participant != *participant);
            },
            Operation::AdvanceTime { millis } => {
                self.advance(Duration::from_millis(u64::from(*millis)));
            },
            Operation::Bootstrap { .. }
            | Operation::FindPartner { .. }
            | Operation::RetryConnection { .. }
            | Operation::SendMessage { .. }
            | Operation::SendTyping { .. } => {},
        }
    }

    /// Move time forward, completing due joins in order.
    pub fn advance(&mut self, duration: Duration) {
        self.now += duration;

        let (due, rest): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|j| j.due <= self.now);
        self.pending = rest;

        for join in due {
            let current = &mut self.current_rooms[usize::from(join.participant)];

            // A join only lands if the participant is still headed there
            let still_headed = current.as_deref() == Some(join.code.as_str());
            if still_headed && !self.registry.join(&join.code, join.participant) {
                *current = None;
            }
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        ObservableState { rooms: self.registry.rooms(), current_rooms: self.current_rooms.clone() }
    }

    fn switch_room(&mut self, participant: ParticipantId, code: &str) {
        let current = self.current_rooms[usize::from(participant)].as_deref();
        if current.is_some_and(|c| c != code) {
            self.leave(participant);
        }
    }

    fn leave(&mut self, participant: ParticipantId) {
        if let Some(code) = self.current_rooms[usize::from(participant)].take() {
            self.registry.leave(&code, participant);
        }
    }
}
