//! Room codes and the shared room registry.
//!
//! ## Responsibilities
//!
//! - Code normalization: Trim and upper-case caller input, reject empty codes
//! - Code generation: Short base-36 codes suitable for reading aloud
//! - Registry: Map each live room code to its occupants in join order
//!
//! ## Design
//!
//! - Explicitly owned: The registry is a cloneable handle injected into every
//!   session, never a global
//! - Atomic rendezvous: Check-occupant-then-append happens under one lock, so
//!   two simultaneous joiners cannot both believe they are first
//! - No empty rooms: An entry is removed the instant its last occupant leaves

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{env::Environment, identity::Identity};

/// Alphabet for generated codes (base-36, upper case).
const CODE_ALPHABET: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Length of generated room codes.
pub const GENERATED_CODE_LEN: usize = 6;

/// Occupants a room holds at most: one chat, two parties.
pub const ROOM_CAPACITY: usize = 2;

/// Errors from room code parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    /// Code is empty after trimming.
    #[error("room code must not be empty")]
    Empty,
}

/// Case-normalized private room code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode(String);

impl RoomCode {
    /// Normalize and validate a caller-supplied code.
    ///
    /// # Errors
    ///
    /// Returns `RoomCodeError::Empty` if nothing but whitespace was supplied.
    pub fn parse(raw: &str) -> Result<Self, RoomCodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomCodeError::Empty);
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// Generate a fresh code from the environment RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut bytes = [0u8; GENERATED_CODE_LEN];
        env.random_bytes(&mut bytes);

        let code = bytes
            .iter()
            .map(|b| CODE_ALPHABET[*b as usize % CODE_ALPHABET.len()] as char)
            .collect();

        Self(code)
    }

    /// The normalized code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of an atomic join against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Code was unseen; the joiner is now the sole occupant.
    Created,

    /// Another occupant was present; the joiner was appended after them.
    Paired {
        /// Earliest-joined occupant other than the joiner.
        partner: Identity,
    },

    /// The joiner was already the only occupant.
    AlreadyPresent,

    /// Two other participants already hold the room; nothing changed.
    Full,
}

/// Shared mapping from room code to occupants (insertion order = join order).
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct RoomRegistry {
    rooms: Arc<Mutex<HashMap<RoomCode, Vec<Identity>>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    // Critical sections are single map operations, so a poisoned map is
    // still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<RoomCode, Vec<Identity>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `code` with `owner` as sole occupant.
    ///
    /// Overwrites any prior entry for the code (last create wins).
    pub fn create(&self, code: &RoomCode, owner: Identity) {
        let previous = self.lock().insert(code.clone(), vec![owner]);
        if let Some(stale) = previous {
            tracing::debug!(room = %code, stale = stale.len(), "room recreated over existing entry");
        }
    }

    /// Atomically inspect and join `code`.
    ///
    /// Unknown codes are created on demand. The joiner is appended only if
    /// not already present, so occupants never contain duplicates, and never
    /// beyond [`ROOM_CAPACITY`].
    pub fn join(&self, code: &RoomCode, joiner: Identity) -> JoinOutcome {
        let mut rooms = self.lock();
        let Some(occupants) = rooms.get_mut(code) else {
            rooms.insert(code.clone(), vec![joiner]);
            return JoinOutcome::Created;
        };

        if !occupants.contains(&joiner) {
            if occupants.len() >= ROOM_CAPACITY {
                return JoinOutcome::Full;
            }
            occupants.push(joiner);
        }

        let partner = occupants.iter().copied().find(|id| *id != joiner);

        match partner {
            Some(partner) => JoinOutcome::Paired { partner },
            None => JoinOutcome::AlreadyPresent,
        }
    }

    /// Remove `member` from `code`.
    ///
    /// Returns `true` if the room entry was deleted because it became empty.
    pub fn leave(&self, code: &RoomCode, member: Identity) -> bool {
        let mut rooms = self.lock();
        let Some(occupants) = rooms.get_mut(code) else {
            return false;
        };

        occupants.retain(|id| *id != member);
        if occupants.is_empty() {
            rooms.remove(code);
            return true;
        }

        false
    }

    /// Earliest-joined occupant of `code` other than `member`.
    pub fn partner_of(&self, code: &RoomCode, member: Identity) -> Option<Identity> {
        self.lock().get(code).and_then(|occupants| occupants.iter().copied().find(|id| *id != member))
    }

    /// Occupants of `code` in join order. Empty if the room does not exist.
    pub fn occupants(&self, code: &RoomCode) -> Vec<Identity> {
        self.lock().get(code).cloned().unwrap_or_default()
    }

    /// Check if a room exists.
    pub fn has_room(&self, code: &RoomCode) -> bool {
        self.lock().contains_key(code)
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.lock().len()
    }

    /// Snapshot of every live room, sorted by code.
    pub fn snapshot(&self) -> Vec<(RoomCode, Vec<Identity>)> {
        let mut rooms: Vec<_> =
            self.lock().iter().map(|(code, ids)| (code.clone(), ids.clone())).collect();
        rooms.sort_by(|a, b| a.0.cmp(&b.0));
        rooms
    }
}

impl fmt::Debug for RoomRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoomRegistry").field("room_count", &self.room_count()).finish()
    }
}
