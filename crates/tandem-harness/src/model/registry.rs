//! Reference room registry.
//!
//! Plain ordered map from code to occupants. No locking, no identities: the
//! obvious implementation of the join/create/leave rules.

use std::collections::BTreeMap;

use super::operation::ParticipantId;

/// Two parties per chat.
const CAPACITY: usize = 2;

/// Reference registry keyed by normalized room code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRegistry {
    rooms: BTreeMap<String, Vec<ParticipantId>>,
}

impl ModelRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last create wins: `owner` becomes the sole occupant.
    pub fn create(&mut self, code: &str, owner: ParticipantId) {
        self.rooms.insert(code.to_owned(), vec![owner]);
    }

    /// Append `member`, creating the room if needed. Never duplicates.
    ///
    /// Returns `false` if two others already hold the room.
    pub fn join(&mut self, code: &str, member: ParticipantId) -> bool {
        let occupants = self.rooms.entry(code.to_owned()).or_default();
        if occupants.contains(&member) {
            return true;
        }
        if occupants.len() >= CAPACITY {
            return false;
        }

        occupants.push(member);
        true
    }

    /// Remove `member`; drop the room once it is empty.
    pub fn leave(&mut self, code: &str, member: ParticipantId) {
        if let Some(occupants) = self.rooms.get_mut(code) {
            occupants.retain(|p| *p != member);
            if occupants.is_empty() {
                self.rooms.remove(code);
            }
        }
    }

    /// Every room with its occupants, sorted by code.
    pub fn rooms(&self) -> Vec<(String, Vec<ParticipantId>)> {
        self.rooms.iter().map(|(code, occupants)| (code.clone(), occupants.clone())).collect()
    }
}
