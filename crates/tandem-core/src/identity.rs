//! Participant identities and their temporary display labels.
//!
//! An [`Identity`] is an opaque token minted once per session. It is never
//! reused: a fresh engine draws a fresh 128-bit value from its environment.
//!
//! Labels are a pure function of the identity, so both sides of a private
//! room derive the same name for the same participant without exchanging it.

use std::fmt;

use crate::env::Environment;

const ADJECTIVES: [&str; 16] = [
    "Quiet", "Amber", "Swift", "Hidden", "Silver", "Lucky", "Misty", "Brave", "Calm", "Velvet",
    "Cosmic", "Gentle", "Hollow", "Wandering", "Crimson", "Frosty",
];

const NOUNS: [&str; 16] = [
    "Falcon", "Otter", "Comet", "Willow", "Lantern", "Fox", "Harbor", "Raven", "Meadow", "Ember",
    "Pebble", "Heron", "Cedar", "Nomad", "Badger", "Orbit",
];

/// Opaque unique token representing one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identity(u128);

impl Identity {
    /// Wrap a raw identity value.
    pub fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Draw a fresh identity from the environment RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self(env.random_u128())
    }

    /// Raw identity value.
    pub fn as_u128(self) -> u128 {
        self.0
    }

    /// Human-readable temporary name, e.g. `"Quiet Falcon 42"`.
    ///
    /// Deterministic in the identity, never reveals it.
    pub fn label(self) -> String {
        let bits = self.0 ^ (self.0 >> 64);
        let adjective = ADJECTIVES[(bits & 0xf) as usize];
        let noun = NOUNS[((bits >> 4) & 0xf) as usize];
        let number = ((bits >> 8) % 100) as u8;
        format!("{adjective} {noun} {number}")
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs
        write!(f, "{:08x}", (self.0 >> 96) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::testing::TestEnv;

    #[test]
    fn generated_identities_are_distinct() {
        let env = TestEnv::default();
        let a = Identity::generate(&env);
        let b = Identity::generate(&env);
        assert_ne!(a, b);
    }

    #[test]
    fn label_is_stable() {
        let id = Identity::new(0x1234_5678_9abc_def0_1234_5678_9abc_def0);
        assert_eq!(id.label(), id.label());
    }

    #[test]
    fn label_has_three_words() {
        let id = Identity::new(0xdead_beef);
        let label = id.label();
        let words: Vec<_> = label.split(' ').collect();
        assert_eq!(words.len(), 3);
        assert!(words[2].parse::<u8>().is_ok_and(|n| n < 100));
    }

    #[test]
    fn display_is_short_hex() {
        let id = Identity::new(0xabcd_ef01_u128 << 96);
        assert_eq!(id.to_string(), "abcdef01");
    }
}
