//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples session logic from system resources
//! (time and randomness). This enables:
//!
//! - Deterministic Simulation: a virtual clock and seeded RNG make discovery
//!   outcomes, identities and room codes reproducible from a seed.
//!
//! - Production Runtime: the tokio-backed implementation uses real system
//!   resources without any code changes to the session logic.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Determinism: Given the same seed, `random_bytes()` produces the same
//!   sequence
//! - Isolation: Implementations must not share global state

use std::time::{Duration, Instant};

/// Abstract environment providing time, randomness, and async sleeping.
///
/// The session state machine only ever calls `now()` and the random methods.
/// `sleep()` is reserved for driver code that turns scheduled timers into
/// real waits.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: subsequent calls must return times >= previous calls.
    fn now(&self) -> Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not session logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Fills the provided buffer with random bytes.
    ///
    /// Production implementations use OS entropy. Simulation implementations
    /// use a seeded RNG so that a failing run can be replayed from its seed.
    fn random_bytes(&self, buffer: &mut [u8]);

    /// Generates a random `u64`.
    fn random_u64(&self) -> u64 {
        let mut bytes = [0u8; 8];
        self.random_bytes(&mut bytes);
        u64::from_be_bytes(bytes)
    }

    /// Generates a random `u128`.
    ///
    /// Used for identities and message IDs.
    fn random_u128(&self) -> u128 {
        let mut bytes = [0u8; 16];
        self.random_bytes(&mut bytes);
        u128::from_be_bytes(bytes)
    }

    /// Returns `true` with the given probability.
    ///
    /// Probabilities at or below 0.0 never succeed, at or above 1.0 always
    /// succeed.
    fn chance(&self, probability: f64) -> bool {
        if probability <= 0.0 {
            return false;
        }
        if probability >= 1.0 {
            return true;
        }

        // 53 random bits map exactly onto the f64 mantissa
        let sample = (self.random_u64() >> 11) as f64 / (1u64 << 53) as f64;
        sample < probability
    }

    /// Picks a duration uniformly from `[min, max]`.
    ///
    /// Returns `min` when the range is empty or inverted.
    fn random_duration(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }

        let span = u64::try_from((max - min).as_millis()).unwrap_or(u64::MAX);
        min + Duration::from_millis(self.random_u64() % span.saturating_add(1))
    }
}
