//! Production Environment implementation using system time and RNG.
//!
//! `SystemEnv` backs every engine started by the binary: identities, message
//! IDs, room codes and discovery draws come from OS entropy, and timers wait
//! on the tokio clock.

use std::time::{Duration, Instant};

use tandem_core::Environment;

/// Production environment using system time and cryptographic RNG.
///
/// This implementation:
/// - Uses `std::time::Instant::now()` for time
/// - Uses `tokio::time::sleep()` for async sleeping, so a paused tokio clock
///   also pauses engine timers
/// - Uses `getrandom` for randomness
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).unwrap_or_else(|e| {
            // Zeroed identities still pair correctly, they just stop being unique
            tracing::error!("getrandom failed: {}", e);
            buffer.fill(0);
        });
    }
}
