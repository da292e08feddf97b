//! Simulated environment: seeded RNG and a manually advanced clock.
//!
//! Every clone shares the same RNG stream and the same clock, so a world of
//! sessions built from one `SimEnv` is reproducible from its seed alone.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tandem_core::Environment;

/// Deterministic environment for simulation.
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    epoch: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl SimEnv {
    /// Create an environment whose randomness is fully determined by `seed`.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))),
            epoch: Instant::now(),
            elapsed: Arc::default(),
        }
    }

    /// Virtual time since the environment was created.
    pub fn elapsed(&self) -> Duration {
        *lock(&self.elapsed)
    }

    /// Move the clock forward by `duration`.
    pub fn advance(&self, duration: Duration) {
        *lock(&self.elapsed) += duration;
    }

    /// Move the clock to `target` since creation. Never moves it backwards.
    pub fn advance_to(&self, target: Duration) {
        let mut elapsed = lock(&self.elapsed);
        if target > *elapsed {
            *elapsed = target;
        }
    }
}

impl Environment for SimEnv {
    fn now(&self) -> Instant {
        self.epoch + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        lock(&self.rng).fill_bytes(buffer);
    }
}

impl std::fmt::Debug for SimEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimEnv").field("elapsed", &self.elapsed()).finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
