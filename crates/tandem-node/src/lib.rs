//! Tandem node runtime.
//!
//! This crate runs `tandem-core` sessions on tokio using:
//! - One actor task per participant
//! - Tokio timers for scheduled session continuations
//! - System time and OS entropy
//!
//! ## Architecture
//!
//! ```text
//! tandem-node
//!   ├─ SystemEnv      (production Environment impl)
//!   ├─ Relay          (shared room registry + peer inboxes)
//!   └─ SessionEngine  (actor handle: intents in, events out)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod engine;
mod error;
mod relay;
mod system_env;

use std::path::Path;

pub use engine::SessionEngine;
pub use error::EngineError;
pub use relay::Relay;
pub use system_env::SystemEnv;
use tandem_core::SessionConfig;

/// Load a `SessionConfig` from a JSON file.
///
/// Durations are integer milliseconds; missing fields keep their defaults.
///
/// # Errors
///
/// Returns error if:
/// - The file cannot be read
/// - The JSON does not describe a `SessionConfig`
/// - The resulting configuration fails validation
pub fn load_config(path: &Path) -> Result<SessionConfig, EngineError> {
    let raw = std::fs::read_to_string(path)?;
    let config: SessionConfig = serde_json::from_str(&raw)?;
    config.validate()?;

    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}
