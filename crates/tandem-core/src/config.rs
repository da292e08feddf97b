//! Session timing and discovery configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Success probability outside `[0, 1]` (or NaN).
    #[error("discovery success probability must be within [0, 1], got {0}")]
    InvalidProbability(f64),

    /// Discovery must be allowed at least one attempt.
    #[error("max_retries must be at least 1")]
    ZeroRetries,

    /// Message delay bounds are inverted.
    #[error("message delay range is inverted: {min:?} > {max:?}")]
    InvertedDelayRange {
        /// Lower bound.
        min: Duration,
        /// Upper bound.
        max: Duration,
    },
}

/// Session configuration.
///
/// Durations serialize as integer milliseconds. Missing fields take their
/// default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Delay from bootstrap to the "secure channel" notification.
    #[serde(with = "millis")]
    pub secure_channel_delay: Duration,

    /// Delay from the first notification to the "searching" notification and
    /// the start of discovery.
    #[serde(with = "millis")]
    pub search_delay: Duration,

    /// Time a discovery attempt takes before its outcome is drawn.
    #[serde(with = "millis")]
    pub discovery_delay: Duration,

    /// Probability that a discovery attempt finds a partner.
    pub discovery_success_probability: f64,

    /// Automatic discovery attempts before giving up.
    pub max_retries: u32,

    /// Backoff between automatic discovery attempts.
    #[serde(with = "millis")]
    pub retry_backoff: Duration,

    /// Delay before a join inspects the room registry.
    #[serde(with = "millis")]
    pub join_delay: Duration,

    /// Delay between pairing in a room and announcing the partner.
    #[serde(with = "millis")]
    pub rendezvous_delay: Duration,

    /// Lower bound of the randomized message delivery delay.
    #[serde(with = "millis")]
    pub message_delay_min: Duration,

    /// Upper bound of the randomized message delivery delay.
    #[serde(with = "millis")]
    pub message_delay_max: Duration,

    /// Idle time after which a typing indicator clears.
    #[serde(with = "millis")]
    pub typing_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            secure_channel_delay: Duration::from_millis(1500),
            search_delay: Duration::from_millis(2000),
            discovery_delay: Duration::from_millis(3000),
            discovery_success_probability: 0.7,
            max_retries: 3,
            retry_backoff: Duration::from_millis(2000),
            join_delay: Duration::from_millis(1000),
            rendezvous_delay: Duration::from_millis(1500),
            message_delay_min: Duration::from_millis(500),
            message_delay_max: Duration::from_millis(1500),
            typing_timeout: Duration::from_millis(3000),
        }
    }
}

impl SessionConfig {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = self.discovery_success_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::InvalidProbability(p));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }

        if self.message_delay_min > self.message_delay_max {
            return Err(ConfigError::InvertedDelayRange {
                min: self.message_delay_min,
                max: self.message_delay_max,
            });
        }

        Ok(())
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(SessionConfig::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_out_of_range_probability() {
        let config = SessionConfig { discovery_success_probability: 1.5, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidProbability(1.5)));

        let config =
            SessionConfig { discovery_success_probability: f64::NAN, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidProbability(_))));
    }

    #[test]
    fn rejects_zero_retries() {
        let config = SessionConfig { max_retries: 0, ..Default::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetries));
    }

    #[test]
    fn rejects_inverted_delay_range() {
        let config = SessionConfig {
            message_delay_min: Duration::from_secs(2),
            message_delay_max: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvertedDelayRange { .. })));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"max_retries": 5, "typing_timeout": 250}"#).unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.typing_timeout, Duration::from_millis(250));
        assert_eq!(config.join_delay, SessionConfig::default().join_delay);
    }

    #[test]
    fn durations_serialize_as_millis() {
        let json = serde_json::to_value(SessionConfig::default()).unwrap();
        assert_eq!(json["discovery_delay"], 3000);
        assert_eq!(json["discovery_success_probability"], 0.7);
    }
}
