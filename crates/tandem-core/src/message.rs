//! Chat messages relayed between partners.

use std::{fmt, time::Instant};

use crate::{
    env::Environment,
    identity::Identity,
    transform::{PayloadTransform, TransformError},
};

/// Opaque unique message token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId(u128);

impl MessageId {
    /// Draw a fresh message ID from the environment RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        Self(env.random_u128())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// A chat message.
///
/// Immutable once constructed. Decoding produces a new message rather than
/// rewriting this one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique message ID.
    pub id: MessageId,
    /// Content, encoded while `encrypted` is set.
    pub content: String,
    /// Identity of the author.
    pub sender: Identity,
    /// When the sender created the message.
    pub timestamp: Instant,
    /// Whether `content` is still in transit encoding.
    pub encrypted: bool,
}

impl Message {
    /// Build an outbound message, encoding `plain` with `transform`.
    pub fn outbound<E: Environment>(
        env: &E,
        sender: Identity,
        plain: &str,
        transform: &dyn PayloadTransform,
    ) -> Self {
        Self {
            id: MessageId::generate(env),
            content: transform.encode(plain),
            sender,
            timestamp: env.now(),
            encrypted: true,
        }
    }

    /// Same message attributed to a different author.
    pub fn with_sender(&self, sender: Identity) -> Self {
        Self { sender, ..self.clone() }
    }

    /// Decoded copy of this message with `encrypted` cleared.
    ///
    /// A message that is not encrypted is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `TransformError` if the content cannot be decoded.
    pub fn decoded(&self, transform: &dyn PayloadTransform) -> Result<Self, TransformError> {
        if !self.encrypted {
            return Ok(self.clone());
        }

        Ok(Self { content: transform.decode(&self.content)?, encrypted: false, ..self.clone() })
    }
}
