//! Payload transform applied to message content in transit.
//!
//! The session treats the transform as an opaque, reversible function pair:
//! `encode` when building an outbound delivery, `decode` when presenting an
//! inbound message to listeners. Implementations must satisfy
//! `decode(encode(x)) == x` for every input.

use thiserror::Error;

/// Errors from decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// Ciphertext is not valid for this transform.
    #[error("malformed payload: {reason}")]
    Malformed {
        /// Description of the decoding failure.
        reason: String,
    },
}

/// Reversible encode/decode pair for message content.
pub trait PayloadTransform: Send + Sync {
    /// Encode plain text for transit.
    fn encode(&self, plain: &str) -> String;

    /// Decode transit text back to plain text.
    ///
    /// # Errors
    ///
    /// Returns `TransformError::Malformed` if `cipher` was not produced by
    /// `encode`.
    fn decode(&self, cipher: &str) -> Result<String, TransformError>;
}

/// Hex transform: content travels as the hex encoding of its UTF-8 bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HexTransform;

impl PayloadTransform for HexTransform {
    fn encode(&self, plain: &str) -> String {
        hex::encode(plain.as_bytes())
    }

    fn decode(&self, cipher: &str) -> Result<String, TransformError> {
        let bytes =
            hex::decode(cipher).map_err(|e| TransformError::Malformed { reason: e.to_string() })?;
        String::from_utf8(bytes).map_err(|e| TransformError::Malformed { reason: e.to_string() })
    }
}

/// Identity transform, content travels unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl PayloadTransform for Plaintext {
    fn encode(&self, plain: &str) -> String {
        plain.to_owned()
    }

    fn decode(&self, cipher: &str) -> Result<String, TransformError> {
        Ok(cipher.to_owned())
    }
}
