//! Payload decryption hooks.
//!
//! Decryption runs once a payload is complete, after chunk reassembly.
//! Key management and ciphers are supplied by the application through
//! [`PayloadDecryptor`].

use bytes::Bytes;
use thiserror::Error;

use crate::transport::MessageMetadata;

/// Failure reported by a [`PayloadDecryptor`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("failed to decrypt payload: {reason}")]
pub struct CryptoError {
    /// Human readable cause.
    pub reason: String,
}

impl CryptoError {
    /// Build an error from any displayable cause.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Decrypts complete payloads flagged as encrypted.
pub trait PayloadDecryptor: Send + Sync {
    /// Return the plaintext of `payload`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError`] when the payload cannot be decrypted.
    fn decrypt(&self, payload: &Bytes, metadata: &MessageMetadata) -> Result<Bytes, CryptoError>;
}

/// What a session does with a payload it cannot decrypt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CryptoFailureAction {
    /// Drop the message and leave it unacknowledged.
    #[default]
    Fail,
    /// Drop the message and acknowledge it.
    Discard,
    /// Deliver the encrypted payload, flagged on the message.
    Consume,
}
