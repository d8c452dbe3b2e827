//! Crypto error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key material could not be parsed or had the wrong shape.
    #[error("invalid key: {0}")]
    InvalidKey(String),
    /// A signature could not be parsed or did not verify.
    #[error("invalid signature")]
    InvalidSignature,
    /// The named peer has no key registered.
    #[error("no key registered for peer {0}")]
    UnknownPeer(String),
    /// A key file could not be read or written.
    #[error("key storage error: {0}")]
    Storage(String),
}
