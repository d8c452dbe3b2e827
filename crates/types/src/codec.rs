//! The canonical, deterministic encoding for all signed or hashed data.
//!
//! Wire payloads are JSON, so the canonical form is RFC 8785 (JCS): object
//! keys sorted, no insignificant whitespace. By centralizing the codec here in
//! the base `types` crate we guarantee that every component hashes and signs
//! the exact same bytes for the same value; any deviation invalidates
//! signatures across the mesh.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A canonical encode or decode failure.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("canonical encode failed: {0}")]
    Encode(String),
    #[error("canonical decode failed: {0}")]
    Decode(String),
}

/// Encodes a value into its canonical JCS byte representation.
///
/// Use this for every value that is signed, hashed, or compared across
/// coordinators.
pub fn to_canonical_bytes<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    serde_jcs::to_vec(v).map_err(|e| CodecError::Encode(e.to_string()))
}

/// Decodes a value from JSON bytes, failing fast on malformed input.
pub fn from_json_bytes<T: DeserializeOwned>(b: &[u8]) -> Result<T, CodecError> {
    serde_json::from_slice(b).map_err(|e| CodecError::Decode(e.to_string()))
}
