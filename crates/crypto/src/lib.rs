//! Cryptographic identity for the EdgeCoder coordinator.
//!
//! Ed25519 keypairs with PEM (SPKI / PKCS#8) material, a peer key ring with
//! rotation grace windows, SHA-256 helpers, and key-file persistence.

pub mod error;
pub mod hash;
pub mod key_file;
pub mod keyring;
pub mod keys;

pub use error::CryptoError;
pub use hash::{sha256_bytes, sha256_hex};
pub use keyring::KeyRing;
pub use keys::{Keypair, PublicKey};
