//! Ed25519 keypair and public key wrappers.
//!
//! Key material crosses the wire as PEM: SPKI for public keys, PKCS#8 for
//! private keys. Signatures cross the wire as base64 of the raw 64 bytes.

use crate::error::CryptoError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use pkcs8::spki::{DecodePublicKey, EncodePublicKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand::rngs::OsRng;

/// An Ed25519 signing keypair owned by this process.
#[derive(Clone)]
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load from a PKCS#8 PEM string.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, CryptoError> {
        SigningKey::from_pkcs8_pem(pem)
            .map(|signing| Self { signing })
            .map_err(|e| CryptoError::InvalidKey(format!("failed to parse PKCS#8 PEM: {e}")))
    }

    /// Export as a PKCS#8 PEM string.
    pub fn to_pkcs8_pem(&self) -> Result<zeroize::Zeroizing<String>, CryptoError> {
        self.signing
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Storage(format!("failed to encode PKCS#8 PEM: {e}")))
    }

    /// Sign `message`, returning base64 of the raw signature bytes.
    pub fn sign_base64(&self, message: &[u8]) -> String {
        BASE64.encode(self.signing.sign(message).to_bytes())
    }

    /// The public half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying: self.signing.verifying_key(),
        }
    }
}

/// An Ed25519 public key belonging to some peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying: VerifyingKey,
}

impl PublicKey {
    /// Parse from an SPKI PEM string.
    pub fn from_spki_pem(pem: &str) -> Result<Self, CryptoError> {
        VerifyingKey::from_public_key_pem(pem)
            .map(|verifying| Self { verifying })
            .map_err(|e| CryptoError::InvalidKey(format!("failed to parse SPKI PEM: {e}")))
    }

    /// Export as an SPKI PEM string.
    pub fn to_spki_pem(&self) -> Result<String, CryptoError> {
        self.verifying
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| CryptoError::Storage(format!("failed to encode SPKI PEM: {e}")))
    }

    /// Verify a base64 signature over `message`.
    ///
    /// The error carries no detail about which step failed.
    pub fn verify_base64(&self, message: &[u8], signature_b64: &str) -> Result<(), CryptoError> {
        let raw = BASE64
            .decode(signature_b64)
            .map_err(|_| CryptoError::InvalidSignature)?;
        let sig = Signature::from_slice(&raw).map_err(|_| CryptoError::InvalidSignature)?;
        self.verifying
            .verify(message, &sig)
            .map_err(|_| CryptoError::InvalidSignature)
    }
}
