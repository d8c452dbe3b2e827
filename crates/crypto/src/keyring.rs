//! Peer key ring with rotation grace windows.
//!
//! Each peer exclusively owns one active key. On rotation the previous key
//! keeps verifying until its grace deadline so that messages signed just
//! before the rotation still land.

use crate::error::CryptoError;
use crate::keys::PublicKey;
use edgecoder_types::PeerId;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Default rotation grace window: 10 minutes.
pub const DEFAULT_GRACE_MS: u64 = 10 * 60 * 1000;

struct KeyEntry {
    active: PublicKey,
    previous: Option<(PublicKey, u64)>,
}

/// Thread-safe map of peer id to active (and grace-window) verification keys.
pub struct KeyRing {
    entries: RwLock<HashMap<PeerId, KeyEntry>>,
    grace_ms: u64,
}

impl KeyRing {
    pub fn new(grace_ms: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            grace_ms,
        }
    }

    /// Register or rotate a peer's key from its SPKI PEM.
    ///
    /// Re-registering the same key is a no-op; a different key demotes the
    /// current one into the grace window.
    pub fn register_pem(
        &self,
        peer_id: &str,
        public_key_pem: &str,
        now_ms: u64,
    ) -> Result<(), CryptoError> {
        let key = PublicKey::from_spki_pem(public_key_pem)?;
        let mut entries = self.entries.write();
        match entries.get_mut(peer_id) {
            Some(entry) if entry.active == key => {}
            Some(entry) => {
                debug!(target: "crypto", peer = peer_id, "rotating peer key");
                let old = std::mem::replace(&mut entry.active, key);
                entry.previous = Some((old, now_ms.saturating_add(self.grace_ms)));
            }
            None => {
                entries.insert(
                    peer_id.to_string(),
                    KeyEntry {
                        active: key,
                        previous: None,
                    },
                );
            }
        }
        Ok(())
    }

    /// Whether the ring knows a key for `peer_id`.
    pub fn contains(&self, peer_id: &str) -> bool {
        self.entries.read().contains_key(peer_id)
    }

    /// Verify a base64 signature under the peer's active key, falling back to
    /// the previous key while its grace window is open.
    pub fn verify(
        &self,
        peer_id: &str,
        message: &[u8],
        signature_b64: &str,
        now_ms: u64,
    ) -> Result<(), CryptoError> {
        let entries = self.entries.read();
        let entry = entries
            .get(peer_id)
            .ok_or_else(|| CryptoError::UnknownPeer(peer_id.to_string()))?;
        if entry.active.verify_base64(message, signature_b64).is_ok() {
            return Ok(());
        }
        if let Some((previous, grace_until)) = &entry.previous {
            if now_ms <= *grace_until && previous.verify_base64(message, signature_b64).is_ok() {
                return Ok(());
            }
        }
        Err(CryptoError::InvalidSignature)
    }
}

impl Default for KeyRing {
    fn default() -> Self {
        Self::new(DEFAULT_GRACE_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keypair;

    #[test]
    fn verify_under_registered_key() {
        let ring = KeyRing::default();
        let kp = Keypair::generate();
        let pem = kp.public_key().to_spki_pem().unwrap();
        ring.register_pem("p1", &pem, 0).unwrap();

        let sig = kp.sign_base64(b"hello");
        ring.verify("p1", b"hello", &sig, 0).unwrap();
        assert!(ring.verify("p2", b"hello", &sig, 0).is_err());
    }

    #[test]
    fn rotation_keeps_previous_key_inside_grace() {
        let ring = KeyRing::new(1_000);
        let old = Keypair::generate();
        let new = Keypair::generate();
        ring.register_pem("p1", &old.public_key().to_spki_pem().unwrap(), 0)
            .unwrap();
        ring.register_pem("p1", &new.public_key().to_spki_pem().unwrap(), 100)
            .unwrap();

        let old_sig = old.sign_base64(b"m");
        let new_sig = new.sign_base64(b"m");

        // Inside the grace window both keys verify.
        ring.verify("p1", b"m", &new_sig, 500).unwrap();
        ring.verify("p1", b"m", &old_sig, 1_100).unwrap();
        // Past the grace deadline only the active key verifies.
        assert!(ring.verify("p1", b"m", &old_sig, 1_101).is_err());
        ring.verify("p1", b"m", &new_sig, 1_101).unwrap();
    }

    #[test]
    fn reregistering_same_key_does_not_open_grace() {
        let ring = KeyRing::new(1_000);
        let kp = Keypair::generate();
        let pem = kp.public_key().to_spki_pem().unwrap();
        ring.register_pem("p1", &pem, 0).unwrap();
        ring.register_pem("p1", &pem, 50).unwrap();
        let sig = kp.sign_base64(b"m");
        ring.verify("p1", b"m", &sig, 2_000).unwrap();
    }
}
