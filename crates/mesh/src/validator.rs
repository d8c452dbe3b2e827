//! Inbound gossip validation: dedup, expiry, signature.

use edgecoder_crypto::KeyRing;
use edgecoder_types::error::GossipError;
use edgecoder_types::peer::MeshMessage;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};

/// Bound on the dedup window. Oldest ids fall out first.
pub const DEDUP_CAPACITY: usize = 5_000;

/// Outcome of validating an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First sighting; process the payload.
    Accepted,
    /// Our own broadcast echoed back. Silently ignored.
    OwnMessage,
}

struct DedupWindow {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

/// Validates inbound mesh messages against the §4.1 invariants.
pub struct MessageValidator {
    own_peer_id: String,
    window: Mutex<DedupWindow>,
    capacity: usize,
}

impl MessageValidator {
    pub fn new(own_peer_id: impl Into<String>) -> Self {
        Self::with_capacity(own_peer_id, DEDUP_CAPACITY)
    }

    pub fn with_capacity(own_peer_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            own_peer_id: own_peer_id.into(),
            window: Mutex::new(DedupWindow {
                order: VecDeque::with_capacity(capacity),
                seen: HashSet::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Validate `msg` against the sender's keys.
    ///
    /// Checks, in order: own-message short circuit, dedup window, expiry,
    /// envelope signature. The id is only recorded once every check passes,
    /// so a rejected message can be retried after its defect is fixed.
    pub fn validate(
        &self,
        msg: &MeshMessage,
        keyring: &KeyRing,
        now_ms: u64,
    ) -> Result<Admission, GossipError> {
        if msg.from_peer_id == self.own_peer_id {
            return Ok(Admission::OwnMessage);
        }
        if self.window.lock().seen.contains(&msg.id) {
            return Err(GossipError::DuplicateMessage);
        }
        if msg.is_expired(now_ms) {
            return Err(GossipError::MessageExpired);
        }
        let bytes = msg
            .signing_bytes()
            .map_err(|_| GossipError::InvalidSignature)?;
        if !keyring.contains(&msg.from_peer_id) {
            return Err(GossipError::UnknownSender);
        }
        keyring
            .verify(&msg.from_peer_id, &bytes, &msg.signature, now_ms)
            .map_err(|_| GossipError::InvalidSignature)?;

        let mut window = self.window.lock();
        if !window.seen.insert(msg.id.clone()) {
            // Lost a race with a concurrent duplicate.
            return Err(GossipError::DuplicateMessage);
        }
        window.order.push_back(msg.id.clone());
        if window.order.len() > self.capacity {
            if let Some(evicted) = window.order.pop_front() {
                window.seen.remove(&evicted);
            }
        }
        Ok(Admission::Accepted)
    }
}
