//! The hash-chained blacklist audit log.

use edgecoder_crypto::{sha256_hex, KeyRing, Keypair};
use edgecoder_types::chain::{BlacklistEvidenceInput, BlacklistRecord, GENESIS_HASH};
use edgecoder_types::error::ChainError;
use edgecoder_types::time::now_ms;
use edgecoder_types::{AgentId, PeerId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

struct Inner {
    records: Vec<BlacklistRecord>,
    /// agentId → expiry (None = permanent).
    active: HashMap<AgentId, Option<u64>>,
}

/// The coordinator's blacklist: an append-only, coordinator-signed event
/// chain plus the derived active set.
pub struct BlacklistChain {
    coordinator_id: PeerId,
    keypair: Arc<Keypair>,
    inner: Mutex<Inner>,
}

impl BlacklistChain {
    pub fn new(coordinator_id: impl Into<PeerId>, keypair: Arc<Keypair>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            keypair,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                active: HashMap::new(),
            }),
        }
    }

    /// Append a locally-originated blacklist event.
    ///
    /// The reporter's evidence signature is verified against the reporter's
    /// published key and the outcome recorded on the event; absence of a
    /// signature records `false` rather than rejecting, so agent-observed
    /// evidence without a key still lands in the audit trail.
    pub fn add_event(
        &self,
        input: BlacklistEvidenceInput,
        keyring: &KeyRing,
    ) -> Result<BlacklistRecord, ChainError> {
        let evidence_signature_verified = match (&input.reporter_signature, input.signing_bytes()) {
            (Some(sig), Ok(bytes)) => keyring
                .verify(&input.reporter_id, &bytes, sig, now_ms())
                .is_ok(),
            _ => false,
        };

        let mut inner = self.inner.lock();
        let prev_event_hash = inner
            .records
            .last()
            .map(|r| r.event_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut record = BlacklistRecord {
            event_id: uuid::Uuid::new_v4().to_string(),
            agent_id: input.agent_id,
            reason: input.reason,
            reason_code: input.reason_code,
            evidence_hash_sha256: input.evidence_hash_sha256,
            reporter_id: input.reporter_id,
            reporter_signature: input.reporter_signature,
            evidence_signature_verified,
            source_coordinator_id: self.coordinator_id.clone(),
            timestamp_ms: now_ms(),
            expires_at_ms: input.expires_at_ms,
            prev_event_hash,
            event_hash: String::new(),
            coordinator_signature: String::new(),
        };
        let preimage = record
            .hash_preimage()
            .map_err(|_| ChainError::HashMismatch { sequence: inner.records.len() as u64 })?;
        record.event_hash = sha256_hex(&preimage);
        record.coordinator_signature = self.keypair.sign_base64(record.event_hash.as_bytes());

        info!(
            target: "defense",
            agent = %record.agent_id,
            reason_code = %record.reason_code,
            verified = evidence_signature_verified,
            "blacklist event appended"
        );
        inner
            .active
            .insert(record.agent_id.clone(), record.expires_at_ms);
        inner.records.push(record.clone());
        Ok(record)
    }

    /// Validate and chain a gossiped `blacklist_update` from a peer
    /// coordinator.
    ///
    /// Checks: recomputed hash matches `eventHash`, the source coordinator's
    /// signature verifies, and `prevEventHash` equals the local chain tail.
    pub fn ingest_remote(
        &self,
        record: BlacklistRecord,
        keyring: &KeyRing,
    ) -> Result<(), ChainError> {
        let preimage = record.hash_preimage().map_err(|_| ChainError::HashMismatch {
            sequence: 0,
        })?;
        if sha256_hex(&preimage) != record.event_hash {
            warn!(target: "defense", event = %record.event_id, "remote blacklist event hash mismatch");
            return Err(ChainError::HashMismatch { sequence: 0 });
        }
        if keyring
            .verify(
                &record.source_coordinator_id,
                record.event_hash.as_bytes(),
                &record.coordinator_signature,
                now_ms(),
            )
            .is_err()
        {
            return Err(ChainError::CoordinatorSignatureInvalid);
        }

        let mut inner = self.inner.lock();
        let tail = inner
            .records
            .last()
            .map(|r| r.event_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        if record.prev_event_hash != tail {
            return Err(ChainError::ChainBreak {
                sequence: inner.records.len() as u64,
            });
        }
        inner
            .active
            .insert(record.agent_id.clone(), record.expires_at_ms);
        inner.records.push(record);
        Ok(())
    }

    /// Whether `agent_id` is currently blacklisted (expiry-aware).
    pub fn is_blacklisted(&self, agent_id: &str, now_ms: u64) -> bool {
        match self.inner.lock().active.get(agent_id) {
            Some(Some(expires)) => now_ms < *expires,
            Some(None) => true,
            None => false,
        }
    }

    /// Ids of currently-blacklisted agents.
    pub fn active_agents(&self, now_ms: u64) -> Vec<AgentId> {
        let inner = self.inner.lock();
        let mut out: Vec<AgentId> = inner
            .active
            .iter()
            .filter(|(_, expiry)| match expiry {
                Some(e) => now_ms < *e,
                None => true,
            })
            .map(|(id, _)| id.clone())
            .collect();
        out.sort();
        out
    }

    /// The full audit chain, oldest first.
    pub fn audit(&self) -> Vec<BlacklistRecord> {
        self.inner.lock().records.clone()
    }

    pub fn head_hash(&self) -> String {
        self.inner
            .lock()
            .records
            .last()
            .map(|r| r.event_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    /// Recompute and verify every record's hash and coordinator signature.
    pub fn verify(&self, keyring: &KeyRing) -> Result<(), ChainError> {
        let records = self.audit();
        let mut prev = GENESIS_HASH.to_string();
        for (i, record) in records.iter().enumerate() {
            let sequence = i as u64;
            if record.prev_event_hash != prev {
                return Err(ChainError::ChainBreak { sequence });
            }
            let preimage = record
                .hash_preimage()
                .map_err(|_| ChainError::HashMismatch { sequence })?;
            if sha256_hex(&preimage) != record.event_hash {
                return Err(ChainError::HashMismatch { sequence });
            }
            keyring
                .verify(
                    &record.source_coordinator_id,
                    record.event_hash.as_bytes(),
                    &record.coordinator_signature,
                    now_ms(),
                )
                .map_err(|_| ChainError::CoordinatorSignatureInvalid)?;
            prev = record.event_hash.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (BlacklistChain, KeyRing, Arc<Keypair>) {
        let kp = Arc::new(Keypair::generate());
        let ring = KeyRing::default();
        ring.register_pem("coord-1", &kp.public_key().to_spki_pem().unwrap(), 0)
            .unwrap();
        (BlacklistChain::new("coord-1", kp.clone()), ring, kp)
    }

    fn evidence(agent: &str, reporter: &str) -> BlacklistEvidenceInput {
        BlacklistEvidenceInput {
            agent_id: agent.into(),
            reason: "forged results detected".into(),
            reason_code: "forged_results".into(),
            evidence_hash_sha256: sha256_hex(b"evidence blob"),
            reporter_id: reporter.into(),
            reporter_signature: None,
            expires_at_ms: None,
        }
    }

    #[test]
    fn events_chain_and_verify() {
        let (chain, ring, _) = setup();
        let a = chain.add_event(evidence("agent-1", "coord-1"), &ring).unwrap();
        let b = chain.add_event(evidence("agent-2", "coord-1"), &ring).unwrap();
        assert_eq!(a.prev_event_hash, GENESIS_HASH);
        assert_eq!(b.prev_event_hash, a.event_hash);
        chain.verify(&ring).unwrap();
        assert!(chain.is_blacklisted("agent-1", now_ms()));
        assert!(!chain.is_blacklisted("agent-9", now_ms()));
    }

    #[test]
    fn signed_evidence_marked_verified() {
        let (chain, ring, _) = setup();
        let reporter = Keypair::generate();
        ring.register_pem("reporter", &reporter.public_key().to_spki_pem().unwrap(), 0)
            .unwrap();
        let mut input = evidence("agent-1", "reporter");
        let bytes = input.signing_bytes().unwrap();
        input.reporter_signature = Some(reporter.sign_base64(&bytes));
        let record = chain.add_event(input, &ring).unwrap();
        assert!(record.evidence_signature_verified);
    }

    #[test]
    fn forged_reporter_signature_marked_unverified() {
        let (chain, ring, _) = setup();
        let reporter = Keypair::generate();
        ring.register_pem("reporter", &reporter.public_key().to_spki_pem().unwrap(), 0)
            .unwrap();
        let mut input = evidence("agent-1", "reporter");
        input.reporter_signature = Some(reporter.sign_base64(b"something else"));
        let record = chain.add_event(input, &ring).unwrap();
        assert!(!record.evidence_signature_verified);
    }

    #[test]
    fn remote_ingest_happy_path() {
        let (source, ring, _) = setup();
        let record = source.add_event(evidence("agent-1", "coord-1"), &ring).unwrap();

        let receiver_kp = Arc::new(Keypair::generate());
        let receiver = BlacklistChain::new("coord-2", receiver_kp);
        receiver.ingest_remote(record, &ring).unwrap();
        assert!(receiver.is_blacklisted("agent-1", now_ms()));
    }

    #[test]
    fn remote_ingest_rejects_tamper() {
        let (source, ring, _) = setup();
        let record = source.add_event(evidence("agent-1", "coord-1"), &ring).unwrap();

        let receiver = BlacklistChain::new("coord-2", Arc::new(Keypair::generate()));
        let mut tampered = record.clone();
        tampered.reason = "rewritten".into();
        assert_eq!(
            receiver.ingest_remote(tampered, &ring).unwrap_err(),
            ChainError::HashMismatch { sequence: 0 }
        );

        let mut resigned = record.clone();
        resigned.reason = "rewritten".into();
        let preimage = resigned.hash_preimage().unwrap();
        resigned.event_hash = sha256_hex(&preimage);
        assert_eq!(
            receiver.ingest_remote(resigned, &ring).unwrap_err(),
            ChainError::CoordinatorSignatureInvalid
        );
    }

    #[test]
    fn remote_ingest_rejects_chain_break() {
        let (source, ring, _) = setup();
        source.add_event(evidence("agent-1", "coord-1"), &ring).unwrap();
        let second = source.add_event(evidence("agent-2", "coord-1"), &ring).unwrap();

        // Receiver never saw the first event: the second cannot chain.
        let receiver = BlacklistChain::new("coord-2", Arc::new(Keypair::generate()));
        assert!(matches!(
            receiver.ingest_remote(second, &ring).unwrap_err(),
            ChainError::ChainBreak { .. }
        ));
    }

    #[test]
    fn expiry_lifts_blacklist() {
        let (chain, ring, _) = setup();
        let mut input = evidence("agent-1", "coord-1");
        let expires = now_ms() + 1_000;
        input.expires_at_ms = Some(expires);
        chain.add_event(input, &ring).unwrap();
        assert!(chain.is_blacklisted("agent-1", expires - 1));
        assert!(!chain.is_blacklisted("agent-1", expires));
        assert!(chain.active_agents(expires).is_empty());
    }
}
