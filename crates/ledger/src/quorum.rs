//! The quorum ledger: proposal → vote → commit → checkpoint.
//!
//! Each transition appends a signed, hash-chained [`QuorumLedgerRecord`] to
//! the local ledger. Remote votes arrive as signed payloads; a vote that
//! fails signature verification is never tallied. A commit requires
//! `⌊approved/2⌋ + 1` approve votes over the approved coordinator set.

use edgecoder_crypto::{sha256_hex, KeyRing, Keypair};
use edgecoder_types::chain::{QuorumLedgerRecord, QuorumRecordType, GENESIS_HASH};
use edgecoder_types::codec::to_canonical_bytes;
use edgecoder_types::error::ChainError;
use edgecoder_types::time::now_ms;
use edgecoder_types::PeerId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A coordinator's signed vote on an epoch proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotePayload {
    pub epoch_id: String,
    pub voter: PeerId,
    pub approve: bool,
    /// Base64 Ed25519 signature by `voter` over the canonical vote minus
    /// this field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl VotePayload {
    pub fn signing_bytes(&self) -> Result<Vec<u8>, edgecoder_types::codec::CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Unsigned<'a> {
            epoch_id: &'a str,
            voter: &'a str,
            approve: bool,
        }
        to_canonical_bytes(&Unsigned {
            epoch_id: &self.epoch_id,
            voter: &self.voter,
            approve: self.approve,
        })
    }

    /// Build and sign a vote.
    pub fn signed(epoch_id: &str, voter: &str, approve: bool, keypair: &Keypair) -> Self {
        let mut vote = Self {
            epoch_id: epoch_id.to_string(),
            voter: voter.to_string(),
            approve,
            signature: None,
        };
        if let Ok(bytes) = vote.signing_bytes() {
            vote.signature = Some(keypair.sign_base64(&bytes));
        }
        vote
    }
}

/// Where an epoch stands in the quorum pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumStatus {
    Proposed,
    Committed,
    Checkpointed,
}

#[derive(Default)]
struct EpochState {
    status: Option<QuorumStatus>,
    approvals: HashSet<PeerId>,
    rejections: HashSet<PeerId>,
}

struct Inner {
    records: Vec<QuorumLedgerRecord>,
    epochs: HashMap<String, EpochState>,
}

/// The local quorum ledger chain.
pub struct QuorumLedger {
    coordinator_id: PeerId,
    keypair: Arc<Keypair>,
    inner: Mutex<Inner>,
}

impl QuorumLedger {
    pub fn new(coordinator_id: impl Into<PeerId>, keypair: Arc<Keypair>) -> Self {
        Self {
            coordinator_id: coordinator_id.into(),
            keypair,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                epochs: HashMap::new(),
            }),
        }
    }

    fn append_record(
        &self,
        inner: &mut Inner,
        record_type: QuorumRecordType,
        epoch_id: &str,
        payload_json: String,
    ) -> QuorumLedgerRecord {
        let prev_hash = inner
            .records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let mut record = QuorumLedgerRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            record_type,
            epoch_id: epoch_id.to_string(),
            coordinator_id: self.coordinator_id.clone(),
            prev_hash,
            hash: String::new(),
            payload_json,
            signature: String::new(),
            created_at_ms: now_ms(),
        };
        if let Ok(preimage) = record.hash_preimage() {
            record.hash = sha256_hex(&preimage);
        }
        record.signature = self.keypair.sign_base64(record.hash.as_bytes());
        inner.records.push(record.clone());
        record
    }

    /// Open an epoch with a proposal record.
    pub fn propose(&self, epoch_id: &str, payload_json: String) -> Result<QuorumLedgerRecord, ChainError> {
        let mut inner = self.inner.lock();
        let state = inner.epochs.entry(epoch_id.to_string()).or_default();
        if state.status.is_some() {
            return Err(ChainError::ChainHeadMismatch);
        }
        state.status = Some(QuorumStatus::Proposed);
        info!(target: "ledger", epoch = epoch_id, "epoch proposed");
        Ok(self.append_record(&mut inner, QuorumRecordType::Proposal, epoch_id, payload_json))
    }

    /// Record a vote (local or gossiped). The vote signature must verify
    /// under the voter's key; tampered votes are rejected before tallying.
    pub fn record_vote(
        &self,
        vote: &VotePayload,
        keyring: &KeyRing,
    ) -> Result<QuorumLedgerRecord, ChainError> {
        let bytes = vote
            .signing_bytes()
            .map_err(|_| ChainError::CoordinatorSignatureInvalid)?;
        let signature = vote
            .signature
            .as_deref()
            .ok_or(ChainError::CoordinatorSignatureInvalid)?;
        if keyring.verify(&vote.voter, &bytes, signature, now_ms()).is_err() {
            warn!(target: "ledger", voter = %vote.voter, epoch = %vote.epoch_id, "vote signature rejected");
            return Err(ChainError::CoordinatorSignatureInvalid);
        }

        let mut inner = self.inner.lock();
        let state = inner.epochs.entry(vote.epoch_id.to_string()).or_default();
        if state.status != Some(QuorumStatus::Proposed) {
            return Err(ChainError::ChainHeadMismatch);
        }
        if vote.approve {
            state.approvals.insert(vote.voter.clone());
            state.rejections.remove(&vote.voter);
        } else {
            state.rejections.insert(vote.voter.clone());
            state.approvals.remove(&vote.voter);
        }
        let payload = serde_json::to_string(vote).unwrap_or_default();
        let epoch_id = vote.epoch_id.clone();
        Ok(self.append_record(&mut inner, QuorumRecordType::Vote, &epoch_id, payload))
    }

    /// Approve votes collected so far for an epoch.
    pub fn approvals(&self, epoch_id: &str) -> usize {
        self.inner
            .lock()
            .epochs
            .get(epoch_id)
            .map(|s| s.approvals.len())
            .unwrap_or(0)
    }

    /// Whether the epoch has `⌊approved/2⌋ + 1` approvals from the approved
    /// coordinator set.
    pub fn has_quorum(&self, epoch_id: &str, approved_coordinators: &[PeerId]) -> bool {
        let inner = self.inner.lock();
        let Some(state) = inner.epochs.get(epoch_id) else {
            return false;
        };
        let counted = state
            .approvals
            .iter()
            .filter(|v| approved_coordinators.contains(v))
            .count();
        counted >= approved_coordinators.len() / 2 + 1
    }

    /// Commit a proposed epoch once quorum is reached.
    pub fn commit(
        &self,
        epoch_id: &str,
        approved_coordinators: &[PeerId],
    ) -> Result<QuorumLedgerRecord, ChainError> {
        if !self.has_quorum(epoch_id, approved_coordinators) {
            return Err(ChainError::ChainHeadMismatch);
        }
        let mut inner = self.inner.lock();
        let state = inner
            .epochs
            .get_mut(epoch_id)
            .ok_or(ChainError::ChainHeadMismatch)?;
        if state.status != Some(QuorumStatus::Proposed) {
            return Err(ChainError::ChainHeadMismatch);
        }
        state.status = Some(QuorumStatus::Committed);
        let approvals = state.approvals.len();
        let payload = serde_json::json!({ "approvals": approvals }).to_string();
        info!(target: "ledger", epoch = epoch_id, approvals, "epoch committed");
        Ok(self.append_record(&mut inner, QuorumRecordType::Commit, epoch_id, payload))
    }

    /// Seal a committed epoch with a checkpoint record binding the chain
    /// head. Returns the record; its hash is what gets anchored externally.
    pub fn checkpoint(
        &self,
        epoch_id: &str,
        checkpoint_height: u64,
    ) -> Result<QuorumLedgerRecord, ChainError> {
        let mut inner = self.inner.lock();
        let state = inner
            .epochs
            .get_mut(epoch_id)
            .ok_or(ChainError::ChainHeadMismatch)?;
        if state.status != Some(QuorumStatus::Committed) {
            return Err(ChainError::ChainHeadMismatch);
        }
        state.status = Some(QuorumStatus::Checkpointed);
        let head_hash = inner
            .records
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let payload = serde_json::json!({
            "checkpointHeight": checkpoint_height,
            "headHash": head_hash,
        })
        .to_string();
        info!(target: "ledger", epoch = epoch_id, height = checkpoint_height, "epoch checkpointed");
        Ok(self.append_record(&mut inner, QuorumRecordType::Checkpoint, epoch_id, payload))
    }

    pub fn status(&self, epoch_id: &str) -> Option<QuorumStatus> {
        self.inner.lock().epochs.get(epoch_id).and_then(|s| s.status)
    }

    pub fn snapshot(&self) -> Vec<QuorumLedgerRecord> {
        self.inner.lock().records.clone()
    }

    /// Verify the local quorum chain from genesis.
    pub fn verify(&self, keyring: &KeyRing) -> Result<(), ChainError> {
        let records = self.snapshot();
        let mut prev_hash = GENESIS_HASH.to_string();
        for (i, record) in records.iter().enumerate() {
            let sequence = i as u64;
            if record.prev_hash != prev_hash {
                return Err(ChainError::ChainBreak { sequence });
            }
            let preimage = record
                .hash_preimage()
                .map_err(|_| ChainError::HashMismatch { sequence })?;
            if sha256_hex(&preimage) != record.hash {
                return Err(ChainError::HashMismatch { sequence });
            }
            keyring
                .verify(
                    &record.coordinator_id,
                    record.hash.as_bytes(),
                    &record.signature,
                    now_ms(),
                )
                .map_err(|_| ChainError::InvalidSignature { sequence })?;
            prev_hash = record.hash.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Net {
        ledger: QuorumLedger,
        ring: KeyRing,
        coordinators: Vec<(String, Arc<Keypair>)>,
    }

    fn net(n: usize) -> Net {
        let ring = KeyRing::default();
        let coordinators: Vec<(String, Arc<Keypair>)> = (0..n)
            .map(|i| (format!("coord-{i}"), Arc::new(Keypair::generate())))
            .collect();
        for (id, kp) in &coordinators {
            ring.register_pem(id, &kp.public_key().to_spki_pem().unwrap(), 0)
                .unwrap();
        }
        let ledger = QuorumLedger::new("coord-0", coordinators[0].1.clone());
        Net {
            ledger,
            ring,
            coordinators,
        }
    }

    fn ids(net: &Net) -> Vec<String> {
        net.coordinators.iter().map(|(id, _)| id.clone()).collect()
    }

    #[test]
    fn majority_commit_flow() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();

        // 3 coordinators: quorum is 2.
        for (id, kp) in net.coordinators.iter().take(1) {
            let vote = VotePayload::signed("epoch-1", id, true, kp);
            net.ledger.record_vote(&vote, &net.ring).unwrap();
        }
        assert!(!net.ledger.has_quorum("epoch-1", &ids(&net)));
        assert!(net.ledger.commit("epoch-1", &ids(&net)).is_err());

        let (id, kp) = &net.coordinators[1];
        let vote = VotePayload::signed("epoch-1", id, true, kp);
        net.ledger.record_vote(&vote, &net.ring).unwrap();
        assert!(net.ledger.has_quorum("epoch-1", &ids(&net)));

        net.ledger.commit("epoch-1", &ids(&net)).unwrap();
        let checkpoint = net.ledger.checkpoint("epoch-1", 42).unwrap();
        assert_eq!(checkpoint.record_type, QuorumRecordType::Checkpoint);
        assert_eq!(net.ledger.status("epoch-1"), Some(QuorumStatus::Checkpointed));

        // The whole chain verifies and stays linked.
        net.ledger.verify(&net.ring).unwrap();
        let records = net.ledger.snapshot();
        for pair in records.windows(2) {
            assert_eq!(pair[1].prev_hash, pair[0].hash);
        }
    }

    #[test]
    fn tampered_vote_rejected() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();

        let (id, kp) = &net.coordinators[1];
        let mut vote = VotePayload::signed("epoch-1", id, false, kp);
        // Flip the vote after signing.
        vote.approve = true;
        assert_eq!(
            net.ledger.record_vote(&vote, &net.ring).unwrap_err(),
            ChainError::CoordinatorSignatureInvalid
        );
        assert_eq!(net.ledger.approvals("epoch-1"), 0);
    }

    #[test]
    fn unknown_voter_rejected() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();
        let rogue = Keypair::generate();
        let vote = VotePayload::signed("epoch-1", "rogue", true, &rogue);
        assert!(net.ledger.record_vote(&vote, &net.ring).is_err());
    }

    #[test]
    fn votes_outside_approved_set_not_counted() {
        let net = net(5);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();
        for (id, kp) in net.coordinators.iter().skip(3) {
            let vote = VotePayload::signed("epoch-1", id, true, kp);
            net.ledger.record_vote(&vote, &net.ring).unwrap();
        }
        // Two approvals, but from coordinators outside the approved set.
        let approved: Vec<String> = ids(&net).into_iter().take(3).collect();
        assert!(!net.ledger.has_quorum("epoch-1", &approved));
    }

    #[test]
    fn revote_replaces_prior_vote() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();
        let (id, kp) = &net.coordinators[1];
        net.ledger
            .record_vote(&VotePayload::signed("epoch-1", id, true, kp), &net.ring)
            .unwrap();
        net.ledger
            .record_vote(&VotePayload::signed("epoch-1", id, false, kp), &net.ring)
            .unwrap();
        assert_eq!(net.ledger.approvals("epoch-1"), 0);
    }

    #[test]
    fn checkpoint_requires_commit() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();
        assert!(net.ledger.checkpoint("epoch-1", 1).is_err());
    }

    #[test]
    fn double_propose_rejected() {
        let net = net(3);
        net.ledger.propose("epoch-1", "{}".into()).unwrap();
        assert!(net.ledger.propose("epoch-1", "{}".into()).is_err());
    }
}
