//! Hash-chained record types: ordering chain, blacklist chain, quorum ledger.

use crate::codec::{to_canonical_bytes, CodecError};
use crate::ids::{AgentId, PeerId, SubtaskId, TaskId};
use serde::{Deserialize, Serialize};

/// The prevHash of the first record in every chain.
pub const GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// One link in a coordinator's append-only ordering chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEventRecord {
    pub id: String,
    pub event_type: String,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    pub actor_id: PeerId,
    pub sequence: u64,
    pub issued_at_ms: u64,
    pub prev_hash: String,
    /// Lowercase hex SHA-256 over the canonical record without hash and
    /// signature.
    pub hash: String,
    /// Base64 Ed25519 signature over `hash` by `actor_id`.
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
}

impl QueueEventRecord {
    /// Canonical preimage for `hash`: the record with `hash` and `signature`
    /// zeroed out of the serialization.
    pub fn hash_preimage(&self) -> Result<Vec<u8>, CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Preimage<'a> {
            id: &'a str,
            event_type: &'a str,
            task_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            subtask_id: Option<&'a str>,
            actor_id: &'a str,
            sequence: u64,
            issued_at_ms: u64,
            prev_hash: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            coordinator_id: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            checkpoint_height: Option<u64>,
            #[serde(skip_serializing_if = "Option::is_none")]
            checkpoint_hash: Option<&'a str>,
            #[serde(skip_serializing_if = "Option::is_none")]
            payload_json: Option<&'a str>,
        }
        to_canonical_bytes(&Preimage {
            id: &self.id,
            event_type: &self.event_type,
            task_id: &self.task_id,
            subtask_id: self.subtask_id.as_deref(),
            actor_id: &self.actor_id,
            sequence: self.sequence,
            issued_at_ms: self.issued_at_ms,
            prev_hash: &self.prev_hash,
            coordinator_id: self.coordinator_id.as_deref(),
            checkpoint_height: self.checkpoint_height,
            checkpoint_hash: self.checkpoint_hash.as_deref(),
            payload_json: self.payload_json.as_deref(),
        })
    }
}

/// Reporter-signed evidence accompanying a blacklist event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistEvidenceInput {
    pub agent_id: AgentId,
    pub reason: String,
    pub reason_code: String,
    /// Lowercase hex SHA-256 of the raw evidence blob.
    pub evidence_hash_sha256: String,
    pub reporter_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl BlacklistEvidenceInput {
    /// Canonical bytes the reporter signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Unsigned<'a> {
            agent_id: &'a str,
            reason: &'a str,
            reason_code: &'a str,
            evidence_hash_sha256: &'a str,
            reporter_id: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            expires_at_ms: Option<u64>,
        }
        to_canonical_bytes(&Unsigned {
            agent_id: &self.agent_id,
            reason: &self.reason,
            reason_code: &self.reason_code,
            evidence_hash_sha256: &self.evidence_hash_sha256,
            reporter_id: &self.reporter_id,
            expires_at_ms: self.expires_at_ms,
        })
    }
}

/// One link in the blacklist audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlacklistRecord {
    pub event_id: String,
    pub agent_id: AgentId,
    pub reason: String,
    pub reason_code: String,
    pub evidence_hash_sha256: String,
    pub reporter_id: PeerId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reporter_signature: Option<String>,
    pub evidence_signature_verified: bool,
    pub source_coordinator_id: PeerId,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
    pub prev_event_hash: String,
    pub event_hash: String,
    /// Base64 Ed25519 signature over `event_hash` by the source coordinator.
    pub coordinator_signature: String,
}

impl BlacklistRecord {
    /// Canonical preimage for `event_hash`.
    pub fn hash_preimage(&self) -> Result<Vec<u8>, CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Preimage<'a> {
            event_id: &'a str,
            agent_id: &'a str,
            reason_code: &'a str,
            reason: &'a str,
            evidence_hash_sha256: &'a str,
            reporter_id: &'a str,
            source_coordinator_id: &'a str,
            timestamp_ms: u64,
            #[serde(skip_serializing_if = "Option::is_none")]
            expires_at_ms: Option<u64>,
            prev_event_hash: &'a str,
            evidence_signature_verified: bool,
        }
        to_canonical_bytes(&Preimage {
            event_id: &self.event_id,
            agent_id: &self.agent_id,
            reason_code: &self.reason_code,
            reason: &self.reason,
            evidence_hash_sha256: &self.evidence_hash_sha256,
            reporter_id: &self.reporter_id,
            source_coordinator_id: &self.source_coordinator_id,
            timestamp_ms: self.timestamp_ms,
            expires_at_ms: self.expires_at_ms,
            prev_event_hash: &self.prev_event_hash,
            evidence_signature_verified: self.evidence_signature_verified,
        })
    }
}

/// Phase of a quorum ledger record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuorumRecordType {
    Proposal,
    Vote,
    Commit,
    Checkpoint,
}

/// One link in the quorum ledger chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuorumLedgerRecord {
    pub record_id: String,
    pub record_type: QuorumRecordType,
    pub epoch_id: String,
    pub coordinator_id: PeerId,
    pub prev_hash: String,
    pub hash: String,
    pub payload_json: String,
    pub signature: String,
    pub created_at_ms: u64,
}

impl QuorumLedgerRecord {
    /// Canonical preimage for `hash`.
    pub fn hash_preimage(&self) -> Result<Vec<u8>, CodecError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Preimage<'a> {
            record_id: &'a str,
            record_type: QuorumRecordType,
            epoch_id: &'a str,
            coordinator_id: &'a str,
            prev_hash: &'a str,
            payload_json: &'a str,
            created_at_ms: u64,
        }
        to_canonical_bytes(&Preimage {
            record_id: &self.record_id,
            record_type: self.record_type,
            epoch_id: &self.epoch_id,
            coordinator_id: &self.coordinator_id,
            prev_hash: &self.prev_hash,
            payload_json: &self.payload_json,
            created_at_ms: self.created_at_ms,
        })
    }
}

/// Progression of a checkpoint anchor through the external provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorState {
    Pending,
    AnchoredPending,
    AnchoredConfirmed,
    Failed,
}

/// Finality level of a chain segment as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    SoftFinalized,
    AnchoredPending,
    AnchoredConfirmed,
    StaleFederation,
}
