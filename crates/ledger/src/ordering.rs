//! The per-coordinator ordering chain of queue events.
//!
//! Appends are serialized; readers get copy-on-read snapshots. Verification
//! failures are never auto-repaired: the chain suspends for operator action.

use edgecoder_crypto::{sha256_hex, KeyRing, Keypair};
use edgecoder_types::chain::{QueueEventRecord, GENESIS_HASH};
use edgecoder_types::error::ChainError;
use edgecoder_types::time::now_ms;
use edgecoder_types::{ErrorCode, PeerId, SubtaskId, TaskId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::error;

/// The caller-supplied part of an ordering event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEventInput {
    pub event_type: String,
    pub task_id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtask_id: Option<SubtaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<PeerId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_height: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
}

/// Result of a chain verification pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakpoint: Option<u64>,
}

impl VerifyOutcome {
    fn ok() -> Self {
        Self {
            ok: true,
            reason: None,
            breakpoint: None,
        }
    }

    fn failed(err: &ChainError, breakpoint: u64) -> Self {
        Self {
            ok: false,
            reason: Some(err.code().to_string()),
            breakpoint: Some(breakpoint),
        }
    }
}

struct Inner {
    records: Vec<QueueEventRecord>,
    suspended: bool,
}

/// A single append-only hash chain of [`QueueEventRecord`]s.
pub struct OrderingChain {
    actor_id: PeerId,
    keypair: Arc<Keypair>,
    inner: Mutex<Inner>,
}

impl OrderingChain {
    pub fn new(actor_id: impl Into<PeerId>, keypair: Arc<Keypair>) -> Self {
        Self {
            actor_id: actor_id.into(),
            keypair,
            inner: Mutex::new(Inner {
                records: Vec::new(),
                suspended: false,
            }),
        }
    }

    /// Append a new event, chaining it onto the current tail.
    pub fn append(&self, input: QueueEventInput) -> Result<QueueEventRecord, ChainError> {
        let mut inner = self.inner.lock();
        if inner.suspended {
            return Err(ChainError::Suspended);
        }
        let (sequence, prev_hash) = match inner.records.last() {
            Some(tail) => (tail.sequence + 1, tail.hash.clone()),
            None => (0, GENESIS_HASH.to_string()),
        };
        let mut record = QueueEventRecord {
            id: uuid::Uuid::new_v4().to_string(),
            event_type: input.event_type,
            task_id: input.task_id,
            subtask_id: input.subtask_id,
            actor_id: self.actor_id.clone(),
            sequence,
            issued_at_ms: now_ms(),
            prev_hash,
            hash: String::new(),
            signature: String::new(),
            coordinator_id: input.coordinator_id,
            checkpoint_height: input.checkpoint_height,
            checkpoint_hash: input.checkpoint_hash,
            payload_json: input.payload_json,
        };
        let preimage = record
            .hash_preimage()
            .map_err(|_| ChainError::HashMismatch { sequence })?;
        record.hash = sha256_hex(&preimage);
        record.signature = self.keypair.sign_base64(record.hash.as_bytes());
        inner.records.push(record.clone());
        Ok(record)
    }

    /// Copy-on-read snapshot of the whole chain.
    pub fn snapshot(&self) -> Vec<QueueEventRecord> {
        self.inner.lock().records.clone()
    }

    pub fn head(&self) -> Option<QueueEventRecord> {
        self.inner.lock().records.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().records.is_empty()
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.lock().suspended
    }

    /// Verify an arbitrary chain segment from genesis.
    ///
    /// Classifies the first defect as `sequence_gap | hash_mismatch |
    /// chain_break | invalid_signature` with the offending sequence.
    pub fn verify_records(
        records: &[QueueEventRecord],
        keyring: &KeyRing,
        now_ms: u64,
    ) -> VerifyOutcome {
        let mut prev_hash = GENESIS_HASH.to_string();
        let mut expected_sequence = match records.first() {
            Some(first) => first.sequence,
            None => return VerifyOutcome::ok(),
        };
        for record in records {
            let sequence = record.sequence;
            if sequence != expected_sequence {
                return VerifyOutcome::failed(
                    &ChainError::SequenceGap {
                        sequence,
                        expected: expected_sequence,
                    },
                    sequence,
                );
            }
            if record.prev_hash != prev_hash {
                return VerifyOutcome::failed(&ChainError::ChainBreak { sequence }, sequence);
            }
            let recomputed = match record.hash_preimage() {
                Ok(preimage) => sha256_hex(&preimage),
                Err(_) => return VerifyOutcome::failed(&ChainError::HashMismatch { sequence }, sequence),
            };
            if recomputed != record.hash {
                return VerifyOutcome::failed(&ChainError::HashMismatch { sequence }, sequence);
            }
            if keyring
                .verify(&record.actor_id, record.hash.as_bytes(), &record.signature, now_ms)
                .is_err()
            {
                return VerifyOutcome::failed(&ChainError::InvalidSignature { sequence }, sequence);
            }
            prev_hash = record.hash.clone();
            expected_sequence = sequence + 1;
        }
        VerifyOutcome::ok()
    }

    /// Verify the local chain; a failure suspends it (no auto-repair).
    pub fn verify_local(&self, keyring: &KeyRing) -> VerifyOutcome {
        let records = self.snapshot();
        let outcome = Self::verify_records(&records, keyring, now_ms());
        if !outcome.ok {
            error!(
                target: "ledger",
                reason = outcome.reason.as_deref().unwrap_or("unknown"),
                breakpoint = outcome.breakpoint,
                "CRITICAL: ordering chain verification failed, suspending chain"
            );
            self.inner.lock().suspended = true;
        }
        outcome
    }
}
