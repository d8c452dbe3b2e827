//! External checkpoint anchoring over a pluggable provider.
//!
//! The coordinator embeds a 32-byte checkpoint hash in an `OP_RETURN`
//! transaction through an [`AnchorProvider`] and tracks only `txRef`,
//! `blockHeight` and `confirmations`. Confirmation is defined by the
//! provider.

use async_trait::async_trait;
use edgecoder_types::chain::{AnchorState, Finality};
use edgecoder_types::error::ProviderError;
use edgecoder_types::time::now_ms;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A broadcast anchor transaction reference.
#[derive(Debug, Clone)]
pub struct AnchorTx {
    pub txid: String,
}

/// Confirmation state reported by the provider.
#[derive(Debug, Clone, Default)]
pub struct AnchorConfirmation {
    pub confirmed: bool,
    pub confirmations: u32,
    pub block_height: Option<u64>,
}

/// The pluggable external timestamping boundary.
#[async_trait]
pub trait AnchorProvider: Send + Sync {
    async fn broadcast_op_return(&self, data_hex: &str) -> Result<AnchorTx, ProviderError>;
    async fn get_confirmations(&self, txid: &str) -> Result<AnchorConfirmation, ProviderError>;
    async fn health_check(&self) -> Result<(), ProviderError>;
}

/// One checkpoint's anchoring progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorRecord {
    pub checkpoint_hash: String,
    pub state: AnchorState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    pub confirmations: u32,
    pub submitted_at_ms: u64,
}

/// Drives checkpoint hashes through
/// `pending → anchored_pending → anchored_confirmed | failed`.
pub struct AnchorManager {
    provider: Arc<dyn AnchorProvider>,
    confirmation_threshold: u32,
    anchors: Mutex<HashMap<String, AnchorRecord>>,
}

impl AnchorManager {
    pub fn new(provider: Arc<dyn AnchorProvider>, confirmation_threshold: u32) -> Self {
        Self {
            provider,
            confirmation_threshold,
            anchors: Mutex::new(HashMap::new()),
        }
    }

    /// Submit a checkpoint hash (64 hex chars) for anchoring.
    pub async fn submit(&self, checkpoint_hash: &str) -> Result<AnchorRecord, ProviderError> {
        if checkpoint_hash.len() != 64 || !checkpoint_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ProviderError::AnchorBroadcastFailed(
                "checkpoint hash must be 32 bytes of hex".into(),
            ));
        }
        let mut record = AnchorRecord {
            checkpoint_hash: checkpoint_hash.to_string(),
            state: AnchorState::Pending,
            tx_ref: None,
            block_height: None,
            confirmations: 0,
            submitted_at_ms: now_ms(),
        };
        match self.provider.broadcast_op_return(checkpoint_hash).await {
            Ok(tx) => {
                record.state = AnchorState::AnchoredPending;
                record.tx_ref = Some(tx.txid);
                info!(target: "ledger", checkpoint = checkpoint_hash, tx = ?record.tx_ref, "anchor broadcast");
                self.anchors
                    .lock()
                    .insert(checkpoint_hash.to_string(), record.clone());
                Ok(record)
            }
            Err(e) => {
                record.state = AnchorState::Failed;
                warn!(target: "ledger", checkpoint = checkpoint_hash, error = %e, "anchor broadcast failed");
                self.anchors
                    .lock()
                    .insert(checkpoint_hash.to_string(), record);
                Err(ProviderError::AnchorBroadcastFailed(e.to_string()))
            }
        }
    }

    /// Refresh confirmation counts for every pending anchor.
    pub async fn refresh(&self) {
        let pending: Vec<(String, String)> = self
            .anchors
            .lock()
            .values()
            .filter(|r| r.state == AnchorState::AnchoredPending)
            .filter_map(|r| r.tx_ref.clone().map(|tx| (r.checkpoint_hash.clone(), tx)))
            .collect();

        for (checkpoint, txid) in pending {
            match self.provider.get_confirmations(&txid).await {
                Ok(conf) => {
                    let mut anchors = self.anchors.lock();
                    if let Some(record) = anchors.get_mut(&checkpoint) {
                        record.confirmations = conf.confirmations;
                        record.block_height = conf.block_height;
                        if conf.confirmed && conf.confirmations >= self.confirmation_threshold {
                            record.state = AnchorState::AnchoredConfirmed;
                            info!(target: "ledger", checkpoint = %checkpoint, "anchor confirmed");
                        }
                    }
                }
                Err(e) => {
                    warn!(target: "ledger", %txid, error = %e, "confirmation refresh failed");
                }
            }
        }
    }

    pub fn get(&self, checkpoint_hash: &str) -> Option<AnchorRecord> {
        self.anchors.lock().get(checkpoint_hash).cloned()
    }

    pub fn all(&self) -> Vec<AnchorRecord> {
        self.anchors.lock().values().cloned().collect()
    }

    /// Finality of a checkpoint as consumers should treat it. Non-critical
    /// paths accept `soft_finalized`; accounting-sensitive paths require
    /// `anchored_confirmed`.
    pub fn finality(&self, checkpoint_hash: &str) -> Finality {
        match self.get(checkpoint_hash).map(|r| r.state) {
            Some(AnchorState::AnchoredConfirmed) => Finality::AnchoredConfirmed,
            Some(AnchorState::AnchoredPending) => Finality::AnchoredPending,
            Some(AnchorState::Pending) | Some(AnchorState::Failed) | None => {
                Finality::SoftFinalized
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct MockAnchor {
        confirmations: PlMutex<HashMap<String, u32>>,
        fail_broadcast: bool,
    }

    impl MockAnchor {
        fn confirm(&self, txid: &str, n: u32) {
            self.confirmations.lock().insert(txid.to_string(), n);
        }
    }

    #[async_trait]
    impl AnchorProvider for MockAnchor {
        async fn broadcast_op_return(&self, data_hex: &str) -> Result<AnchorTx, ProviderError> {
            if self.fail_broadcast {
                return Err(ProviderError::Unavailable("rpc down".into()));
            }
            Ok(AnchorTx {
                txid: format!("tx-{data_hex}"),
            })
        }

        async fn get_confirmations(&self, txid: &str) -> Result<AnchorConfirmation, ProviderError> {
            let n = self.confirmations.lock().get(txid).copied().unwrap_or(0);
            Ok(AnchorConfirmation {
                confirmed: n > 0,
                confirmations: n,
                block_height: (n > 0).then_some(850_000),
            })
        }

        async fn health_check(&self) -> Result<(), ProviderError> {
            Ok(())
        }
    }

    const HASH: &str = "abababababababababababababababababababababababababababababababab";

    #[tokio::test]
    async fn anchor_lifecycle() {
        let provider = Arc::new(MockAnchor::default());
        let manager = AnchorManager::new(provider.clone(), 3);

        let record = manager.submit(HASH).await.unwrap();
        assert_eq!(record.state, AnchorState::AnchoredPending);
        assert_eq!(manager.finality(HASH), Finality::AnchoredPending);

        // Below threshold stays pending.
        provider.confirm(&format!("tx-{HASH}"), 2);
        manager.refresh().await;
        assert_eq!(manager.get(HASH).unwrap().state, AnchorState::AnchoredPending);

        provider.confirm(&format!("tx-{HASH}"), 3);
        manager.refresh().await;
        let confirmed = manager.get(HASH).unwrap();
        assert_eq!(confirmed.state, AnchorState::AnchoredConfirmed);
        assert_eq!(confirmed.block_height, Some(850_000));
        assert_eq!(manager.finality(HASH), Finality::AnchoredConfirmed);
    }

    #[tokio::test]
    async fn failed_broadcast_recorded() {
        let provider = Arc::new(MockAnchor {
            fail_broadcast: true,
            ..MockAnchor::default()
        });
        let manager = AnchorManager::new(provider, 3);
        assert!(manager.submit(HASH).await.is_err());
        assert_eq!(manager.get(HASH).unwrap().state, AnchorState::Failed);
        assert_eq!(manager.finality(HASH), Finality::SoftFinalized);
    }

    #[tokio::test]
    async fn malformed_hash_rejected() {
        let manager = AnchorManager::new(Arc::new(MockAnchor::default()), 3);
        assert!(manager.submit("not-hex").await.is_err());
        assert!(manager.submit("abcd").await.is_err());
    }
}
