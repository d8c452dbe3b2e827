//! The shared handler context: every coordinator component, by `Arc`.

use edgecoder_crypto::{KeyRing, Keypair};
use edgecoder_defense::{AutoBlacklister, BehaviorTracker, BlacklistChain, RulesConfig};
use edgecoder_economy::{CreditEngine, IssuanceEngine, PaymentManager};
use edgecoder_ledger::{AnchorManager, OrderingChain, QuorumLedger};
use edgecoder_mesh::{
    Broadcaster, CapabilityRegistry, MessageValidator, PeerTable, ReconnectRegistry,
};
use edgecoder_scheduler::{AgentRegistry, DirectWorkBook, FairShareQueue, SlidingWindowLimiter};
use edgecoder_trust::{ReleaseVerifier, SignedRequestVerifier};
use edgecoder_types::peer::PeerIdentity;
use std::sync::Arc;

/// Everything the HTTP handlers need. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub identity: PeerIdentity,
    pub keypair: Arc<Keypair>,
    pub keyring: Arc<KeyRing>,

    pub peers: Arc<PeerTable>,
    pub validator: Arc<MessageValidator>,
    pub broadcaster: Arc<Broadcaster>,
    pub capabilities: Arc<CapabilityRegistry>,
    pub reconnect: Arc<ReconnectRegistry>,

    pub queue: Arc<FairShareQueue>,
    pub agents: Arc<AgentRegistry>,
    pub direct_work: Arc<DirectWorkBook>,
    pub submission_limiter: Arc<SlidingWindowLimiter>,

    pub credits: Arc<CreditEngine>,
    pub payments: Arc<PaymentManager>,
    pub issuance: Arc<IssuanceEngine>,

    pub ordering: Arc<OrderingChain>,
    pub quorum: Arc<QuorumLedger>,
    pub anchors: Arc<AnchorManager>,

    pub blacklist: Arc<BlacklistChain>,
    pub tracker: Arc<BehaviorTracker>,
    pub striker: Arc<AutoBlacklister>,
    pub rules: RulesConfig,

    pub signed_requests: Arc<SignedRequestVerifier>,
    pub release: Arc<ReleaseVerifier>,

    pub mesh_token: Option<String>,
    pub started_at_ms: u64,
}
