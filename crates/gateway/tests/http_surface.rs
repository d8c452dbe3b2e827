//! Router-level tests over the coordinator API using in-process requests.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use edgecoder_crypto::{sha256_hex, KeyRing, Keypair};
use edgecoder_defense::{AutoBlacklister, BehaviorTracker, BlacklistChain, RulesConfig};
use edgecoder_economy::{
    CreditEngine, InvoiceHandle, InvoiceRequest, IssuanceEngine, IssuanceParams,
    LightningProvider, PaymentManager, Settlement,
};
use edgecoder_gateway::limiter::IpLimiter;
use edgecoder_gateway::{router, AppState};
use edgecoder_ledger::{
    AnchorConfirmation, AnchorManager, AnchorProvider, AnchorTx, OrderingChain, QuorumLedger,
};
use edgecoder_mesh::{
    BackoffPolicy, Broadcaster, CapabilityRegistry, MessageValidator, PeerTable,
    ReconnectRegistry,
};
use edgecoder_scheduler::{AgentRegistry, DirectWorkBook, FairShareQueue, SlidingWindowLimiter};
use edgecoder_trust::{ReleaseVerifier, SignedRequestVerifier};
use edgecoder_types::error::ProviderError;
use edgecoder_types::peer::{NetworkMode, PeerIdentity, PeerRole};
use edgecoder_types::task::{ProjectMeta, ResourceClass, Subtask, SubtaskKind};
use edgecoder_types::time::now_ms;
use std::sync::Arc;
use tower::util::ServiceExt;

struct NullLightning;

#[async_trait]
impl LightningProvider for NullLightning {
    async fn create_invoice(&self, request: InvoiceRequest) -> Result<InvoiceHandle, ProviderError> {
        Ok(InvoiceHandle {
            invoice_ref: "lnbc-test".into(),
            payment_hash: "hash".into(),
            expires_at_ms: now_ms() + request.expires_in_seconds * 1000,
        })
    }

    async fn check_settlement(&self, _invoice_ref: &str) -> Result<Settlement, ProviderError> {
        Ok(Settlement::default())
    }
}

struct NullAnchor;

#[async_trait]
impl AnchorProvider for NullAnchor {
    async fn broadcast_op_return(&self, data_hex: &str) -> Result<AnchorTx, ProviderError> {
        Ok(AnchorTx {
            txid: format!("tx-{data_hex}"),
        })
    }

    async fn get_confirmations(&self, _txid: &str) -> Result<AnchorConfirmation, ProviderError> {
        Ok(AnchorConfirmation::default())
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

struct Harness {
    state: AppState,
    agent_kp: Keypair,
}

fn harness(mesh_token: Option<&str>) -> Harness {
    let keypair = Arc::new(Keypair::generate());
    let keyring = Arc::new(KeyRing::default());
    keyring
        .register_pem("coord-test", &keypair.public_key().to_spki_pem().unwrap(), 0)
        .unwrap();
    let agent_kp = Keypair::generate();
    keyring
        .register_pem("agent-1", &agent_kp.public_key().to_spki_pem().unwrap(), 0)
        .unwrap();

    let identity = PeerIdentity {
        peer_id: "coord-test".into(),
        public_key_pem: keypair.public_key().to_spki_pem().unwrap(),
        role: PeerRole::Coordinator,
        network_mode: NetworkMode::PublicMesh,
        url: "http://127.0.0.1:8440".into(),
    };
    let peers = Arc::new(PeerTable::default());
    let reconnect = Arc::new(ReconnectRegistry::new(BackoffPolicy::default()));
    let broadcaster = Arc::new(Broadcaster::new(
        reqwest_client(),
        keypair.clone(),
        identity.peer_id.clone(),
        peers.clone(),
        reconnect.clone(),
        mesh_token.map(|t| t.to_string()),
    ));

    let state = AppState {
        identity,
        keypair: keypair.clone(),
        keyring: keyring.clone(),
        peers,
        validator: Arc::new(MessageValidator::new("coord-test")),
        broadcaster,
        capabilities: Arc::new(CapabilityRegistry::new()),
        reconnect,
        queue: Arc::new(FairShareQueue::default()),
        agents: Arc::new(AgentRegistry::default()),
        direct_work: Arc::new(DirectWorkBook::new()),
        submission_limiter: Arc::new(SlidingWindowLimiter::submissions()),
        credits: Arc::new(CreditEngine::default()),
        payments: Arc::new(PaymentManager::new(Arc::new(NullLightning))),
        issuance: Arc::new(IssuanceEngine::new(IssuanceParams::default(), "coord-test")),
        ordering: Arc::new(OrderingChain::new("coord-test", keypair.clone())),
        quorum: Arc::new(QuorumLedger::new("coord-test", keypair.clone())),
        anchors: Arc::new(AnchorManager::new(Arc::new(NullAnchor), 3)),
        blacklist: Arc::new(BlacklistChain::new("coord-test", keypair.clone())),
        tracker: Arc::new(BehaviorTracker::default()),
        striker: Arc::new(AutoBlacklister::new()),
        rules: RulesConfig::default(),
        signed_requests: Arc::new(SignedRequestVerifier::new(
            keyring,
            edgecoder_trust::signed_request::DEFAULT_MAX_SKEW_MS,
        )),
        release: Arc::new(ReleaseVerifier::new(Vec::new())),
        mesh_token: mesh_token.map(|t| t.to_string()),
        started_at_ms: now_ms(),
    };
    Harness { state, agent_kp }
}

fn reqwest_client() -> reqwest::Client {
    reqwest::Client::new()
}

fn app(h: &Harness) -> axum::Router {
    router(h.state.clone(), IpLimiter::new(1_000, 1_000))
}

fn subtask_json(id: &str) -> String {
    let subtask = Subtask {
        id: id.into(),
        task_id: format!("task-{id}"),
        kind: SubtaskKind::SingleStep,
        language: "python".into(),
        input: "print(1)".into(),
        timeout_ms: 60_000,
        snapshot_ref: None,
        project_meta: ProjectMeta {
            project_id: "proj".into(),
            tenant_id: None,
            resource_class: ResourceClass::Cpu,
            priority: 0,
        },
        required_model: None,
    };
    serde_json::to_string(&subtask).unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn identity_is_public() {
    let h = harness(Some("secret"));
    let response = app(&h)
        .oneshot(Request::get("/identity").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["peerId"], "coord-test");
    assert!(body["publicKeyPem"].as_str().unwrap().contains("PUBLIC KEY"));
}

#[tokio::test]
async fn mesh_endpoints_require_token() {
    let h = harness(Some("secret"));

    let denied = app(&h)
        .oneshot(Request::get("/mesh/peers").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(denied).await;
    assert_eq!(body["error"], "mesh_unauthorized");

    let allowed = app(&h)
        .oneshot(
            Request::get("/mesh/peers")
                .header("x-mesh-token", "secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let bearer = app(&h)
        .oneshot(
            Request::get("/mesh/peers")
                .header("authorization", "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(bearer.status(), StatusCode::OK);
}

#[tokio::test]
async fn submit_then_signed_claim_and_result() {
    let h = harness(None);
    let submit = app(&h)
        .oneshot(
            Request::post("/submit")
                .header("content-type", "application/json")
                .body(Body::from(subtask_json("s-1")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(submit.status(), StatusCode::OK);

    // The agent must be registered (heartbeat fresh) to claim.
    h.state.agents.heartbeat("agent-1", true, now_ms());

    let claim_body = serde_json::json!({ "agentId": "agent-1" }).to_string();
    let response = app(&h)
        .oneshot(signed_request(&h, "/tasks/claim", &claim_body, "nonce-1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["subtask"]["id"], "s-1");

    // Report the result, signed at both the transport and report layer.
    let mut result = edgecoder_types::task::SubtaskResult {
        subtask_id: "s-1".into(),
        task_id: "task-s-1".into(),
        agent_id: "agent-1".into(),
        ok: true,
        output: "print(1) ran fine with output 1".into(),
        error: None,
        duration_ms: 2_000,
        report_nonce: None,
        report_signature: None,
    };
    let bytes = result.signing_bytes().unwrap();
    result.report_signature = Some(h.agent_kp.sign_base64(&bytes));
    let result_body = serde_json::to_string(&result).unwrap();
    let response = app(&h)
        .oneshot(signed_request(&h, "/tasks/result", &result_body, "nonce-2"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["completed"], true);
    assert!(body["credited"].as_f64().unwrap() > 0.0);

    // The ordering chain recorded submit → claim → complete.
    let events: Vec<String> = h
        .state
        .ordering
        .snapshot()
        .into_iter()
        .map(|r| r.event_type)
        .collect();
    assert_eq!(events, vec!["task_submitted", "task_claimed", "task_complete"]);
}

#[tokio::test]
async fn unsigned_claim_rejected() {
    let h = harness(None);
    let response = app(&h)
        .oneshot(
            Request::post("/tasks/claim")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"agentId":"agent-1"}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ble_sync_reports_duplicates() {
    let h = harness(None);
    let tx = serde_json::json!({
        "txId": "ble-1",
        "accountId": "phone-1",
        "type": "earn",
        "credits": 2.5,
        "reason": "offline contribution",
        "timestampMs": 5
    });
    let body = serde_json::json!({ "transactions": [tx.clone(), tx] }).to_string();
    let response = app(&h)
        .oneshot(
            Request::post("/credits/ble-sync")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["accepted"], 1);
    assert_eq!(body["duplicates"], 1);
}

#[tokio::test]
async fn ledger_verify_flags_tampered_post() {
    let h = harness(None);
    h.state
        .ordering
        .append(edgecoder_ledger::QueueEventInput {
            event_type: "task_submitted".into(),
            task_id: "t".into(),
            ..Default::default()
        })
        .unwrap();
    let mut records = h.state.ordering.snapshot();
    records[0].payload_json = Some("{\"forged\":true}".into());
    let body = serde_json::json!({ "records": records }).to_string();
    let response = app(&h)
        .oneshot(
            Request::post("/ledger/verify")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["reason"], "hash_mismatch");
    assert_eq!(body["breakpoint"], 0);
}

fn signed_request(h: &Harness, path: &str, body: &str, nonce: &str) -> Request<Body> {
    let timestamp = now_ms();
    let body_hash = sha256_hex(body.as_bytes());
    let payload = edgecoder_trust::SignedRequestVerifier::canonical_payload(
        timestamp, nonce, "POST", path, &body_hash,
    );
    let signature = h.agent_kp.sign_base64(payload.as_bytes());
    Request::post(path)
        .header("content-type", "application/json")
        .header("x-agent-id", "agent-1")
        .header("x-timestamp-ms", timestamp.to_string())
        .header("x-nonce", nonce)
        .header("x-body-sha256", body_hash)
        .header("x-signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}
