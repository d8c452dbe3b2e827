//! Signed-request verification for privileged agent endpoints.
//!
//! Every privileged request carries `{x-agent-id, x-timestamp-ms, x-nonce,
//! x-body-sha256, x-signature}`. The signature covers
//! `timestamp\nnonce\nmethod\npath\nbodyHash`; nonces are cached for the
//! skew window to stop replays.

use edgecoder_crypto::{sha256_hex, KeyRing};
use edgecoder_types::error::AuthError;
use edgecoder_types::AgentId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Default clock-skew bound: 30 seconds, boundary inclusive.
pub const DEFAULT_MAX_SKEW_MS: u64 = 30_000;

pub const HEADER_AGENT_ID: &str = "x-agent-id";
pub const HEADER_TIMESTAMP: &str = "x-timestamp-ms";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_BODY_SHA256: &str = "x-body-sha256";
pub const HEADER_SIGNATURE: &str = "x-signature";

/// The parsed signed-request header set.
#[derive(Debug, Clone)]
pub struct SignedRequestHeaders {
    pub agent_id: AgentId,
    pub timestamp_ms: u64,
    pub nonce: String,
    pub body_sha256: String,
    pub signature: String,
}

impl SignedRequestHeaders {
    /// Extract the header set through a lookup closure, rejecting on the
    /// first missing or malformed header.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AuthError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &'static str| lookup(name).ok_or(AuthError::MissingHeader(name));
        let timestamp_ms = get(HEADER_TIMESTAMP)?
            .parse::<u64>()
            .map_err(|_| AuthError::MissingHeader(HEADER_TIMESTAMP))?;
        Ok(Self {
            agent_id: get(HEADER_AGENT_ID)?,
            timestamp_ms,
            nonce: get(HEADER_NONCE)?,
            body_sha256: get(HEADER_BODY_SHA256)?,
            signature: get(HEADER_SIGNATURE)?,
        })
    }
}

/// Verifies signed requests and tracks nonces inside the skew window.
pub struct SignedRequestVerifier {
    keyring: Arc<KeyRing>,
    max_skew_ms: u64,
    /// nonce → expiry. Scoped per agent to keep nonces collision-free.
    nonces: Mutex<HashMap<String, u64>>,
}

impl SignedRequestVerifier {
    pub fn new(keyring: Arc<KeyRing>, max_skew_ms: u64) -> Self {
        Self {
            keyring,
            max_skew_ms,
            nonces: Mutex::new(HashMap::new()),
        }
    }

    /// The canonical payload an agent signs.
    pub fn canonical_payload(
        timestamp_ms: u64,
        nonce: &str,
        method: &str,
        path: &str,
        body_hash: &str,
    ) -> String {
        format!("{timestamp_ms}\n{nonce}\n{method}\n{path}\n{body_hash}")
    }

    /// Verify one request. Returns the authenticated agent id.
    pub fn verify(
        &self,
        headers: &SignedRequestHeaders,
        method: &str,
        path: &str,
        body: &[u8],
        now_ms: u64,
    ) -> Result<AgentId, AuthError> {
        let skew = now_ms.abs_diff(headers.timestamp_ms);
        if skew > self.max_skew_ms {
            return Err(AuthError::TimestampSkew);
        }
        if sha256_hex(body) != headers.body_sha256 {
            return Err(AuthError::InvalidSignature);
        }
        let payload = Self::canonical_payload(
            headers.timestamp_ms,
            &headers.nonce,
            method,
            path,
            &headers.body_sha256,
        );
        self.keyring
            .verify(
                &headers.agent_id,
                payload.as_bytes(),
                &headers.signature,
                now_ms,
            )
            .map_err(|_| AuthError::InvalidSignature)?;

        // Replay defense only after the signature checks out, so unsigned
        // traffic cannot poison the nonce cache.
        let key = format!("{}:{}", headers.agent_id, headers.nonce);
        let mut nonces = self.nonces.lock();
        nonces.retain(|_, expiry| *expiry > now_ms);
        if nonces.contains_key(&key) {
            return Err(AuthError::ReplayDetected);
        }
        nonces.insert(key, now_ms.saturating_add(self.max_skew_ms));
        Ok(headers.agent_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecoder_crypto::Keypair;

    struct Ctx {
        verifier: SignedRequestVerifier,
        keypair: Keypair,
    }

    fn ctx() -> Ctx {
        let keypair = Keypair::generate();
        let ring = Arc::new(KeyRing::default());
        ring.register_pem("agent-1", &keypair.public_key().to_spki_pem().unwrap(), 0)
            .unwrap();
        Ctx {
            verifier: SignedRequestVerifier::new(ring, DEFAULT_MAX_SKEW_MS),
            keypair,
        }
    }

    fn signed(ctx: &Ctx, timestamp_ms: u64, nonce: &str, body: &[u8]) -> SignedRequestHeaders {
        let body_sha256 = sha256_hex(body);
        let payload = SignedRequestVerifier::canonical_payload(
            timestamp_ms,
            nonce,
            "POST",
            "/tasks/claim",
            &body_sha256,
        );
        SignedRequestHeaders {
            agent_id: "agent-1".into(),
            timestamp_ms,
            nonce: nonce.into(),
            body_sha256,
            signature: ctx.keypair.sign_base64(payload.as_bytes()),
        }
    }

    #[test]
    fn replay_and_skew_scenario() {
        let ctx = ctx();
        let body = br#"{"agentId":"agent-1"}"#;
        let headers = signed(&ctx, 100_000, "nonce-1", body);

        // First request succeeds.
        let agent = ctx
            .verifier
            .verify(&headers, "POST", "/tasks/claim", body, 100_000)
            .unwrap();
        assert_eq!(agent, "agent-1");

        // An identical {timestamp, nonce} inside the window is a replay.
        let err = ctx
            .verifier
            .verify(&headers, "POST", "/tasks/claim", body, 100_500)
            .unwrap_err();
        assert!(matches!(err, AuthError::ReplayDetected));

        // A stale timestamp fails on skew, not replay.
        let stale = signed(&ctx, 100_000, "nonce-2", body);
        let err = ctx
            .verifier
            .verify(&stale, "POST", "/tasks/claim", body, 100_000 + DEFAULT_MAX_SKEW_MS + 1)
            .unwrap_err();
        assert!(matches!(err, AuthError::TimestampSkew));
    }

    #[test]
    fn skew_boundary_is_inclusive() {
        let ctx = ctx();
        let body = b"{}";
        let headers = signed(&ctx, 100_000, "n", body);
        // Exactly maxSkew is accepted…
        ctx.verifier
            .verify(&headers, "POST", "/tasks/claim", body, 100_000 + DEFAULT_MAX_SKEW_MS)
            .unwrap();
        // …and future-dated timestamps get the same bound.
        let future = signed(&ctx, 200_000 + DEFAULT_MAX_SKEW_MS, "n2", body);
        ctx.verifier
            .verify(&future, "POST", "/tasks/claim", body, 200_000)
            .unwrap();
        let too_far = signed(&ctx, 300_000 + DEFAULT_MAX_SKEW_MS + 1, "n3", body);
        assert!(ctx
            .verifier
            .verify(&too_far, "POST", "/tasks/claim", body, 300_000)
            .is_err());
    }

    #[test]
    fn body_tamper_rejected() {
        let ctx = ctx();
        let headers = signed(&ctx, 100_000, "n", b"original");
        let err = ctx
            .verifier
            .verify(&headers, "POST", "/tasks/claim", b"tampered", 100_000)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn path_is_bound_by_signature() {
        let ctx = ctx();
        let body = b"{}";
        let headers = signed(&ctx, 100_000, "n", body);
        let err = ctx
            .verifier
            .verify(&headers, "POST", "/economy/payments/intents", body, 100_000)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn failed_signature_does_not_burn_nonce() {
        let ctx = ctx();
        let body = b"{}";
        let mut bad = signed(&ctx, 100_000, "n", body);
        bad.signature = "Zm9yZ2Vk".into();
        assert!(ctx
            .verifier
            .verify(&bad, "POST", "/tasks/claim", body, 100_000)
            .is_err());

        // The honest request with the same nonce still passes.
        let good = signed(&ctx, 100_000, "n", body);
        ctx.verifier
            .verify(&good, "POST", "/tasks/claim", body, 100_000)
            .unwrap();
    }

    #[test]
    fn missing_header_detected() {
        let err = SignedRequestHeaders::from_lookup(|name| match name {
            HEADER_NONCE => None,
            HEADER_TIMESTAMP => Some("100".to_string()),
            _ => Some("value".to_string()),
        })
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingHeader(HEADER_NONCE)));
    }
}
