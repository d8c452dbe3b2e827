//! Peer identity and the signed mesh envelope.

use crate::codec::{to_canonical_bytes, CodecError};
use crate::ids::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// What kind of node a peer is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerRole {
    Coordinator,
    Agent,
    Phone,
}

/// Which mesh a peer participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    PublicMesh,
    EnterpriseOverlay,
}

/// The durable, exchangeable identity of a peer.
///
/// Returned by `GET /identity` and carried in peer-exchange payloads. The key
/// may rotate while `peer_id` stays fixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerIdentity {
    pub peer_id: PeerId,
    /// SPKI PEM of the currently-active Ed25519 public key.
    pub public_key_pem: String,
    pub role: PeerRole,
    pub network_mode: NetworkMode,
    pub url: String,
}

/// The signed gossip envelope.
///
/// The signature covers the canonical (JCS) serialization of every field
/// except `signature` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub from_peer_id: PeerId,
    pub issued_at_ms: u64,
    pub ttl_ms: u64,
    pub payload: serde_json::Value,
    /// Base64 of the raw 64-byte Ed25519 signature.
    pub signature: String,
}

impl MeshMessage {
    /// The canonical bytes the envelope signature is computed over.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        signing_bytes(
            &self.id,
            &self.message_type,
            &self.from_peer_id,
            self.issued_at_ms,
            self.ttl_ms,
            &self.payload,
        )
    }

    /// Whether the message has outlived `issuedAtMs + ttlMs`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.issued_at_ms.saturating_add(self.ttl_ms) < now_ms
    }
}

/// Canonical signing bytes for an envelope, usable before the signature exists.
pub fn signing_bytes(
    id: &str,
    message_type: &str,
    from_peer_id: &str,
    issued_at_ms: u64,
    ttl_ms: u64,
    payload: &serde_json::Value,
) -> Result<Vec<u8>, CodecError> {
    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Unsigned<'a> {
        id: &'a str,
        #[serde(rename = "type")]
        message_type: &'a str,
        from_peer_id: &'a str,
        issued_at_ms: u64,
        ttl_ms: u64,
        payload: &'a serde_json::Value,
    }
    to_canonical_bytes(&Unsigned {
        id,
        message_type,
        from_peer_id,
        issued_at_ms,
        ttl_ms,
        payload,
    })
}

/// Per-model availability advertised in a capability summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelAvailability {
    pub agent_count: u32,
    pub total_param_capacity: u64,
    pub avg_load: f64,
}

/// A coordinator's 60-second capability broadcast.
///
/// Receivers keep the latest summary per coordinator and use it for
/// cross-coordinator task routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySummary {
    pub coordinator_id: PeerId,
    pub agent_count: u32,
    pub model_availability: BTreeMap<String, ModelAvailability>,
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> MeshMessage {
        MeshMessage {
            id: "m-1".into(),
            message_type: "task_offer".into(),
            from_peer_id: "peer-a".into(),
            issued_at_ms: 1_000,
            ttl_ms: 500,
            payload: serde_json::json!({"taskId": "t-1"}),
            signature: String::new(),
        }
    }

    #[test]
    fn signing_bytes_exclude_signature() {
        let mut m = message();
        let a = m.signing_bytes().unwrap();
        m.signature = "dGFtcGVyZWQ=".into();
        let b = m.signing_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn expiry_boundary() {
        let m = message();
        assert!(!m.is_expired(1_500));
        assert!(m.is_expired(1_501));
    }

    #[test]
    fn envelope_json_uses_wire_names() {
        let m = message();
        let v = serde_json::to_value(&m).unwrap();
        assert!(v.get("fromPeerId").is_some());
        assert!(v.get("type").is_some());
        assert!(v.get("ttlMs").is_some());
    }
}
