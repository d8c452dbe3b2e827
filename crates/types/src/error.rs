//! Error taxonomy for the coordinator core.
//!
//! Every variant that can surface at the API boundary carries a stable,
//! machine-readable string code via [`ErrorCode`]. Handlers map codes into
//! `{ "error": <code>, "message": <details> }` bodies; security-sensitive
//! variants deliberately carry no detail.

use crate::ids::AccountId;
use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// Authentication and request-signature failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The mesh auth token was absent or wrong.
    #[error("mesh authentication failed")]
    MeshUnauthorized,
    /// An Ed25519 signature did not verify. No further detail is exposed.
    #[error("signature verification failed")]
    InvalidSignature,
    /// The request timestamp was outside the allowed skew window.
    #[error("request timestamp outside allowed skew")]
    TimestampSkew,
    /// The `{timestamp, nonce}` pair was seen before inside the skew window.
    #[error("request replay detected")]
    ReplayDetected,
    /// A required signed-request header was missing.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    /// The signer is not a known peer.
    #[error("unknown signer")]
    UnknownSigner,
}

impl ErrorCode for AuthError {
    fn code(&self) -> &'static str {
        match self {
            Self::MeshUnauthorized => "mesh_unauthorized",
            Self::InvalidSignature => "invalid_signature",
            Self::TimestampSkew => "timestamp_skew",
            Self::ReplayDetected => "replay_detected",
            Self::MissingHeader(_) => "bad_request",
            Self::UnknownSigner => "invalid_signature",
        }
    }
}

/// Rejections produced while ingesting a gossiped mesh message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GossipError {
    /// The message id was already processed (idempotent ingestion).
    #[error("duplicate message")]
    DuplicateMessage,
    /// `issuedAtMs + ttlMs` is in the past.
    #[error("message expired")]
    MessageExpired,
    /// The envelope signature did not verify under the sender's keys.
    #[error("invalid message signature")]
    InvalidSignature,
    /// The sender is not present in the peer table and carries no key.
    #[error("unknown sender")]
    UnknownSender,
}

impl ErrorCode for GossipError {
    fn code(&self) -> &'static str {
        match self {
            Self::DuplicateMessage => "duplicate_message",
            Self::MessageExpired => "message_expired",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownSender => "invalid_signature",
        }
    }
}

/// Credit engine failures.
#[derive(Debug, Error, PartialEq)]
pub enum CreditError {
    /// The account balance does not cover the requested spend.
    #[error("insufficient credits: account {account} has {balance}, needs {requested}")]
    InsufficientCredits {
        account: AccountId,
        balance: f64,
        requested: f64,
    },
    /// The contribution-first policy rejected the spend.
    #[error("contribution policy violated: ratio {ratio:.3} below minimum {minimum:.3}")]
    ContributionPolicyViolation { ratio: f64, minimum: f64 },
    /// A contribution report with this id was already accrued.
    #[error("duplicate contribution report: {0}")]
    DuplicateContributionReport(String),
    /// The referenced account or intent does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ErrorCode for CreditError {
    fn code(&self) -> &'static str {
        match self {
            Self::InsufficientCredits { .. } => "insufficient_credits",
            Self::ContributionPolicyViolation { .. } => "contribution_policy_violation",
            Self::DuplicateContributionReport(_) => "duplicate_contribution_report",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Hash-chain verification and append failures.
///
/// Chain errors are never auto-repaired: the owning component logs at error
/// severity, raises an audit event, and suspends the chain for operator
/// action.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    /// A recomputed record hash did not match the stored hash.
    #[error("hash mismatch at sequence {sequence}")]
    HashMismatch { sequence: u64 },
    /// Record sequences are not strictly consecutive.
    #[error("sequence gap at sequence {sequence}: expected {expected}")]
    SequenceGap { sequence: u64, expected: u64 },
    /// A record's prevHash does not equal the prior record's hash.
    #[error("chain break at sequence {sequence}")]
    ChainBreak { sequence: u64 },
    /// A record signature did not verify under the actor's key.
    #[error("invalid record signature at sequence {sequence}")]
    InvalidSignature { sequence: u64 },
    /// The coordinator signature on a blacklist event did not verify.
    #[error("coordinator signature invalid")]
    CoordinatorSignatureInvalid,
    /// An ingested record does not chain onto the local head.
    #[error("chain head mismatch")]
    ChainHeadMismatch,
    /// The chain is suspended after a verification failure.
    #[error("chain suspended pending operator action")]
    Suspended,
}

impl ErrorCode for ChainError {
    fn code(&self) -> &'static str {
        match self {
            Self::HashMismatch { .. } => "hash_mismatch",
            Self::SequenceGap { .. } => "sequence_gap",
            Self::ChainBreak { .. } => "chain_break",
            Self::InvalidSignature { .. } => "invalid_signature",
            Self::CoordinatorSignatureInvalid => "coordinator_signature_invalid",
            Self::ChainHeadMismatch => "chain_head_mismatch",
            Self::Suspended => "chain_break",
        }
    }
}

/// Scheduler and capacity failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScheduleError {
    /// A sliding-window rate limit rejected the request.
    #[error("rate limited")]
    RateLimited,
    /// The queue is at capacity.
    #[error("queue full")]
    QueueFull,
    /// The requesting agent is not eligible for work.
    #[error("no eligible agent: {0}")]
    NoEligibleAgent(String),
    /// The referenced subtask or offer does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ErrorCode for ScheduleError {
    fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QueueFull => "queue_full",
            Self::NoEligibleAgent(_) => "no_eligible_agent",
            Self::NotFound(_) => "not_found",
        }
    }
}

/// Upstream provider failures (anchor, lightning).
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider could not be reached or reported unhealthy.
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    /// The anchor broadcast was attempted and failed.
    #[error("anchor broadcast failed: {0}")]
    AnchorBroadcastFailed(String),
}

impl ErrorCode for ProviderError {
    fn code(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "provider_unavailable",
            Self::AnchorBroadcastFailed(_) => "anchor_broadcast_failed",
        }
    }
}

/// Malformed client input.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("request body required")]
    MissingBody,
    #[error("invalid hex payload")]
    InvalidDataHex,
}

impl ErrorCode for InputError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::MissingBody => "missing_body",
            Self::InvalidDataHex => "invalid_data_hex",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::MeshUnauthorized.code(), "mesh_unauthorized");
        assert_eq!(AuthError::ReplayDetected.code(), "replay_detected");
        assert_eq!(GossipError::DuplicateMessage.code(), "duplicate_message");
        assert_eq!(
            ChainError::HashMismatch { sequence: 1 }.code(),
            "hash_mismatch"
        );
        assert_eq!(ScheduleError::RateLimited.code(), "rate_limited");
        assert_eq!(
            CreditError::DuplicateContributionReport("r".into()).code(),
            "duplicate_contribution_report"
        );
    }

    #[test]
    fn signature_failures_carry_no_detail() {
        // Oracle hardening: the display string must not describe which check
        // failed inside signature verification.
        let msg = AuthError::InvalidSignature.to_string();
        assert_eq!(msg, "signature verification failed");
    }
}
