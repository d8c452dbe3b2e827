//! The agent trust layer: signed request verification with replay defense,
//! and binary-integrity attestation against a signed release manifest.

pub mod manifest;
pub mod signed_request;

pub use manifest::{AttestationOutcome, AttestationReport, ReleaseKey, ReleaseManifest, ReleaseVerifier};
pub use signed_request::{SignedRequestHeaders, SignedRequestVerifier};
