//! Release-manifest verification.
//!
//! Agents report `{distHash, releaseVersion, releaseSignature}` on
//! registration. The coordinator checks the signature against an active
//! release key (keys rotate with validity windows) and the dist hash against
//! the manifest's tree hash. Unverified agents are permitted but flagged;
//! mismatches are critical anomalies.

use edgecoder_crypto::PublicKey;
use edgecoder_types::codec::{to_canonical_bytes, CodecError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// A signed release manifest, cached per version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseManifest {
    pub release_version: String,
    /// Lowercase hex SHA-256 of the release's dist tree.
    pub dist_tree_hash: String,
    pub published_at_ms: u64,
}

impl ReleaseManifest {
    /// Canonical bytes the release key signs.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CodecError> {
        to_canonical_bytes(self)
    }
}

/// A release signing key with a bounded validity window.
pub struct ReleaseKey {
    pub key: PublicKey,
    pub valid_from_ms: u64,
    pub valid_until_ms: u64,
}

/// What an agent reports about its own binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationReport {
    pub dist_hash: String,
    pub release_version: String,
    /// Base64 signature of the release manifest by a release key.
    pub release_signature: String,
}

/// Outcome of verifying an attestation report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationOutcome {
    Verified,
    /// No cached manifest for the reported version; permitted but flagged.
    Unverified,
    /// The release signature did not verify under any active key.
    SignatureMismatch,
    /// The reported dist hash differs from the manifest tree hash.
    HashMismatch,
}

/// Verifies attestation reports against cached manifests and rotating keys.
pub struct ReleaseVerifier {
    keys: RwLock<Vec<ReleaseKey>>,
    manifests: RwLock<HashMap<String, ReleaseManifest>>,
}

impl ReleaseVerifier {
    pub fn new(keys: Vec<ReleaseKey>) -> Self {
        Self {
            keys: RwLock::new(keys),
            manifests: RwLock::new(HashMap::new()),
        }
    }

    /// Install or refresh the cached manifest for a version. The hourly
    /// refresh timer re-installs from the release channel.
    pub fn install_manifest(&self, manifest: ReleaseManifest) {
        self.manifests
            .write()
            .insert(manifest.release_version.clone(), manifest);
    }

    /// Add a rotated release key.
    pub fn add_key(&self, key: ReleaseKey) {
        self.keys.write().push(key);
    }

    /// Verify one agent's attestation report.
    pub fn verify(&self, report: &AttestationReport, now_ms: u64) -> AttestationOutcome {
        let manifests = self.manifests.read();
        let Some(manifest) = manifests.get(&report.release_version) else {
            return AttestationOutcome::Unverified;
        };
        let Ok(bytes) = manifest.signing_bytes() else {
            return AttestationOutcome::Unverified;
        };

        let keys = self.keys.read();
        let signature_ok = keys
            .iter()
            .filter(|k| now_ms >= k.valid_from_ms && now_ms < k.valid_until_ms)
            .any(|k| k.key.verify_base64(&bytes, &report.release_signature).is_ok());
        if !signature_ok {
            warn!(
                target: "trust",
                version = %report.release_version,
                "release signature mismatch"
            );
            return AttestationOutcome::SignatureMismatch;
        }
        if report.dist_hash != manifest.dist_tree_hash {
            warn!(
                target: "trust",
                version = %report.release_version,
                "dist hash mismatch"
            );
            return AttestationOutcome::HashMismatch;
        }
        AttestationOutcome::Verified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgecoder_crypto::{sha256_hex, Keypair};

    struct Ctx {
        verifier: ReleaseVerifier,
        release_kp: Keypair,
        manifest: ReleaseManifest,
    }

    fn ctx() -> Ctx {
        let release_kp = Keypair::generate();
        let manifest = ReleaseManifest {
            release_version: "1.4.2".into(),
            dist_tree_hash: sha256_hex(b"dist tree"),
            published_at_ms: 1_000,
        };
        let verifier = ReleaseVerifier::new(vec![ReleaseKey {
            key: release_kp.public_key(),
            valid_from_ms: 0,
            valid_until_ms: 1_000_000,
        }]);
        verifier.install_manifest(manifest.clone());
        Ctx {
            verifier,
            release_kp,
            manifest,
        }
    }

    fn valid_report(ctx: &Ctx) -> AttestationReport {
        let bytes = ctx.manifest.signing_bytes().unwrap();
        AttestationReport {
            dist_hash: ctx.manifest.dist_tree_hash.clone(),
            release_version: ctx.manifest.release_version.clone(),
            release_signature: ctx.release_kp.sign_base64(&bytes),
        }
    }

    #[test]
    fn verified_happy_path() {
        let ctx = ctx();
        assert_eq!(
            ctx.verifier.verify(&valid_report(&ctx), 500),
            AttestationOutcome::Verified
        );
    }

    #[test]
    fn unknown_version_is_unverified() {
        let ctx = ctx();
        let mut report = valid_report(&ctx);
        report.release_version = "9.9.9".into();
        assert_eq!(
            ctx.verifier.verify(&report, 500),
            AttestationOutcome::Unverified
        );
    }

    #[test]
    fn wrong_signature_is_mismatch() {
        let ctx = ctx();
        let mut report = valid_report(&ctx);
        let rogue = Keypair::generate();
        report.release_signature = rogue.sign_base64(b"whatever");
        assert_eq!(
            ctx.verifier.verify(&report, 500),
            AttestationOutcome::SignatureMismatch
        );
    }

    #[test]
    fn tampered_dist_hash_is_hash_mismatch() {
        let ctx = ctx();
        let mut report = valid_report(&ctx);
        report.dist_hash = sha256_hex(b"trojaned dist tree");
        assert_eq!(
            ctx.verifier.verify(&report, 500),
            AttestationOutcome::HashMismatch
        );
    }

    #[test]
    fn expired_key_no_longer_verifies() {
        let ctx = ctx();
        let report = valid_report(&ctx);
        assert_eq!(
            ctx.verifier.verify(&report, 1_000_000),
            AttestationOutcome::SignatureMismatch
        );
    }

    #[test]
    fn rotated_key_takes_over() {
        let ctx = ctx();
        let next_kp = Keypair::generate();
        ctx.verifier.add_key(ReleaseKey {
            key: next_kp.public_key(),
            valid_from_ms: 1_000_000,
            valid_until_ms: 2_000_000,
        });
        let bytes = ctx.manifest.signing_bytes().unwrap();
        let report = AttestationReport {
            dist_hash: ctx.manifest.dist_tree_hash.clone(),
            release_version: ctx.manifest.release_version.clone(),
            release_signature: next_kp.sign_base64(&bytes),
        };
        // Old window rejects the new key; the new window accepts it.
        assert_eq!(
            ctx.verifier.verify(&report, 500),
            AttestationOutcome::SignatureMismatch
        );
        assert_eq!(
            ctx.verifier.verify(&report, 1_500_000),
            AttestationOutcome::Verified
        );
    }
}
