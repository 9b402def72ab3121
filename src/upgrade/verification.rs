//! Integrity checks for downloaded binaries and release manifests.
//!
//! Two independent checks guard an update:
//!
//! - **Checksum**: the downloaded asset must hash to the SHA-256 digest listed
//!   in the release manifest. A mismatch aborts the update before the swap.
//! - **Manifest signature**: when a public key is configured, the manifest
//!   bytes must carry a valid detached Ed25519 signature (`manifest.sig`).
//!   Without a key the signature is never looked at.
//!
//! Signature verification fails closed: a malformed key, an unknown
//! envelope, or a signature of the wrong length all count as "invalid".

use crate::core::error::{Result, UpgradeError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::pkcs8::DecodePublicKey;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// SHA-256 checksum computation and comparison.
pub struct ChecksumVerifier;

impl ChecksumVerifier {
    /// Compute the lowercase hex SHA-256 digest of a file.
    ///
    /// The file is read in chunks, so large binaries are never held in memory.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use selfup::upgrade::verification::ChecksumVerifier;
    /// use std::path::Path;
    ///
    /// # async fn example() -> selfup::core::Result<()> {
    /// let checksum = ChecksumVerifier::compute_sha256(Path::new("/path/to/binary")).await?;
    /// println!("SHA256: {checksum}");
    /// # Ok(())
    /// # }
    /// ```
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {:?}", file_path);

        let mut file = tokio::fs::File::open(file_path).await?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
        loop {
            let read = file.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }

        Ok(hex::encode(hasher.finalize()))
    }

    /// Whether the file hashes to `expected_sha256` (hex, any case).
    pub async fn verify_checksum(file_path: &Path, expected_sha256: &str) -> Result<bool> {
        let actual = Self::compute_sha256(file_path).await?;
        Ok(actual.eq_ignore_ascii_case(expected_sha256.trim()))
    }

    /// Like [`verify_checksum`](Self::verify_checksum), but a mismatch is an
    /// [`UpgradeError::ChecksumMismatch`].
    pub async fn ensure_checksum(file_path: &Path, expected_sha256: &str) -> Result<()> {
        info!("Verifying checksum for: {:?}", file_path);

        let actual = Self::compute_sha256(file_path).await?;
        let expected = expected_sha256.trim();
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(UpgradeError::ChecksumMismatch {
                expected: expected.to_lowercase(),
                actual,
            });
        }

        info!("Checksum verification successful");
        Ok(())
    }
}

/// A parsed `manifest.sig` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureEnvelope {
    /// `{"alg": "ed25519", "sig": "<base64>"}`.
    Ed25519 {
        /// Raw signature bytes.
        signature: Vec<u8>,
    },
    /// Any other format. Never verifies.
    Unsupported {
        /// What was wrong with it.
        reason: String,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    alg: String,
    sig: String,
}

impl SignatureEnvelope {
    /// Classify the text of a signature file.
    pub fn parse(text: &str) -> Self {
        let raw: RawEnvelope = match serde_json::from_str(text.trim()) {
            Ok(raw) => raw,
            Err(_) => {
                return Self::Unsupported {
                    reason: "not a JSON signature envelope".to_string(),
                };
            }
        };

        if !raw.alg.eq_ignore_ascii_case("ed25519") {
            return Self::Unsupported {
                reason: format!("unsupported signature algorithm '{}'", raw.alg),
            };
        }

        match STANDARD.decode(raw.sig.trim()) {
            Ok(signature) => Self::Ed25519 { signature },
            Err(err) => Self::Unsupported {
                reason: format!("malformed base64 signature: {err}"),
            },
        }
    }
}

/// Decode a base64 Ed25519 public key.
///
/// SPKI DER is the expected encoding; a PEM `PUBLIC KEY` block and a bare
/// 32-byte key are accepted too.
pub fn parse_public_key(public_key_b64: &str) -> Option<VerifyingKey> {
    let body: String = public_key_b64
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("-----"))
        .collect();
    let bytes = STANDARD.decode(body).ok()?;

    if let Ok(raw) = <[u8; 32]>::try_from(bytes.as_slice()) {
        return VerifyingKey::from_bytes(&raw).ok();
    }
    VerifyingKey::from_public_key_der(&bytes).ok()
}

/// Verify a detached signature over the manifest bytes.
///
/// Returns `false` for every failure: bad key, unsupported envelope, wrong
/// signature length, or a signature that doesn't match.
pub fn verify_signature(manifest_bytes: &[u8], signature_text: &str, public_key_b64: &str) -> bool {
    let Some(key) = parse_public_key(public_key_b64) else {
        warn!("Configured update public key is not a valid Ed25519 key");
        return false;
    };

    match SignatureEnvelope::parse(signature_text) {
        SignatureEnvelope::Ed25519 { signature } => {
            let Ok(bytes) = <[u8; 64]>::try_from(signature.as_slice()) else {
                warn!(len = signature.len(), "Ed25519 signature must be 64 bytes");
                return false;
            };
            let verified = key.verify(manifest_bytes, &Signature::from_bytes(&bytes)).is_ok();
            if verified {
                debug!("Manifest signature verified");
            } else {
                warn!("Manifest signature does not match");
            }
            verified
        }
        SignatureEnvelope::Unsupported { reason } => {
            warn!(%reason, "Unsupported manifest signature");
            false
        }
    }
}
