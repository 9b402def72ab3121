//! Release fixtures for end-to-end update tests.

use crate::test_utils::http::{MockHttpClient, MockResponse};
use crate::upgrade::platform::PlatformTag;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ed25519_dalek::pkcs8::EncodePublicKey;
use ed25519_dalek::{Signer, SigningKey};
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `bytes`.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A published release of `acme/tool` on fake hosts.
#[derive(Debug, Clone)]
pub struct ReleaseFixture {
    /// API host, e.g. `https://api.test`.
    pub api_base: String,
    /// Download host, e.g. `https://dl.test`.
    pub download_base: String,
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Release tag.
    pub tag: String,
    /// Binary name used in asset names.
    pub bin_name: String,
    /// Platform of the published asset.
    pub platform: PlatformTag,
    /// Contents of the published binary.
    pub binary: Vec<u8>,
}

impl ReleaseFixture {
    /// A release `v<version>` for `linux-x64` carrying `binary`.
    pub fn new(version: &str, binary: impl Into<Vec<u8>>) -> Self {
        Self {
            api_base: "https://api.test".to_string(),
            download_base: "https://dl.test".to_string(),
            owner: "acme".to_string(),
            repo: "tool".to_string(),
            tag: format!("v{version}"),
            bin_name: "tool".to_string(),
            platform: PlatformTag::LinuxX64,
            binary: binary.into(),
        }
    }

    /// `owner/repo`.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    /// Asset file name for the fixture platform.
    pub fn asset_name(&self) -> String {
        self.platform.asset_name(&self.bin_name)
    }

    /// Latest-release endpoint.
    pub fn latest_release_url(&self) -> String {
        format!("{}/repos/{}/{}/releases/latest", self.api_base, self.owner, self.repo)
    }

    /// Download URL of a file attached to the release.
    pub fn file_url(&self, file_name: &str) -> String {
        format!(
            "{}/{}/{}/releases/download/{}/{}",
            self.download_base, self.owner, self.repo, self.tag, file_name
        )
    }

    /// Download URL of the platform asset.
    pub fn asset_url(&self) -> String {
        self.file_url(&self.asset_name())
    }

    /// Download URL of `manifest.json`.
    pub fn manifest_url(&self) -> String {
        self.file_url("manifest.json")
    }

    /// Download URL of `manifest.sig`.
    pub fn signature_url(&self) -> String {
        self.file_url("manifest.sig")
    }

    /// Digest of the published binary.
    pub fn binary_sha256(&self) -> String {
        sha256_hex(&self.binary)
    }

    /// Release index body.
    pub fn release_json(&self) -> serde_json::Value {
        serde_json::json!({
            "tag_name": self.tag,
            "name": format!("Release {}", self.tag),
            "assets": [
                {"name": self.asset_name(), "browser_download_url": self.asset_url()}
            ]
        })
    }

    /// Manifest bytes listing the asset with `sha256`.
    pub fn manifest_bytes(&self, sha256: &str) -> Vec<u8> {
        serde_json::json!({
            "assets": [
                {"name": self.asset_name(), "url": self.asset_url(), "sha256": sha256}
            ]
        })
        .to_string()
        .into_bytes()
    }

    /// Register the release index, a manifest with the correct checksum,
    /// and the asset itself.
    pub fn serve(&self, client: &MockHttpClient) {
        self.serve_with_manifest(client, Some(self.manifest_bytes(&self.binary_sha256())));
    }

    /// Register the release index and asset, plus `manifest` when given.
    pub fn serve_with_manifest(&self, client: &MockHttpClient, manifest: Option<Vec<u8>>) {
        client.on(self.latest_release_url(), MockResponse::json(&self.release_json()));
        if let Some(manifest) = manifest {
            client.on(self.manifest_url(), MockResponse::ok(manifest));
        }
        client.on(self.asset_url(), MockResponse::asset(self.binary.clone()));
    }
}

/// Deterministic Ed25519 key for signing fixtures.
pub fn signing_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

/// Base64 SPKI DER encoding of the key's public half.
pub fn public_key_spki_b64(key: &SigningKey) -> String {
    match key.verifying_key().to_public_key_der() {
        Ok(der) => STANDARD.encode(der.as_bytes()),
        Err(err) => panic!("failed to encode public key: {err}"),
    }
}

/// `{"alg":"ed25519","sig":...}` envelope over `message`.
pub fn signature_envelope(key: &SigningKey, message: &[u8]) -> String {
    let sig = key.sign(message);
    serde_json::json!({"alg": "ed25519", "sig": STANDARD.encode(sig.to_bytes())}).to_string()
}
