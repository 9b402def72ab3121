//! Resolution of the platform asset to download.
//!
//! A release may publish a `manifest.json` listing every asset with its URL
//! and SHA-256 digest, and a detached `manifest.sig` over the manifest bytes.
//! Resolution prefers the manifest because it is the only source of a
//! checksum. When the manifest is missing or unusable the asset is taken
//! straight from the release index, without a checksum.
//!
//! With a public key configured the manifest is only trusted after its
//! signature verifies; a missing or invalid signature aborts the update
//! instead of falling back to the unsigned path.

use crate::constants::{MANIFEST_FILE_NAME, MANIFEST_SIGNATURE_FILE_NAME};
use crate::core::error::{Result, UpgradeError};
use crate::upgrade::platform::PlatformTag;
use crate::upgrade::transport::{HttpClient, HttpRequest, ResilientTransport};
use crate::upgrade::verification::verify_signature;
use crate::upgrade::version_check::{ReleaseInfo, RepoSlug};
use crate::utils::fs::with_suffix;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// One entry of `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestAsset {
    /// Asset file name.
    pub name: String,
    /// Download URL; the release index URL is used when absent.
    #[serde(default)]
    pub url: Option<String>,
    /// Hex SHA-256 digest of the asset.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Contents of `manifest.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Published assets.
    #[serde(default)]
    pub assets: Vec<ManifestAsset>,
}

impl Manifest {
    /// Parse manifest bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|err| UpgradeError::ManifestUnavailable(format!("malformed manifest: {err}")))
    }

    /// Find the entry for `name`.
    pub fn asset(&self, name: &str) -> Option<&ManifestAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

/// What to download and how to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    /// Source URL.
    pub url: String,
    /// Final path of the completed download.
    pub destination: PathBuf,
    /// Expected hex SHA-256 digest, when the manifest provided one.
    pub expected_sha256: Option<String>,
}

impl DownloadTarget {
    /// In-progress download path: the destination plus `.part`.
    pub fn partial_path(&self) -> PathBuf {
        with_suffix(&self.destination, ".part")
    }
}

/// Per-release directory under `staging_dir`.
///
/// Partial files are only ever resumed against the release that started
/// them, since every asset name is the same across versions.
pub fn release_staging_dir(staging_dir: &Path, release: &ReleaseInfo) -> PathBuf {
    let name: String = release
        .tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
        .collect();
    match name.trim_matches('.') {
        "" => staging_dir.join("_"),
        _ => staging_dir.join(name),
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Turns a resolved release into a [`DownloadTarget`].
pub struct AssetResolver<'a, C> {
    transport: &'a ResilientTransport<C>,
    download_base: &'a str,
    bin_name: &'a str,
    public_key: Option<&'a str>,
    timeout: Duration,
}

impl<'a, C: HttpClient> AssetResolver<'a, C> {
    /// A resolver for assets named `<bin_name>-<platform>[.exe]`.
    pub fn new(
        transport: &'a ResilientTransport<C>,
        download_base: &'a str,
        bin_name: &'a str,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            download_base,
            bin_name,
            public_key: None,
            timeout,
        }
    }

    /// Require a valid manifest signature from this base64 Ed25519 key.
    #[must_use]
    pub fn with_public_key(mut self, public_key: Option<&'a str>) -> Self {
        self.public_key = public_key;
        self
    }

    /// URL of a file attached to `release`.
    ///
    /// Uses the release index entry when there is one, otherwise the
    /// conventional `releases/download/<tag>/<file>` location.
    pub fn release_file_url(&self, repo: &RepoSlug, release: &ReleaseInfo, file_name: &str) -> String {
        match release.asset(file_name) {
            Some(asset) => asset.download_url.clone(),
            None => format!(
                "{}/{}/{}/releases/download/{}/{}",
                self.download_base.trim_end_matches('/'),
                repo.owner,
                repo.repo,
                release.tag,
                file_name
            ),
        }
    }

    /// Resolve the download for `platform` into `staging_dir`.
    ///
    /// # Errors
    ///
    /// - [`UpgradeError::SignatureVerificationFailed`] when a key is configured
    ///   and the manifest signature is missing or invalid
    /// - [`UpgradeError::AssetNotFound`] when neither the manifest nor the
    ///   release index lists the asset
    pub async fn resolve(
        &self,
        repo: &RepoSlug,
        release: &ReleaseInfo,
        platform: PlatformTag,
        staging_dir: &Path,
    ) -> Result<DownloadTarget> {
        let asset_name = platform.asset_name(self.bin_name);
        let destination = release_staging_dir(staging_dir, release).join(&asset_name);

        match self.fetch_manifest(repo, release).await {
            Ok(manifest) => match manifest.asset(&asset_name) {
                Some(entry) => {
                    let url = non_empty(&entry.url)
                        .unwrap_or_else(|| self.release_file_url(repo, release, &asset_name));
                    let expected_sha256 = non_empty(&entry.sha256);
                    debug!(asset = %asset_name, %url, checksum = expected_sha256.is_some(), "Resolved asset from manifest");
                    return Ok(DownloadTarget {
                        url,
                        destination,
                        expected_sha256,
                    });
                }
                None => debug!(asset = %asset_name, "Manifest has no entry for this platform"),
            },
            Err(UpgradeError::SignatureVerificationFailed) => {
                return Err(UpgradeError::SignatureVerificationFailed);
            }
            Err(err) => info!(error = %err, "Release manifest unavailable; using release assets without checksum"),
        }

        let asset = release.asset(&asset_name).ok_or_else(|| UpgradeError::AssetNotFound {
            name: asset_name.clone(),
        })?;
        debug!(asset = %asset_name, url = %asset.download_url, "Resolved asset from release index");
        Ok(DownloadTarget {
            url: asset.download_url.clone(),
            destination,
            expected_sha256: None,
        })
    }

    /// Fetch, authenticate and parse `manifest.json` for `release`.
    ///
    /// The signature is only fetched when a public key is configured.
    pub async fn fetch_manifest(&self, repo: &RepoSlug, release: &ReleaseInfo) -> Result<Manifest> {
        let url = self.release_file_url(repo, release, MANIFEST_FILE_NAME);
        let bytes = match self.fetch_optional(&url).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(UpgradeError::ManifestUnavailable("not published".to_string())),
            Err(err) => return Err(UpgradeError::ManifestUnavailable(err.to_string())),
        };

        if let Some(public_key) = self.public_key {
            let sig_url = self.release_file_url(repo, release, MANIFEST_SIGNATURE_FILE_NAME);
            let signature = match self.fetch_optional(&sig_url).await {
                Ok(Some(signature)) => signature,
                Ok(None) => {
                    warn!(url = %sig_url, "Public key configured but release has no manifest signature");
                    return Err(UpgradeError::SignatureVerificationFailed);
                }
                Err(err) => {
                    warn!(url = %sig_url, error = %err, "Failed to fetch manifest signature");
                    return Err(UpgradeError::SignatureVerificationFailed);
                }
            };

            if !verify_signature(&bytes, &String::from_utf8_lossy(&signature), public_key) {
                return Err(UpgradeError::SignatureVerificationFailed);
            }
        }

        Manifest::parse(&bytes)
    }

    /// GET `url`; `Ok(None)` on 404.
    async fn fetch_optional(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let (status, body) = self
            .transport
            .get_bytes(HttpRequest::get(url).with_timeout(self.timeout))
            .await?;
        match status {
            200..=299 => Ok(Some(body)),
            404 => Ok(None),
            _ => Err(UpgradeError::HttpStatus {
                status,
                url: url.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, MockResponse};
    use crate::upgrade::transport::RetryPolicy;
    use crate::upgrade::version_check::ReleaseAsset;

    const MANIFEST_URL: &str = "https://dl.test/acme/tool/releases/download/v1.3.0/manifest.json";
    const ASSET_URL: &str = "https://dl.test/assets/tool-linux-x64";

    fn release() -> ReleaseInfo {
        ReleaseInfo {
            version: "1.3.0".into(),
            tag: "v1.3.0".into(),
            assets: vec![ReleaseAsset {
                name: "tool-linux-x64".into(),
                download_url: ASSET_URL.into(),
            }],
        }
    }

    fn repo() -> RepoSlug {
        RepoSlug::parse("acme/tool").unwrap()
    }

    async fn resolve(client: MockHttpClient, key: Option<&str>) -> (Result<DownloadTarget>, usize) {
        let transport = ResilientTransport::new(client, RetryPolicy::immediate(1));
        let resolver = AssetResolver::new(&transport, "https://dl.test", "tool", Duration::from_secs(5))
            .with_public_key(key);
        let result = resolver
            .resolve(&repo(), &release(), PlatformTag::LinuxX64, Path::new("/staging"))
            .await;
        (result, transport.client().request_count())
    }

    #[tokio::test]
    async fn test_manifest_checksum_is_used() {
        let client = MockHttpClient::new();
        client.on(
            MANIFEST_URL,
            MockResponse::json(&serde_json::json!({
                "assets": [{"name": "tool-linux-x64", "url": "https://cdn.test/tool", "sha256": "AB12"}]
            })),
        );

        let (target, _) = resolve(client, None).await;
        let target = target.unwrap();
        assert_eq!(target.url, "https://cdn.test/tool");
        assert_eq!(target.expected_sha256.as_deref(), Some("AB12"));
        assert_eq!(target.destination, Path::new("/staging/v1.3.0/tool-linux-x64"));
        assert_eq!(target.partial_path(), Path::new("/staging/v1.3.0/tool-linux-x64.part"));
    }

    #[tokio::test]
    async fn test_manifest_entry_without_url_uses_release_asset() {
        let client = MockHttpClient::new();
        client.on(
            MANIFEST_URL,
            MockResponse::json(&serde_json::json!({"assets": [{"name": "tool-linux-x64", "sha256": "ff"}]})),
        );

        let (target, _) = resolve(client, None).await;
        let target = target.unwrap();
        assert_eq!(target.url, ASSET_URL);
        assert_eq!(target.expected_sha256.as_deref(), Some("ff"));
    }

    #[tokio::test]
    async fn test_missing_manifest_falls_back_without_checksum() {
        let client = MockHttpClient::new();

        let (target, requests) = resolve(client, None).await;
        let target = target.unwrap();
        assert_eq!(target.url, ASSET_URL);
        assert_eq!(target.expected_sha256, None);
        assert_eq!(requests, 1);
    }

    #[tokio::test]
    async fn test_malformed_manifest_falls_back() {
        let client = MockHttpClient::new();
        client.on(MANIFEST_URL, MockResponse::ok(b"<html>".to_vec()));

        let (target, _) = resolve(client, None).await;
        assert_eq!(target.unwrap().expected_sha256, None);
    }

    #[tokio::test]
    async fn test_signature_not_fetched_without_key() {
        let client = MockHttpClient::new();
        client.on(MANIFEST_URL, MockResponse::json(&serde_json::json!({"assets": []})));

        let (_, requests) = resolve(client, None).await;
        assert_eq!(requests, 1);
    }

    #[tokio::test]
    async fn test_missing_signature_with_key_fails_closed() {
        let client = MockHttpClient::new();
        client.on(MANIFEST_URL, MockResponse::json(&serde_json::json!({"assets": []})));

        let (result, _) = resolve(client, Some("AAAA")).await;
        assert!(matches!(result, Err(UpgradeError::SignatureVerificationFailed)));
    }

    #[test]
    fn test_release_staging_dir_is_per_tag() {
        let staging = Path::new("/staging");
        let mut info = release();
        assert_eq!(release_staging_dir(staging, &info), Path::new("/staging/v1.3.0"));

        info.tag = "release/2024 spring".into();
        assert_eq!(release_staging_dir(staging, &info), Path::new("/staging/release_2024_spring"));

        info.tag = "..".into();
        assert_eq!(release_staging_dir(staging, &info), Path::new("/staging/_"));
    }

    #[tokio::test]
    async fn test_asset_not_found() {
        let client = MockHttpClient::new();
        let transport = ResilientTransport::new(client, RetryPolicy::immediate(0));
        let resolver = AssetResolver::new(&transport, "https://dl.test", "tool", Duration::from_secs(5));

        let err = resolver
            .resolve(&repo(), &release(), PlatformTag::WinX64, Path::new("/staging"))
            .await
            .unwrap_err();
        assert!(matches!(err, UpgradeError::AssetNotFound { name } if name == "tool-win-x64.exe"));
    }
}
