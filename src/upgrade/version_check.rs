//! Release lookup and version comparison.
//!
//! The latest release is read from the GitHub REST API
//! (`GET {api_base}/repos/{owner}/{repo}/releases/latest`). Versions are
//! compared on their numeric `major.minor.patch` core only: a leading `v`
//! and any pre-release or build suffix are ignored, and missing components
//! count as zero, so `"v1.2"`, `"1.2.0"` and `"1.2.0-rc.1"` are all equal.

use crate::core::error::{Result, UpgradeError};
use crate::upgrade::transport::{HttpClient, HttpRequest, ResilientTransport};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// Parse the numeric core of a version string, leniently.
///
/// Non-numeric components and anything after the first `-` or `+` are
/// ignored. A component that starts with digits uses those digits
/// (`"3rc1"` is 3); one that doesn't is 0.
///
/// # Examples
///
/// ```rust
/// use selfup::upgrade::version_check::parse_lenient;
///
/// assert_eq!(parse_lenient("v1.2").to_string(), "1.2.0");
/// assert_eq!(parse_lenient("2.0.1-beta+build.5").to_string(), "2.0.1");
/// ```
pub fn parse_lenient(raw: &str) -> Version {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let core = trimmed.split(['-', '+']).next().unwrap_or_default();

    let mut parts = [0u64; 3];
    for (slot, piece) in parts.iter_mut().zip(core.split('.')) {
        let digits: String = piece.chars().take_while(|c| c.is_ascii_digit()).collect();
        *slot = digits.parse().unwrap_or(0);
    }

    Version::new(parts[0], parts[1], parts[2])
}

/// Order two version strings by their numeric core.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    parse_lenient(a).cmp(&parse_lenient(b))
}

/// `true` when `a` is strictly older than `b`.
pub fn semver_less(a: &str, b: &str) -> bool {
    compare_versions(a, b) == Ordering::Less
}

/// `true` when `remote` is strictly newer than `current`.
pub fn is_newer(remote: &str, current: &str) -> bool {
    semver_less(current, remote)
}

/// A GitHub `owner/repo` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoSlug {
    /// Account or organization.
    pub owner: String,
    /// Repository name.
    pub repo: String,
}

impl RepoSlug {
    /// Parse `owner/repo` or a GitHub repository URL.
    ///
    /// Accepted forms:
    ///
    /// - `owner/repo`
    /// - `https://github.com/owner/repo` (optionally ending in `.git` or `/`)
    /// - `git+https://github.com/owner/repo.git`
    /// - `git@github.com:owner/repo.git`
    ///
    /// Returns `None` for anything else.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        let input = input.strip_prefix("git+").unwrap_or(input);

        let path = if let Some(rest) = input.strip_prefix("git@github.com:") {
            rest.to_string()
        } else if input.contains("://") {
            let url = reqwest::Url::parse(input).ok()?;
            match url.host_str() {
                Some("github.com" | "www.github.com") => {}
                _ => return None,
            }
            let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
            if segments.len() < 2 {
                return None;
            }
            format!("{}/{}", segments[0], segments[1])
        } else {
            input.to_string()
        };

        let path = path.trim_end_matches('/');
        let path = path.strip_suffix(".git").unwrap_or(path);
        let (owner, repo) = path.split_once('/')?;
        if !is_valid_component(owner) || !is_valid_component(repo) {
            return None;
        }

        Some(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })
    }
}

fn is_valid_component(part: &str) -> bool {
    !part.is_empty()
        && part != "."
        && part != ".."
        && part.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for RepoSlug {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

/// A downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    /// File name.
    pub name: String,
    /// Direct download URL.
    pub download_url: String,
}

/// The latest release as reported by the release index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Version without a leading `v`.
    pub version: String,
    /// Tag exactly as published, used to build download URLs.
    pub tag: String,
    /// Attached files.
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    /// Find an attached file by exact name.
    pub fn asset(&self, name: &str) -> Option<&ReleaseAsset> {
        self.assets.iter().find(|asset| asset.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct GitHubRelease {
    tag_name: Option<String>,
    name: Option<String>,
    #[serde(default)]
    assets: Vec<GitHubAsset>,
}

#[derive(Debug, Deserialize)]
struct GitHubAsset {
    name: String,
    browser_download_url: String,
}

impl TryFrom<GitHubRelease> for ReleaseInfo {
    type Error = UpgradeError;

    fn try_from(release: GitHubRelease) -> Result<Self> {
        let tag = release
            .tag_name
            .filter(|t| !t.trim().is_empty())
            .or(release.name.filter(|n| !n.trim().is_empty()))
            .ok_or(UpgradeError::MissingReleaseVersion)?;
        let tag = tag.trim().to_string();
        let version = tag.strip_prefix('v').unwrap_or(&tag).to_string();

        Ok(Self {
            version,
            tag,
            assets: release
                .assets
                .into_iter()
                .map(|asset| ReleaseAsset {
                    name: asset.name,
                    download_url: asset.browser_download_url,
                })
                .collect(),
        })
    }
}

/// Queries the release index for the latest release of a repository.
pub struct ReleaseResolver<'a, C> {
    transport: &'a ResilientTransport<C>,
    api_base: &'a str,
    timeout: Duration,
}

impl<'a, C: HttpClient> ReleaseResolver<'a, C> {
    /// A resolver against `api_base` (e.g. `https://api.github.com`).
    pub fn new(transport: &'a ResilientTransport<C>, api_base: &'a str, timeout: Duration) -> Self {
        Self {
            transport,
            api_base,
            timeout,
        }
    }

    /// URL of the latest-release endpoint for `repo`.
    pub fn latest_release_url(&self, repo: &RepoSlug) -> String {
        format!(
            "{}/repos/{}/{}/releases/latest",
            self.api_base.trim_end_matches('/'),
            repo.owner,
            repo.repo
        )
    }

    /// Fetch the latest release of `repo`.
    ///
    /// # Errors
    ///
    /// - [`UpgradeError::HttpStatus`] for a non-2xx response
    /// - [`UpgradeError::Json`] for a malformed body
    /// - [`UpgradeError::MissingReleaseVersion`] when the release has no tag or name
    /// - [`UpgradeError::Transport`] when retries are exhausted
    pub async fn latest_release(&self, repo: &RepoSlug) -> Result<ReleaseInfo> {
        let url = self.latest_release_url(repo);
        debug!(%url, "Fetching latest release");

        let (status, body) = self
            .transport
            .get_bytes(HttpRequest::get(&url).with_timeout(self.timeout))
            .await?;
        if !(200..300).contains(&status) {
            return Err(UpgradeError::HttpStatus { status, url });
        }

        let release: GitHubRelease = serde_json::from_slice(&body)?;
        let release = ReleaseInfo::try_from(release)?;
        info!(repo = %repo, version = %release.version, "Latest release resolved");
        Ok(release)
    }

    /// Version string of the latest release of `repo`.
    pub async fn latest_version(&self, repo: &RepoSlug) -> Result<String> {
        Ok(self.latest_release(repo).await?.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, MockResponse};
    use crate::upgrade::transport::RetryPolicy;

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1", "1.0.0"), Ordering::Equal);
        assert_eq!(compare_versions("", "0.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_prefix_and_suffix_ignored() {
        assert_eq!(compare_versions("v1.3.0", "1.3.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.3.0-beta.2", "1.3.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.3.0+build.7", "1.3.0"), Ordering::Equal);
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        assert!(semver_less("1.2.9", "1.2.10"));
        assert!(semver_less("1.9.0", "1.10.0"));
        assert!(semver_less("9.0.0", "10.0.0"));
        assert!(!semver_less("1.10.0", "1.9.0"));
    }

    #[test]
    fn test_single_component_difference_matches_numeric() {
        for a in 0..12u64 {
            for b in 0..12u64 {
                assert_eq!(semver_less(&format!("1.{a}.3"), &format!("1.{b}.3")), a < b);
                assert_eq!(semver_less(&format!("{a}.0"), &format!("{b}.0.0")), a < b);
            }
        }
    }

    #[test]
    fn test_is_newer() {
        assert!(is_newer("1.3.0", "1.2.0"));
        assert!(!is_newer("1.2.0", "1.2.0"));
        assert!(!is_newer("1.1.9", "1.2.0"));
    }

    #[test]
    fn test_repo_slug_forms() {
        let expected = Some(RepoSlug {
            owner: "acme".into(),
            repo: "tool".into(),
        });
        assert_eq!(RepoSlug::parse("acme/tool"), expected);
        assert_eq!(RepoSlug::parse("https://github.com/acme/tool"), expected);
        assert_eq!(RepoSlug::parse("https://github.com/acme/tool.git"), expected);
        assert_eq!(RepoSlug::parse("https://github.com/acme/tool/"), expected);
        assert_eq!(RepoSlug::parse("git+https://github.com/acme/tool.git"), expected);
        assert_eq!(RepoSlug::parse("git@github.com:acme/tool.git"), expected);
    }

    #[test]
    fn test_repo_slug_rejects() {
        assert_eq!(RepoSlug::parse(""), None);
        assert_eq!(RepoSlug::parse("acme"), None);
        assert_eq!(RepoSlug::parse("acme/tool/extra"), None);
        assert_eq!(RepoSlug::parse("https://gitlab.com/acme/tool"), None);
        assert_eq!(RepoSlug::parse("https://github.com/acme"), None);
        assert_eq!(RepoSlug::parse("acme/../tool"), None);
        assert_eq!(RepoSlug::parse("ac me/tool"), None);
    }

    fn transport(client: MockHttpClient) -> ResilientTransport<MockHttpClient> {
        ResilientTransport::new(client, RetryPolicy::immediate(2))
    }

    #[tokio::test]
    async fn test_latest_release_parses_index() {
        let client = MockHttpClient::new();
        client.on(
            "https://api.test/repos/acme/tool/releases/latest",
            MockResponse::json(&serde_json::json!({
                "tag_name": "v1.3.0",
                "assets": [
                    {"name": "tool-linux-x64", "browser_download_url": "https://dl.test/tool-linux-x64"}
                ]
            })),
        );
        let transport = transport(client);
        let resolver = ReleaseResolver::new(&transport, "https://api.test/", Duration::from_secs(5));
        let repo = RepoSlug::parse("acme/tool").unwrap();

        let release = resolver.latest_release(&repo).await.unwrap();
        assert_eq!(release.version, "1.3.0");
        assert_eq!(release.tag, "v1.3.0");
        assert_eq!(
            release.asset("tool-linux-x64").map(|a| a.download_url.as_str()),
            Some("https://dl.test/tool-linux-x64")
        );
    }

    #[tokio::test]
    async fn test_latest_release_falls_back_to_name() {
        let client = MockHttpClient::new();
        client.on(
            "https://api.test/repos/acme/tool/releases/latest",
            MockResponse::json(&serde_json::json!({"tag_name": "", "name": "2.0.0"})),
        );
        let transport = transport(client);
        let resolver = ReleaseResolver::new(&transport, "https://api.test", Duration::from_secs(5));
        let repo = RepoSlug::parse("acme/tool").unwrap();

        assert_eq!(resolver.latest_version(&repo).await.unwrap(), "2.0.0");
    }

    #[tokio::test]
    async fn test_latest_release_not_found_is_not_retried() {
        let client = MockHttpClient::new();
        client.on("https://api.test/repos/acme/tool/releases/latest", MockResponse::status(404));
        let transport = transport(client);
        let resolver = ReleaseResolver::new(&transport, "https://api.test", Duration::from_secs(5));
        let repo = RepoSlug::parse("acme/tool").unwrap();

        let err = resolver.latest_release(&repo).await.unwrap_err();
        assert!(matches!(err, UpgradeError::HttpStatus { status: 404, .. }));
        assert_eq!(transport.client().request_count(), 1);
    }
}
