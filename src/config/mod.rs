//! Configuration for the selfup update engine.
//!
//! Settings are layered, lowest to highest priority:
//!
//! 1. Built-in defaults
//! 2. The `[upgrade]` table of `<home>/config.toml`
//! 3. Environment variables
//!
//! ```toml
//! [upgrade]
//! repo = "selfup-dev/selfup"
//! public_key = "MCowBQYDK2VwAyEA..."
//! check_interval = 86400
//! retries = 3
//! ```
//!
//! # Environment Variables
//!
//! | Variable               | Setting                                   |
//! |------------------------|-------------------------------------------|
//! | `SELFUP_HOME`          | home directory (default `~/.selfup`)      |
//! | `SELFUP_UPDATE_REPO`   | `owner/repo` or GitHub URL                |
//! | `SELFUP_UPDATE_PUBKEY` | base64 SPKI Ed25519 public key            |
//! | `SELFUP_API_BASE`      | release index host                        |
//! | `SELFUP_DOWNLOAD_BASE` | release download host                     |
//!
//! When no repository is configured anywhere, the package metadata's
//! repository URL is used.

use crate::constants::{
    CHECK_INTERVAL, CONFIG_FILE_NAME, DEFAULT_API_BASE, DEFAULT_BIN_NAME, DEFAULT_DOWNLOAD_BASE,
    DOWNLOAD_BASE_DELAY_MS, DOWNLOAD_RETRIES, METADATA_BASE_DELAY_MS, METADATA_RETRIES,
    METADATA_TIMEOUT, STAGING_DIR_NAME,
};
use crate::upgrade::transport::RetryPolicy;
use crate::upgrade::version_check::RepoSlug;
use crate::utils::fs::default_home_dir;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Home directory override.
pub const ENV_HOME: &str = "SELFUP_HOME";
/// Update repository override.
pub const ENV_UPDATE_REPO: &str = "SELFUP_UPDATE_REPO";
/// Manifest signing key.
pub const ENV_UPDATE_PUBKEY: &str = "SELFUP_UPDATE_PUBKEY";
/// Release index host override.
pub const ENV_API_BASE: &str = "SELFUP_API_BASE";
/// Download host override.
pub const ENV_DOWNLOAD_BASE: &str = "SELFUP_DOWNLOAD_BASE";
/// Running version override.
pub const ENV_VERSION: &str = "SELFUP_VERSION";
/// Packaged-binary detection override (`1`/`0`).
pub const ENV_PACKAGED: &str = "SELFUP_PACKAGED";

/// Repository named in the package metadata, if any.
pub fn package_repository() -> Option<&'static str> {
    option_env!("CARGO_PKG_REPOSITORY").filter(|repo| !repo.trim().is_empty())
}

/// Update engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Directory holding the state file, lock file, config file and downloads.
    #[serde(skip)]
    pub home_dir: PathBuf,

    /// `owner/repo` (or a GitHub URL) publishing the releases.
    pub repo: Option<String>,

    /// Base64 SPKI Ed25519 key; when set, manifests must be signed.
    pub public_key: Option<String>,

    /// Release index host.
    pub api_base: String,

    /// Release download host.
    pub download_base: String,

    /// Binary name used to build asset names.
    pub bin_name: String,

    /// Seconds between two unforced update checks.
    pub check_interval: u64,

    /// Retries for release index, manifest and signature requests.
    pub retries: u32,

    /// Base backoff for metadata requests, in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Retries for asset downloads.
    pub download_retries: u32,

    /// Base backoff for asset downloads, in milliseconds.
    pub download_retry_base_delay_ms: u64,

    /// Whole-request timeout for metadata requests, in seconds.
    pub request_timeout: u64,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            home_dir: PathBuf::new(),
            repo: None,
            public_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
            bin_name: DEFAULT_BIN_NAME.to_string(),
            check_interval: CHECK_INTERVAL.as_secs(),
            retries: METADATA_RETRIES,
            retry_base_delay_ms: METADATA_BASE_DELAY_MS,
            download_retries: DOWNLOAD_RETRIES,
            download_retry_base_delay_ms: DOWNLOAD_BASE_DELAY_MS,
            request_timeout: METADATA_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    upgrade: Option<UpgradeConfig>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

impl UpgradeConfig {
    /// Defaults rooted at `home_dir`, without reading any file or variable.
    pub fn with_home(home_dir: impl Into<PathBuf>) -> Self {
        Self {
            home_dir: home_dir.into(),
            ..Self::default()
        }
    }

    /// Load from the process environment and `<home>/config.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined or the
    /// config file exists but cannot be read or parsed.
    pub async fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok()).await
    }

    /// Like [`load`](Self::load), reading variables through `lookup`.
    pub async fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home_dir = non_empty(lookup(ENV_HOME))
            .map(PathBuf::from)
            .or_else(default_home_dir)
            .with_context(|| format!("Could not determine the selfup home directory; set {ENV_HOME}"))?;

        let mut config = Self::load_file(&home_dir.join(CONFIG_FILE_NAME)).await?.unwrap_or_default();
        config.home_dir = home_dir;

        if let Some(repo) = non_empty(lookup(ENV_UPDATE_REPO)) {
            config.repo = Some(repo);
        }
        if let Some(key) = non_empty(lookup(ENV_UPDATE_PUBKEY)) {
            config.public_key = Some(key);
        }
        if let Some(api_base) = non_empty(lookup(ENV_API_BASE)) {
            config.api_base = api_base;
        }
        if let Some(download_base) = non_empty(lookup(ENV_DOWNLOAD_BASE)) {
            config.download_base = download_base;
        }
        config.repo = non_empty(config.repo.take()).or_else(|| package_repository().map(str::to_string));

        debug!(home = %config.home_dir.display(), repo = ?config.repo, "Loaded upgrade configuration");
        Ok(config)
    }

    /// Read the `[upgrade]` table from `path`; `None` when the file or table is absent.
    pub async fn load_file(path: &Path) -> Result<Option<Self>> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to read config from {}", path.display()));
            }
        };

        let file: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(file.upgrade)
    }

    /// The configured repository, when it parses as `owner/repo`.
    pub fn repo_slug(&self) -> Option<RepoSlug> {
        self.repo.as_deref().and_then(RepoSlug::parse)
    }

    /// The manifest signing key, when one is configured.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref().map(str::trim).filter(|key| !key.is_empty())
    }

    /// Minimum time between two unforced checks.
    pub const fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval)
    }

    /// Timeout for metadata requests.
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Retry policy for metadata requests.
    pub const fn metadata_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_base_delay_ms))
    }

    /// Retry policy for asset downloads.
    pub const fn download_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.download_retries, Duration::from_millis(self.download_retry_base_delay_ms))
    }

    /// Directory receiving downloaded assets.
    pub fn staging_dir(&self) -> PathBuf {
        self.home_dir.join(STAGING_DIR_NAME)
    }
}
