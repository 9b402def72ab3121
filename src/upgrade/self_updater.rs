//! The update flow.
//!
//! [`SelfUpdater::check_and_update`] runs one update attempt in strict
//! sequence:
//!
//! ```text
//! packaged? -> platform supported? -> repo configured? -> throttle
//!   -> record check -> lock -> latest release -> newer?
//!   -> resolve asset -> download -> verify checksum -> swap
//! ```
//!
//! Every step can end the attempt; every ending is an [`UpdateOutcome`].
//! Nothing is returned as an error and nothing panics, so the host can call
//! this from a startup hook and carry on with whatever binary it has.

use crate::config::{ENV_PACKAGED, ENV_VERSION, UpgradeConfig};
use crate::core::error::{Result, UpgradeError};
use crate::upgrade::assets::AssetResolver;
use crate::upgrade::download::{ResumableDownloader, discard_stale_downloads};
use crate::upgrade::lock::UpdateLock;
use crate::upgrade::platform::PlatformTag;
use crate::upgrade::state::{UpdateStateStore, now_epoch_millis};
use crate::upgrade::swap::{BinarySwapper, SwapStrategy};
use crate::upgrade::transport::{HttpClient, ReqwestClient, ResilientTransport, TransportError};
use crate::upgrade::verification::ChecksumVerifier;
use crate::upgrade::version_check::{ReleaseInfo, ReleaseResolver, is_newer};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Result of an update attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    /// Whether the executable on disk was replaced.
    pub replaced: bool,
    /// Why nothing was replaced, or why replacement was deferred.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl UpdateOutcome {
    /// The executable was replaced.
    pub fn replaced() -> Self {
        Self {
            replaced: true,
            reason: None,
        }
    }

    /// Nothing was replaced because of `err`.
    pub fn from_error(err: &UpgradeError) -> Self {
        Self {
            replaced: false,
            reason: Some(err.to_string()),
        }
    }
}

/// Everything the update flow needs to know about the running process.
///
/// Built once per invocation and handed to [`SelfUpdater`].
#[derive(Debug, Clone)]
pub struct UpdateContext {
    /// Version of the running binary.
    pub current_version: String,
    /// Path of the running executable (the swap target).
    pub exe_path: PathBuf,
    /// Whether the process runs from a packaged binary. Updates are a no-op otherwise.
    pub packaged: bool,
    /// Platform of the running process; `None` when no asset is published for it.
    pub platform: Option<PlatformTag>,
    /// Engine settings.
    pub config: UpgradeConfig,
}

impl UpdateContext {
    /// A packaged context for the current platform.
    pub fn new(current_version: impl Into<String>, exe_path: impl Into<PathBuf>, config: UpgradeConfig) -> Self {
        Self {
            current_version: current_version.into(),
            exe_path: exe_path.into(),
            packaged: true,
            platform: PlatformTag::current(),
            config,
        }
    }

    /// Override the platform tag.
    #[must_use]
    pub fn with_platform(mut self, platform: Option<PlatformTag>) -> Self {
        self.platform = platform;
        self
    }

    /// Override packaged detection.
    #[must_use]
    pub fn with_packaged(mut self, packaged: bool) -> Self {
        self.packaged = packaged;
        self
    }

    /// Describe the running process.
    ///
    /// The version comes from `SELFUP_VERSION` or the package metadata.
    /// `SELFUP_PACKAGED` decides packaged detection; without it, release
    /// builds count as packaged.
    pub fn detect(config: UpgradeConfig) -> Result<Self> {
        Self::detect_with(config, |key| std::env::var(key).ok())
    }

    /// Like [`detect`](Self::detect), reading variables through `lookup`.
    pub fn detect_with<F>(config: UpgradeConfig, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let current_version = lookup(ENV_VERSION)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());

        let packaged = match lookup(ENV_PACKAGED).as_deref().map(str::trim) {
            Some("1" | "true" | "yes") => true,
            Some("0" | "false" | "no") => false,
            _ => !cfg!(debug_assertions),
        };

        Ok(Self {
            current_version,
            exe_path: std::env::current_exe()?,
            packaged,
            platform: PlatformTag::current(),
            config,
        })
    }
}

/// Runs update attempts for one process.
///
/// # Examples
///
/// ```rust,no_run
/// use selfup::config::UpgradeConfig;
/// use selfup::upgrade::{SelfUpdater, UpdateContext};
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = UpgradeConfig::load().await?;
/// let updater = SelfUpdater::new(UpdateContext::detect(config)?)?;
///
/// let outcome = updater.check_and_update(false).await;
/// if let Some(reason) = &outcome.reason {
///     println!("Not updated: {reason}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct SelfUpdater<C> {
    context: UpdateContext,
    transport: ResilientTransport<C>,
    state: UpdateStateStore,
    show_progress: bool,
}

impl SelfUpdater<ReqwestClient> {
    /// An updater talking HTTPS through `reqwest`.
    pub fn new(context: UpdateContext) -> Result<Self> {
        let client = ReqwestClient::new().map_err(|err| TransportError::network("client setup", &err))?;
        Ok(Self::with_client(context, client))
    }
}

impl<C: HttpClient> SelfUpdater<C> {
    /// An updater using `client` for every request.
    pub fn with_client(context: UpdateContext, client: C) -> Self {
        let transport = ResilientTransport::new(client, context.config.metadata_policy());
        let state = UpdateStateStore::new(&context.config.home_dir).with_interval(context.config.check_interval());
        Self {
            context,
            transport,
            state,
            show_progress: false,
        }
    }

    /// Draw a progress bar while downloading.
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// The process description this updater acts on.
    pub fn context(&self) -> &UpdateContext {
        &self.context
    }

    /// The transport, for inspecting the underlying client.
    pub fn transport(&self) -> &ResilientTransport<C> {
        &self.transport
    }

    /// The state store gating check frequency.
    pub fn state(&self) -> &UpdateStateStore {
        &self.state
    }

    /// Run one update attempt.
    ///
    /// `force` bypasses the throttle and reinstalls even when the latest
    /// release is not newer. The check time is recorded either way.
    pub async fn check_and_update(&self, force: bool) -> UpdateOutcome {
        match self.run(force).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_expected() => {
                debug!(reason = %err, "Update skipped");
                UpdateOutcome::from_error(&err)
            }
            Err(err) => {
                warn!(error = %err, "Update failed");
                UpdateOutcome::from_error(&err)
            }
        }
    }

    /// Fetch the latest release, without throttling, locking or downloading.
    ///
    /// Returns `Some` when it is newer than the running version.
    pub async fn check_for_update(&self) -> Result<Option<ReleaseInfo>> {
        let release = self.latest_release().await?;
        Ok(is_newer(&release.version, &self.context.current_version).then_some(release))
    }

    /// Fetch the latest release of the configured repository.
    pub async fn latest_release(&self) -> Result<ReleaseInfo> {
        let config = &self.context.config;
        let repo = config.repo_slug().ok_or(UpgradeError::NoRepoConfigured)?;
        ReleaseResolver::new(&self.transport, &config.api_base, config.request_timeout())
            .latest_release(&repo)
            .await
    }

    async fn run(&self, force: bool) -> Result<UpdateOutcome> {
        let context = &self.context;
        let config = &context.config;

        if !context.packaged {
            return Err(UpgradeError::NotPackaged);
        }
        let platform = context.platform.ok_or(UpgradeError::UnsupportedPlatform)?;
        let repo = config.repo_slug().ok_or(UpgradeError::NoRepoConfigured)?;

        if !self.state.should_check(force).await {
            return Err(UpgradeError::CheckedRecently);
        }
        self.state.record_check(now_epoch_millis()).await;

        let Some(_lock) = UpdateLock::try_acquire(&config.home_dir).await? else {
            return Err(UpgradeError::UpdateInProgress);
        };

        let release = ReleaseResolver::new(&self.transport, &config.api_base, config.request_timeout())
            .latest_release(&repo)
            .await?;
        if !is_newer(&release.version, &context.current_version) {
            if !force {
                return Err(UpgradeError::AlreadyUpToDate);
            }
            info!(version = %release.version, "Forced reinstall of current release");
        }

        let target = AssetResolver::new(
            &self.transport,
            &config.download_base,
            &config.bin_name,
            config.request_timeout(),
        )
        .with_public_key(config.public_key())
        .resolve(&repo, &release, platform, &config.staging_dir())
        .await?;

        if let Some(release_dir) = target.destination.parent() {
            if let Err(err) = discard_stale_downloads(&config.staging_dir(), release_dir).await {
                debug!(error = %err, "Failed to clean staging directory");
            }
        }

        info!(from = %context.current_version, to = %release.version, url = %target.url, "Downloading update");
        ResumableDownloader::new(&self.transport, config.download_policy())
            .with_progress(self.show_progress)
            .download(&target.url, &target.destination)
            .await?;

        match &target.expected_sha256 {
            Some(expected) => ChecksumVerifier::ensure_checksum(&target.destination, expected).await?,
            None => info!("Release publishes no checksum for this asset; skipping checksum verification"),
        }

        let swap = BinarySwapper::new(&context.exe_path, SwapStrategy::for_platform(platform))
            .swap(&target.destination)
            .await?;

        if let Err(err) = tokio::fs::remove_file(&target.destination).await {
            debug!(error = %err, "Failed to remove downloaded asset");
        }

        match swap.staged_path {
            Some(staged) if !swap.replaced => Err(UpgradeError::WindowsSwapDeferred { staged }),
            _ => {
                info!(from = %context.current_version, to = %release.version, "Update installed");
                Ok(UpdateOutcome::replaced())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, ReleaseFixture};
    use crate::upgrade::transport::RetryPolicy;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(temp: &TempDir, release: &ReleaseFixture) -> UpdateContext {
        let exe = temp.path().join("bin").join(&release.bin_name);
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, b"old").unwrap();

        let mut config = UpgradeConfig::with_home(temp.path().join("home"));
        config.repo = Some(release.slug());
        config.api_base = release.api_base.clone();
        config.download_base = release.download_base.clone();
        config.bin_name = release.bin_name.clone();
        config.retries = 0;
        config.download_retries = 0;

        UpdateContext::new("1.2.0", exe, config).with_platform(Some(release.platform))
    }

    #[test]
    fn test_outcome_json() {
        let outcome = UpdateOutcome::replaced();
        assert_eq!(serde_json::to_string(&outcome).unwrap(), r#"{"replaced":true}"#);

        let outcome = UpdateOutcome::from_error(&UpgradeError::AlreadyUpToDate);
        assert_eq!(
            serde_json::to_string(&outcome).unwrap(),
            r#"{"replaced":false,"reason":"already up to date"}"#
        );
    }

    #[tokio::test]
    async fn test_not_packaged_is_a_no_op() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.3.0", b"new".to_vec());
        let client = Arc::new(MockHttpClient::new());
        let updater = SelfUpdater::with_client(context(&temp, &release).with_packaged(false), client.clone());

        let outcome = updater.check_and_update(true).await;
        assert_eq!(outcome.reason.as_deref(), Some("not a packaged binary"));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_no_repo_configured() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.3.0", b"new".to_vec());
        let mut ctx = context(&temp, &release);
        ctx.config.repo = Some("nonsense".into());
        let client = Arc::new(MockHttpClient::new());
        let updater = SelfUpdater::with_client(ctx, client.clone());

        let outcome = updater.check_and_update(true).await;
        assert_eq!(outcome.reason.as_deref(), Some("no update repo configured"));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_already_up_to_date() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.2.0", b"same".to_vec());
        let client = Arc::new(MockHttpClient::new());
        release.serve(&client);
        let updater = SelfUpdater::with_client(context(&temp, &release), client.clone());

        let outcome = updater.check_and_update(false).await;
        assert_eq!(outcome, UpdateOutcome::from_error(&UpgradeError::AlreadyUpToDate));
        assert_eq!(client.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_force_reinstalls_same_version() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.2.0", b"same version rebuilt".to_vec());
        let client = Arc::new(MockHttpClient::new());
        release.serve(&client);
        let ctx = context(&temp, &release);
        let exe = ctx.exe_path.clone();
        let updater = SelfUpdater::with_client(ctx, client);

        let outcome = updater.check_and_update(true).await;
        assert!(outcome.replaced, "{outcome:?}");
        assert_eq!(std::fs::read(exe).unwrap(), b"same version rebuilt");
    }

    #[tokio::test]
    async fn test_concurrent_update_is_refused() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.3.0", b"new".to_vec());
        let client = Arc::new(MockHttpClient::new());
        let ctx = context(&temp, &release);
        let _held = UpdateLock::try_acquire(&ctx.config.home_dir).await.unwrap().unwrap();
        let updater = SelfUpdater::with_client(ctx, client.clone());

        let outcome = updater.check_and_update(true).await;
        assert_eq!(outcome.reason.as_deref(), Some("another update is already in progress"));
        assert_eq!(client.request_count(), 0);
    }

    #[tokio::test]
    async fn test_windows_swap_is_deferred() {
        let temp = TempDir::new().unwrap();
        let mut release = ReleaseFixture::new("1.3.0", b"windows build".to_vec());
        release.platform = PlatformTag::WinX64;
        let client = Arc::new(MockHttpClient::new());
        release.serve(&client);
        let ctx = context(&temp, &release);
        let exe = ctx.exe_path.clone();
        let updater = SelfUpdater::with_client(ctx, client);

        let outcome = updater.check_and_update(false).await;
        assert!(!outcome.replaced);
        assert!(outcome.reason.unwrap().starts_with("restart required to finalize update"));
        assert_eq!(std::fs::read(&exe).unwrap(), b"old");
        assert_eq!(std::fs::read(exe.with_extension("new.exe")).unwrap(), b"windows build");
    }

    #[tokio::test]
    async fn test_check_for_update() {
        let temp = TempDir::new().unwrap();
        let release = ReleaseFixture::new("1.3.0", b"new".to_vec());
        let client = Arc::new(MockHttpClient::new());
        release.serve(&client);
        let updater = SelfUpdater::with_client(context(&temp, &release), client);

        let latest = updater.check_for_update().await.unwrap();
        assert_eq!(latest.map(|r| r.version).as_deref(), Some("1.3.0"));
    }

    #[test]
    fn test_detect_with_overrides() {
        let config = UpgradeConfig::with_home("/tmp/selfup-test");
        let ctx = UpdateContext::detect_with(config, |key| match key {
            ENV_VERSION => Some("9.9.9".to_string()),
            ENV_PACKAGED => Some("0".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(ctx.current_version, "9.9.9");
        assert!(!ctx.packaged);
        assert_eq!(ctx.config.retries, RetryPolicy::metadata().retries);
    }
}
