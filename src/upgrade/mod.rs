//! Self-update engine.
//!
//! Checks whether a newer release exists, resolves the asset for the running
//! platform, downloads it with resume support, verifies it, and swaps it in
//! place of the running executable. No package manager and no elevated
//! privileges are involved, and a failure at any step leaves the installed
//! binary as it was.
//!
//! # Update Flow
//!
//! ```text
//! 1. Gate
//!    ├── Packaged binary, supported platform, repository configured
//!    ├── Throttle: at most one unforced check per 24 hours
//!    └── Advisory lock against concurrent updates
//!
//! 2. Resolve
//!    ├── Latest release from the GitHub release index
//!    ├── Compare with the running version (major.minor.patch)
//!    └── Asset URL and checksum from manifest.json, or from the release index
//!
//! 3. Download
//!    ├── Stream into updates/<tag>/<asset>.part, resuming with a Range request
//!    └── Rename onto the final path once complete
//!
//! 4. Verify
//!    ├── Manifest signature (only when a public key is configured)
//!    └── SHA-256 of the download (when the manifest lists one)
//!
//! 5. Swap
//!    ├── POSIX: <exe>.new -> <exe>, previous binary kept as <exe>.old
//!    └── Windows: staged as <exe>.new.exe, restart required
//! ```
//!
//! # Failure Model
//!
//! [`SelfUpdater::check_and_update`] never fails: every early exit and every
//! error becomes an [`UpdateOutcome`] with `replaced: false` and a reason.
//! Transient network failures (connection errors, HTTP 429, HTTP 5xx) are
//! retried with exponential backoff before they count.
//!
//! # Module Structure
//!
//! - [`state`]: last-check timestamp and throttling
//! - [`version_check`]: release index lookup and version ordering
//! - [`platform`]: platform tags and asset names
//! - [`assets`]: manifest handling and download target resolution
//! - [`transport`]: HTTP client seam and retry policy
//! - [`download`]: resumable downloads
//! - [`verification`]: checksum and signature verification
//! - [`swap`]: executable replacement
//! - [`lock`]: cross-process update lock
//! - [`self_updater`]: the orchestrating flow
//!
//! # Example
//!
//! ```rust,no_run
//! use selfup::config::UpgradeConfig;
//! use selfup::upgrade::{SelfUpdater, UpdateContext};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = UpgradeConfig::load().await?;
//! let updater = SelfUpdater::new(UpdateContext::detect(config)?)?;
//!
//! let outcome = updater.check_and_update(false).await;
//! println!("replaced: {}", outcome.replaced);
//! # Ok(())
//! # }
//! ```

pub mod assets;
pub mod download;
pub mod lock;
pub mod platform;
pub mod self_updater;
pub mod state;
pub mod swap;
pub mod transport;
pub mod verification;
pub mod version_check;

pub use assets::{AssetResolver, DownloadTarget, Manifest, ManifestAsset};
pub use download::{ResumableDownloader, discard_stale_downloads};
pub use lock::UpdateLock;
pub use platform::PlatformTag;
pub use self_updater::{SelfUpdater, UpdateContext, UpdateOutcome};
pub use state::{UpdateState, UpdateStateStore};
pub use swap::{BinarySwapper, SwapResult, SwapStrategy};
pub use transport::{
    HttpClient, HttpRequest, HttpResponse, ReqwestClient, ResilientTransport, RetryPolicy,
    TransportError,
};
pub use verification::{ChecksumVerifier, SignatureEnvelope, verify_signature};
pub use version_check::{ReleaseInfo, ReleaseResolver, RepoSlug, compare_versions, semver_less};
