//! Global constants used throughout the selfup codebase.
//!
//! This module contains throttle windows, retry parameters, file names and
//! other values shared by several upgrade components. Keeping them in one
//! place makes the update protocol easy to audit.

use std::time::Duration;

/// Minimum interval between two unforced update checks (24 hours).
pub const CHECK_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Age after which a `.part` file is considered abandoned (7 days).
///
/// Partial downloads younger than this are resumed from their current size;
/// older ones are deleted before the download starts.
pub const PARTIAL_MAX_AGE: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Retries for release-index, manifest and signature requests.
pub const METADATA_RETRIES: u32 = 3;

/// Base backoff delay for metadata requests (250ms).
pub const METADATA_BASE_DELAY_MS: u64 = 250;

/// Retries for asset downloads.
pub const DOWNLOAD_RETRIES: u32 = 2;

/// Base backoff delay for asset downloads (300ms).
pub const DOWNLOAD_BASE_DELAY_MS: u64 = 300;

/// Upper bound of the random jitter added to every backoff delay (100ms).
pub const MAX_JITTER_MS: u64 = 100;

/// Whole-request timeout for metadata requests (30 seconds).
///
/// Downloads only get [`CONNECT_TIMEOUT`]; a large asset on a slow link may
/// legitimately take longer than any fixed bound.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// TCP/TLS connect timeout applied to every request (15 seconds).
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default GitHub REST API host.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Default host serving release downloads.
pub const DEFAULT_DOWNLOAD_BASE: &str = "https://github.com";

/// Default name of the shipped binary, used to build asset names.
pub const DEFAULT_BIN_NAME: &str = "selfup";

/// Directory under the user's home used when no override is set.
pub const DEFAULT_HOME_DIR_NAME: &str = ".selfup";

/// Fixed name of the release manifest asset.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Fixed name of the detached manifest signature asset.
pub const MANIFEST_SIGNATURE_FILE_NAME: &str = "manifest.sig";

/// Name of the persisted update state file inside the home directory.
pub const STATE_FILE_NAME: &str = "update-state.json";

/// Name of the advisory lock file guarding the update sequence.
pub const LOCK_FILE_NAME: &str = "update.lock";

/// Name of the optional configuration file inside the home directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Directory under the home directory where assets are downloaded.
pub const STAGING_DIR_NAME: &str = "updates";

/// User agent sent with every request; GitHub rejects requests without one.
pub const USER_AGENT: &str = concat!("selfup/", env!("CARGO_PKG_VERSION"));
