//! selfup - a self-update engine for packaged command-line tools
//!
//! A binary built with selfup can keep itself current without a package
//! manager: it asks the GitHub release index for the latest version,
//! downloads the asset published for its platform, verifies it and swaps it
//! in place of the running executable.
//!
//! # Modules
//!
//! - [`upgrade`] - the update engine: release lookup, download, verification and swap
//! - [`config`] - settings from the environment and `<home>/config.toml`
//! - [`core`] - error types and user-facing error rendering
//! - [`cli`] - the `selfup` command line
//! - [`utils`] - filesystem and progress helpers
//! - [`constants`] - timeouts, retry counts and file names
//!
//! # Embedding
//!
//! Host applications typically run one attempt at startup and ignore the
//! outcome unless it replaced the binary:
//!
//! ```rust,no_run
//! use selfup::config::UpgradeConfig;
//! use selfup::upgrade::{SelfUpdater, UpdateContext};
//!
//! # async fn startup() -> anyhow::Result<()> {
//! let config = UpgradeConfig::load().await?;
//! let updater = SelfUpdater::new(UpdateContext::detect(config)?)?;
//! if updater.check_and_update(false).await.replaced {
//!     eprintln!("Updated; the new version takes effect on the next start");
//! }
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod upgrade;
pub mod utils;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
