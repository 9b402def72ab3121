//! Command-line interface for selfup.
//!
//! The binary is a thin shell around the [`upgrade`](crate::upgrade) engine:
//! it loads configuration, describes the running process and prints what an
//! update attempt did.
//!
//! # Global Options
//!
//! - `--verbose` - Enable debug logging on stderr
//! - `--quiet` - Suppress logging entirely; command output is still printed
//!
//! Logging goes to stderr so that `selfup upgrade --json` keeps stdout
//! machine-readable. `RUST_LOG` takes precedence over both flags.
//!
//! # Examples
//!
//! ```bash
//! selfup upgrade              # update if a newer release exists
//! selfup upgrade --force      # ignore the check interval, reinstall if needed
//! selfup upgrade --check      # report whether an update is available
//! selfup upgrade --status     # show version, platform and last check
//! selfup --quiet upgrade --json
//! ```

mod upgrade;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;

pub use upgrade::UpgradeArgs;

/// Top-level command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "selfup",
    about = "Self-update engine for packaged command-line tools",
    version,
    long_about = "selfup checks a GitHub repository for newer releases, downloads the asset for the \
                  running platform, verifies it and swaps it into place of the running executable."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output for debugging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress log output. Command results are still printed.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Update the running executable to the latest release.
    ///
    /// See [`UpgradeArgs`] for the available options.
    Upgrade(UpgradeArgs),
}

impl Cli {
    /// Log level selected by the verbosity flags.
    ///
    /// `None` means logging is disabled.
    #[must_use]
    pub fn log_level(&self) -> Option<Level> {
        if self.verbose {
            Some(Level::DEBUG)
        } else if self.quiet {
            None
        } else {
            Some(Level::INFO)
        }
    }

    /// Whether progress bars may be drawn.
    #[must_use]
    pub fn show_progress(&self) -> bool {
        !self.quiet
    }

    /// Run the selected command.
    pub async fn execute(self) -> Result<()> {
        let show_progress = self.show_progress();
        match self.command {
            Commands::Upgrade(args) => upgrade::execute(args, show_progress).await,
        }
    }
}
