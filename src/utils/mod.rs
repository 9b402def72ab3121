//! Utility modules shared by the upgrade engine and the CLI.
//!
//! - [`fs`] - atomic private writes and the home directory
//! - [`progress`] - download progress bars

pub mod fs;
pub mod progress;
