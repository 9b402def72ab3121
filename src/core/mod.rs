//! Core types shared by the upgrade engine and the command line.
//!
//! - [`error`] - the [`UpgradeError`] taxonomy and CLI error rendering

pub mod error;

pub use error::{ErrorContext, Result, UpgradeError, is_retryable_status, user_friendly_error};
