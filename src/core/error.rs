//! Error handling for selfup
//!
//! The upgrade engine reports every failure as an [`UpgradeError`]. The
//! variants mirror the states an update attempt can end in: some are
//! expected early exits (the binary is already current, the last check was
//! recent), others are real failures (checksum mismatch, network errors).
//!
//! [`UpgradeError`] never crosses the public update entry point:
//! [`SelfUpdater::check_and_update`](crate::upgrade::SelfUpdater::check_and_update)
//! maps each one into an [`UpdateOutcome`](crate::upgrade::UpdateOutcome) whose
//! `reason` is the variant's `Display` text. The CLI layer additionally uses
//! [`user_friendly_error`] to render its own `anyhow` errors with a
//! suggestion, the same way the rest of the command line does.

use crate::upgrade::transport::TransportError;
use colored::Colorize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Convenient result alias for upgrade operations.
pub type Result<T> = std::result::Result<T, UpgradeError>;

/// Every way an update attempt can stop.
///
/// # Early exits
///
/// [`NotPackaged`], [`UnsupportedPlatform`], [`NoRepoConfigured`],
/// [`CheckedRecently`], [`AlreadyUpToDate`] and [`UpdateInProgress`] are not
/// failures; [`is_expected`](Self::is_expected) returns `true` for them and
/// they are logged at debug level.
///
/// # Failures
///
/// Everything else aborts the attempt. None of them leave the running
/// executable modified: the swap is the last step and is only reached after
/// verification succeeded.
///
/// [`NotPackaged`]: UpgradeError::NotPackaged
/// [`UnsupportedPlatform`]: UpgradeError::UnsupportedPlatform
/// [`NoRepoConfigured`]: UpgradeError::NoRepoConfigured
/// [`CheckedRecently`]: UpgradeError::CheckedRecently
/// [`AlreadyUpToDate`]: UpgradeError::AlreadyUpToDate
/// [`UpdateInProgress`]: UpgradeError::UpdateInProgress
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// The process is not running from a packaged binary.
    #[error("not a packaged binary")]
    NotPackaged,

    /// The OS/architecture pair has no published asset.
    #[error("Unsupported platform")]
    UnsupportedPlatform,

    /// Neither an explicit override nor the package metadata named a repository.
    #[error("no update repo configured")]
    NoRepoConfigured,

    /// The throttle window has not elapsed since the last check.
    #[error("checked recently")]
    CheckedRecently,

    /// The remote release is not newer than the running version.
    #[error("already up to date")]
    AlreadyUpToDate,

    /// Another process holds the update lock.
    #[error("another update is already in progress")]
    UpdateInProgress,

    /// The release manifest could not be fetched or parsed.
    ///
    /// Recoverable: asset resolution falls back to the release index.
    #[error("manifest unavailable: {0}")]
    ManifestUnavailable(String),

    /// A public key is configured and the manifest signature did not verify.
    #[error("manifest_signature_verification_failed")]
    SignatureVerificationFailed,

    /// The release carries no asset for this platform.
    #[error("no release asset named {name}")]
    AssetNotFound {
        /// Expected asset file name.
        name: String,
    },

    /// The release index entry has neither `tag_name` nor `name`.
    #[error("latest release has no version tag")]
    MissingReleaseVersion,

    /// A non-retryable HTTP status was returned.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Response status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// A resumed download asked for a range past the end of the asset.
    #[error("range not satisfiable for {url}; partial download discarded")]
    RangeNotSatisfiable {
        /// Requested URL.
        url: String,
    },

    /// A 206 response did not resume at the requested offset.
    #[error(
        "server resumed {url} at {} instead of byte {requested}; partial download discarded",
        received.map_or_else(|| "an unknown offset".to_string(), |start| format!("byte {start}"))
    )]
    ContentRangeMismatch {
        /// Requested URL.
        url: String,
        /// Offset sent in the `Range` header.
        requested: u64,
        /// Start of the returned `Content-Range`, if any.
        received: Option<u64>,
    },

    /// The downloaded file does not hash to the expected digest.
    #[error("checksum mismatch (expected {expected}, got {actual})")]
    ChecksumMismatch {
        /// Expected SHA-256 digest (hex).
        expected: String,
        /// Actual SHA-256 digest (hex).
        actual: String,
    },

    /// The new binary is staged but the running executable cannot be replaced in place.
    #[error("restart required to finalize update (staged at {})", staged.display())]
    WindowsSwapDeferred {
        /// Location of the staged executable.
        staged: PathBuf,
    },

    /// The executable path cannot be used as a swap target.
    #[error("invalid executable path: {}", .0.display())]
    InvalidExecutablePath(PathBuf),

    /// Transport-level failure after retries were exhausted.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Filesystem failure.
    #[error("filesystem operation failed: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON from the release index.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl UpgradeError {
    /// Whether this is an ordinary early exit rather than a failure.
    #[must_use]
    pub const fn is_expected(&self) -> bool {
        matches!(
            self,
            Self::NotPackaged
                | Self::UnsupportedPlatform
                | Self::NoRepoConfigured
                | Self::CheckedRecently
                | Self::AlreadyUpToDate
                | Self::UpdateInProgress
                | Self::WindowsSwapDeferred { .. }
        )
    }

    /// Whether repeating the failed operation may succeed.
    ///
    /// Network errors, HTTP 429 and HTTP 5xx are retryable, as is a rejected
    /// range request (the partial file is gone, so the next attempt restarts
    /// from zero). Everything else is final.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_retryable(),
            Self::HttpStatus { status, .. } => is_retryable_status(*status),
            Self::RangeNotSatisfiable { .. } | Self::ContentRangeMismatch { .. } => true,
            _ => false,
        }
    }
}

/// HTTP statuses worth retrying: 429 and every 5xx.
#[must_use]
pub const fn is_retryable_status(status: u16) -> bool {
    status == 429 || (status >= 500 && status <= 599)
}

/// A CLI error with an optional suggestion and details.
///
/// Built by [`user_friendly_error`] and printed by [`ErrorContext::display`].
#[derive(Debug)]
pub struct ErrorContext {
    /// Primary error message.
    pub message: String,
    /// Optional suggestion for resolving the error.
    pub suggestion: Option<String>,
    /// Optional additional details about the error.
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a context with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add details explaining the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.message);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any CLI error into a user-facing [`ErrorContext`].
///
/// Known error types get a suggestion; everything else is shown with its
/// full `anyhow` context chain.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    let message = format!("{error:#}");

    if let Some(toml_error) = error.downcast_ref::<toml::de::Error>() {
        return ErrorContext::new(message)
            .with_details(toml_error.message().to_string())
            .with_suggestion("Fix the [upgrade] table in config.toml or delete the file to use defaults");
    }

    if let Some(io_error) = error.downcast_ref::<std::io::Error>() {
        match io_error.kind() {
            std::io::ErrorKind::PermissionDenied => {
                return ErrorContext::new(message)
                    .with_suggestion("Check ownership of the selfup home directory and the executable")
                    .with_details("selfup needs write access next to the running executable to replace it");
            }
            std::io::ErrorKind::NotFound => {
                return ErrorContext::new(message)
                    .with_suggestion("Check that the path exists or set SELFUP_HOME");
            }
            _ => {}
        }
    }

    ErrorContext::new(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_reasons() {
        assert_eq!(UpgradeError::UnsupportedPlatform.to_string(), "Unsupported platform");
        assert_eq!(UpgradeError::NoRepoConfigured.to_string(), "no update repo configured");
        assert_eq!(UpgradeError::AlreadyUpToDate.to_string(), "already up to date");
        assert_eq!(
            UpgradeError::SignatureVerificationFailed.to_string(),
            "manifest_signature_verification_failed"
        );
    }

    #[test]
    fn test_expected_exits() {
        assert!(UpgradeError::CheckedRecently.is_expected());
        assert!(UpgradeError::NotPackaged.is_expected());
        assert!(!UpgradeError::SignatureVerificationFailed.is_expected());
        assert!(
            !UpgradeError::ChecksumMismatch {
                expected: "a".into(),
                actual: "b".into()
            }
            .is_expected()
        );
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(500));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(416));
        assert!(!is_retryable_status(200));

        let err = UpgradeError::HttpStatus {
            status: 502,
            url: "https://example.com".into(),
        };
        assert!(err.is_retryable());
        let err = UpgradeError::HttpStatus {
            status: 403,
            url: "https://example.com".into(),
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_context_display() {
        let ctx = ErrorContext::new("boom").with_details("why").with_suggestion("fix it");
        assert_eq!(ctx.to_string(), "boom\nDetails: why\nSuggestion: fix it");
    }
}
