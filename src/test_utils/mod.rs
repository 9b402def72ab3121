//! Test utilities for selfup
//!
//! Helpers for exercising the update engine without a network:
//!
//! - [`MockHttpClient`] - a scripted [`HttpClient`](crate::upgrade::HttpClient)
//!   that records every request
//! - [`ReleaseFixture`] - a fake GitHub release with manifest and asset
//! - Ed25519 signing helpers for manifest signatures
//!
//! # Example
//!
//! ```rust,no_run
//! use selfup::test_utils::{MockHttpClient, ReleaseFixture};
//!
//! let client = MockHttpClient::new();
//! let release = ReleaseFixture::new("1.3.0", b"new binary".to_vec());
//! release.serve(&client);
//! ```

pub mod fixtures;
pub mod http;

pub use fixtures::{
    ReleaseFixture, public_key_spki_b64, sha256_hex, signature_envelope, signing_key,
};
pub use http::{MockHttpClient, MockResponse, RecordedRequest};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Uses `level` when given, otherwise `RUST_LOG`; does nothing when neither
/// is set. Safe to call from every test.
///
/// ```bash
/// RUST_LOG=selfup=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .try_init();
    });
}
