//! Persisted last-check timestamp and check throttling.
//!
//! The state file holds a single JSON record, `{"lastCheck": <epoch-millis>}`,
//! inside the selfup home directory. It is the only update state that
//! survives between runs. Reading is forgiving: a missing, unreadable or
//! corrupt file means "never checked". Writing is best-effort: a read-only
//! home directory disables throttling but never fails an update.

use crate::constants::{CHECK_INTERVAL, STATE_FILE_NAME};
use crate::utils::fs::atomic_write_private;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Contents of the state file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateState {
    /// Time of the last check attempt in milliseconds since the Unix epoch.
    #[serde(rename = "lastCheck", default)]
    pub last_check_epoch_millis: i64,
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_epoch_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Reads and writes the state file and decides whether a check is due.
#[derive(Debug, Clone)]
pub struct UpdateStateStore {
    path: PathBuf,
    interval: Duration,
}

impl UpdateStateStore {
    /// A store for `<home_dir>/update-state.json` with the default 24 hour window.
    pub fn new(home_dir: &Path) -> Self {
        Self {
            path: home_dir.join(STATE_FILE_NAME),
            interval: CHECK_INTERVAL,
        }
    }

    /// Override the throttle window.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Location of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted state, falling back to the default on any error.
    pub async fn load(&self) -> UpdateState {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|err| {
                debug!(path = %self.path.display(), error = %err, "Ignoring corrupt update state");
                UpdateState::default()
            }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => UpdateState::default(),
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "Failed to read update state");
                UpdateState::default()
            }
        }
    }

    /// Whether an update check should run now.
    pub async fn should_check(&self, force: bool) -> bool {
        self.should_check_at(force, now_epoch_millis()).await
    }

    /// Whether an update check should run at `now_ms`.
    ///
    /// `force` always allows the check, and so does a store that has never
    /// recorded one. A last-check time in the future (the clock moved
    /// backwards) also allows it.
    pub async fn should_check_at(&self, force: bool, now_ms: i64) -> bool {
        if force {
            return true;
        }

        let state = self.load().await;
        if state.last_check_epoch_millis <= 0 {
            return true;
        }
        let elapsed = now_ms.saturating_sub(state.last_check_epoch_millis);
        if elapsed < 0 {
            return true;
        }

        let window = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
        elapsed >= window
    }

    /// Record a check attempt at `now_ms`.
    ///
    /// The stored value never decreases. Write failures are logged and swallowed.
    pub async fn record_check(&self, now_ms: i64) {
        let existing = self.load().await;
        let state = UpdateState {
            last_check_epoch_millis: existing.last_check_epoch_millis.max(now_ms),
        };

        let content = match serde_json::to_vec(&state) {
            Ok(content) => content,
            Err(err) => {
                warn!(error = %err, "Failed to serialize update state");
                return;
            }
        };

        let path = self.path.clone();
        let result = tokio::task::spawn_blocking(move || atomic_write_private(&path, &content)).await;
        match result {
            Ok(Ok(())) => debug!(path = %self.path.display(), last_check = state.last_check_epoch_millis, "Recorded update check"),
            Ok(Err(err)) => {
                warn!(path = %self.path.display(), error = %err, "Failed to persist update state; throttling disabled");
            }
            Err(err) => warn!(error = %err, "Update state writer task failed"),
        }
    }
}
