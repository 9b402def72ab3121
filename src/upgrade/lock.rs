//! Advisory lock serializing update attempts across processes.
//!
//! Two processes updating at once would write the same partial and staged
//! files. The lock is a non-blocking exclusive lock on `<home>/update.lock`;
//! a process that cannot take it skips the update instead of waiting.

use crate::constants::LOCK_FILE_NAME;
use crate::core::error::Result;
use fs4::fs_std::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Held for the duration of an update attempt; released on drop.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Try to take the lock in `home_dir`.
    ///
    /// Returns `Ok(None)` when another process holds it.
    pub async fn try_acquire(home_dir: &Path) -> Result<Option<Self>> {
        tokio::fs::create_dir_all(home_dir).await?;
        let path = home_dir.join(LOCK_FILE_NAME);
        let lock_path = path.clone();

        let file = tokio::task::spawn_blocking(move || -> std::io::Result<Option<File>> {
            let file = OpenOptions::new().create(true).truncate(false).write(true).open(&lock_path)?;
            if FileExt::try_lock_exclusive(&file)? {
                Ok(Some(file))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(std::io::Error::other)??;

        match file {
            Some(file) => {
                debug!(path = %path.display(), "Update lock acquired");
                Ok(Some(Self { file, path }))
            }
            None => {
                debug!(path = %path.display(), "Update lock held by another process");
                Ok(None)
            }
        }
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %err, "Failed to release update lock");
        }
    }
}
