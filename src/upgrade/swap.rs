//! Replacement of the running executable.
//!
//! # POSIX
//!
//! The verified binary is copied next to the executable as `<exe>.new`,
//! made executable and synced. The current executable is renamed to
//! `<exe>.old` (best-effort), then `<exe>.new` is renamed onto `<exe>`.
//! Running processes keep the old inode, so replacing the binary of the
//! process doing the update is safe. `<exe>.old` is left behind and never
//! restored automatically.
//!
//! # Windows
//!
//! A running executable cannot be replaced. The binary is staged as
//! `<exe>.new.exe` and the swap reports `replaced: false`; consuming the
//! staged file on the next launch is up to the host application.

use crate::core::error::{Result, UpgradeError};
use crate::upgrade::platform::PlatformTag;
use crate::utils::fs::with_suffix;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How the executable gets replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapStrategy {
    /// Rename into place.
    Posix,
    /// Stage next to the executable and defer to a restart.
    Windows,
}

impl SwapStrategy {
    /// Strategy for a release platform.
    pub const fn for_platform(platform: PlatformTag) -> Self {
        if platform.is_windows() { Self::Windows } else { Self::Posix }
    }
}

/// What a swap did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapResult {
    /// Whether the executable on disk is now the new binary.
    pub replaced: bool,
    /// Where the new binary waits when the swap was deferred.
    pub staged_path: Option<PathBuf>,
}

/// Swaps a verified binary into the place of an executable.
#[derive(Debug, Clone)]
pub struct BinarySwapper {
    exe_path: PathBuf,
    strategy: SwapStrategy,
}

impl BinarySwapper {
    /// A swapper targeting `exe_path`.
    pub fn new(exe_path: impl Into<PathBuf>, strategy: SwapStrategy) -> Self {
        Self {
            exe_path: exe_path.into(),
            strategy,
        }
    }

    /// The executable being replaced.
    pub fn exe_path(&self) -> &Path {
        &self.exe_path
    }

    /// Where the new binary is staged before the final rename.
    pub fn staged_path(&self) -> PathBuf {
        match self.strategy {
            SwapStrategy::Posix => with_suffix(&self.exe_path, ".new"),
            SwapStrategy::Windows => self.exe_path.with_extension("new.exe"),
        }
    }

    /// Where the previous executable is kept after a POSIX swap.
    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.exe_path, ".old")
    }

    /// Put `new_file` in place of the executable.
    ///
    /// `new_file` itself is left untouched; the caller removes it.
    pub async fn swap(&self, new_file: &Path) -> Result<SwapResult> {
        if self.exe_path.file_name().is_none() || self.exe_path.parent().is_none() {
            return Err(UpgradeError::InvalidExecutablePath(self.exe_path.clone()));
        }

        let staged = self.staged_path();
        if let Err(err) = self.stage(new_file, &staged).await {
            let _ = tokio::fs::remove_file(&staged).await;
            return Err(err);
        }

        match self.strategy {
            SwapStrategy::Windows => {
                info!(staged = %staged.display(), "New executable staged; restart required to finalize");
                Ok(SwapResult {
                    replaced: false,
                    staged_path: Some(staged),
                })
            }
            SwapStrategy::Posix => self.replace(&staged).await,
        }
    }

    async fn stage(&self, new_file: &Path, staged: &Path) -> Result<()> {
        debug!(from = %new_file.display(), to = %staged.display(), "Staging new executable");
        tokio::fs::copy(new_file, staged).await?;

        #[cfg(unix)]
        if self.strategy == SwapStrategy::Posix {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(staged, std::fs::Permissions::from_mode(0o755)).await?;
        }

        tokio::fs::File::open(staged).await?.sync_all().await?;
        Ok(())
    }

    async fn replace(&self, staged: &Path) -> Result<SwapResult> {
        let backup = self.backup_path();
        let moved_aside = match tokio::fs::rename(&self.exe_path, &backup).await {
            Ok(()) => true,
            Err(err) => {
                debug!(error = %err, "Could not move current executable aside");
                false
            }
        };

        if let Err(err) = tokio::fs::rename(staged, &self.exe_path).await {
            warn!(error = %err, "Failed to move new executable into place");
            if moved_aside && tokio::fs::metadata(&self.exe_path).await.is_err() {
                if let Err(restore_err) = tokio::fs::rename(&backup, &self.exe_path).await {
                    warn!(error = %restore_err, "Failed to restore previous executable");
                }
            }
            let _ = tokio::fs::remove_file(staged).await;
            return Err(err.into());
        }

        info!(path = %self.exe_path.display(), "Executable replaced");
        Ok(SwapResult {
            replaced: true,
            staged_path: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let temp = TempDir::new().unwrap();
        let exe = temp.path().join("bin/tool");
        std::fs::create_dir_all(exe.parent().unwrap()).unwrap();
        std::fs::write(&exe, b"old binary").unwrap();
        let download = temp.path().join("tool-linux-x64");
        std::fs::write(&download, b"new binary").unwrap();
        (temp, exe, download)
    }

    #[tokio::test]
    async fn test_posix_swap_replaces_and_keeps_old() {
        let (_temp, exe, download) = setup();
        let swapper = BinarySwapper::new(&exe, SwapStrategy::Posix);

        let result = swapper.swap(&download).await.unwrap();

        assert!(result.replaced);
        assert_eq!(std::fs::read(&exe).unwrap(), b"new binary");
        assert_eq!(std::fs::read(swapper.backup_path()).unwrap(), b"old binary");
        assert!(!swapper.staged_path().exists());
        assert!(download.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_posix_swap_sets_executable_bits() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, exe, download) = setup();
        BinarySwapper::new(&exe, SwapStrategy::Posix).swap(&download).await.unwrap();

        let mode = std::fs::metadata(&exe).unwrap().permissions().mode();
        assert_eq!(mode & 0o755, 0o755);
    }

    #[tokio::test]
    async fn test_posix_swap_without_existing_exe() {
        let (_temp, exe, download) = setup();
        std::fs::remove_file(&exe).unwrap();

        let result = BinarySwapper::new(&exe, SwapStrategy::Posix).swap(&download).await.unwrap();

        assert!(result.replaced);
        assert_eq!(std::fs::read(&exe).unwrap(), b"new binary");
    }

    #[tokio::test]
    async fn test_windows_swap_is_deferred() {
        let (_temp, exe, download) = setup();
        let exe = exe.with_extension("exe");
        std::fs::write(&exe, b"old binary").unwrap();
        let swapper = BinarySwapper::new(&exe, SwapStrategy::Windows);

        let result = swapper.swap(&download).await.unwrap();

        assert!(!result.replaced);
        let staged = result.staged_path.unwrap();
        assert!(staged.ends_with("tool.new.exe"));
        assert_eq!(std::fs::read(&staged).unwrap(), b"new binary");
        assert_eq!(std::fs::read(&exe).unwrap(), b"old binary");
    }

    #[tokio::test]
    async fn test_missing_download_leaves_exe_untouched() {
        let (temp, exe, _download) = setup();
        let swapper = BinarySwapper::new(&exe, SwapStrategy::Posix);

        assert!(swapper.swap(&temp.path().join("missing")).await.is_err());
        assert_eq!(std::fs::read(&exe).unwrap(), b"old binary");
        assert!(!swapper.staged_path().exists());
    }

    #[test]
    fn test_strategy_for_platform() {
        assert_eq!(SwapStrategy::for_platform(PlatformTag::WinX64), SwapStrategy::Windows);
        assert_eq!(SwapStrategy::for_platform(PlatformTag::MacosArm64), SwapStrategy::Posix);
    }
}
