//! File system helpers for selfup.
//!
//! The update engine writes very little outside the running executable's
//! directory: a state file and staged downloads under the home
//! directory. Everything here is synchronous; async callers go through
//! `tokio::task::spawn_blocking` or `tokio::fs`.

use crate::constants::DEFAULT_HOME_DIR_NAME;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Default selfup home directory, `~/.selfup`.
///
/// Returns `None` when the platform has no notion of a home directory.
pub fn default_home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(DEFAULT_HOME_DIR_NAME))
}

/// Create `path` and its parents if they don't exist.
pub fn ensure_dir(path: &Path) -> io::Result<()> {
    if !path.exists() {
        fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Write `content` to `path` atomically with owner-only permissions.
///
/// The bytes go to a sibling `.tmp` file which is synced and then renamed
/// over `path`. On Unix the file is created with mode `0o600`.
pub fn atomic_write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&temp_path)?;
        file.write_all(content)?;
        file.sync_all()?;
    }

    fs::rename(&temp_path, path)
}

/// Append `suffix` to the file name of `path` (`a/b` + `.part` = `a/b.part`).
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_private_creates_parents() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/state.json");

        atomic_write_private(&path, b"{}").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert!(!path.with_extension("tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_atomic_write_private_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state.json");
        atomic_write_private(&path, b"{}").unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_with_suffix_keeps_extension() {
        let path = Path::new("/tmp/selfup-linux-x64.exe");
        assert_eq!(with_suffix(path, ".part"), PathBuf::from("/tmp/selfup-linux-x64.exe.part"));
    }
}
