//! Platform tags naming the published release assets.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the four OS/architecture pairs that get a release asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformTag {
    /// macOS on x86_64.
    #[serde(rename = "macos-x64")]
    MacosX64,
    /// macOS on Apple silicon.
    #[serde(rename = "macos-arm64")]
    MacosArm64,
    /// Linux on x86_64.
    #[serde(rename = "linux-x64")]
    LinuxX64,
    /// Windows on x86_64.
    #[serde(rename = "win-x64")]
    WinX64,
}

impl PlatformTag {
    /// Map an OS/architecture pair, as spelled by `std::env::consts`, to a tag.
    pub fn from_os_arch(os: &str, arch: &str) -> Option<Self> {
        match (os, arch) {
            ("macos", "x86_64") => Some(Self::MacosX64),
            ("macos", "aarch64") => Some(Self::MacosArm64),
            ("linux", "x86_64") => Some(Self::LinuxX64),
            ("windows", "x86_64") => Some(Self::WinX64),
            _ => None,
        }
    }

    /// Tag of the running process, or `None` on an unsupported platform.
    pub fn current() -> Option<Self> {
        Self::from_os_arch(std::env::consts::OS, std::env::consts::ARCH)
    }

    /// The tag as it appears in asset names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MacosX64 => "macos-x64",
            Self::MacosArm64 => "macos-arm64",
            Self::LinuxX64 => "linux-x64",
            Self::WinX64 => "win-x64",
        }
    }

    /// Executable file suffix for this platform.
    pub const fn exe_suffix(self) -> &'static str {
        match self {
            Self::WinX64 => ".exe",
            _ => "",
        }
    }

    /// Whether the running executable can be replaced in place.
    pub const fn is_windows(self) -> bool {
        matches!(self, Self::WinX64)
    }

    /// Asset file name for `bin_name` on this platform, e.g. `selfup-linux-x64`.
    pub fn asset_name(self, bin_name: &str) -> String {
        format!("{bin_name}-{}{}", self.as_str(), self.exe_suffix())
    }
}

impl fmt::Display for PlatformTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
