//! Progress indicators for downloads.
//!
//! Bars are hidden unless explicitly enabled, so library callers and tests
//! never draw to the terminal.

use indicatif::{ProgressBar, ProgressStyle};

/// A byte-count bar for a download of `total` bytes, or a spinner when the
/// size is unknown. Returns a hidden bar when `enabled` is false.
pub fn download_bar(total: Option<u64>, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{prefix:.bold.cyan} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            {
                bar.set_style(style.progress_chars("━╸━"));
            }
            bar
        }
        None => {
            let spinner = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner().template("{prefix:.bold} {spinner:.cyan} {bytes}") {
                spinner.set_style(style);
            }
            spinner
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_bar_is_hidden() {
        assert!(download_bar(Some(10), false).is_hidden());
    }
}
