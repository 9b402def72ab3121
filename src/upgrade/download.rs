//! Resumable downloads into a staging directory.
//!
//! A download is written to `<destination>.part` and renamed onto the
//! destination only once the whole body has been received and synced, so
//! the destination either doesn't exist or is complete.
//!
//! An existing partial file is resumed with a `Range` request unless it is
//! older than [`PARTIAL_MAX_AGE`], in which case it is deleted first. The
//! server decides how the resume goes:
//!
//! | Status | Action                                           |
//! |--------|--------------------------------------------------|
//! | 206    | append, if `Content-Range` starts at the offset  |
//! | 206    | otherwise delete the partial file and retry      |
//! | 200    | range ignored; truncate and restart from zero    |
//! | 416    | delete the partial file and retry from zero      |
//! | other  | fail the attempt (429/5xx are retried)           |

use crate::constants::PARTIAL_MAX_AGE;
use crate::core::error::{Result, UpgradeError};
use crate::upgrade::transport::{HttpClient, HttpRequest, ResilientTransport, RetryPolicy};
use crate::utils::fs::with_suffix;
use crate::utils::progress::download_bar;
use futures::StreamExt;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Downloads files with resume support and bounded retries.
pub struct ResumableDownloader<'a, C> {
    transport: &'a ResilientTransport<C>,
    policy: RetryPolicy,
    max_partial_age: Duration,
    show_progress: bool,
}

impl<'a, C: HttpClient> ResumableDownloader<'a, C> {
    /// A downloader retrying under `policy`.
    pub fn new(transport: &'a ResilientTransport<C>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            max_partial_age: PARTIAL_MAX_AGE,
            show_progress: false,
        }
    }

    /// Override the age after which a partial file is discarded.
    #[must_use]
    pub fn with_max_partial_age(mut self, max_partial_age: Duration) -> Self {
        self.max_partial_age = max_partial_age;
        self
    }

    /// Draw a progress bar on stderr.
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Byte offset to resume `partial` from.
    ///
    /// Returns 0 when there is no partial file. A partial file older than the
    /// configured maximum age is deleted and also yields 0.
    pub async fn resume_offset(&self, partial: &Path) -> Result<u64> {
        let metadata = match tokio::fs::metadata(partial).await {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let age = metadata
            .modified()
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .unwrap_or(Duration::ZERO);
        if age > self.max_partial_age {
            info!(path = %partial.display(), age_secs = age.as_secs(), "Discarding abandoned partial download");
            remove_if_exists(partial).await?;
            return Ok(0);
        }

        Ok(metadata.len())
    }

    /// Download `url` to `destination`, resuming a previous partial file.
    ///
    /// The partial file is kept when every retry fails, so the next run
    /// resumes where this one stopped.
    pub async fn download(&self, url: &str, destination: &Path) -> Result<()> {
        let partial = with_suffix(destination, ".part");
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        self.transport.retry(self.policy, || self.attempt(url, &partial)).await?;

        tokio::fs::rename(&partial, destination).await?;
        info!(url, path = %destination.display(), "Download complete");
        Ok(())
    }

    async fn attempt(&self, url: &str, partial: &Path) -> Result<()> {
        let offset = self.resume_offset(partial).await?;
        let mut request = HttpRequest::get(url);
        if offset > 0 {
            debug!(url, offset, "Resuming download");
            request = request.with_range_start(offset);
        }

        let response = self.transport.client().send(request).await?;
        let (mut file, start) = match response.status {
            206 if offset > 0 && response.content_range_start == Some(offset) => {
                let file = tokio::fs::OpenOptions::new().append(true).open(partial).await?;
                (file, offset)
            }
            206 if offset > 0 => {
                warn!(url, offset, received = ?response.content_range_start, "Partial response does not continue the partial file");
                remove_if_exists(partial).await?;
                return Err(UpgradeError::ContentRangeMismatch {
                    url: url.to_string(),
                    requested: offset,
                    received: response.content_range_start,
                });
            }
            200..=299 => {
                if offset > 0 {
                    debug!(url, status = response.status, "Server ignored range request; restarting download");
                }
                (tokio::fs::File::create(partial).await?, 0)
            }
            416 if offset > 0 => {
                remove_if_exists(partial).await?;
                return Err(UpgradeError::RangeNotSatisfiable { url: url.to_string() });
            }
            status => {
                return Err(UpgradeError::HttpStatus {
                    status,
                    url: url.to_string(),
                });
            }
        };

        let progress = download_bar(response.content_length.map(|len| len + start), self.show_progress);
        progress.set_position(start);

        let mut body = response.body;
        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    file.flush().await?;
                    progress.abandon();
                    return Err(err.into());
                }
            };
            file.write_all(&chunk).await?;
            progress.inc(chunk.len() as u64);
        }

        file.flush().await?;
        file.sync_all().await?;
        progress.finish_and_clear();
        Ok(())
    }
}

/// Delete every entry of `staging_dir` except `keep`.
///
/// Partial files left by other releases can never be resumed.
pub async fn discard_stale_downloads(staging_dir: &Path, keep: &Path) -> Result<()> {
    let mut entries = match tokio::fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path == keep {
            continue;
        }
        let removed = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match removed {
            Ok(()) => info!(path = %path.display(), "Discarded download from another release"),
            Err(err) => debug!(path = %path.display(), error = %err, "Failed to discard stale download"),
        }
    }
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHttpClient, MockResponse};
    use tempfile::TempDir;

    const URL: &str = "https://dl.test/tool-linux-x64";

    fn payload() -> Vec<u8> {
        (0..10_000u32).map(|i| (i % 251) as u8).collect()
    }

    fn transport(client: MockHttpClient) -> ResilientTransport<MockHttpClient> {
        ResilientTransport::new(client, RetryPolicy::immediate(0))
    }

    #[tokio::test]
    async fn test_fresh_download() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("updates/tool");
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::asset(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(0))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert!(!with_suffix(&dest, ".part").exists());
        assert_eq!(transport.client().requests()[0].range_start, None);
    }

    #[tokio::test]
    async fn test_resumes_from_partial() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        std::fs::write(with_suffix(&dest, ".part"), &payload()[..4000]).unwrap();
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::asset(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(0))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        assert_eq!(transport.client().requests()[0].range_start, Some(4000));
    }

    #[tokio::test]
    async fn test_ignored_range_restarts() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        std::fs::write(with_suffix(&dest, ".part"), b"garbage from an older build").unwrap();
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::ok(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(0))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
    }

    #[tokio::test]
    async fn test_aged_partial_is_discarded() {
        let temp = TempDir::new().unwrap();
        let partial = temp.path().join("tool.part");
        let file = std::fs::File::create(&partial).unwrap();
        std::io::Write::write_all(&mut &file, b"stale bytes").unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(8 * 24 * 60 * 60)).unwrap();
        drop(file);

        let transport = transport(MockHttpClient::new());
        let downloader = ResumableDownloader::new(&transport, RetryPolicy::immediate(0));

        assert_eq!(downloader.resume_offset(&partial).await.unwrap(), 0);
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_custom_max_partial_age() {
        let temp = TempDir::new().unwrap();
        let partial = temp.path().join("tool.part");
        let file = std::fs::File::create(&partial).unwrap();
        std::io::Write::write_all(&mut &file, b"two minutes old").unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(120)).unwrap();
        drop(file);

        let transport = transport(MockHttpClient::new());
        let lenient = ResumableDownloader::new(&transport, RetryPolicy::immediate(0));
        assert_eq!(lenient.resume_offset(&partial).await.unwrap(), 15);

        let strict = lenient.with_max_partial_age(Duration::from_secs(60));
        assert_eq!(strict.resume_offset(&partial).await.unwrap(), 0);
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_misaligned_partial_response_restarts_from_zero() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        std::fs::write(with_suffix(&dest, ".part"), &payload()[..4000]).unwrap();
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::partial(Some(0), payload()));
        client.on(URL, MockResponse::asset(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(1))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        let ranges: Vec<_> = transport.client().requests().iter().map(|r| r.range_start).collect();
        assert_eq!(ranges, vec![Some(4000), None]);
    }

    #[tokio::test]
    async fn test_partial_response_without_content_range_is_rejected() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        std::fs::write(with_suffix(&dest, ".part"), b"1234").unwrap();
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::partial(None, b"5678".to_vec()));
        let transport = transport(client);

        let err = ResumableDownloader::new(&transport, RetryPolicy::immediate(0))
            .download(URL, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::ContentRangeMismatch { requested: 4, received: None, .. }));
        assert!(!with_suffix(&dest, ".part").exists());
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_discard_stale_downloads_keeps_current_release() {
        let temp = TempDir::new().unwrap();
        let staging = temp.path().join("updates");
        let current = staging.join("v1.4.0");
        std::fs::create_dir_all(staging.join("v1.3.0")).unwrap();
        std::fs::create_dir_all(&current).unwrap();
        std::fs::write(staging.join("v1.3.0/tool-linux-x64.part"), b"old").unwrap();
        std::fs::write(current.join("tool-linux-x64.part"), b"new").unwrap();
        std::fs::write(staging.join("tool-linux-x64.part"), b"flat").unwrap();

        discard_stale_downloads(&staging, &current).await.unwrap();

        assert!(!staging.join("v1.3.0").exists());
        assert!(!staging.join("tool-linux-x64.part").exists());
        assert_eq!(std::fs::read(current.join("tool-linux-x64.part")).unwrap(), b"new");
        discard_stale_downloads(&temp.path().join("missing"), &current).await.unwrap();
    }

    #[tokio::test]
    async fn test_recent_partial_is_kept() {
        let temp = TempDir::new().unwrap();
        let partial = temp.path().join("tool.part");
        std::fs::write(&partial, b"12345").unwrap();

        let transport = transport(MockHttpClient::new());
        let downloader = ResumableDownloader::new(&transport, RetryPolicy::immediate(0));

        assert_eq!(downloader.resume_offset(&partial).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_interrupted_download_resumes_byte_identical() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::interrupted(payload(), 3333));
        client.on(URL, MockResponse::asset(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(2))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        let ranges: Vec<_> = transport.client().requests().iter().map(|r| r.range_start).collect();
        assert_eq!(ranges, vec![None, Some(3333)]);
    }

    #[tokio::test]
    async fn test_interruption_without_retries_keeps_partial() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::interrupted(payload(), 2048));
        let transport = transport(client);

        let err = ResumableDownloader::new(&transport, RetryPolicy::immediate(0))
            .download(URL, &dest)
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::Transport(_)));
        assert!(!dest.exists());
        assert_eq!(std::fs::read(with_suffix(&dest, ".part")).unwrap(), &payload()[..2048]);
    }

    #[tokio::test]
    async fn test_unsatisfiable_range_restarts_from_zero() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("tool");
        let mut oversized = payload();
        oversized.extend_from_slice(b"trailing junk");
        std::fs::write(with_suffix(&dest, ".part"), &oversized).unwrap();
        let client = MockHttpClient::new();
        client.on(URL, MockResponse::asset(payload()));
        let transport = transport(client);

        ResumableDownloader::new(&transport, RetryPolicy::immediate(1))
            .download(URL, &dest)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), payload());
        let ranges: Vec<_> = transport.client().requests().iter().map(|r| r.range_start).collect();
        assert_eq!(ranges, vec![Some(oversized.len() as u64), None]);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let temp = TempDir::new().unwrap();
        let client = MockHttpClient::new();
        let transport = transport(client);

        let err = ResumableDownloader::new(&transport, RetryPolicy::immediate(2))
            .download(URL, &temp.path().join("tool"))
            .await
            .unwrap_err();

        assert!(matches!(err, UpgradeError::HttpStatus { status: 404, .. }));
        assert_eq!(transport.client().request_count(), 1);
    }
}
