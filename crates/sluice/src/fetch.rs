//! Blob discovery and download (the extract stage).
//!
//! Blobs are processed sequentially within a job to keep local disk and
//! memory bounded. Downloads are atomic: bytes land in `<name>.part`,
//! are fsynced, and only then renamed, so observers never see a partial
//! file at the final name.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::FetchSettings;
use crate::error::{DiscoveryError, DownloadError};
use sluice_core::{BlobEntry, BlobStoreRef, StorageError};

/// Provider-agnostic listing and download for one tenant's store.
pub struct BlobFetcher {
    store: BlobStoreRef,
    settings: FetchSettings,
}

/// Outcome of downloading one discovery batch.
#[derive(Debug, Default)]
pub struct DownloadBatch {
    /// Local paths of successfully downloaded files, in listing order.
    pub files: Vec<PathBuf>,
    /// Blobs that failed after retries, with their terminal error.
    pub failed: Vec<(String, DownloadError)>,
}

impl BlobFetcher {
    pub fn new(store: BlobStoreRef, settings: FetchSettings) -> Self {
        Self { store, settings }
    }

    /// List blobs under a provider-native prefix, filtered by suffix and
    /// sorted lexicographically.
    ///
    /// The prefix is the tenant-declared PascalCase segment from job
    /// metadata; it is never derived from the destination table name.
    pub async fn discover(
        &self,
        prefix: &str,
        suffix: Option<&str>,
    ) -> Result<Vec<BlobEntry>, DiscoveryError> {
        let entries = match self.store.list(prefix).await {
            Ok(entries) => entries,
            Err(err) if err.is_not_found() => {
                return Err(DiscoveryError::PrefixNotFound {
                    prefix: prefix.to_string(),
                })
            }
            Err(err) if err.is_auth() => {
                return Err(DiscoveryError::AuthFailed {
                    prefix: prefix.to_string(),
                    source: err,
                })
            }
            Err(err) => {
                return Err(DiscoveryError::ListFailed {
                    prefix: prefix.to_string(),
                    source: err,
                })
            }
        };

        let accepted: Vec<BlobEntry> = entries
            .into_iter()
            .filter(|entry| match suffix {
                Some(suffix) => entry.path.ends_with(suffix),
                None => self
                    .settings
                    .suffixes
                    .iter()
                    .any(|s| entry.path.ends_with(s)),
            })
            .collect();

        debug!(prefix, count = accepted.len(), "Discovered blobs");
        Ok(accepted)
    }

    /// Download all blobs sequentially into `dest_dir`.
    ///
    /// A per-blob failure is recorded and the batch continues unless
    /// `fail_fast` is set. Cancellation is observed between blobs.
    pub async fn download_all(
        &self,
        entries: &[BlobEntry],
        dest_dir: &Path,
        cancel: &CancellationToken,
        deadline: Option<Instant>,
    ) -> Result<DownloadBatch, DownloadError> {
        let mut batch = DownloadBatch::default();

        for (index, entry) in entries.iter().enumerate() {
            if cancel.is_cancelled() {
                debug!("Cancellation observed between blobs, stopping downloads");
                break;
            }

            match self.download(entry, dest_dir, deadline).await {
                Ok(path) => batch.files.push(path),
                Err(err) => {
                    warn!(blob = %entry.path, error = %err, "Blob download failed");
                    if self.settings.fail_fast {
                        return Err(err);
                    }
                    batch.failed.push((entry.path.clone(), err));
                }
            }

            let done = index + 1;
            if done % self.settings.progress_every.max(1) == 0 || done == entries.len() {
                info!(done, total = entries.len(), "Download progress");
            }
        }

        Ok(batch)
    }

    /// Download one blob with bounded exponential backoff on transient
    /// failures. Returns the final local path.
    pub async fn download(
        &self,
        entry: &BlobEntry,
        dest_dir: &Path,
        deadline: Option<Instant>,
    ) -> Result<PathBuf, DownloadError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.download_once(entry, dest_dir, deadline).await {
                Ok(path) => return Ok(path),
                Err(err @ DownloadError::Transient { .. })
                    if attempt < self.settings.max_retries =>
                {
                    let wait = Duration::from_secs(
                        self.settings.retry_base_delay_secs * 2u64.pow(attempt - 1),
                    );
                    warn!(blob = %entry.path, attempt, wait_secs = wait.as_secs(), error = %err,
                        "Transient download failure, backing off");
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn download_once(
        &self,
        entry: &BlobEntry,
        dest_dir: &Path,
        deadline: Option<Instant>,
    ) -> Result<PathBuf, DownloadError> {
        let bytes = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, self.store.get(&entry.path))
                .await
                .map_err(|_| DownloadError::Timeout {
                    path: entry.path.clone(),
                })?,
            None => self.store.get(&entry.path).await,
        }
        .map_err(|source| classify(entry, source))?;

        // Name preserved from the blob key's last segment.
        let file_name = entry
            .path
            .rsplit('/')
            .next()
            .unwrap_or(entry.path.as_str())
            .to_string();
        let gzipped = file_name.ends_with(".gz");

        // The provider size check applies to the transferred bytes; the
        // decompressed output has its own length.
        if bytes.len() as u64 != entry.size {
            return Err(DownloadError::Integrity {
                path: entry.path.clone(),
                expected: entry.size,
                actual: bytes.len() as u64,
            });
        }

        let final_name = if gzipped {
            file_name.trim_end_matches(".gz").to_string()
        } else {
            file_name
        };
        let final_path = dest_dir.join(&final_name);
        let part_path = dest_dir.join(format!("{final_name}.part"));

        let write_err = |source: std::io::Error| DownloadError::Write {
            path: part_path.display().to_string(),
            source,
        };

        let mut file = std::fs::File::create(&part_path).map_err(write_err)?;
        if gzipped {
            let mut decoder = flate2::read::GzDecoder::new(bytes.as_ref());
            let mut buf = Vec::new();
            decoder
                .read_to_end(&mut buf)
                .map_err(|source| DownloadError::Transient {
                    path: entry.path.clone(),
                    source: StorageError::Decompress {
                        path: entry.path.clone(),
                        source,
                    },
                })?;
            file.write_all(&buf).map_err(write_err)?;
        } else {
            file.write_all(&bytes).map_err(write_err)?;
        }
        file.sync_all().map_err(write_err)?;
        drop(file);

        std::fs::rename(&part_path, &final_path).map_err(write_err)?;
        debug!(blob = %entry.path, dest = %final_path.display(), "Downloaded");
        Ok(final_path)
    }
}

fn classify(entry: &BlobEntry, source: StorageError) -> DownloadError {
    if source.is_transient() {
        DownloadError::Transient {
            path: entry.path.clone(),
            source,
        }
    } else {
        DownloadError::Permanent {
            path: entry.path.clone(),
            source,
        }
    }
}
