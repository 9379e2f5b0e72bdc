//! Multi-cloud storage abstraction.
//!
//! Provides a unified read-only interface for listing and downloading
//! source blobs from Azure Blob Storage, S3-compatible stores, GCS, and
//! the local filesystem. The engine never writes to object storage.

mod azure;
mod gcs;
mod local;
mod s3;

pub use azure::{AzureAuth, AzureSettings};
pub use gcs::GcsSettings;
pub use local::LocalSettings;
pub use s3::S3Settings;

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use object_store::path::Path;
use object_store::{ObjectStore, RetryConfig};
use snafu::prelude::*;

use crate::error::{ObjectStoreSnafu, StorageError};

/// A reference-counted blob store.
pub type BlobStoreRef = Arc<BlobStore>;

/// Create a standard retry configuration for cloud storage operations.
fn default_retry_config() -> RetryConfig {
    RetryConfig::default()
}

/// Metadata for one listed blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    /// Path relative to the store's configured base prefix.
    pub path: String,
    /// Size in bytes as reported by the provider.
    pub size: u64,
    /// Entity tag, when the provider supplies one.
    pub etag: Option<String>,
}

/// Declarative backend settings, one variant per supported provider.
///
/// The variant is chosen by the tenant registry; credentials come from the
/// tenant's env map and never appear in YAML.
#[derive(Debug, Clone)]
pub enum BackendSettings {
    Azure(AzureSettings),
    S3(S3Settings),
    Gcs(GcsSettings),
    Local(LocalSettings),
}

/// Read-only blob store over a single container/bucket/directory.
#[derive(Clone)]
pub struct BlobStore {
    pub(crate) object_store: Arc<dyn ObjectStore>,
    /// Base prefix all listings and gets are qualified with.
    pub(crate) base: Option<Path>,
    pub(crate) canonical_url: String,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BlobStore<{}>", self.canonical_url)
    }
}

impl BlobStore {
    /// Construct a store for the given backend settings.
    pub async fn connect(settings: BackendSettings) -> Result<Self, StorageError> {
        match settings {
            BackendSettings::Azure(s) => Self::construct_azure(s),
            BackendSettings::S3(s) => Self::construct_s3(s),
            BackendSettings::Gcs(s) => Self::construct_gcs(s),
            BackendSettings::Local(s) => Self::construct_local(s).await,
        }
    }

    /// Human-readable location, safe to log (no credentials).
    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    /// Qualify a relative path with the configured base prefix.
    fn qualify(&self, path: &str) -> Path {
        match &self.base {
            Some(base) => base.parts().chain(Path::from(path).parts()).collect(),
            None => Path::from(path),
        }
    }

    /// List blobs under a prefix, sorted lexicographically by path.
    ///
    /// Returned paths are relative to the configured base prefix. A
    /// missing prefix yields an empty listing rather than an error.
    pub async fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>, StorageError> {
        let full_prefix = self.qualify(prefix);
        let skip = self
            .base
            .as_ref()
            .map(|b| b.parts().count())
            .unwrap_or_default();

        let mut entries = Vec::new();
        let mut stream = self.object_store.list(Some(&full_prefix));
        while let Some(item) = stream.next().await {
            let meta = match item {
                Ok(meta) => meta,
                Err(object_store::Error::NotFound { .. }) => continue,
                Err(source) => return Err(StorageError::ObjectStore { source }),
            };
            let relative: Path = meta.location.parts().skip(skip).collect();
            entries.push(BlobEntry {
                path: relative.to_string(),
                size: meta.size as u64,
                etag: meta.e_tag.clone(),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    /// Get the full contents of a blob.
    pub async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let bytes = self
            .object_store
            .get(&self.qualify(path))
            .await
            .context(ObjectStoreSnafu)?
            .bytes()
            .await
            .context(ObjectStoreSnafu)?;
        Ok(bytes)
    }

    /// Fetch size and etag for a single blob.
    pub async fn head(&self, path: &str) -> Result<BlobEntry, StorageError> {
        let meta = self
            .object_store
            .head(&self.qualify(path))
            .await
            .context(ObjectStoreSnafu)?;
        Ok(BlobEntry {
            path: path.to_string(),
            size: meta.size as u64,
            etag: meta.e_tag,
        })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    async fn local_store(root: PathBuf) -> BlobStore {
        BlobStore::connect(BackendSettings::Local(LocalSettings {
            root,
            prefix: None,
        }))
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_relative() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("Incremental/DimDealer_MS/LatestData");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("part_2.csv"), b"b").unwrap();
        std::fs::write(dir.join("part_1.csv"), b"a").unwrap();

        let store = local_store(temp.path().to_path_buf()).await;
        let entries = store.list("Incremental/DimDealer_MS").await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].path,
            "Incremental/DimDealer_MS/LatestData/part_1.csv"
        );
        assert_eq!(
            entries[1].path,
            "Incremental/DimDealer_MS/LatestData/part_2.csv"
        );
    }

    #[tokio::test]
    async fn test_missing_prefix_lists_empty() {
        let temp = TempDir::new().unwrap();
        let store = local_store(temp.path().to_path_buf()).await;
        let entries = store.list("Incremental/NoSuchFolder").await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_head_reports_size() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("blob.csv"), b"hello").unwrap();

        let store = local_store(temp.path().to_path_buf()).await;
        let entry = store.head("blob.csv").await.unwrap();
        assert_eq!(entry.size, 5);
    }

    #[tokio::test]
    async fn test_get_roundtrip() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("blob.csv"), b"a,b\n1,2\n").unwrap();

        let store = local_store(temp.path().to_path_buf()).await;
        let bytes = store.get("blob.csv").await.unwrap();
        assert_eq!(bytes.as_ref(), b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_prefix_qualification() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("tenants/acme/files");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("x.csv"), b"x").unwrap();

        let store = BlobStore::connect(BackendSettings::Local(LocalSettings {
            root: temp.path().to_path_buf(),
            prefix: Some("tenants/acme".to_string()),
        }))
        .await
        .unwrap();

        let entries = store.list("files").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "files/x.csv");

        let bytes = store.get("files/x.csv").await.unwrap();
        assert_eq!(bytes.as_ref(), b"x");
    }
}
