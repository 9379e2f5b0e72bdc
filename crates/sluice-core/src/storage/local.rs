//! Local filesystem backend implementation.

use object_store::local::LocalFileSystem;
use object_store::path::Path;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{IoSnafu, ObjectStoreSnafu, StorageError};

use super::BlobStore;

/// Local filesystem settings.
#[derive(Debug, Clone)]
pub struct LocalSettings {
    pub root: PathBuf,
    pub prefix: Option<String>,
}

impl BlobStore {
    pub(super) async fn construct_local(settings: LocalSettings) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&settings.root)
            .await
            .context(IoSnafu)?;

        let object_store: Arc<dyn ObjectStore> = Arc::new(
            LocalFileSystem::new_with_prefix(&settings.root).context(ObjectStoreSnafu)?,
        );

        let canonical_url = format!("file://{}", settings.root.display());

        Ok(Self {
            object_store,
            base: settings.prefix.as_deref().map(Path::from),
            canonical_url,
        })
    }
}
