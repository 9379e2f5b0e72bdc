//! Google Cloud Storage backend implementation.

use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{GcsConfigSnafu, StorageError};

use super::{default_retry_config, BlobStore};

/// Google Cloud Storage settings.
#[derive(Clone)]
pub struct GcsSettings {
    pub bucket: String,
    pub prefix: Option<String>,
    /// Inline service-account key JSON. Application-default credentials
    /// apply when unset.
    pub service_account_key: Option<String>,
}

impl std::fmt::Debug for GcsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcsSettings")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field(
                "service_account_key",
                &self.service_account_key.as_deref().map(|_| "***"),
            )
            .finish()
    }
}

impl BlobStore {
    pub(super) fn construct_gcs(settings: GcsSettings) -> Result<Self, StorageError> {
        let mut builder = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(&settings.bucket)
            .with_retry(default_retry_config());

        if let Some(key) = &settings.service_account_key {
            builder = builder.with_service_account_key(key);
        }

        let canonical_url = format!("gs://{}", settings.bucket);

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(GcsConfigSnafu)?);

        Ok(Self {
            object_store,
            base: settings.prefix.as_deref().map(Path::from),
            canonical_url,
        })
    }
}
