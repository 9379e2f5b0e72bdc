//! Azure Blob Storage backend implementation.

use object_store::azure::{AzureConfigKey, MicrosoftAzureBuilder};
use object_store::path::Path;
use object_store::ObjectStore;
use snafu::prelude::*;
use std::sync::Arc;

use crate::error::{AzureConfigSnafu, StorageError};

use super::{default_retry_config, BlobStore};

/// Azure authentication variants.
///
/// Values are pulled from the tenant's env map by the resolver; `Debug`
/// never prints the credential material.
#[derive(Clone)]
pub enum AzureAuth {
    /// Full storage connection string (`AccountName=..;AccountKey=..`).
    ConnectionString(String),
    /// Shared access signature token.
    SasToken(String),
    /// Account access key.
    AccessKey(String),
    /// Public container, no credential.
    Anonymous,
}

impl std::fmt::Debug for AzureAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            AzureAuth::ConnectionString(_) => "ConnectionString(***)",
            AzureAuth::SasToken(_) => "SasToken(***)",
            AzureAuth::AccessKey(_) => "AccessKey(***)",
            AzureAuth::Anonymous => "Anonymous",
        };
        write!(f, "AzureAuth::{variant}")
    }
}

/// Azure Blob Storage settings.
#[derive(Debug, Clone)]
pub struct AzureSettings {
    pub account: String,
    pub container: String,
    pub prefix: Option<String>,
    pub auth: AzureAuth,
}

/// Split a connection string into its `Key=Value` pairs.
fn connection_string_pairs(raw: &str) -> impl Iterator<Item = (&str, &str)> {
    raw.split(';')
        .filter_map(|part| part.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
}

impl BlobStore {
    pub(super) fn construct_azure(settings: AzureSettings) -> Result<Self, StorageError> {
        let mut builder = MicrosoftAzureBuilder::new()
            .with_account(&settings.account)
            .with_container_name(&settings.container)
            .with_retry(default_retry_config());

        match &settings.auth {
            AzureAuth::ConnectionString(raw) => {
                for (key, value) in connection_string_pairs(raw) {
                    match key {
                        "AccountName" => builder = builder.with_account(value),
                        "AccountKey" => {
                            builder = builder.with_config(AzureConfigKey::AccessKey, value)
                        }
                        _ => {}
                    }
                }
            }
            AzureAuth::SasToken(token) => {
                builder = builder.with_config(AzureConfigKey::SasKey, token);
            }
            AzureAuth::AccessKey(key) => {
                builder = builder.with_config(AzureConfigKey::AccessKey, key);
            }
            AzureAuth::Anonymous => {
                builder = builder.with_config(AzureConfigKey::SkipSignature, "true");
            }
        }

        let canonical_url = format!(
            "https://{}.blob.core.windows.net/{}",
            settings.account, settings.container
        );

        let object_store: Arc<dyn ObjectStore> =
            Arc::new(builder.build().context(AzureConfigSnafu)?);

        Ok(Self {
            object_store,
            base: settings.prefix.as_deref().map(Path::from),
            canonical_url,
        })
    }
}
