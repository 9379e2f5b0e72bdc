//! sluice-core: Shared primitives for the sluice ETL engine.
//!
//! This crate contains functionality used by the engine crate and by
//! operator tooling:
//!
//! - `storage/` - Read-only multi-cloud blob access (Azure, S3, GCS, local)
//! - `config` - Layered YAML merge, secret rejection, slug interpolation
//! - `error` - Common error types
//! - `signal` - Signal handling for graceful shutdown
//! - `tracing` - Subscriber initialization

pub mod config;
pub mod error;
pub mod signal;
pub mod storage;
pub mod tracing;

// Re-export commonly used items
pub use config::{deep_merge, interpolate_slug, is_yaml_file, load_yaml, reject_secrets};
pub use error::{ConfigError, StorageError};
pub use signal::shutdown_signal;
pub use storage::{
    AzureAuth, AzureSettings, BackendSettings, BlobEntry, BlobStore, BlobStoreRef, GcsSettings,
    LocalSettings, S3Settings,
};
pub use crate::tracing::init_tracing;
