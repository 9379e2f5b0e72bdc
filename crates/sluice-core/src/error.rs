//! Common error types shared across the sluice crates.
//!
//! This module defines error types for storage and configuration operations
//! that are used by both the core primitives and the engine crate.

use std::path::PathBuf;

use snafu::prelude::*;

// ============ Storage Errors ============

/// Errors that can occur during storage operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StorageError {
    /// Object store operation failed.
    #[snafu(display("Storage operation failed: {source}"))]
    ObjectStore { source: object_store::Error },

    /// IO error during storage operations.
    #[snafu(display("IO error: {source}"))]
    Io { source: std::io::Error },

    /// S3 configuration error.
    #[snafu(display("S3 configuration error: {source}"))]
    S3Config { source: object_store::Error },

    /// GCS configuration error.
    #[snafu(display("GCS configuration error: {source}"))]
    GcsConfig { source: object_store::Error },

    /// Azure configuration error.
    #[snafu(display("Azure configuration error: {source}"))]
    AzureConfig { source: object_store::Error },

    /// Decompression failed while streaming a blob to disk.
    #[snafu(display("Decompression failed for {path}: {source}"))]
    Decompress {
        path: String,
        source: std::io::Error,
    },
}

impl StorageError {
    /// Check if this error represents a "not found" condition (404, NoSuchKey, etc.)
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// Check if this error is an authentication/authorization failure.
    pub fn is_auth(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => matches!(
                source,
                object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
            ),
            _ => false,
        }
    }

    /// Check if this error is worth retrying (network resets, 5xx responses).
    ///
    /// Permission and not-found failures are permanent and surface immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::ObjectStore { source } => !matches!(
                source,
                object_store::Error::NotFound { .. }
                    | object_store::Error::PermissionDenied { .. }
                    | object_store::Error::Unauthenticated { .. }
            ),
            StorageError::Io { .. } => true,
            _ => false,
        }
    }
}

// ============ Config Errors ============

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Tenant is missing required identity or database fields, or is unknown.
    #[snafu(display("Invalid tenant '{tenant}': {reason}"))]
    InvalidTenant { tenant: String, reason: String },

    /// Failed to parse a YAML configuration file.
    #[snafu(display("Failed to parse {}: {source}", path.display()))]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    /// Storage provider named in the registry is not supported.
    #[snafu(display("Unsupported storage provider '{provider}'"))]
    UnsupportedProvider { provider: String },

    /// A credential-shaped key was found in the YAML layer.
    ///
    /// Secrets live only in per-tenant `.env` files; the YAML tree must not
    /// carry passwords, connection strings, or tokens.
    #[snafu(display("Secret key '{key}' found in YAML at {}; move it to .env", path.display()))]
    SecretInYaml { key: String, path: PathBuf },

    /// Failed to read a configuration file.
    #[snafu(display("Failed to read {}: {source}", path.display()))]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse a `.env` secrets file.
    #[snafu(display("Failed to load env file {}: {message}", path.display()))]
    EnvFile { path: PathBuf, message: String },
}
