//! Tenant registry parsing.
//!
//! `configs/tenant_registry.yaml` is the orchestration inventory: one
//! entry per tenant plus process-wide scheduling settings. Entries are
//! created manually and never mutated by the engine.

use std::path::Path;

use serde::Deserialize;
use uuid::Uuid;

use crate::error::ConfigError;
use sluice_core::load_yaml;

/// Supported storage provider variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Azure,
    S3,
    Gcs,
    Minio,
    Local,
}

impl ProviderKind {
    /// Parse the registry spelling; anything else is an unsupported
    /// provider, not a YAML error.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        match raw.to_ascii_lowercase().as_str() {
            "azure" => Ok(ProviderKind::Azure),
            "s3" | "aws" => Ok(ProviderKind::S3),
            "gcs" | "gcp" => Ok(ProviderKind::Gcs),
            "minio" => Ok(ProviderKind::Minio),
            "local" => Ok(ProviderKind::Local),
            other => Err(ConfigError::UnsupportedProvider {
                provider: other.to_string(),
            }),
        }
    }
}

/// Constants-backend variants (§ business constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantsBackendKind {
    /// `business_constants` table in the tenant's own OLAP database.
    #[default]
    SameDatabase,
    /// Separate relational store reached through a URI from the tenant env.
    Relational,
    /// Document store (MongoDB) holding `{key, value}` documents.
    Document,
}

/// One tenant's registry entry.
///
/// Identity and database fields are optional at the serde level so that a
/// half-filled entry surfaces as `ConfigError::InvalidTenant` during
/// resolution rather than as a parse failure.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryEntry {
    #[serde(default)]
    pub tenant_id: Option<Uuid>,
    #[serde(default)]
    pub tenant_slug: Option<String>,
    #[serde(default)]
    pub tenant_name: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub provider: String,
    #[serde(default)]
    pub constants_backend: ConstantsBackendKind,
    #[serde(default = "default_priority")]
    pub schedule_priority: u32,
}

impl RegistryEntry {
    /// Slug for display even when the entry is incomplete.
    pub fn display_slug(&self) -> &str {
        self.tenant_slug.as_deref().unwrap_or("<unnamed>")
    }
}

fn default_priority() -> u32 {
    999
}

/// Process-wide scheduling settings from the registry's `global` block.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GlobalSettings {
    pub max_concurrent_tenants: usize,
    pub tenant_timeout_secs: u64,
    pub fail_fast: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tenants: 1,
            tenant_timeout_secs: 7200,
            fail_fast: false,
        }
    }
}

/// Parsed registry document.
#[derive(Debug, Clone, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub tenants: Vec<RegistryEntry>,
    #[serde(default)]
    pub global: GlobalSettings,
}

impl Registry {
    /// Load the registry from `<configs root>/tenant_registry.yaml`.
    pub fn load(configs_root: &Path) -> Result<Self, ConfigError> {
        let path = configs_root.join("tenant_registry.yaml");
        let value = load_yaml(&path)?;
        serde_yaml::from_value(value).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Find a tenant by slug or UUID string.
    pub fn find(&self, slug_or_uuid: &str) -> Option<&RegistryEntry> {
        self.tenants.iter().find(|entry| {
            entry.tenant_slug.as_deref() == Some(slug_or_uuid)
                || entry
                    .tenant_id
                    .map(|id| id.to_string() == slug_or_uuid.to_ascii_lowercase())
                    .unwrap_or(false)
        })
    }

    /// Enabled tenants ordered by `schedule_priority` ascending.
    pub fn ordered_tenants(&self, include_disabled: bool) -> Vec<&RegistryEntry> {
        let mut tenants: Vec<&RegistryEntry> = self
            .tenants
            .iter()
            .filter(|entry| include_disabled || entry.enabled)
            .collect();
        tenants.sort_by_key(|entry| entry.schedule_priority);
        tenants
    }
}
