//! Frozen per-tenant runtime context.
//!
//! A `TenantContext` is the only way stages see tenant configuration.
//! It is built once by the resolver and never mutated; credentials live
//! here and are never logged.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use uuid::Uuid;

use crate::config::registry::ConstantsBackendKind;
use crate::config::settings::{
    BusinessRules, DatabaseSettings, FetchSettings, JobSettings, PoolSettings, StreamLoadSettings,
};
use crate::schema::{ColumnMapping, ComputedColumn, TableSchema};
use sluice_core::BackendSettings;

/// Load mode selects which working tree a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Incremental,
    Historical,
}

impl LoadMode {
    pub fn dir_name(&self) -> &'static str {
        match self {
            LoadMode::Incremental => "incremental",
            LoadMode::Historical => "historical",
        }
    }
}

/// The three stage directories for one mode.
#[derive(Debug, Clone)]
pub struct StageDirs {
    /// Downloaded source files, exactly as fetched (post-decompression).
    pub source_files: PathBuf,
    /// Bronze layer: canonical columnar mirror of source.
    pub raw_parquet: PathBuf,
    /// Silver layer: transformed, validated, loadable frames.
    pub cleaned_parquet: PathBuf,
}

/// Frozen view of one tenant's identity, paths, credentials, schemas,
/// and runtime parameters.
pub struct TenantContext {
    pub tenant_id: Uuid,
    pub slug: String,
    pub name: String,
    pub schedule_priority: u32,

    pub database: DatabaseSettings,
    /// Database name from the registry (authoritative over YAML).
    pub database_name: String,
    pub db_password: String,

    pub pool: PoolSettings,
    pub stream_load: StreamLoadSettings,
    pub fetch: FetchSettings,
    pub storage: BackendSettings,
    pub constants_backend: ConstantsBackendKind,

    /// Tenant-scoped working tree root (`<base>/<slug>`).
    pub data_root: PathBuf,
    /// Tenant configuration directory (schemas, mappings, seeds).
    pub config_dir: PathBuf,

    pub jobs: JobSettings,
    pub business_rules: BusinessRules,
    pub schemas: Vec<TableSchema>,
    pub mappings: IndexMap<String, ColumnMapping>,
    pub computed: IndexMap<String, Vec<ComputedColumn>>,

    /// Flat key-value secrets from the tenant `.env`; never merged into
    /// the YAML tree.
    pub env: IndexMap<String, String>,
}

impl std::fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .field("slug", &self.slug)
            .field("database_name", &self.database_name)
            .field("data_root", &self.data_root)
            .finish_non_exhaustive()
    }
}

impl TenantContext {
    /// The three stage directories for `mode`, created on demand.
    pub fn stage_dirs(&self, mode: LoadMode) -> std::io::Result<StageDirs> {
        let base = self.data_root.join(mode.dir_name());
        let dirs = StageDirs {
            source_files: base.join("source_files"),
            raw_parquet: base.join("raw_parquet"),
            cleaned_parquet: base.join("cleaned_parquet"),
        };
        std::fs::create_dir_all(&dirs.source_files)?;
        std::fs::create_dir_all(&dirs.raw_parquet)?;
        std::fs::create_dir_all(&dirs.cleaned_parquet)?;
        Ok(dirs)
    }

    /// Stream-load endpoint for one target table.
    pub fn stream_load_url(&self, table: &str) -> String {
        format!(
            "http://{}:{}/api/{}/{}/_stream_load",
            self.database.host, self.database.http_port, self.database_name, table
        )
    }

    /// Column mapping for a table, if declared.
    pub fn mapping_for(&self, table: &str) -> Option<&ColumnMapping> {
        self.mappings.get(table)
    }

    /// Computed-column rules for a table, in dependency order.
    pub fn computed_for(&self, table: &str) -> &[ComputedColumn] {
        self.computed
            .get(table)
            .map(|rules| rules.as_slice())
            .unwrap_or_default()
    }

    /// Seeds directory for this tenant.
    pub fn seeds_dir(&self) -> PathBuf {
        self.config_dir.join("seeds")
    }

    /// True when `path` is nested under this tenant's working tree.
    pub fn owns_path(&self, path: &Path) -> bool {
        path.starts_with(&self.data_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_dir_names() {
        assert_eq!(LoadMode::Incremental.dir_name(), "incremental");
        assert_eq!(LoadMode::Historical.dir_name(), "historical");
    }
}
