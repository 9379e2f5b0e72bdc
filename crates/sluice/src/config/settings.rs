//! Typed views over the merged tenant configuration tree.
//!
//! The resolver assembles one YAML value from the layered files, then
//! deserializes it into these structs. Every field has a default so a
//! minimal tenant config stays minimal.

use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Deserialize;

/// Database connection parameters (password comes from the env layer).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub name: Option<String>,
    pub host: String,
    pub port: u16,
    pub http_port: u16,
    pub user: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            name: None,
            host: "127.0.0.1".to_string(),
            port: 9030,
            http_port: 8040,
            user: "root".to_string(),
        }
    }
}

/// Connection-pool tuning, layered in from `starrocks/connection_pool.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub min_connections: usize,
    pub max_connections: usize,
    pub pre_ping: bool,
    pub recycle_secs: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 5,
            pre_ping: true,
            recycle_secs: 3600,
        }
    }
}

/// Stream-load tuning, layered in from `starrocks/stream_load_defaults.yaml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamLoadSettings {
    /// Rows per chunk.
    pub chunk_size: usize,
    pub timeout_secs: u64,
    /// 0.0 = strict: any database-side filtered row fails the chunk.
    pub max_filter_ratio: f64,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    /// Permit automatic `ALTER TABLE … MODIFY COLUMN` widening.
    pub widen_enabled: bool,
    /// Upper bound for widened varchar columns.
    pub widen_cap: u32,
}

impl Default for StreamLoadSettings {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            timeout_secs: 900,
            max_filter_ratio: 0.0,
            max_retries: 3,
            retry_base_delay_secs: 2,
            widen_enabled: true,
            widen_cap: 5000,
        }
    }
}

/// Blob discovery and download tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    /// Emit a progress milestone every N blobs.
    pub progress_every: usize,
    pub max_retries: u32,
    pub retry_base_delay_secs: u64,
    pub fail_fast: bool,
    /// Suffixes accepted during discovery.
    pub suffixes: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            progress_every: 5,
            max_retries: 3,
            retry_base_delay_secs: 2,
            fail_fast: false,
            suffixes: vec![
                ".csv".to_string(),
                ".csv.gz".to_string(),
                ".parquet".to_string(),
                ".xlsx".to_string(),
            ],
        }
    }
}

/// Non-secret storage coordinates; credentials live in the env layer.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Azure container name.
    pub container: Option<String>,
    /// Azure storage account name (not a credential).
    pub account: Option<String>,
    /// S3/GCS bucket name.
    pub bucket: Option<String>,
    /// Local filesystem root (local provider).
    pub root: Option<PathBuf>,
    /// Base prefix inside the container/bucket.
    pub prefix: Option<String>,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible gateways (MinIO).
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

/// Filesystem layout for the tenant's working tree.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataPathSettings {
    /// Base directory; the tenant slug is appended beneath it.
    pub base: PathBuf,
}

impl Default for DataPathSettings {
    fn default() -> Self {
        Self {
            base: PathBuf::from("data"),
        }
    }
}

/// Row-level filter declaration.
///
/// Exactly one predicate field must be set; filters run after computed
/// columns so they may reference them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RowFilter {
    pub column: String,
    #[serde(default)]
    pub in_set: Option<Vec<String>>,
    #[serde(default)]
    pub min_int: Option<i64>,
    /// ISO date lower bound applied to DATE columns.
    #[serde(default)]
    pub min_date: Option<String>,
}

/// Shared and tenant business rules.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BusinessRules {
    /// Per-table row filters.
    pub filters: IndexMap<String, Vec<RowFilter>>,
}

/// One table's job declaration.
///
/// `blob_prefix` is the provider-native PascalCase path segment recorded
/// per tenant; it is never derived by mangling the snake_case table name
/// (`dim_dealer_master` lives under `DimDealer_MS`, not `DimDealerMaster`).
#[derive(Debug, Clone, Deserialize)]
pub struct TableJob {
    pub table: String,
    pub blob_prefix: String,
    /// Restrict discovery to one suffix for this table.
    #[serde(default)]
    pub suffix: Option<String>,
}

/// Tables each named job iterates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobSettings {
    pub dimensions: Vec<TableJob>,
    pub facts: Vec<TableJob>,
}

/// The fully merged tenant configuration tree.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TenantSettings {
    pub database: DatabaseSettings,
    pub connection_pool: PoolSettings,
    pub stream_load: StreamLoadSettings,
    pub fetch: FetchSettings,
    pub storage: StorageSettings,
    pub data_paths: DataPathSettings,
    pub business_rules: BusinessRules,
    pub jobs: JobSettings,
}
