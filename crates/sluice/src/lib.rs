//! sluice: multi-tenant ETL engine for columnar warehouses.
//!
//! This crate handles:
//! - Resolving layered per-tenant configuration into frozen contexts
//! - Discovering and downloading source blobs (Azure, S3, GCS, local)
//! - Converting tabular files to a canonical columnar bronze layer
//! - Schema-driven transformation into a loadable silver layer
//! - Reconciling frames against live database schemas and streaming them
//!   through the bulk-load HTTP endpoint in live column order

pub mod config;
pub mod constants;
pub mod context;
pub mod convert;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod load;
pub mod pipeline;
pub mod schema;
pub mod seeds;
pub mod transform;

// Re-export commonly used items
pub use config::{ConfigResolver, GlobalSettings, RegistryEntry, TableJob};
pub use context::{LoadMode, StageDirs, TenantContext};
pub use error::PipelineError;
pub use jobs::{
    evening_dimension_refresh, morning_dimension_incremental, morning_fact_incremental, seed_load,
    JobDeps, SeedOutcome,
};
pub use pipeline::{JobOutcome, PipelineRunner, TableOutcome, TableStatus};

// Re-export from sluice-core
pub use sluice_core::{
    init_tracing, shutdown_signal, BackendSettings, BlobEntry, BlobStore, BlobStoreRef,
};
