//! Named job entry points invoked by the external scheduler.
//!
//! The engine is agnostic to wall-clock timing: "evening dimensions
//! before morning facts" is the scheduler's contract, not ours. Every
//! entry point is idempotent at the job level: labels and the database's
//! primary-key merge absorb re-invocation.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::TableJob;
use crate::constants::backend_for;
use crate::context::{LoadMode, TenantContext};
use crate::error::{ConvertError, PipelineError};
use crate::fetch::BlobFetcher;
use crate::load::{
    reconcile, ChunkTransport, ControlPlane, HttpChunkTransport, MySqlControlPlane, StreamLoader,
};
use crate::pipeline::{JobOutcome, PipelineRunner, TableOutcome, TableStatus};
use crate::seeds::{load_seed_mapping, read_seed_csv};
use sluice_core::BlobStore;

/// Outcome of a seed load, keyed by target table.
pub type SeedOutcome = JobOutcome;

/// External dependencies a job needs; swap these to test without a
/// cluster.
pub struct JobDeps {
    pub control: Arc<dyn ControlPlane>,
    pub transport: Arc<dyn ChunkTransport>,
}

impl JobDeps {
    /// Production wiring: MySQL-protocol control plane and HTTP stream
    /// load, both built from the tenant context.
    pub fn production(ctx: &TenantContext) -> Self {
        let control = MySqlControlPlane::connect(
            &ctx.database,
            &ctx.database_name,
            &ctx.db_password,
            &ctx.pool,
        );
        let transport = HttpChunkTransport::new(&ctx.database.user, &ctx.db_password);
        Self {
            control: Arc::new(control),
            transport: Arc::new(transport),
        }
    }
}

async fn build_runner<'ctx>(
    ctx: &'ctx TenantContext,
    deps: &JobDeps,
    cancel: CancellationToken,
    deadline: Option<Instant>,
) -> Result<PipelineRunner<'ctx>, PipelineError> {
    let store = BlobStore::connect(ctx.storage.clone())
        .await
        .map_err(|e| PipelineError::Internal {
            message: format!("failed to connect storage: {e}"),
        })?;
    let fetcher = BlobFetcher::new(Arc::new(store), ctx.fetch.clone());
    let constants = backend_for(ctx, deps.control.clone())
        .await
        .map_err(|e| PipelineError::Internal {
            message: format!("failed to build constants backend: {e}"),
        })?;
    let loader = StreamLoader::new(deps.transport.clone(), ctx.stream_load.clone());
    Ok(PipelineRunner::new(
        ctx,
        fetcher,
        deps.control.clone(),
        constants,
        loader,
        cancel,
        deadline,
    ))
}

/// Full refresh of every dimension table the tenant declares
/// (truncate, then load).
pub async fn evening_dimension_refresh(
    ctx: &TenantContext,
    deps: &JobDeps,
    mode: LoadMode,
    cancel: CancellationToken,
    deadline: Option<Instant>,
) -> Result<JobOutcome, PipelineError> {
    info!(tenant = %ctx.slug, tables = ctx.jobs.dimensions.len(), "Evening dimension refresh");
    let runner = build_runner(ctx, deps, cancel, deadline).await?;
    Ok(runner.run_job(&ctx.jobs.dimensions, mode, true).await)
}

/// Append-only refresh of dimension tables from today's blob partition.
pub async fn morning_dimension_incremental(
    ctx: &TenantContext,
    deps: &JobDeps,
    mode: LoadMode,
    cancel: CancellationToken,
    deadline: Option<Instant>,
) -> Result<JobOutcome, PipelineError> {
    info!(tenant = %ctx.slug, tables = ctx.jobs.dimensions.len(), "Morning dimension incremental");
    let runner = build_runner(ctx, deps, cancel, deadline).await?;
    Ok(runner.run_job(&ctx.jobs.dimensions, mode, false).await)
}

/// One fact table, append-only. Deduplication is the database's
/// primary-key merge over the composite key the transformer computes.
pub async fn morning_fact_incremental(
    ctx: &TenantContext,
    deps: &JobDeps,
    table: &str,
    mode: LoadMode,
    cancel: CancellationToken,
    deadline: Option<Instant>,
) -> Result<JobOutcome, PipelineError> {
    let job: Vec<TableJob> = ctx
        .jobs
        .facts
        .iter()
        .filter(|job| job.table == table)
        .cloned()
        .collect();
    if job.is_empty() {
        return Err(PipelineError::Internal {
            message: format!("fact table '{table}' is not declared for tenant '{}'", ctx.slug),
        });
    }

    info!(tenant = %ctx.slug, table, "Morning fact incremental");
    let runner = build_runner(ctx, deps, cancel, deadline).await?;
    Ok(runner.run_job(&job, mode, false).await)
}

/// Create the tenant's declared tables, views, and materialized views in
/// ordinal order. Operator tooling; not part of the pipeline proper.
pub async fn create_schema_objects(
    ctx: &TenantContext,
    deps: &JobDeps,
) -> Result<JobOutcome, PipelineError> {
    let mut outcome = JobOutcome::default();
    for schema in &ctx.schemas {
        let started = std::time::Instant::now();
        let result = deps.control.execute_ddl(&schema.ddl).await;
        let table_outcome = match result {
            Ok(()) => {
                info!(tenant = %ctx.slug, object = %schema.name, ordinal = schema.ordinal,
                    "Schema object created");
                TableOutcome {
                    status: TableStatus::Success,
                    rows_loaded: 0,
                    rows_filtered: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    failed_stage: None,
                    error: None,
                }
            }
            Err(err) => {
                warn!(tenant = %ctx.slug, object = %schema.name, error = %err, "DDL failed");
                TableOutcome {
                    status: TableStatus::Failed,
                    rows_loaded: 0,
                    rows_filtered: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    failed_stage: Some("config"),
                    error: Some(err.to_string()),
                }
            }
        };
        outcome.per_table.insert(schema.name.clone(), table_outcome);
    }
    Ok(outcome)
}

/// Load one or all reference CSVs from the tenant's `seeds/` directory
/// through the same validator and stream loader the pipeline uses.
pub async fn seed_load(
    ctx: &TenantContext,
    deps: &JobDeps,
    table: Option<&str>,
    cancel: CancellationToken,
) -> Result<SeedOutcome, PipelineError> {
    let seeds_dir = ctx.seeds_dir();
    let mapping = load_seed_mapping(&seeds_dir)?;
    let loader = StreamLoader::new(deps.transport.clone(), ctx.stream_load.clone());

    let mut outcome = SeedOutcome::default();
    for seed in &mapping.seeds {
        if let Some(only) = table {
            if seed.table != only {
                continue;
            }
        }

        let started = std::time::Instant::now();
        let result = load_one_seed(ctx, deps, &loader, &seeds_dir, seed, &cancel).await;
        let table_outcome = match result {
            Ok((rows_loaded, rows_filtered)) => TableOutcome {
                status: TableStatus::Success,
                rows_loaded,
                rows_filtered,
                elapsed_ms: started.elapsed().as_millis() as u64,
                failed_stage: None,
                error: None,
            },
            Err(err) => {
                warn!(tenant = %ctx.slug, table = %seed.table, error = %err, "Seed load failed");
                TableOutcome {
                    status: TableStatus::Failed,
                    rows_loaded: 0,
                    rows_filtered: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    failed_stage: Some(err.stage()),
                    error: Some(err.to_string()),
                }
            }
        };
        outcome.per_table.insert(seed.table.clone(), table_outcome);
    }

    Ok(outcome)
}

async fn load_one_seed(
    ctx: &TenantContext,
    deps: &JobDeps,
    loader: &StreamLoader,
    seeds_dir: &std::path::Path,
    seed: &crate::seeds::SeedEntry,
    cancel: &CancellationToken,
) -> Result<(u64, u64), PipelineError> {
    let csv_path = seeds_dir.join(&seed.file);
    if !csv_path.is_file() {
        return Err(PipelineError::Convert {
            source: ConvertError::Parse {
                path: csv_path.display().to_string(),
                message: "seed file not found".to_string(),
            },
        });
    }

    let frame = read_seed_csv(&csv_path, &seed.columns)?;

    if seed.truncate {
        deps.control
            .truncate_table(&seed.table)
            .await
            .map_err(|source| crate::error::LoadError::TruncateFailed {
                table: seed.table.clone(),
                source,
            })?;
    }

    let reconciled = reconcile(frame, &seed.table, deps.control.as_ref(), &ctx.stream_load).await?;
    let stats = loader
        .load_frame(
            &reconciled.frame,
            &reconciled.column_order,
            &seed.table,
            &ctx.stream_load_url(&seed.table),
            &ctx.slug,
            0,
            cancel,
        )
        .await?;

    // Verification the seed landed.
    match deps.control.row_count(&seed.table).await {
        Ok(count) => info!(table = %seed.table, rows = count, "Seed table row count"),
        Err(err) => warn!(table = %seed.table, error = %err, "Row count check failed"),
    }

    Ok((stats.rows_loaded, stats.rows_filtered))
}
