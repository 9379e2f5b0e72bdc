//! Pipeline runner: composes the stages for one `(tenant, table)` unit.
//!
//! Stage machine per table:
//!
//! ```text
//! Discovered → Downloaded → Converted → Transformed → Validated → Loaded
//! ```
//!
//! Every transition records elapsed time and row counts; any failure maps
//! to a terminal state attributed to its stage. The runner itself never
//! retries; transient recovery happens inside the components that
//! surface the errors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant as WallInstant;

use futures::Future;
use indexmap::IndexMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::TableJob;
use crate::constants::{filters_for_table, merge_filters, ConstantsBackend};
use crate::context::{LoadMode, TenantContext};
use crate::convert::{convert_file, read_parquet_file, write_parquet_atomic, ConvertOptions};
use crate::error::{LoadError, PipelineError, TransformError};
use crate::fetch::BlobFetcher;
use crate::load::{reconcile, ControlPlane, StreamLoader};
use crate::transform::transform_frame;

/// Terminal status of one table within a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableStatus {
    Success,
    PartialSuccess,
    Failed,
}

/// Outcome of one table run.
#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub status: TableStatus,
    pub rows_loaded: u64,
    pub rows_filtered: u64,
    pub elapsed_ms: u64,
    pub failed_stage: Option<&'static str>,
    pub error: Option<String>,
}

/// Aggregated result across all tables of one job invocation.
#[derive(Debug, Default)]
pub struct JobOutcome {
    pub per_table: IndexMap<String, TableOutcome>,
}

impl JobOutcome {
    /// A job is successful iff every table is Success or PartialSuccess.
    pub fn is_success(&self) -> bool {
        self.per_table
            .values()
            .all(|outcome| outcome.status != TableStatus::Failed)
    }

    /// Some tables failed, some landed.
    pub fn is_partial(&self) -> bool {
        !self.is_success()
            && self
                .per_table
                .values()
                .any(|outcome| outcome.status != TableStatus::Failed)
    }

    pub fn rows_loaded(&self) -> u64 {
        self.per_table.values().map(|o| o.rows_loaded).sum()
    }
}

#[derive(Default)]
struct TableRun {
    rows_loaded: u64,
    rows_filtered: u64,
    blob_failures: usize,
}

/// Drives one tenant's tables through the stage machine.
pub struct PipelineRunner<'ctx> {
    ctx: &'ctx TenantContext,
    fetcher: BlobFetcher,
    control: Arc<dyn ControlPlane>,
    constants: Arc<dyn ConstantsBackend>,
    loader: StreamLoader,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl<'ctx> PipelineRunner<'ctx> {
    pub fn new(
        ctx: &'ctx TenantContext,
        fetcher: BlobFetcher,
        control: Arc<dyn ControlPlane>,
        constants: Arc<dyn ConstantsBackend>,
        loader: StreamLoader,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            ctx,
            fetcher,
            control,
            constants,
            loader,
            cancel,
            deadline,
        }
    }

    /// Run every table a job declares, aggregating outcomes. A failed
    /// table never aborts the remaining tables.
    pub async fn run_job(
        &self,
        jobs: &[TableJob],
        mode: LoadMode,
        truncate: bool,
    ) -> JobOutcome {
        let mut outcome = JobOutcome::default();
        for job in jobs {
            if self.cancel.is_cancelled() {
                break;
            }
            let table_outcome = self.run_table(job, mode, truncate).await;
            outcome.per_table.insert(job.table.clone(), table_outcome);
        }
        outcome
    }

    /// Drive one table through the full stage machine.
    pub async fn run_table(&self, job: &TableJob, mode: LoadMode, truncate: bool) -> TableOutcome {
        let started = WallInstant::now();
        match self.run_table_inner(job, mode, truncate).await {
            Ok(run) => {
                let status = if run.blob_failures > 0 {
                    TableStatus::PartialSuccess
                } else {
                    TableStatus::Success
                };
                TableOutcome {
                    status,
                    rows_loaded: run.rows_loaded,
                    rows_filtered: run.rows_filtered,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    failed_stage: None,
                    error: None,
                }
            }
            Err(err) => {
                // One line per terminal failure: kind, table, pointer.
                error!(
                    tenant = %self.ctx.slug,
                    table = %job.table,
                    stage = err.stage(),
                    error = %err,
                    "Table pipeline failed"
                );
                TableOutcome {
                    status: TableStatus::Failed,
                    rows_loaded: 0,
                    rows_filtered: 0,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    failed_stage: Some(err.stage()),
                    error: Some(err.to_string()),
                }
            }
        }
    }

    async fn run_table_inner(
        &self,
        job: &TableJob,
        mode: LoadMode,
        truncate: bool,
    ) -> Result<TableRun, PipelineError> {
        let table = job.table.as_str();
        let dirs = self
            .ctx
            .stage_dirs(mode)
            .map_err(|e| PipelineError::Internal {
                message: format!("failed to create stage dirs: {e}"),
            })?;

        // Discovered
        let stage_start = WallInstant::now();
        let blobs = self
            .with_deadline("discovery", async {
                Ok(self
                    .fetcher
                    .discover(&job.blob_prefix, job.suffix.as_deref())
                    .await?)
            })
            .await?;
        debug!(table, blobs = blobs.len(),
            elapsed_ms = stage_start.elapsed().as_millis() as u64, "Discovered");

        if blobs.is_empty() {
            info!(tenant = %self.ctx.slug, table, "No source files for this run");
            return Ok(TableRun::default());
        }

        // Downloaded
        let stage_start = WallInstant::now();
        let batch = self
            .with_deadline("download", async {
                Ok(self
                    .fetcher
                    .download_all(&blobs, &dirs.source_files, &self.cancel, self.deadline)
                    .await?)
            })
            .await?;
        if batch.files.is_empty() {
            if let Some((_, err)) = batch.failed.into_iter().next() {
                return Err(err.into());
            }
            return Err(PipelineError::Cancelled);
        }
        debug!(table, files = batch.files.len(), failed = batch.failed.len(),
            elapsed_ms = stage_start.elapsed().as_millis() as u64, "Downloaded");

        // Converted
        let stage_start = WallInstant::now();
        let options = ConvertOptions::default();
        let mut bronze: Vec<PathBuf> = Vec::with_capacity(batch.files.len());
        for file in &batch.files {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            bronze.push(convert_file(file, &dirs.raw_parquet, &options)?);
        }
        debug!(table, files = bronze.len(),
            elapsed_ms = stage_start.elapsed().as_millis() as u64, "Converted");

        // Transformed. Filter dimensions come from two places: the static
        // business rules in YAML and the mutable constants backend; a
        // constant supersedes a static filter on the same column.
        let stage_start = WallInstant::now();
        let static_filters = self
            .ctx
            .business_rules
            .filters
            .get(table)
            .map(|rules| rules.as_slice())
            .unwrap_or_default();
        let dynamic_filters = self
            .with_deadline("transform", async {
                filters_for_table(self.constants.as_ref(), table)
                    .await
                    .map_err(|source| TransformError::FilterInvalid {
                        table: table.to_string(),
                        column: crate::constants::FILTER_KEY_PREFIX.to_string(),
                        message: format!("failed to read filter constants: {source}"),
                    })
                    .map_err(PipelineError::from)
            })
            .await?;
        let filters = merge_filters(static_filters, dynamic_filters);
        let mut silver: Vec<PathBuf> = Vec::with_capacity(bronze.len());
        let mut rows_filtered = 0u64;
        for bronze_path in &bronze {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            let frame = read_parquet_file(bronze_path)?;
            let (cleaned, report) = transform_frame(
                frame,
                table,
                self.ctx.mapping_for(table),
                self.ctx.computed_for(table),
                &filters,
            )?;
            rows_filtered += report.rows_filtered as u64;
            let silver_path = dirs.cleaned_parquet.join(
                bronze_path
                    .file_name()
                    .expect("bronze files always have a name"),
            );
            write_parquet_atomic(cleaned, &silver_path)?;
            silver.push(silver_path);
        }
        debug!(table, files = silver.len(), rows_filtered,
            elapsed_ms = stage_start.elapsed().as_millis() as u64, "Transformed");

        // Truncate strictly precedes all inserts on a full refresh; a
        // failed truncate aborts the whole load with no partial state.
        if truncate {
            self.with_deadline("load", async {
                self.control
                    .truncate_table(table)
                    .await
                    .map_err(|source| LoadError::TruncateFailed {
                        table: table.to_string(),
                        source,
                    })
                    .map_err(PipelineError::from)
            })
            .await?;
            info!(tenant = %self.ctx.slug, table, "Truncated for full refresh");
        }

        // Validated + Loaded, one silver file at a time; chunk ordinals
        // continue across files so labels stay unique within the run.
        let stage_start = WallInstant::now();
        let mut run = TableRun {
            blob_failures: batch.failed.len(),
            rows_filtered,
            ..Default::default()
        };
        let mut chunk_base = 0usize;
        let url = self.ctx.stream_load_url(table);

        for silver_path in &silver {
            let frame = read_parquet_file(silver_path)?;
            let reconciled = self
                .with_deadline("validate", async {
                    reconcile(frame, table, self.control.as_ref(), &self.ctx.stream_load)
                        .await
                        .map_err(PipelineError::from)
                })
                .await?;

            let stats = self
                .with_deadline("load", async {
                    self.loader
                        .load_frame(
                            &reconciled.frame,
                            &reconciled.column_order,
                            table,
                            &url,
                            &self.ctx.slug,
                            chunk_base,
                            &self.cancel,
                        )
                        .await
                        .map_err(PipelineError::from)
                })
                .await?;

            if stats.cancelled {
                return Err(PipelineError::Cancelled);
            }
            chunk_base += stats.chunks_sent;
            run.rows_loaded += stats.rows_loaded;
            run.rows_filtered += stats.rows_filtered;
        }
        debug!(table, rows_loaded = run.rows_loaded,
            elapsed_ms = stage_start.elapsed().as_millis() as u64, "Loaded");

        // Temp files are cleaned on success; on failure we return early
        // above and leave them for diagnostics until the next run.
        for path in batch.files.iter().chain(bronze.iter()).chain(silver.iter()) {
            let _ = std::fs::remove_file(path);
        }

        Ok(run)
    }

    /// Enforce the job deadline on a stage's network-bound future.
    async fn with_deadline<T, F>(
        &self,
        stage: &'static str,
        fut: F,
    ) -> Result<T, PipelineError>
    where
        F: Future<Output = Result<T, PipelineError>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| PipelineError::TimedOut { stage })?,
            None => fut.await,
        }
    }
}
