//! Sluice CLI: tenant-aware ETL jobs for columnar warehouses.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use sluice::{
    evening_dimension_refresh, init_tracing, morning_dimension_incremental,
    morning_fact_incremental, seed_load, shutdown_signal, ConfigResolver, JobDeps, JobOutcome,
    LoadMode, TableStatus,
};

/// Sluice - multi-tenant ETL engine
#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(about = "Ingests tabular files from object storage and stream-loads them into StarRocks")]
struct Args {
    /// Path to the configuration root directory
    #[arg(short, long, default_value = "configs")]
    configs: PathBuf,

    /// Run for a single tenant (slug or UUID) instead of all enabled tenants
    #[arg(short, long)]
    tenant: Option<String>,

    /// Use the historical tree instead of incremental (backfills)
    #[arg(long)]
    historical: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List registered tenants in schedule-priority order
    ListTenants {
        /// Include disabled tenants
        #[arg(long)]
        all: bool,
    },
    /// Truncate and reload every declared dimension table
    EveningDimensionRefresh,
    /// Append today's partition into the dimension tables
    MorningDimensionIncremental,
    /// Append one fact table
    MorningFactIncremental {
        #[arg(long)]
        table: String,
    },
    /// Load reference CSVs from the tenant's seeds directory
    SeedLoad {
        #[arg(long)]
        table: Option<String>,
    },
    /// Create declared tables, views, and materialized views in ordinal order
    CreateSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args = Args::parse();
    let resolver = match ConfigResolver::new(&args.configs) {
        Ok(resolver) => Arc::new(resolver),
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Command::ListTenants { all } = &args.command {
        for entry in resolver.list_tenants(*all) {
            println!(
                "{:>4}  {}  {}  enabled={}",
                entry.schedule_priority,
                entry.display_slug(),
                entry
                    .database_name
                    .as_deref()
                    .unwrap_or("<no database>"),
                entry.enabled
            );
        }
        return ExitCode::SUCCESS;
    }

    let cancel = CancellationToken::new();
    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_cancel.cancel();
    });

    let mode = if args.historical {
        LoadMode::Historical
    } else {
        LoadMode::Incremental
    };

    let slugs: Vec<String> = match &args.tenant {
        Some(tenant) => vec![tenant.clone()],
        None => resolver
            .list_tenants(false)
            .iter()
            .filter_map(|entry| entry.tenant_slug.clone())
            .collect(),
    };

    if slugs.is_empty() {
        warn!("No enabled tenants to run");
        return ExitCode::SUCCESS;
    }

    let max_concurrent = resolver.global().max_concurrent_tenants.max(1);
    let mut results: Vec<(String, Result<JobOutcome, String>)> = Vec::new();

    if max_concurrent <= 1 {
        // Default: one tenant fully completes before the next starts.
        for slug in slugs {
            if cancel.is_cancelled() {
                break;
            }
            let result = run_tenant(&resolver, &slug, &args.command, mode, cancel.clone()).await;
            results.push((slug, result));
        }
    } else {
        let mut join_set = tokio::task::JoinSet::new();
        let semaphore = Arc::new(tokio::sync::Semaphore::new(max_concurrent));
        for slug in slugs {
            let resolver = resolver.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            let command = args.command.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore open");
                let result = run_tenant(&resolver, &slug, &command, mode, cancel).await;
                (slug, result)
            });
        }
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => error!("Tenant task panicked: {e}"),
            }
        }
    }

    summarize(results)
}

/// Resolve one tenant and run the requested job against it.
async fn run_tenant(
    resolver: &ConfigResolver,
    slug: &str,
    command: &Command,
    mode: LoadMode,
    cancel: CancellationToken,
) -> Result<JobOutcome, String> {
    let ctx = resolver.resolve(slug).map_err(|e| e.to_string())?;
    let deps = JobDeps::production(&ctx);
    let deadline =
        Instant::now() + Duration::from_secs(resolver.global().tenant_timeout_secs);

    let outcome = match command {
        Command::EveningDimensionRefresh => {
            evening_dimension_refresh(&ctx, &deps, mode, cancel, Some(deadline)).await
        }
        Command::MorningDimensionIncremental => {
            morning_dimension_incremental(&ctx, &deps, mode, cancel, Some(deadline)).await
        }
        Command::MorningFactIncremental { table } => {
            morning_fact_incremental(&ctx, &deps, table, mode, cancel, Some(deadline)).await
        }
        Command::SeedLoad { table } => seed_load(&ctx, &deps, table.as_deref(), cancel).await,
        Command::CreateSchema => sluice::jobs::create_schema_objects(&ctx, &deps).await,
        Command::ListTenants { .. } => unreachable!("handled before job dispatch"),
    };

    outcome.map_err(|e| e.to_string())
}

/// Aggregate tenant outcomes into the process exit code: 0 all green,
/// 2 partial, 1 nothing landed.
fn summarize(results: Vec<(String, Result<JobOutcome, String>)>) -> ExitCode {
    let mut succeeded = 0usize;
    let mut partial = 0usize;
    let mut failed = 0usize;

    for (slug, result) in &results {
        match result {
            Ok(outcome) if outcome.is_success() => {
                succeeded += 1;
                info!(
                    tenant = %slug,
                    tables = outcome.per_table.len(),
                    rows_loaded = outcome.rows_loaded(),
                    "Job complete"
                );
            }
            Ok(outcome) => {
                if outcome.is_partial() {
                    partial += 1;
                } else {
                    failed += 1;
                }
                for (table, table_outcome) in &outcome.per_table {
                    if table_outcome.status == TableStatus::Failed {
                        warn!(
                            tenant = %slug,
                            table = %table,
                            stage = table_outcome.failed_stage.unwrap_or("unknown"),
                            error = table_outcome.error.as_deref().unwrap_or(""),
                            "Table failed"
                        );
                    }
                }
            }
            Err(e) => {
                failed += 1;
                error!(tenant = %slug, error = %e, "Job aborted");
            }
        }
    }

    if failed == 0 && partial == 0 {
        ExitCode::SUCCESS
    } else if succeeded > 0 || partial > 0 {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}
