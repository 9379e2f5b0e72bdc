//! Pre-load validation and column reordering.
//!
//! The live database schema is the single source of truth for column
//! order and width. Reordering must happen before any serialization:
//! the bulk-load endpoint binds payload fields positionally, so a frame
//! in the wrong order silently corrupts every column.

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::StreamLoadSettings;
use crate::error::{ControlError, LoadError};
use crate::schema::ColumnType;

use super::control::{ControlPlane, LiveColumn};

/// A frame projected to the live column order, ready for serialization.
#[derive(Debug)]
pub struct Reconciled {
    pub frame: DataFrame,
    /// Live column names, in live order; also sent as the explicit
    /// `columns` header so a stale projection cannot bind positionally.
    pub column_order: Vec<String>,
    /// Columns widened this load, with their new width.
    pub widened: Vec<(String, u32)>,
}

fn ctl_err(table: &str) -> impl Fn(ControlError) -> LoadError + '_ {
    move |source| LoadError::Control {
        table: table.to_string(),
        source,
    }
}

fn frame_err(table: &str) -> impl Fn(PolarsError) -> LoadError + '_ {
    move |source| LoadError::LoadFrame {
        table: table.to_string(),
        source,
    }
}

/// Reconcile a silver frame against the live table.
///
/// Missing nullable columns are added as typed nulls; missing
/// non-nullable columns fail. Oversized varchar data triggers at most one
/// `ALTER` per column per load, then the live schema is re-queried.
/// Finally the frame is projected to exactly the live column list in the
/// live order.
pub async fn reconcile(
    df: DataFrame,
    table: &str,
    control: &dyn ControlPlane,
    settings: &StreamLoadSettings,
) -> Result<Reconciled, LoadError> {
    let mut live = control.describe_table(table).await.map_err(ctl_err(table))?;
    if live.is_empty() {
        return Err(LoadError::SchemaDrift {
            table: table.to_string(),
            message: "table not found in live schema".to_string(),
        });
    }

    let mut df = add_missing_columns(df, table, &live)?;

    // Widen until the frame fits. Each pass only alters columns whose
    // live width is still too small, so no column is altered twice.
    let mut widened: Vec<(String, u32)> = Vec::new();
    loop {
        let plan = plan_widening(&df, table, &live, settings)?;
        if plan.is_empty() {
            break;
        }
        for (column, new_len) in &plan {
            control
                .widen_varchar(table, column, *new_len)
                .await
                .map_err(ctl_err(table))?;
            info!(table, column = %column, new_len, "Widened varchar column");
            widened.push((column.clone(), *new_len));
        }
        live = control.describe_table(table).await.map_err(ctl_err(table))?;
    }

    check_numeric_ranges(&df, table, &live)?;

    // Drop frame columns the live table does not know.
    let live_names: Vec<String> = live.iter().map(|column| column.name.clone()).collect();
    let extras: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .filter(|name| !live_names.contains(name))
        .collect();
    if !extras.is_empty() {
        warn!(table, columns = ?extras, "Dropping columns absent from live schema");
    }

    // The critical projection: exactly the live columns, in live order.
    df = df
        .select(live_names.iter().map(String::as_str))
        .map_err(frame_err(table))?;

    Ok(Reconciled {
        frame: df,
        column_order: live_names,
        widened,
    })
}

/// Add typed nulls for live columns the frame lacks; fail on missing
/// non-nullable columns.
fn add_missing_columns(
    mut df: DataFrame,
    table: &str,
    live: &[LiveColumn],
) -> Result<DataFrame, LoadError> {
    let frame_names: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    for column in live {
        if frame_names.contains(&column.name) {
            continue;
        }
        if !column.nullable {
            return Err(LoadError::MissingColumn {
                table: table.to_string(),
                column: column.name.clone(),
            });
        }
        let dtype = ColumnType::from_describe(&column.data_type, column.char_max_len)
            .map(|ct| ct.dtype())
            .unwrap_or(DataType::String);
        let filler = Series::full_null(column.name.as_str().into(), df.height(), &dtype);
        df.with_column(filler).map_err(frame_err(table))?;
    }
    Ok(df)
}

/// Max byte length per string column vs. declared width; next power of
/// two up to the configured cap.
fn plan_widening(
    df: &DataFrame,
    table: &str,
    live: &[LiveColumn],
    settings: &StreamLoadSettings,
) -> Result<Vec<(String, u32)>, LoadError> {
    let mut plan = Vec::new();

    for column in live {
        let Some(ColumnType::Varchar(width)) =
            ColumnType::from_describe(&column.data_type, column.char_max_len)
        else {
            continue;
        };
        let Ok(frame_column) = df.column(&column.name) else {
            continue;
        };
        if frame_column.dtype() != &DataType::String {
            continue;
        }

        let max_len = max_byte_len(df, &column.name).map_err(frame_err(table))?;
        let Some(max_len) = max_len else { continue };
        if max_len <= width {
            continue;
        }

        if !settings.widen_enabled || max_len > settings.widen_cap {
            return Err(LoadError::Overflow {
                table: table.to_string(),
                column: column.name.clone(),
                needed: max_len,
                cap: if settings.widen_enabled {
                    settings.widen_cap
                } else {
                    width
                },
            });
        }

        let new_len = max_len.next_power_of_two().min(settings.widen_cap);
        plan.push((column.name.clone(), new_len));
    }

    Ok(plan)
}

fn max_byte_len(df: &DataFrame, column: &str) -> PolarsResult<Option<u32>> {
    let out = df
        .clone()
        .lazy()
        .select([col(column).str().len_bytes().max().alias("max_len")])
        .collect()?;
    let value = out.column("max_len")?.as_materialized_series().get(0)?;
    Ok(value.try_extract::<u32>().ok())
}

/// Range-check integer columns against the declared type.
fn check_numeric_ranges(
    df: &DataFrame,
    table: &str,
    live: &[LiveColumn],
) -> Result<(), LoadError> {
    for column in live {
        let Some(declared) = ColumnType::from_describe(&column.data_type, column.char_max_len)
        else {
            continue;
        };
        let Some((lo, hi)) = declared.int_range() else {
            continue;
        };
        let Ok(frame_column) = df.column(&column.name) else {
            continue;
        };
        if !frame_column.dtype().is_integer() {
            continue;
        }

        let cast = frame_column
            .cast(&DataType::Int64)
            .map_err(frame_err(table))?;
        let values = cast
            .as_materialized_series()
            .i64()
            .map_err(frame_err(table))?;
        let offending = values
            .into_iter()
            .enumerate()
            .find_map(|(row, value)| value.filter(|v| *v < lo || *v > hi).map(|v| (row, v)));

        if let Some((row, value)) = offending {
            return Err(LoadError::NumericOverflow {
                table: table.to_string(),
                column: column.name.clone(),
                message: format!(
                    "value {value} at row {row} outside {declared} range [{lo}, {hi}]"
                ),
            });
        }
    }
    Ok(())
}
