//! Silver-layer transformation.
//!
//! Produces a frame whose columns, types, and row content match what the
//! database expects, driven entirely by declarative per-tenant
//! configuration. Order matters: mapping renames first (so later steps
//! see destination names), then type coercion and cleaning, then computed
//! columns, then row filters last so they may reference computed columns.
//!
//! The output column order is arbitrary; the loader owns reordering.

use polars::prelude::*;
use tracing::{info, warn};

use crate::config::RowFilter;
use crate::error::TransformError;
use crate::schema::{
    ArithmeticOp, CastErrorPolicy, CleanRule, ColumnMapping, ColumnType, ComputedColumn,
    ComputedRule, TransformFn,
};

/// Counts a transformation run reports upward.
#[derive(Debug, Default, Clone)]
pub struct TransformReport {
    pub rows_before: usize,
    pub rows_after: usize,
    pub columns_renamed: usize,
    pub columns_added: usize,
    pub columns_dropped: usize,
    pub rows_filtered: usize,
    /// Columns whose cast failed under the keep-string policy.
    pub kept_as_string: Vec<String>,
    /// Name of the last computed column (the composite key for facts).
    pub computed_key: Option<String>,
}

fn frame_err(table: &str, source: PolarsError) -> TransformError {
    TransformError::Frame {
        table: table.to_string(),
        source,
    }
}

/// Run the full silver transformation for one table.
pub fn transform_frame(
    df: DataFrame,
    table: &str,
    mapping: Option<&ColumnMapping>,
    computed: &[ComputedColumn],
    filters: &[RowFilter],
) -> Result<(DataFrame, TransformReport), TransformError> {
    let mapping = mapping.ok_or_else(|| TransformError::MissingMapping {
        table: table.to_string(),
    })?;

    let mut report = TransformReport {
        rows_before: df.height(),
        ..Default::default()
    };

    let df = apply_mapping(df, table, mapping, &mut report)?;
    let df = apply_coercion(df, table, mapping, &mut report)?;
    let df = apply_computed(df, table, computed, &mut report)?;
    let df = apply_filters(df, table, filters, &mut report)?;

    report.rows_after = df.height();
    Ok((df, report))
}

/// Step 1: rename source columns to target names, drop unmapped source
/// columns, add absent targets as typed nulls.
fn apply_mapping(
    df: DataFrame,
    table: &str,
    mapping: &ColumnMapping,
    report: &mut TransformReport,
) -> Result<DataFrame, TransformError> {
    let frame_columns: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|name| name.to_string())
        .collect();

    let present: Vec<_> = mapping
        .columns
        .iter()
        .filter(|entry| frame_columns.contains(&entry.source))
        .collect();

    report.columns_dropped = frame_columns
        .iter()
        .filter(|name| !mapping.columns.iter().any(|e| &e.source == *name))
        .count();

    let selection: Vec<&str> = present.iter().map(|entry| entry.source.as_str()).collect();
    let mut out = df.select(selection).map_err(|e| frame_err(table, e))?;

    for entry in &present {
        if entry.source != entry.target {
            out.rename(&entry.source, entry.target.as_str().into())
                .map_err(|e| frame_err(table, e))?;
            report.columns_renamed += 1;
        }
    }

    for entry in &mapping.columns {
        if !present
            .iter()
            .any(|present_entry| present_entry.target == entry.target)
        {
            let filler = Series::full_null(
                entry.target.as_str().into(),
                out.height(),
                &entry.target_type.dtype(),
            );
            out.with_column(filler).map_err(|e| frame_err(table, e))?;
            report.columns_added += 1;
        }
    }

    // One summary line, never per-column logs.
    info!(
        table,
        renamed = report.columns_renamed,
        added = report.columns_added,
        dropped = report.columns_dropped,
        "Column mapping applied"
    );
    Ok(out)
}

/// Step 2: cast each column to its declared semantic type, applying the
/// entry's cleaning rules on the way.
fn apply_coercion(
    df: DataFrame,
    table: &str,
    mapping: &ColumnMapping,
    report: &mut TransformReport,
) -> Result<DataFrame, TransformError> {
    let mut exprs: Vec<Expr> = Vec::new();

    for entry in &mapping.columns {
        let current = df
            .column(&entry.target)
            .map_err(|e| frame_err(table, e))?
            .dtype()
            .clone();
        let wanted = entry.target_type.dtype();
        let is_string = current == DataType::String;

        let mut expr = col(entry.target.as_str());

        if is_string {
            for rule in &entry.clean {
                match rule {
                    CleanRule::Trim => expr = expr.str().strip_chars(lit(Null {})),
                    CleanRule::Uppercase => expr = expr.str().to_uppercase(),
                    _ => {}
                }
            }
        }

        expr = match entry.target_type {
            ColumnType::Date if is_string => expr.str().to_date(StrptimeOptions {
                format: date_format(entry).map(Into::into),
                strict: false,
                ..Default::default()
            }),
            ColumnType::DateTime if is_string => expr.str().to_datetime(
                Some(TimeUnit::Microseconds),
                None,
                StrptimeOptions {
                    format: date_format(entry).map(Into::into),
                    strict: false,
                    ..Default::default()
                },
                lit("raise"),
            ),
            _ if current != wanted => match entry.on_cast_error {
                // Non-strict: unparseable values become null.
                CastErrorPolicy::Null => expr.cast(wanted.clone()),
                CastErrorPolicy::Zero => expr
                    .cast(wanted.clone())
                    .fill_null(lit(0).cast(wanted.clone())),
                CastErrorPolicy::KeepString => {
                    warn!(table, column = %entry.target, "Cast skipped, keeping strings");
                    report.kept_as_string.push(entry.target.clone());
                    expr
                }
            },
            _ => expr,
        };

        for rule in &entry.clean {
            if let CleanRule::Round(decimals) = rule {
                expr = expr.round(*decimals);
            }
        }

        exprs.push(expr.alias(entry.target.as_str()));
    }

    df.lazy()
        .with_columns(exprs)
        .collect()
        .map_err(|e| frame_err(table, e))
}

fn date_format(entry: &crate::schema::MappingEntry) -> Option<String> {
    entry.clean.iter().find_map(|rule| match rule {
        CleanRule::Date(fmt) => Some(fmt.clone()),
        _ => None,
    })
}

/// Step 3: evaluate computed-column rules in dependency order.
fn apply_computed(
    df: DataFrame,
    table: &str,
    computed: &[ComputedColumn],
    report: &mut TransformReport,
) -> Result<DataFrame, TransformError> {
    if computed.is_empty() {
        return Ok(df);
    }

    let mut lf = df.lazy();
    for column in computed {
        lf = lf.with_column(rule_expr(&column.rule).alias(column.name.as_str()));
    }
    report.computed_key = computed.last().map(|column| column.name.clone());

    lf.collect().map_err(|e| frame_err(table, e))
}

/// Build the expression for one computed rule.
fn rule_expr(rule: &ComputedRule) -> Expr {
    match rule {
        ComputedRule::Concat {
            columns,
            separator,
            output_type,
        } => {
            // Nulls render as the literal string NULL so composite keys
            // built from sparse business columns stay stable.
            let parts: Vec<Expr> = columns
                .iter()
                .map(|name| {
                    col(name.as_str())
                        .cast(DataType::String)
                        .fill_null(lit("NULL"))
                })
                .collect();
            concat_str(parts, separator, false).cast(output_type.dtype())
        }
        ComputedRule::Arithmetic {
            left,
            op,
            right,
            output_type,
        } => {
            let lhs = col(left.as_str()).cast(DataType::Float64);
            let rhs = col(right.as_str()).cast(DataType::Float64);
            let value = match op {
                ArithmeticOp::Add => lhs + rhs,
                ArithmeticOp::Subtract => lhs - rhs,
                ArithmeticOp::Multiply => lhs * rhs,
                // Zero divisor yields null instead of inf.
                ArithmeticOp::Divide => when(rhs.clone().eq(lit(0.0)))
                    .then(lit(Null {}))
                    .otherwise(lhs / rhs),
            };
            value.cast(output_type.dtype())
        }
        ComputedRule::Lookup {
            key_column,
            table,
            default,
            output_type,
        } => {
            let mut expr = match default {
                Some(value) => lit(value.clone()),
                None => lit(Null {}),
            };
            for (key, value) in table.iter() {
                expr = when(
                    col(key_column.as_str())
                        .cast(DataType::String)
                        .eq(lit(key.clone())),
                )
                .then(lit(value.clone()))
                .otherwise(expr);
            }
            expr.cast(output_type.dtype())
        }
        ComputedRule::Transform {
            column,
            function,
            output_type,
        } => {
            let base = col(column.as_str());
            let value = match function {
                TransformFn::Upper => base.str().to_uppercase(),
                TransformFn::Lower => base.str().to_lowercase(),
                TransformFn::Trim => base.str().strip_chars(lit(Null {})),
                TransformFn::Abs => base.abs(),
            };
            value.cast(output_type.dtype())
        }
    }
}

/// Step 4: tenant-declared row filters, last so they can reference
/// computed columns.
fn apply_filters(
    df: DataFrame,
    table: &str,
    filters: &[RowFilter],
    report: &mut TransformReport,
) -> Result<DataFrame, TransformError> {
    if filters.is_empty() {
        return Ok(df);
    }

    let before = df.height();
    let mut lf = df.lazy();
    for filter in filters {
        lf = lf.filter(filter_expr(table, filter)?);
    }
    let out = lf.collect().map_err(|e| frame_err(table, e))?;

    report.rows_filtered = before - out.height();
    if report.rows_filtered > 0 {
        info!(
            table,
            filtered = report.rows_filtered,
            retained = out.height(),
            "Row filters applied"
        );
    }
    Ok(out)
}

/// Build the predicate for one filter declaration.
fn filter_expr(table: &str, filter: &RowFilter) -> Result<Expr, TransformError> {
    let column = col(filter.column.as_str());

    if let Some(values) = &filter.in_set {
        if values.is_empty() {
            return Err(TransformError::FilterInvalid {
                table: table.to_string(),
                column: filter.column.clone(),
                message: "in_set requires at least one value".to_string(),
            });
        }
        let predicate = values
            .iter()
            .map(|value| {
                column
                    .clone()
                    .cast(DataType::String)
                    .eq(lit(value.clone()))
            })
            .reduce(|a, b| a.or(b))
            .expect("non-empty value set");
        return Ok(predicate);
    }

    if let Some(min) = filter.min_int {
        return Ok(column.cast(DataType::Int64).gt_eq(lit(min)));
    }

    if let Some(min_date) = &filter.min_date {
        let parsed = chrono::NaiveDate::parse_from_str(min_date, "%Y-%m-%d").map_err(|e| {
            TransformError::FilterInvalid {
                table: table.to_string(),
                column: filter.column.clone(),
                message: format!("min_date '{min_date}' is not YYYY-MM-DD: {e}"),
            }
        })?;
        return Ok(column.gt_eq(lit(parsed)));
    }

    Err(TransformError::FilterInvalid {
        table: table.to_string(),
        column: filter.column.clone(),
        message: "filter declares no predicate".to_string(),
    })
}
