//! Computed-column rules.
//!
//! Rules are declarative and strongly typed; evaluation lives in the
//! transformer. Rules may reference the outputs of earlier rules within
//! the same table, so load-time topological sorting establishes a safe
//! evaluation order and rejects cycles.

use std::collections::HashSet;

use serde::Deserialize;

use super::ColumnType;
use crate::error::TransformError;

/// Arithmetic operator over two named columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    /// Division with a NULLIF-style guard: a zero divisor yields null.
    Divide,
}

/// Named scalar function for `transform` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformFn {
    Upper,
    Lower,
    Trim,
    Abs,
}

fn default_output_type() -> ColumnType {
    ColumnType::Varchar(255)
}

/// One computed-column rule, tagged by kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ComputedRule {
    /// Join named columns with a separator. Null inputs render as the
    /// literal string `NULL` so composite keys stay stable.
    Concat {
        columns: Vec<String>,
        #[serde(default)]
        separator: String,
        #[serde(default = "default_output_type")]
        output_type: ColumnType,
    },
    /// Binary arithmetic over two named columns.
    Arithmetic {
        left: String,
        op: ArithmeticOp,
        right: String,
        #[serde(default = "default_output_type")]
        output_type: ColumnType,
    },
    /// Map values of a key column through a small inline table.
    Lookup {
        key_column: String,
        table: indexmap::IndexMap<String, String>,
        #[serde(default)]
        default: Option<String>,
        #[serde(default = "default_output_type")]
        output_type: ColumnType,
    },
    /// Apply a named scalar function to one column.
    Transform {
        column: String,
        function: TransformFn,
        #[serde(default = "default_output_type")]
        output_type: ColumnType,
    },
}

impl ComputedRule {
    /// Columns this rule reads.
    pub fn inputs(&self) -> Vec<&str> {
        match self {
            ComputedRule::Concat { columns, .. } => {
                columns.iter().map(String::as_str).collect()
            }
            ComputedRule::Arithmetic { left, right, .. } => vec![left, right],
            ComputedRule::Lookup { key_column, .. } => vec![key_column],
            ComputedRule::Transform { column, .. } => vec![column],
        }
    }

    /// Declared output type.
    pub fn output_type(&self) -> ColumnType {
        match self {
            ComputedRule::Concat { output_type, .. }
            | ComputedRule::Arithmetic { output_type, .. }
            | ComputedRule::Lookup { output_type, .. }
            | ComputedRule::Transform { output_type, .. } => *output_type,
        }
    }
}

/// A named computed column and its rule.
#[derive(Debug, Clone)]
pub struct ComputedColumn {
    pub name: String,
    pub rule: ComputedRule,
}

/// Order rules so every rule runs after the rules it depends on.
///
/// Dependencies on plain frame columns are ignored; only rule-to-rule
/// edges participate. Kahn's algorithm; leftover nodes mean a cycle.
pub(super) fn topo_sort(
    table: &str,
    columns: Vec<ComputedColumn>,
) -> Result<Vec<ComputedColumn>, TransformError> {
    let names: HashSet<String> = columns.iter().map(|c| c.name.clone()).collect();

    let mut remaining = columns;
    let mut ordered = Vec::with_capacity(remaining.len());
    let mut satisfied: HashSet<String> = HashSet::new();

    while !remaining.is_empty() {
        let ready: Vec<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, col)| {
                col.rule
                    .inputs()
                    .iter()
                    .all(|input| !names.contains(*input) || satisfied.contains(*input))
            })
            .map(|(idx, _)| idx)
            .collect();

        if ready.is_empty() {
            let stuck: Vec<String> = remaining.iter().map(|c| c.name.clone()).collect();
            return Err(TransformError::ComputedRuleCycle {
                table: table.to_string(),
                columns: stuck,
            });
        }

        // Remove back-to-front so indices stay valid.
        for idx in ready.into_iter().rev() {
            let col = remaining.remove(idx);
            satisfied.insert(col.name.clone());
            ordered.push(col);
        }
    }

    Ok(ordered)
}
