//! Column mapping declarations.

use serde::Deserialize;

use super::ColumnType;

/// What to do when a declared cast fails for a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastErrorPolicy {
    /// Replace unparseable values with null.
    #[default]
    Null,
    /// Replace unparseable values with zero.
    Zero,
    /// Keep the column as strings and record a warning.
    KeepString,
}

/// Cleaning rules applied during type coercion.
///
/// Which columns count as "code" columns for the shared uppercase rule is
/// decided here, by annotation, not by name-matching heuristics.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanRule {
    /// Strip leading/trailing whitespace.
    Trim,
    /// Uppercase the value (code columns).
    Uppercase,
    /// Round to the given number of decimal places.
    Round(u32),
    /// Parse the value as a date with the given strftime format.
    Date(String),
}

/// One source-to-target column mapping entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MappingEntry {
    /// Column name as it appears in the source file.
    pub source: String,
    /// Destination column name.
    pub target: String,
    /// Declared semantic type driving coercion.
    #[serde(rename = "type")]
    pub target_type: ColumnType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// Literal default recorded in the declaration; informational only.
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub clean: Vec<CleanRule>,
    #[serde(default)]
    pub on_cast_error: CastErrorPolicy,
}

fn default_nullable() -> bool {
    true
}

/// Ordered mapping for one table.
#[derive(Debug, Clone, Deserialize)]
pub struct ColumnMapping {
    pub table: String,
    pub columns: Vec<MappingEntry>,
}

impl ColumnMapping {
    /// Look up the entry that produces `target`.
    pub fn entry_for_target(&self, target: &str) -> Option<&MappingEntry> {
        self.columns.iter().find(|entry| entry.target == target)
    }
}
