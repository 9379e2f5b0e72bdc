//! Declarative schema, mapping, and computed-column definitions.
//!
//! Everything the transformer and loader do is driven by per-tenant YAML
//! files loaded here. Loading is a separate concern from execution: these
//! types carry no frame logic.

mod computed;
mod mapping;
mod types;

pub use computed::{ArithmeticOp, ComputedColumn, ComputedRule, TransformFn};
pub use mapping::{CastErrorPolicy, CleanRule, ColumnMapping, MappingEntry};
pub use types::ColumnType;

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use snafu::prelude::*;

use crate::error::ConfigError;
use sluice_core::{is_yaml_file, load_yaml};

/// Destination object kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaKind {
    Table,
    View,
    MatView,
}

/// Declarative description of one destination table, view, or
/// materialized view.
#[derive(Debug, Clone, Deserialize)]
pub struct TableSchema {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: SchemaKind,
    /// Deterministic creation/drop ordering only; never consulted at load
    /// time.
    #[serde(default)]
    pub ordinal: u32,
    pub ddl: String,
    #[serde(default)]
    pub comments: IndexMap<String, String>,
}

fn default_kind() -> SchemaKind {
    SchemaKind::Table
}

/// Load every schema file under `dir`, sorted by `(ordinal, name)`.
///
/// Files follow the `NN_<Name>.yaml` convention; when the YAML omits an
/// explicit ordinal the numeric filename prefix is used.
pub fn load_schema_dir(dir: &Path) -> Result<Vec<TableSchema>, ConfigError> {
    let mut schemas = Vec::new();
    if !dir.is_dir() {
        return Ok(schemas);
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .context(sluice_core::error::ReadFileSnafu { path: dir })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();
    paths.sort();

    for path in paths {
        let value = load_yaml(&path)?;
        let mut schema: TableSchema = serde_yaml::from_value(value)
            .context(sluice_core::error::ParseSnafu { path: path.clone() })?;
        if schema.ordinal == 0 {
            schema.ordinal = ordinal_from_filename(&path);
        }
        schemas.push(schema);
    }

    schemas.sort_by(|a, b| (a.ordinal, &a.name).cmp(&(b.ordinal, &b.name)));
    Ok(schemas)
}

fn ordinal_from_filename(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.split('_').next())
        .and_then(|prefix| prefix.parse().ok())
        .unwrap_or(0)
}

/// Load all column mapping files under `dir`, keyed by table name.
pub fn load_mapping_dir(dir: &Path) -> Result<IndexMap<String, ColumnMapping>, ConfigError> {
    let mut mappings = IndexMap::new();
    if !dir.is_dir() {
        return Ok(mappings);
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .context(sluice_core::error::ReadFileSnafu { path: dir })?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_yaml_file(path))
        .collect();
    paths.sort();

    for path in paths {
        let value = load_yaml(&path)?;
        let mapping: ColumnMapping =
            serde_yaml::from_value(value).context(sluice_core::error::ParseSnafu { path })?;
        mappings.insert(mapping.table.clone(), mapping);
    }
    Ok(mappings)
}

/// Load `computed_columns.yaml`: per-table rule lists in dependency order.
///
/// The dependency graph across rules of one table is topologically sorted
/// here; a cycle fails configuration load before any file I/O happens.
pub fn load_computed_columns(
    path: &Path,
    tenant: &str,
) -> Result<IndexMap<String, Vec<ComputedColumn>>, ConfigError> {
    if !path.is_file() {
        return Ok(IndexMap::new());
    }

    let value = load_yaml(path)?;
    let raw: IndexMap<String, IndexMap<String, ComputedRule>> =
        serde_yaml::from_value(value).context(sluice_core::error::ParseSnafu { path })?;

    let mut by_table = IndexMap::new();
    for (table, rules) in raw {
        let columns: Vec<ComputedColumn> = rules
            .into_iter()
            .map(|(name, rule)| ComputedColumn { name, rule })
            .collect();
        let ordered =
            computed::topo_sort(&table, columns).map_err(|err| ConfigError::InvalidTenant {
                tenant: tenant.to_string(),
                reason: err.to_string(),
            })?;
        by_table.insert(table, ordered);
    }
    Ok(by_table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_schema_dir_sorts_by_ordinal() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join("02_DimDealerMaster.yaml"),
            "name: dim_dealer_master\nddl: CREATE TABLE dim_dealer_master (dealer_code VARCHAR(32))\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join("01_DimHierarchy.yaml"),
            "name: dim_hierarchy\nddl: CREATE TABLE dim_hierarchy (node_code VARCHAR(16))\n",
        )
        .unwrap();

        let schemas = load_schema_dir(temp.path()).unwrap();
        assert_eq!(schemas.len(), 2);
        assert_eq!(schemas[0].name, "dim_hierarchy");
        assert_eq!(schemas[0].ordinal, 1);
        assert_eq!(schemas[1].name, "dim_dealer_master");
        assert_eq!(schemas[1].ordinal, 2);
    }

    #[test]
    fn test_missing_dirs_load_empty() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("does_not_exist");
        assert!(load_schema_dir(&missing).unwrap().is_empty());
        assert!(load_mapping_dir(&missing).unwrap().is_empty());
        assert!(load_computed_columns(&missing.join("computed_columns.yaml"), "t-demo")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_load_computed_columns_orders_dependencies() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("computed_columns.yaml");
        // `full_key` depends on `short_key`, declared out of order on purpose.
        std::fs::write(
            &path,
            r#"
fact_invoice_secondary:
  full_key:
    kind: concat
    columns: [short_key, invoice_no]
    separator: "_"
    output_type: VARCHAR(255)
  short_key:
    kind: concat
    columns: [invoice_date, customer_code]
    separator: "_"
    output_type: VARCHAR(128)
"#,
        )
        .unwrap();

        let computed = load_computed_columns(&path, "t-demo").unwrap();
        let rules = &computed["fact_invoice_secondary"];
        assert_eq!(rules[0].name, "short_key");
        assert_eq!(rules[1].name, "full_key");
    }

    #[test]
    fn test_load_computed_columns_rejects_cycle() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("computed_columns.yaml");
        std::fs::write(
            &path,
            r#"
fact_invoice_secondary:
  a:
    kind: concat
    columns: [b]
    separator: ""
  b:
    kind: concat
    columns: [a]
    separator: ""
"#,
        )
        .unwrap();

        assert!(load_computed_columns(&path, "t-demo").is_err());
    }
}
