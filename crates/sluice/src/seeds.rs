//! Seed data declarations and reading.
//!
//! Reference CSVs live in the tenant's `seeds/` directory next to a
//! `SEED_MAPPING.yaml` that names the target table and header renames for
//! each file. Seeds reuse the pipeline's validator and stream loader;
//! there is no bronze layer for them.

use std::path::Path;

use indexmap::IndexMap;
use polars::prelude::*;
use serde::Deserialize;

use crate::error::{ConfigError, ConvertError};
use sluice_core::load_yaml;

/// One seed file declaration.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedEntry {
    /// CSV file name within `seeds/`.
    pub file: String,
    /// Destination table.
    pub table: String,
    /// Truncate the table before loading this seed.
    #[serde(default)]
    pub truncate: bool,
    /// Header renames, source → target. Unlisted headers pass through.
    #[serde(default)]
    pub columns: IndexMap<String, String>,
}

/// Parsed `SEED_MAPPING.yaml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedMapping {
    #[serde(default)]
    pub seeds: Vec<SeedEntry>,
}

/// Load the seed mapping for a tenant; a missing file means no seeds.
pub fn load_seed_mapping(seeds_dir: &Path) -> Result<SeedMapping, ConfigError> {
    let path = seeds_dir.join("SEED_MAPPING.yaml");
    if !path.is_file() {
        return Ok(SeedMapping::default());
    }
    let value = load_yaml(&path)?;
    serde_yaml::from_value(value).map_err(|source| ConfigError::Parse { path, source })
}

/// Read a seed CSV (no inference, strings only) and apply header renames.
pub fn read_seed_csv(
    path: &Path,
    columns: &IndexMap<String, String>,
) -> Result<DataFrame, ConvertError> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .map_err(|e| ConvertError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
        .finish()
        .map_err(|e| ConvertError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    for (source, target) in columns {
        if df.column(source).is_ok() {
            df.rename(source, target.as_str().into())
                .map_err(|e| ConvertError::Parse {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
        }
    }
    Ok(df)
}
