//! Bronze-layer conversion: normalize any supported source file into a
//! canonical columnar copy with no semantic transformation.
//!
//! Column names are preserved verbatim, CSV columns stay strings, row
//! counts are preserved, and no business filter runs here; bronze is a
//! faithful mirror of source. Output files are written to temp and
//! renamed.

use std::fs::File;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use polars::prelude::*;
use tracing::debug;

use crate::error::ConvertError;

/// Converter options; Excel workbooks default to the first sheet.
#[derive(Debug, Clone, Default)]
pub struct ConvertOptions {
    pub excel_sheet: Option<String>,
}

fn parse_err(path: &Path, message: impl ToString) -> ConvertError {
    ConvertError::Parse {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

/// Convert one source file into `raw_dir`, returning the bronze path.
///
/// The output keeps the source stem with the suffix replaced by
/// `.parquet`.
pub fn convert_file(
    src: &Path,
    raw_dir: &Path,
    options: &ConvertOptions,
) -> Result<PathBuf, ConvertError> {
    let extension = src
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .unwrap_or_default();

    let df = match extension.as_str() {
        "csv" | "txt" => read_csv_verbatim(src)?,
        "xlsx" | "xls" | "xlsm" => read_excel(src, options.excel_sheet.as_deref())?,
        // Already columnar: pass through unchanged.
        "parquet" => read_parquet(src)?,
        _ => {
            return Err(ConvertError::UnsupportedFormat {
                path: src.display().to_string(),
            })
        }
    };

    let stem = src
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| parse_err(src, "source file has no stem"))?;
    let dest = raw_dir.join(format!("{stem}.parquet"));
    write_parquet_atomic(df, &dest)?;
    debug!(src = %src.display(), dest = %dest.display(), "Converted to bronze");
    Ok(dest)
}

/// Read a CSV with no schema inference: every column arrives as a string,
/// exactly as the source spells it.
fn read_csv_verbatim(src: &Path) -> Result<DataFrame, ConvertError> {
    CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0))
        .try_into_reader_with_file_path(Some(src.to_path_buf()))
        .map_err(|e| parse_err(src, e))?
        .finish()
        .map_err(|e| parse_err(src, e))
}

fn read_parquet(src: &Path) -> Result<DataFrame, ConvertError> {
    let file = File::open(src).map_err(|e| parse_err(src, e))?;
    ParquetReader::new(file)
        .finish()
        .map_err(|e| parse_err(src, e))
}

/// Read one Excel sheet, keeping each column's native type when the whole
/// column agrees on one (numeric or boolean), otherwise strings.
fn read_excel(src: &Path, sheet: Option<&str>) -> Result<DataFrame, ConvertError> {
    let mut workbook = open_workbook_auto(src).map_err(|e| parse_err(src, e))?;

    let sheet_name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| parse_err(src, "workbook has no sheets"))?,
    };

    let range = workbook
        .worksheet_range(&sheet_name)
        .map_err(|e| parse_err(src, e))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header_row) => header_row
            .iter()
            .enumerate()
            .map(|(idx, cell)| match cell {
                Data::Empty => format!("column_{idx}"),
                other => other.to_string(),
            })
            .collect(),
        None => return Err(parse_err(src, format!("sheet '{sheet_name}' is empty"))),
    };

    let body: Vec<&[Data]> = rows.collect();
    let mut columns: Vec<Column> = Vec::with_capacity(headers.len());

    for (idx, name) in headers.iter().enumerate() {
        let cells: Vec<&Data> = body
            .iter()
            .map(|row| row.get(idx).unwrap_or(&Data::Empty))
            .collect();

        let all_numeric = cells
            .iter()
            .all(|c| matches!(c, Data::Empty | Data::Float(_) | Data::Int(_)));
        let all_bool = cells.iter().all(|c| matches!(c, Data::Empty | Data::Bool(_)));

        let series = if all_numeric {
            let values: Vec<Option<f64>> = cells
                .iter()
                .map(|c| match c {
                    Data::Float(f) => Some(*f),
                    Data::Int(i) => Some(*i as f64),
                    _ => None,
                })
                .collect();
            Series::new(name.as_str().into(), values)
        } else if all_bool {
            let values: Vec<Option<bool>> = cells
                .iter()
                .map(|c| match c {
                    Data::Bool(b) => Some(*b),
                    _ => None,
                })
                .collect();
            Series::new(name.as_str().into(), values)
        } else {
            let values: Vec<Option<String>> = cells
                .iter()
                .map(|c| match c {
                    Data::Empty => None,
                    other => Some(other.to_string()),
                })
                .collect();
            Series::new(name.as_str().into(), values)
        };
        columns.push(series.into());
    }

    DataFrame::new(columns).map_err(|e| parse_err(src, e))
}

/// Write a frame to `dest` atomically (temp file + rename).
pub fn write_parquet_atomic(mut df: DataFrame, dest: &Path) -> Result<(), ConvertError> {
    let part = dest.with_extension("parquet.part");
    let file = File::create(&part).map_err(|source| ConvertError::Io {
        path: part.display().to_string(),
        source,
    })?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| parse_err(dest, e))?;
    std::fs::rename(&part, dest).map_err(|source| ConvertError::Io {
        path: dest.display().to_string(),
        source,
    })?;
    Ok(())
}

/// Read a bronze or silver parquet file back into a frame.
pub fn read_parquet_file(path: &Path) -> Result<DataFrame, ConvertError> {
    read_parquet(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_csv_columns_stay_verbatim_strings() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("DimDealer_MS_01.csv");
        std::fs::write(&src, "DealerCode,ActiveFlag\nD001,1\nD002,0\n").unwrap();

        let raw = TempDir::new().unwrap();
        let dest = convert_file(&src, raw.path(), &ConvertOptions::default()).unwrap();
        assert_eq!(dest, raw.path().join("DimDealer_MS_01.parquet"));

        let df = read_parquet_file(&dest).unwrap();
        assert_eq!(df.height(), 2);
        let names: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(names, vec!["DealerCode", "ActiveFlag"]);
        // No inference: the numeric-looking flag column is still a string.
        assert_eq!(df.column("ActiveFlag").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn test_header_only_csv_gives_empty_frame() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("empty.csv");
        std::fs::write(&src, "a,b,c\n").unwrap();

        let raw = TempDir::new().unwrap();
        let dest = convert_file(&src, raw.path(), &ConvertOptions::default()).unwrap();
        let df = read_parquet_file(&dest).unwrap();
        assert_eq!(df.height(), 0);
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn test_unsupported_suffix() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("data.orc");
        std::fs::write(&src, b"junk").unwrap();

        let raw = TempDir::new().unwrap();
        let err = convert_file(&src, raw.path(), &ConvertOptions::default()).unwrap_err();
        assert!(matches!(err, ConvertError::UnsupportedFormat { .. }));
    }

    #[test]
    fn test_parquet_passthrough_preserves_rows() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("already.parquet");
        let df = df!("x" => [1i64, 2, 3], "y" => ["a", "b", "c"]).unwrap();
        write_parquet_atomic(df, &src).unwrap();

        let raw = TempDir::new().unwrap();
        let dest = convert_file(&src, raw.path(), &ConvertOptions::default()).unwrap();
        let out = read_parquet_file(&dest).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(out.width(), 2);
    }

    #[test]
    fn test_malformed_csv_is_parse_error() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bad.csv");
        // A ragged row (more fields than the header declares) fails the read.
        std::fs::write(&src, "a,b\n1,2,3,4\n").unwrap();

        let raw = TempDir::new().unwrap();
        let result = convert_file(&src, raw.path(), &ConvertOptions::default());
        assert!(matches!(result, Err(ConvertError::Parse { .. })));
    }

    #[test]
    fn test_atomic_write_leaves_no_temp() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out.parquet");
        let df = df!("a" => [1i32]).unwrap();
        write_parquet_atomic(df, &dest).unwrap();
        assert!(dest.exists());
        assert!(!temp.path().join("out.parquet.part").exists());
    }
}
