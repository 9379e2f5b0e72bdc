//! Semantic column types shared by mappings, computed columns, and the
//! loader's range checks.

use std::fmt;
use std::str::FromStr;

use polars::prelude::{DataType, TimeUnit};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};

/// Declared destination type for one column.
///
/// Parsed from SQL-style spellings (`VARCHAR(32)`, `DECIMAL(18,4)`,
/// `BIGINT`) in mapping files and from live `DESCRIBE` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    TinyInt,
    SmallInt,
    Int,
    BigInt,
    LargeInt,
    Float,
    Double,
    Decimal(u8, u8),
    Varchar(u32),
    Date,
    DateTime,
    Boolean,
}

impl ColumnType {
    /// The frame dtype this column materializes as.
    ///
    /// `LARGEINT` and `DECIMAL` travel as 64-bit values in the frame; the
    /// database applies its own precision on ingest.
    pub fn dtype(&self) -> DataType {
        match self {
            ColumnType::TinyInt => DataType::Int8,
            ColumnType::SmallInt => DataType::Int16,
            ColumnType::Int => DataType::Int32,
            ColumnType::BigInt | ColumnType::LargeInt => DataType::Int64,
            ColumnType::Float => DataType::Float32,
            ColumnType::Double | ColumnType::Decimal(_, _) => DataType::Float64,
            ColumnType::Varchar(_) => DataType::String,
            ColumnType::Date => DataType::Date,
            ColumnType::DateTime => DataType::Datetime(TimeUnit::Microseconds, None),
            ColumnType::Boolean => DataType::Boolean,
        }
    }

    /// Inclusive value range for integer types; `None` for everything else.
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            ColumnType::TinyInt => Some((i8::MIN as i64, i8::MAX as i64)),
            ColumnType::SmallInt => Some((i16::MIN as i64, i16::MAX as i64)),
            ColumnType::Int => Some((i32::MIN as i64, i32::MAX as i64)),
            ColumnType::BigInt => Some((i64::MIN, i64::MAX)),
            // LARGEINT is 128-bit on the database side; anything a frame
            // can hold fits.
            ColumnType::LargeInt => None,
            _ => None,
        }
    }

    /// Declared varchar width, when applicable.
    pub fn varchar_width(&self) -> Option<u32> {
        match self {
            ColumnType::Varchar(width) => Some(*width),
            _ => None,
        }
    }

    /// SQL spelling, used when issuing `ALTER TABLE … MODIFY COLUMN`.
    pub fn sql(&self) -> String {
        match self {
            ColumnType::TinyInt => "TINYINT".to_string(),
            ColumnType::SmallInt => "SMALLINT".to_string(),
            ColumnType::Int => "INT".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::LargeInt => "LARGEINT".to_string(),
            ColumnType::Float => "FLOAT".to_string(),
            ColumnType::Double => "DOUBLE".to_string(),
            ColumnType::Decimal(p, s) => format!("DECIMAL({p},{s})"),
            ColumnType::Varchar(width) => format!("VARCHAR({width})"),
            ColumnType::Date => "DATE".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
        }
    }

    /// Parse a live `information_schema` data type plus optional character
    /// width into a semantic type.
    pub fn from_describe(data_type: &str, char_max_len: Option<u32>) -> Option<Self> {
        let base = data_type
            .split('(')
            .next()
            .unwrap_or(data_type)
            .trim()
            .to_ascii_uppercase();
        match base.as_str() {
            "VARCHAR" | "CHAR" | "STRING" | "TEXT" => {
                // StarRocks reports the width through character_maximum_length
                let width = char_max_len
                    .or_else(|| parse_width(data_type))
                    .unwrap_or(65533);
                Some(ColumnType::Varchar(width))
            }
            _ => data_type.parse().ok(),
        }
    }
}

fn parse_width(spec: &str) -> Option<u32> {
    let start = spec.find('(')?;
    let end = spec.find(')')?;
    spec[start + 1..end].trim().parse().ok()
}

fn parse_decimal(spec: &str) -> Option<(u8, u8)> {
    let start = spec.find('(')?;
    let end = spec.find(')')?;
    let mut parts = spec[start + 1..end].split(',');
    let precision = parts.next()?.trim().parse().ok()?;
    let scale = parts.next().and_then(|s| s.trim().parse().ok()).unwrap_or(0);
    Some((precision, scale))
}

impl FromStr for ColumnType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let upper = raw.trim().to_ascii_uppercase();
        let base = upper.split('(').next().unwrap_or(&upper).trim();
        match base {
            "TINYINT" => Ok(ColumnType::TinyInt),
            "SMALLINT" => Ok(ColumnType::SmallInt),
            "INT" | "INTEGER" => Ok(ColumnType::Int),
            "BIGINT" => Ok(ColumnType::BigInt),
            "LARGEINT" => Ok(ColumnType::LargeInt),
            "FLOAT" => Ok(ColumnType::Float),
            "DOUBLE" => Ok(ColumnType::Double),
            "DECIMAL" | "DECIMALV3" => {
                let (p, s) = parse_decimal(&upper).unwrap_or((38, 9));
                Ok(ColumnType::Decimal(p, s))
            }
            "VARCHAR" | "CHAR" | "STRING" => {
                Ok(ColumnType::Varchar(parse_width(&upper).unwrap_or(65533)))
            }
            "DATE" => Ok(ColumnType::Date),
            "DATETIME" | "TIMESTAMP" => Ok(ColumnType::DateTime),
            "BOOLEAN" | "BOOL" => Ok(ColumnType::Boolean),
            _ => Err(format!("unknown column type '{raw}'")),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
