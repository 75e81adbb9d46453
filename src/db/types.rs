//! Database-agnostic type mappings.
//!
//! Row decoding uses a two-phase approach:
//! 1. `TypeCategory` classifies the value's type name into a logical category
//! 2. A per-backend decoder extracts the value, widening integers and floats
//!    and falling back to text when the strict decode is rejected
//!
//! A value that no decoder accepts is an error, never a silent `NULL`.

use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, RawFields, SqlValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use sqlx::error::BoxDynError;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};
use uuid::Uuid;

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Uuid,
    Date,
    Timestamp,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Temporal types first: "datetime" and "timestamptz" overlap nothing below
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower.contains("timestamp") || lower == "datetime" {
        return TypeCategory::Timestamp;
    }

    // SQLite has no exact decimal storage; its NUMERIC affinity is a float
    if lower.contains("decimal") || lower.contains("numeric") {
        if db == DatabaseType::SQLite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    // Boolean
    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    // Integer types
    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    // Float types
    if lower.contains("float")
        || lower.contains("double")
        || lower == "real"
        || lower == "float4"
        || lower == "float8"
    {
        return TypeCategory::Float;
    }

    // UUID (PostgreSQL)
    if lower == "uuid" {
        return TypeCategory::Uuid;
    }

    if lower.contains("char") || lower.contains("text") || lower == "name" {
        return TypeCategory::Text;
    }

    TypeCategory::Unknown
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Raw DECIMAL/NUMERIC value as its exact decimal string.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, BoxDynError> {
        // MySQL sends DECIMAL as text in both protocols
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => pg_numeric_to_string(value.as_bytes()?).map(RawDecimal),
        }
    }
}

const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a binary PostgreSQL NUMERIC (base-10000 digit groups) as a decimal string.
fn pg_numeric_to_string(buf: &[u8]) -> Result<String, BoxDynError> {
    let word = |i: usize| -> Result<u16, BoxDynError> {
        buf.get(2 * i..2 * i + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
            .ok_or_else(|| "truncated NUMERIC value".into())
    };

    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(1)? as i16);
    let sign = word(2)?;
    let scale = usize::from(word(3)?);

    match sign {
        NUMERIC_NAN => return Ok("NaN".to_string()),
        NUMERIC_PINF => return Ok("Infinity".to_string()),
        NUMERIC_NINF => return Ok("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|i| word(4 + i))
        .collect::<Result<Vec<_>, _>>()?;
    let group = |i: i32| -> u16 {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", group(i)));
        }
    }

    if scale > 0 {
        let mut fraction = String::with_capacity(scale + 4);
        let mut i = weight + 1;
        while fraction.len() < scale {
            fraction.push_str(&format!("{:04}", group(i)));
            i += 1;
        }
        fraction.truncate(scale);
        out.push('.');
        out.push_str(&fraction);
    }
    Ok(out)
}

/// Backend-specific decoding of exact numerics.
trait DecodeDecimal {
    fn decode_decimal(&self, index: usize) -> Option<SqlValue>;
}

impl DecodeDecimal for PgRow {
    fn decode_decimal(&self, index: usize) -> Option<SqlValue> {
        self.try_get::<RawDecimal, _>(index)
            .map(|d| SqlValue::Text(d.0))
            .ok()
    }
}

impl DecodeDecimal for MySqlRow {
    fn decode_decimal(&self, index: usize) -> Option<SqlValue> {
        self.try_get::<RawDecimal, _>(index)
            .map(|d| SqlValue::Text(d.0))
            .ok()
    }
}

impl DecodeDecimal for SqliteRow {
    fn decode_decimal(&self, index: usize) -> Option<SqlValue> {
        self.try_get::<f64, _>(index).map(SqlValue::Float).ok()
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Decode a database row into a named-field record.
pub trait RowDecode {
    /// Fails with `DataAccess` naming the first column no decoder accepts.
    fn decode_row(&self) -> DbResult<RawFields>;
}

/// Generates the `RowDecode` implementation for one backend's row type.
///
/// The bodies are identical; only the sqlx database type differs.
macro_rules! impl_row_decode {
    ($row:ty, $db:expr) => {
        impl RowDecode for $row {
            fn decode_row(&self) -> DbResult<RawFields> {
                let mut fields = RawFields::with_capacity(self.len());
                for column in self.columns() {
                    let index = column.ordinal();
                    let type_name = match self.try_get_raw(index) {
                        Ok(raw) if raw.is_null() => {
                            fields.insert(column.name(), SqlValue::Null);
                            continue;
                        }
                        Ok(raw) => raw.type_info().name().to_string(),
                        Err(_) => column.type_info().name().to_string(),
                    };

                    let value = match categorize_type(&type_name, $db) {
                        TypeCategory::Integer => self
                            .try_get::<i64, _>(index)
                            .or_else(|_| self.try_get::<i32, _>(index).map(i64::from))
                            .or_else(|_| self.try_get::<i16, _>(index).map(i64::from))
                            .map(SqlValue::Int)
                            .ok(),
                        TypeCategory::Float => self
                            .try_get::<f64, _>(index)
                            .or_else(|_| self.try_get::<f32, _>(index).map(f64::from))
                            .map(SqlValue::Float)
                            .ok(),
                        TypeCategory::Decimal => self.decode_decimal(index),
                        TypeCategory::Boolean => {
                            self.try_get::<bool, _>(index).map(SqlValue::Bool).ok()
                        }
                        TypeCategory::Uuid => self
                            .try_get::<Uuid, _>(index)
                            .map(|id| SqlValue::Text(id.to_string()))
                            .ok(),
                        TypeCategory::Date => {
                            self.try_get::<NaiveDate, _>(index).map(SqlValue::Date).ok()
                        }
                        TypeCategory::Timestamp => self
                            .try_get::<NaiveDateTime, _>(index)
                            .or_else(|_| {
                                self.try_get::<DateTime<Utc>, _>(index)
                                    .map(|at| at.naive_utc())
                            })
                            .map(SqlValue::Timestamp)
                            .ok(),
                        TypeCategory::Text | TypeCategory::Unknown => None,
                    };

                    // Anything the strict decoders rejected is read as text
                    let value = match value {
                        Some(value) => value,
                        None => self
                            .try_get::<String, _>(index)
                            .map(SqlValue::Text)
                            .map_err(|e| {
                                DbError::data_access(
                                    format!(
                                        "Cannot decode column '{}' of type {}",
                                        column.name(),
                                        type_name
                                    ),
                                    Some(Box::new(e)),
                                )
                            })?,
                    };
                    fields.insert(column.name(), value);
                }
                Ok(fields)
            }
        }
    };
}

impl_row_decode!(SqliteRow, DatabaseType::SQLite);
impl_row_decode!(PgRow, DatabaseType::PostgreSQL);
impl_row_decode!(MySqlRow, DatabaseType::MySQL);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_temporal_types() {
        assert_eq!(categorize_type("DATE", DatabaseType::SQLite), TypeCategory::Date);
        assert_eq!(
            categorize_type("TIMESTAMPTZ", DatabaseType::PostgreSQL),
            TypeCategory::Timestamp
        );
        assert_eq!(
            categorize_type("DATETIME", DatabaseType::MySQL),
            TypeCategory::Timestamp
        );
    }

    #[test]
    fn test_categorize_numeric_types() {
        assert_eq!(categorize_type("INT4", DatabaseType::PostgreSQL), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT", DatabaseType::MySQL), TypeCategory::Integer);
        assert_eq!(categorize_type("REAL", DatabaseType::SQLite), TypeCategory::Float);
        assert_eq!(categorize_type("NUMERIC", DatabaseType::SQLite), TypeCategory::Float);
        assert_eq!(
            categorize_type("NUMERIC", DatabaseType::PostgreSQL),
            TypeCategory::Decimal
        );
        assert_eq!(categorize_type("DECIMAL", DatabaseType::MySQL), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_text_and_unknown() {
        assert_eq!(categorize_type("VARCHAR", DatabaseType::MySQL), TypeCategory::Text);
        assert_eq!(categorize_type("TEXT", DatabaseType::SQLite), TypeCategory::Text);
        assert_eq!(categorize_type("BOOLEAN", DatabaseType::SQLite), TypeCategory::Boolean);
        assert_eq!(categorize_type("BLOB", DatabaseType::SQLite), TypeCategory::Unknown);
        assert_eq!(categorize_type("UUID", DatabaseType::PostgreSQL), TypeCategory::Uuid);
    }

    fn numeric(weight: i16, sign: u16, scale: u16, digits: &[u16]) -> Vec<u8> {
        let mut buf = Vec::new();
        for word in [digits.len() as u16, weight as u16, sign, scale] {
            buf.extend_from_slice(&word.to_be_bytes());
        }
        for digit in digits {
            buf.extend_from_slice(&digit.to_be_bytes());
        }
        buf
    }

    #[test]
    fn test_pg_numeric_binary_rendering() {
        let render = |buf: Vec<u8>| pg_numeric_to_string(&buf).unwrap();

        assert_eq!(render(numeric(0, 0, 2, &[123, 4500])), "123.45");
        assert_eq!(render(numeric(1, 0, 0, &[2])), "20000");
        assert_eq!(render(numeric(-1, 0, 3, &[10])), "0.001");
        assert_eq!(render(numeric(-2, NUMERIC_NEG, 5, &[1000])), "-0.00001");
        assert_eq!(render(numeric(0, 0, 0, &[])), "0");
        assert_eq!(render(numeric(0, NUMERIC_NAN, 0, &[])), "NaN");
    }

    #[test]
    fn test_pg_numeric_truncated_buffer_is_error() {
        assert!(pg_numeric_to_string(&[0, 2, 0, 0]).is_err());
        assert!(pg_numeric_to_string(&numeric(0, 0, 0, &[1])[..9]).is_err());
    }
}
