//! Typed values exchanged with the driver.
//!
//! [`SqlValue`] is both a bind parameter and a decoded column value.
//! [`RawFields`] is a named-field record: the output of row decoding, the
//! input of an entity factory, and the output of an entity's field mapping.

use crate::error::{DbError, DbResult};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// A parameter or column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Timestamp(_) => "timestamp",
        }
    }

    /// Render the value as text, as a string-typed column would hold it.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Bool(v) => Some(v.to_string()),
            Self::Int(v) => Some(v.to_string()),
            Self::Float(v) => Some(v.to_string()),
            Self::Text(v) => Some(v.clone()),
            Self::Date(v) => Some(v.to_string()),
            Self::Timestamp(v) => Some(v.to_string()),
        }
    }

    /// Interpret the value as a calendar date.
    ///
    /// Text is accepted as `YYYY-MM-DD`, optionally followed by a time part.
    pub fn to_date(&self) -> DbResult<Option<NaiveDate>> {
        match self {
            Self::Null => Ok(None),
            Self::Date(d) => Ok(Some(*d)),
            Self::Timestamp(ts) => Ok(Some(ts.date())),
            Self::Text(s) => {
                let day = s.get(..10).unwrap_or(s.as_str());
                NaiveDate::parse_from_str(day, "%Y-%m-%d")
                    .map(Some)
                    .map_err(|e| DbError::invalid_input(format!("Invalid date '{}': {}", s, e)))
            }
            other => Err(DbError::invalid_input(format!(
                "Expected a date, got {}",
                other.type_name()
            ))),
        }
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<NaiveDate> for SqlValue {
    fn from(v: NaiveDate) -> Self {
        Self::Date(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        Self::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Column name to value record. Names compare case-insensitively.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFields {
    values: HashMap<String, SqlValue>,
}

impl RawFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            values: HashMap::with_capacity(capacity),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, name: &str, value: impl Into<SqlValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<SqlValue>) {
        self.values.insert(name.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&SqlValue> {
        self.values.get(&name.to_ascii_lowercase())
    }

    /// Remove a field, treating an explicit NULL as absent.
    pub fn take(&mut self, name: &str) -> Option<SqlValue> {
        self.values
            .remove(&name.to_ascii_lowercase())
            .filter(|v| !v.is_null())
    }

    /// Text value of a field, `None` when missing or NULL.
    pub fn take_text(&mut self, name: &str) -> Option<String> {
        self.take(name).and_then(|v| v.to_text())
    }

    /// Text value of a field, empty string when missing or NULL.
    pub fn text_or_default(&mut self, name: &str) -> String {
        self.take_text(name).unwrap_or_default()
    }

    /// Identifier value of a field, a fresh UUID when missing or NULL.
    pub fn id_or_generate(&mut self, name: &str) -> String {
        self.take_text(name)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    /// Date value of a field, today's date when missing or NULL.
    pub fn date_or_today(&mut self, name: &str) -> DbResult<NaiveDate> {
        Ok(self
            .take(name)
            .map(|v| v.to_date())
            .transpose()?
            .flatten()
            .unwrap_or_else(|| chrono::Local::now().date_naive()))
    }

    /// Values of the given fields, in the given order.
    pub fn ordered(&self, names: &[&str]) -> DbResult<Vec<SqlValue>> {
        names
            .iter()
            .map(|name| {
                self.get(name).cloned().ok_or_else(|| {
                    DbError::invalid_input(format!("Missing value for field '{}'", name))
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_case_insensitive() {
        let fields = RawFields::new().with("ID_Competition", "c-1");
        assert_eq!(fields.get("id_competition"), Some(&SqlValue::from("c-1")));
    }

    #[test]
    fn test_take_treats_null_as_missing() {
        let mut fields = RawFields::new().with("name", SqlValue::Null);
        assert_eq!(fields.take_text("name"), None);
    }

    #[test]
    fn test_text_or_default_is_empty_string() {
        let mut fields = RawFields::new();
        assert_eq!(fields.text_or_default("description"), "");
    }

    #[test]
    fn test_id_or_generate_keeps_existing() {
        let mut fields = RawFields::new().with("id", "abc");
        assert_eq!(fields.id_or_generate("id"), "abc");
        let generated = fields.id_or_generate("id");
        assert!(uuid::Uuid::parse_str(&generated).is_ok());
    }

    #[test]
    fn test_date_from_text_and_timestamp() {
        let expected = NaiveDate::from_ymd_opt(2016, 5, 1).unwrap();
        assert_eq!(SqlValue::from("2016-05-01").to_date().unwrap(), Some(expected));
        assert_eq!(
            SqlValue::from("2016-05-01 10:30:00").to_date().unwrap(),
            Some(expected)
        );
        assert!(SqlValue::from("May first").to_date().is_err());
        assert!(SqlValue::Int(3).to_date().is_err());
    }

    #[test]
    fn test_ordered_follows_requested_order() {
        let fields = RawFields::new().with("b", 2_i64).with("a", 1_i64);
        let values = fields.ordered(&["a", "b"]).unwrap();
        assert_eq!(values, vec![SqlValue::Int(1), SqlValue::Int(2)]);
    }

    #[test]
    fn test_ordered_missing_field() {
        let fields = RawFields::new().with("a", 1_i64);
        let result = fields.ordered(&["a", "b"]);
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<String>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".to_string()));
    }
}
