//! Features, cell values and tabular data

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Semantic type of a feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureType {
    Numeric,
    String,
    Time,
}

/// A named, typed column visible at some pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub dtype: FeatureType,
}

impl Feature {
    pub fn new(name: impl Into<String>, dtype: FeatureType) -> Self {
        Self {
            name: name.into(),
            dtype,
        }
    }

    pub fn numeric(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Numeric)
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::String)
    }

    pub fn time(name: impl Into<String>) -> Self {
        Self::new(name, FeatureType::Time)
    }
}

/// A single data cell
///
/// Text always deserializes as `String`; time comparisons parse it on
/// demand through `as_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Numeric(f64),
    String(String),
    Time(DateTime<Utc>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read the value as a point in time, parsing strings when needed
    pub fn as_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::Time(t) => Some(*t),
            Value::String(s) => parse_time(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Numeric(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

/// Parse RFC 3339 timestamps, naive timestamps and plain dates
pub fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.with_timezone(&Utc));
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(t.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

pub type Row = BTreeMap<String, Value>;

/// Tabular data held by a node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Column names, in display order
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self { columns, rows }
    }

    /// Build a dataset from records, taking columns from the first record
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Numeric values of a column, skipping non-numeric cells
    pub fn numeric_column(&self, name: &str) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.get(name).and_then(Value::as_f64))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_formats() {
        assert!(parse_time("2024-03-01T10:00:00Z").is_some());
        assert!(parse_time("2024-03-01 10:00:00").is_some());
        assert_eq!(
            parse_time("2024-03-01"),
            parse_time("2024-03-01T00:00:00Z")
        );
        assert!(parse_time("yesterday").is_none());
    }

    #[test]
    fn test_value_deserializes_untagged() {
        let row: Row = serde_json::from_str(r#"{"age": 31, "name": "ada", "note": null}"#).unwrap();
        assert_eq!(row.get("age"), Some(&Value::Numeric(31.0)));
        assert_eq!(row.get("name"), Some(&Value::String("ada".to_string())));
        assert_eq!(row.get("note"), Some(&Value::Null));
    }

    #[test]
    fn test_dataset_numeric_column() {
        let rows: Vec<Row> = serde_json::from_str(
            r#"[{"x": 1, "y": "a"}, {"x": "oops", "y": "b"}, {"x": 3, "y": "c"}]"#,
        )
        .unwrap();
        let dataset = Dataset::from_rows(rows);

        assert_eq!(dataset.columns, vec!["x".to_string(), "y".to_string()]);
        assert_eq!(dataset.numeric_column("x"), vec![1.0, 3.0]);
    }
}
