//! Row filters applied by pipeline stages

use crate::core::feature::{Dataset, FeatureType, Row, Value};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison applied by a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterOperation {
    NumLessThan,
    NumLessEqual,
    NumGreaterThan,
    NumGreaterEqual,
    NumEquals,
    NumNotEquals,
    ObjLike,
    ObjNotLike,
    TimeBefore,
    TimeAfter,
    TimeEquals,
    TimeNotEquals,
}

impl FilterOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperation::NumLessThan => "NUM_LESS_THAN",
            FilterOperation::NumLessEqual => "NUM_LESS_EQUAL",
            FilterOperation::NumGreaterThan => "NUM_GREATER_THAN",
            FilterOperation::NumGreaterEqual => "NUM_GREATER_EQUAL",
            FilterOperation::NumEquals => "NUM_EQUALS",
            FilterOperation::NumNotEquals => "NUM_NOT_EQUALS",
            FilterOperation::ObjLike => "OBJ_LIKE",
            FilterOperation::ObjNotLike => "OBJ_NOT_LIKE",
            FilterOperation::TimeBefore => "TIME_BEFORE",
            FilterOperation::TimeAfter => "TIME_AFTER",
            FilterOperation::TimeEquals => "TIME_EQUALS",
            FilterOperation::TimeNotEquals => "TIME_NOT_EQUALS",
        }
    }

    /// Feature type the comparison works on
    pub fn operand_type(&self) -> FeatureType {
        use FilterOperation::*;
        match self {
            NumLessThan | NumLessEqual | NumGreaterThan | NumGreaterEqual | NumEquals
            | NumNotEquals => FeatureType::Numeric,
            ObjLike | ObjNotLike => FeatureType::String,
            TimeBefore | TimeAfter | TimeEquals | TimeNotEquals => FeatureType::Time,
        }
    }
}

impl fmt::Display for FilterOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        use FilterOperation::*;
        let op = match s {
            "NUM_LESS_THAN" => NumLessThan,
            "NUM_LESS_EQUAL" => NumLessEqual,
            "NUM_GREATER_THAN" => NumGreaterThan,
            "NUM_GREATER_EQUAL" => NumGreaterEqual,
            "NUM_EQUALS" => NumEquals,
            "NUM_NOT_EQUALS" => NumNotEquals,
            "OBJ_LIKE" => ObjLike,
            "OBJ_NOT_LIKE" => ObjNotLike,
            "TIME_BEFORE" => TimeBefore,
            "TIME_AFTER" => TimeAfter,
            "TIME_EQUALS" => TimeEquals,
            "TIME_NOT_EQUALS" => TimeNotEquals,
            other => {
                return Err(Error::UnsupportedOperation(format!(
                    "unknown filter operation \"{}\"",
                    other
                )))
            }
        };
        Ok(op)
    }
}

/// Literal a filter compares against, already coerced to the operand type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FilterValue {
    Numeric(f64),
    String(String),
    Time(DateTime<Utc>),
}

impl FilterValue {
    /// Coerce a raw literal for the given operation
    pub fn coerce(op: FilterOperation, raw: &Value) -> Result<Self> {
        let coerced = match op.operand_type() {
            FeatureType::Numeric => match raw {
                Value::Numeric(v) => Some(FilterValue::Numeric(*v)),
                Value::String(s) => s.trim().parse::<f64>().ok().map(FilterValue::Numeric),
                _ => None,
            },
            FeatureType::String => match raw {
                Value::String(s) => Some(FilterValue::String(s.clone())),
                Value::Numeric(v) => Some(FilterValue::String(v.to_string())),
                _ => None,
            },
            FeatureType::Time => raw.as_time().map(FilterValue::Time),
        };

        coerced.ok_or_else(|| {
            Error::UnsupportedOperation(format!("{} cannot compare against {:?}", op, raw))
        })
    }
}

/// A row filter: keeps rows where `feature <op> value` holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub feature: String,
    pub operation: FilterOperation,
    pub value: FilterValue,
}

impl Filter {
    pub fn new(feature: impl Into<String>, operation: FilterOperation, value: &Value) -> Result<Self> {
        Ok(Self {
            feature: feature.into(),
            operation,
            value: FilterValue::coerce(operation, value)?,
        })
    }

    /// Parse the operation name and coerce the literal
    pub fn parse(feature: impl Into<String>, operation: &str, value: &Value) -> Result<Self> {
        Self::new(feature, operation.parse()?, value)
    }

    /// Check if a single row passes the filter
    ///
    /// Cells that are missing or of the wrong type never pass.
    pub fn matches(&self, row: &Row) -> bool {
        use FilterOperation::*;
        let Some(cell) = row.get(&self.feature) else {
            return false;
        };

        match (&self.value, self.operation) {
            (FilterValue::Numeric(v), op) => {
                let Some(x) = cell.as_f64() else {
                    return false;
                };
                match op {
                    NumLessThan => x < *v,
                    NumLessEqual => x <= *v,
                    NumGreaterThan => x > *v,
                    NumGreaterEqual => x >= *v,
                    NumEquals => x == *v,
                    NumNotEquals => x != *v,
                    _ => false,
                }
            }
            (FilterValue::String(v), op) => {
                let Some(x) = cell.as_str() else {
                    return false;
                };
                match op {
                    ObjLike => x == v,
                    ObjNotLike => x != v,
                    _ => false,
                }
            }
            (FilterValue::Time(v), op) => {
                let Some(x) = cell.as_time() else {
                    return false;
                };
                match op {
                    TimeBefore => x < *v,
                    TimeAfter => x > *v,
                    TimeEquals => x == *v,
                    TimeNotEquals => x != *v,
                    _ => false,
                }
            }
        }
    }

    /// Apply the filter to a dataset
    ///
    /// A dataset without the filtered column is returned unchanged.
    pub fn apply(&self, dataset: Dataset) -> Dataset {
        if !dataset.has_column(&self.feature) {
            return dataset;
        }

        let Dataset { columns, rows } = dataset;
        let rows = rows.into_iter().filter(|r| self.matches(r)).collect();
        Dataset { columns, rows }
    }
}
