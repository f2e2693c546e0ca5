//! Execution environment - the named working set of one job run

use crate::core::feature::{Dataset, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A model produced by a training operation
///
/// Fits per-feature means and a least-squares line on the first numeric
/// feature; enough to carry model state between jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub label: String,
    pub feature_means: BTreeMap<String, f64>,
    pub label_mean: f64,
    pub slope: f64,
    pub intercept: f64,
    pub predictor: Option<String>,
    pub samples: usize,
}

impl Model {
    /// Predict the label for one row
    pub fn predict(&self, row: &crate::core::feature::Row) -> f64 {
        match &self.predictor {
            Some(p) => match row.get(p).and_then(Value::as_f64) {
                Some(x) => self.intercept + self.slope * x,
                None => self.label_mean,
            },
            None => self.label_mean,
        }
    }
}

/// A value held in the environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum EnvValue {
    Dataset(Dataset),
    Model(Model),
    Scalar(Value),
}

/// Named variables available while a job executes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    variables: BTreeMap<String, EnvValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: EnvValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.variables.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<EnvValue> {
        self.variables.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.variables.keys()
    }

    pub fn with_dataset(mut self, name: impl Into<String>, dataset: Dataset) -> Self {
        self.set(name, EnvValue::Dataset(dataset));
        self
    }

    /// Borrow a dataset slot
    pub fn dataset(&self, name: &str) -> Result<&Dataset> {
        match self.get(name) {
            Some(EnvValue::Dataset(d)) => Ok(d),
            Some(other) => Err(Error::Execution(format!(
                "variable '{}' is not a dataset: {}",
                name,
                other.kind()
            ))),
            None => Err(Error::not_found("variable", name)),
        }
    }

    /// Take a dataset slot out of the environment
    pub fn take_dataset(&mut self, name: &str) -> Result<Dataset> {
        self.dataset(name)?;
        match self.remove(name) {
            Some(EnvValue::Dataset(d)) => Ok(d),
            _ => Err(Error::not_found("variable", name)),
        }
    }

    pub fn model(&self, name: &str) -> Result<&Model> {
        match self.get(name) {
            Some(EnvValue::Model(m)) => Ok(m),
            Some(other) => Err(Error::Execution(format!(
                "variable '{}' is not a model: {}",
                name,
                other.kind()
            ))),
            None => Err(Error::not_found("variable", name)),
        }
    }

    pub fn scalar(&self, name: &str) -> Result<&Value> {
        match self.get(name) {
            Some(EnvValue::Scalar(v)) => Ok(v),
            Some(other) => Err(Error::Execution(format!(
                "variable '{}' is not a scalar: {}",
                name,
                other.kind()
            ))),
            None => Err(Error::not_found("variable", name)),
        }
    }

    /// Copy every variable of `other` into this environment
    pub fn merge(&mut self, other: Environment) {
        self.variables.extend(other.variables);
    }
}

impl EnvValue {
    pub fn kind(&self) -> &'static str {
        match self {
            EnvValue::Dataset(_) => "dataset",
            EnvValue::Model(_) => "model",
            EnvValue::Scalar(_) => "scalar",
        }
    }
}
