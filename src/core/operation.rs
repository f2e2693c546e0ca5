//! Operations - the executable payload of a job
//!
//! An operation reads the environment slots named in `data_names`, writes
//! the slots named in `env_names`, and leaves everything else untouched.

use crate::core::{
    environment::{EnvValue, Environment, Model},
    feature::{Dataset, Value},
    pipeline::{Stage, StageOperation},
};
use crate::error::{Error, Result};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Environment slots an operation works on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSlots {
    /// Variables read from local data
    #[serde(default)]
    pub data_names: Vec<String>,

    /// Variables written to the environment
    #[serde(default)]
    pub env_names: Vec<String>,

    /// Seed for operations that shuffle or sample
    #[serde(default)]
    pub random_seed: Option<u64>,
}

impl OperationSlots {
    pub fn new(data_names: Vec<String>, env_names: Vec<String>) -> Self {
        Self {
            data_names,
            env_names,
            random_seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = Some(seed);
        self
    }

    fn output(&self, position: usize) -> Result<&str> {
        self.env_names
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| Error::Execution(format!("no output slot at position {}", position)))
    }

    fn input(&self, position: usize) -> Result<&str> {
        self.data_names
            .get(position)
            .map(String::as_str)
            .ok_or_else(|| Error::Execution(format!("no data slot at position {}", position)))
    }
}

/// Does nothing; used for source stages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoOp {
    #[serde(flatten)]
    pub slots: OperationSlots,
}

/// Runs one transform or filter stage over the named datasets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRun {
    pub stage: Stage,
    #[serde(flatten)]
    pub slots: OperationSlots,
}

impl StageRun {
    fn exec(&self, mut env: Environment) -> Result<Environment> {
        if self.slots.data_names.is_empty() {
            return Err(Error::Execution(format!(
                "stage {} declares no data slots",
                self.stage.index
            )));
        }

        for (position, name) in self.slots.data_names.iter().enumerate() {
            let dataset = env.take_dataset(name)?;
            let output = self
                .slots
                .env_names
                .get(position)
                .cloned()
                .unwrap_or_else(|| name.clone());
            env.set(output, EnvValue::Dataset(self.stage.apply(dataset)));
        }

        Ok(env)
    }
}

/// Fits a model on a dataset, holding out a test split
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Train {
    pub label: String,

    /// Share of rows held out for evaluation
    #[serde(default)]
    pub test_fraction: f64,

    #[serde(flatten)]
    pub slots: OperationSlots,
}

impl Train {
    fn exec(&self, mut env: Environment) -> Result<Environment> {
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(Error::Execution(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }

        let dataset = env.dataset(self.slots.input(0)?)?;
        let model_slot = self.slots.output(0)?.to_string();

        let mut rows = dataset.rows.clone();
        let seed = self.slots.random_seed.unwrap_or_else(rand::random);
        rows.shuffle(&mut StdRng::seed_from_u64(seed));

        let n_test = (rows.len() as f64 * self.test_fraction).floor() as usize;
        let test = rows.split_off(rows.len() - n_test);
        let train = Dataset::new(dataset.columns.clone(), rows);

        let model = fit(&train, &self.label)?;

        if let Some(metric_slot) = self.slots.env_names.get(1) {
            let errors: Vec<f64> = test
                .iter()
                .filter_map(|r| {
                    r.get(&self.label)
                        .and_then(Value::as_f64)
                        .map(|y| (y - model.predict(r)).abs())
                })
                .collect();
            let mae = mean(&errors).map(Value::Numeric).unwrap_or(Value::Null);
            env.set(metric_slot.clone(), EnvValue::Scalar(mae));
        }

        env.set(model_slot, EnvValue::Model(model));
        Ok(env)
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn fit(train: &Dataset, label: &str) -> Result<Model> {
    let labelled: Vec<_> = train
        .rows
        .iter()
        .filter_map(|r| r.get(label).and_then(Value::as_f64).map(|y| (r, y)))
        .collect();

    let ys: Vec<f64> = labelled.iter().map(|(_, y)| *y).collect();
    let label_mean = mean(&ys).ok_or_else(|| {
        Error::Execution(format!("no numeric values for label '{}' in training data", label))
    })?;

    let mut feature_means = BTreeMap::new();
    for column in train.columns.iter().filter(|c| *c != label) {
        if let Some(m) = mean(&train.numeric_column(column)) {
            feature_means.insert(column.clone(), m);
        }
    }

    let mut model = Model {
        label: label.to_string(),
        feature_means,
        label_mean,
        slope: 0.0,
        intercept: label_mean,
        predictor: None,
        samples: labelled.len(),
    };

    // least squares on the first numeric feature with some spread
    for (column, x_mean) in &model.feature_means {
        let pairs: Vec<(f64, f64)> = labelled
            .iter()
            .filter_map(|(r, y)| r.get(column).and_then(Value::as_f64).map(|x| (x, *y)))
            .collect();
        let var: f64 = pairs.iter().map(|(x, _)| (x - x_mean).powi(2)).sum();
        if pairs.len() < 2 || var == 0.0 {
            continue;
        }
        let cov: f64 = pairs.iter().map(|(x, y)| (x - x_mean) * (y - label_mean)).sum();
        let slope = cov / var;
        model.slope = slope;
        model.intercept = label_mean - slope * x_mean;
        model.predictor = Some(column.clone());
        break;
    }

    Ok(model)
}

/// Statistic computed by an estimation step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "estimator", rename_all = "snake_case")]
pub enum Estimator {
    Count,
    Mean { feature: String },
}

/// Computes a scalar estimate over a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    #[serde(flatten)]
    pub estimator: Estimator,
    #[serde(flatten)]
    pub slots: OperationSlots,
}

impl Estimate {
    fn exec(&self, mut env: Environment) -> Result<Environment> {
        let dataset = env.dataset(self.slots.input(0)?)?;

        let value = match &self.estimator {
            Estimator::Count => Value::Numeric(dataset.len() as f64),
            Estimator::Mean { feature } => {
                if !dataset.has_column(feature) {
                    return Err(Error::not_found("feature", feature.clone()));
                }
                mean(&dataset.numeric_column(feature))
                    .map(Value::Numeric)
                    .unwrap_or(Value::Null)
            }
        };

        env.set(self.slots.output(0)?.to_string(), EnvValue::Scalar(value));
        Ok(env)
    }
}

/// The closed set of operations a job can run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum Operation {
    NoOp(NoOp),
    Transform(StageRun),
    Filter(StageRun),
    Train(Train),
    Estimate(Estimate),
}

impl Operation {
    /// Build the operation that runs a pipeline stage
    pub fn for_stage(stage: &Stage, slots: OperationSlots) -> Self {
        let run = StageRun {
            stage: stage.clone(),
            slots,
        };
        match stage.operation {
            StageOperation::NoOp => Operation::NoOp(NoOp { slots: run.slots }),
            StageOperation::Transform { .. } => Operation::Transform(run),
            StageOperation::Filter { .. } => Operation::Filter(run),
        }
    }

    pub fn train(label: &str, test_fraction: f64, slots: OperationSlots) -> Self {
        Operation::Train(Train {
            label: label.to_string(),
            test_fraction,
            slots,
        })
    }

    pub fn estimate(estimator: Estimator, slots: OperationSlots) -> Self {
        Operation::Estimate(Estimate { estimator, slots })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Operation::NoOp(_) => "no_op",
            Operation::Transform(_) => "transform",
            Operation::Filter(_) => "filter",
            Operation::Train(_) => "train",
            Operation::Estimate(_) => "estimate",
        }
    }

    pub fn slots(&self) -> &OperationSlots {
        match self {
            Operation::NoOp(op) => &op.slots,
            Operation::Transform(op) | Operation::Filter(op) => &op.slots,
            Operation::Train(op) => &op.slots,
            Operation::Estimate(op) => &op.slots,
        }
    }

    /// Run the operation against an environment
    pub fn exec(&self, env: Environment) -> Result<Environment> {
        match self {
            Operation::NoOp(_) => Ok(env),
            Operation::Transform(op) | Operation::Filter(op) => op.exec(env),
            Operation::Train(op) => op.exec(env),
            Operation::Estimate(op) => op.exec(env),
        }
    }
}
