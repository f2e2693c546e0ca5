//! Feature transformers applied by pipeline stages

use crate::core::feature::{Dataset, Feature, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// What a transformer does to its input columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformerKind {
    /// Copy each input column to the output at the same position
    Rename,
    /// `out = in * factor + offset`
    Scale { factor: f64, offset: f64 },
    /// `out = 1.0` when `in > threshold`, `0.0` otherwise
    Binarize { threshold: f64 },
    /// Remove the input columns
    Drop,
}

/// A transformer with its declared input and output features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transformer {
    #[serde(flatten)]
    pub kind: TransformerKind,
    pub features_in: Vec<Feature>,
    pub features_out: Vec<Feature>,
}

impl Transformer {
    /// Build a transformer, checking the declared features fit the kind
    pub fn new(kind: TransformerKind, features_in: Vec<Feature>, features_out: Vec<Feature>) -> Result<Self> {
        if features_in.is_empty() {
            return Err(Error::UnsupportedOperation(
                "transformer declares no input features".to_string(),
            ));
        }

        match &kind {
            TransformerKind::Drop => {
                if !features_out.is_empty() {
                    return Err(Error::UnsupportedOperation(
                        "drop transformer cannot declare output features".to_string(),
                    ));
                }
            }
            _ => {
                if features_in.len() != features_out.len() {
                    return Err(Error::UnsupportedOperation(format!(
                        "{:?} transformer needs one output per input ({} in, {} out)",
                        kind,
                        features_in.len(),
                        features_out.len()
                    )));
                }
            }
        }

        if matches!(kind, TransformerKind::Scale { .. } | TransformerKind::Binarize { .. }) {
            if let Some(f) = features_in.iter().find(|f| f.dtype != crate::core::FeatureType::Numeric) {
                return Err(Error::UnsupportedOperation(format!(
                    "{:?} transformer needs numeric input, feature '{}' is {:?}",
                    kind, f.name, f.dtype
                )));
            }
        }

        Ok(Self {
            kind,
            features_in,
            features_out,
        })
    }

    pub fn rename(from: Feature, to: &str) -> Result<Self> {
        let out = Feature::new(to, from.dtype);
        Self::new(TransformerKind::Rename, vec![from], vec![out])
    }

    pub fn scale(input: Feature, output: &str, factor: f64, offset: f64) -> Result<Self> {
        Self::new(
            TransformerKind::Scale { factor, offset },
            vec![input],
            vec![Feature::numeric(output)],
        )
    }

    pub fn binarize(input: Feature, output: &str, threshold: f64) -> Result<Self> {
        Self::new(
            TransformerKind::Binarize { threshold },
            vec![input],
            vec![Feature::numeric(output)],
        )
    }

    pub fn drop(features: Vec<Feature>) -> Result<Self> {
        Self::new(TransformerKind::Drop, features, Vec::new())
    }

    /// Feature set after this transformer: inputs removed, outputs appended
    pub fn apply_features(&self, current: &[Feature]) -> Vec<Feature> {
        let mut features: Vec<Feature> = current
            .iter()
            .filter(|f| !self.features_in.iter().any(|i| i.name == f.name))
            .cloned()
            .collect();
        features.extend(self.features_out.iter().cloned());
        features
    }

    fn compute(&self, cell: Option<&Value>) -> Value {
        match &self.kind {
            TransformerKind::Rename => cell.cloned().unwrap_or(Value::Null),
            TransformerKind::Scale { factor, offset } => match cell.and_then(Value::as_f64) {
                Some(x) => Value::Numeric(x * factor + offset),
                None => Value::Null,
            },
            TransformerKind::Binarize { threshold } => match cell.and_then(Value::as_f64) {
                Some(x) => Value::Numeric(if x > *threshold { 1.0 } else { 0.0 }),
                None => Value::Null,
            },
            TransformerKind::Drop => Value::Null,
        }
    }

    /// Transform a dataset row by row
    pub fn apply(&self, dataset: Dataset) -> Dataset {
        let inputs: Vec<&str> = self.features_in.iter().map(|f| f.name.as_str()).collect();

        let mut columns: Vec<String> = dataset
            .columns
            .iter()
            .filter(|c| !inputs.contains(&c.as_str()))
            .filter(|c| !self.features_out.iter().any(|o| o.name == **c))
            .cloned()
            .collect();
        columns.extend(self.features_out.iter().map(|f| f.name.clone()));

        let rows = dataset
            .rows
            .into_iter()
            .map(|mut row| {
                let outputs: Vec<(String, Value)> = self
                    .features_in
                    .iter()
                    .zip(&self.features_out)
                    .map(|(i, o)| (o.name.clone(), self.compute(row.get(&i.name))))
                    .collect();
                for name in &inputs {
                    row.remove(*name);
                }
                row.extend(outputs);
                row
            })
            .collect();

        Dataset { columns, rows }
    }
}
