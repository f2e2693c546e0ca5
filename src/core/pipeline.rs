//! Pipeline domain model

use crate::core::{
    feature::{Dataset, Feature},
    filter::Filter,
    transformer::Transformer,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// The single operation a stage applies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageOperation {
    /// Source stage, passes data through
    NoOp,
    Transform { transformer: Transformer },
    Filter { filter: Filter },
}

/// One step of a pipeline: the operation and the features visible after it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub index: usize,
    pub features: Vec<Feature>,
    pub operation: StageOperation,
}

impl Stage {
    /// Look up a feature visible after this stage
    pub fn feature(&self, name: &str) -> Result<&Feature> {
        self.features
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| Error::not_found("feature", name))
    }

    /// Apply the stage operation to a dataset
    pub fn apply(&self, dataset: Dataset) -> Dataset {
        match &self.operation {
            StageOperation::NoOp => dataset,
            StageOperation::Transform { transformer } => transformer.apply(dataset),
            StageOperation::Filter { filter } => filter.apply(dataset),
        }
    }
}

/// Content of a new stage
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOp {
    Transform(Transformer),
    Filter(Filter),
}

impl From<Transformer> for PipelineOp {
    fn from(t: Transformer) -> Self {
        PipelineOp::Transform(t)
    }
}

impl From<Filter> for PipelineOp {
    fn from(f: Filter) -> Self {
        PipelineOp::Filter(f)
    }
}

/// An ordered sequence of stages over a set of features
///
/// Always holds at least its source stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPipeline")]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Deserialize)]
struct RawPipeline {
    stages: Vec<Stage>,
}

impl TryFrom<RawPipeline> for Pipeline {
    type Error = Error;

    fn try_from(raw: RawPipeline) -> Result<Self> {
        if raw.stages.is_empty() {
            return Err(Error::not_found("stage", "0"));
        }
        Ok(Pipeline { stages: raw.stages })
    }
}

impl Pipeline {
    /// Create a pipeline with a source stage exposing the given features
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            stages: vec![Stage {
                index: 0,
                features,
                operation: StageOperation::NoOp,
            }],
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Result<&Stage> {
        self.stages
            .get(index)
            .ok_or_else(|| Error::not_found("stage", index.to_string()))
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The most recent stage
    pub fn current(&self) -> &Stage {
        // a pipeline always holds its source stage
        &self.stages[self.stages.len() - 1]
    }

    /// Features available after the most recent stage
    pub fn features(&self) -> &[Feature] {
        &self.current().features
    }

    /// Look up a feature on the most recent stage
    pub fn feature(&self, name: &str) -> Result<&Feature> {
        self.current().feature(name)
    }

    /// Append a new stage in place
    pub fn append(&mut self, op: impl Into<PipelineOp>) -> Result<()> {
        let stage = self.next_stage(op.into())?;
        self.stages.push(stage);
        Ok(())
    }

    /// Return a copy of this pipeline with one more stage
    pub fn add(&self, op: impl Into<PipelineOp>) -> Result<Pipeline> {
        let mut pipeline = self.clone();
        pipeline.append(op)?;
        Ok(pipeline)
    }

    fn next_stage(&self, op: PipelineOp) -> Result<Stage> {
        let index = self.stages.len();

        match op {
            PipelineOp::Transform(transformer) => {
                for input in &transformer.features_in {
                    self.feature(&input.name)?;
                }
                let features = transformer.apply_features(self.features());
                if let Some(name) = duplicate_name(&features) {
                    return Err(Error::UnsupportedOperation(format!(
                        "transformer output '{}' collides with an existing feature",
                        name
                    )));
                }
                Ok(Stage {
                    index,
                    features,
                    operation: StageOperation::Transform { transformer },
                })
            }
            PipelineOp::Filter(filter) => {
                let feature = self.feature(&filter.feature)?;
                if feature.dtype != filter.operation.operand_type() {
                    return Err(Error::UnsupportedOperation(format!(
                        "{} cannot be applied to {:?} feature '{}'",
                        filter.operation, feature.dtype, feature.name
                    )));
                }
                Ok(Stage {
                    index,
                    features: self.features().to_vec(),
                    operation: StageOperation::Filter { filter },
                })
            }
        }
    }

    /// Run every stage over a dataset
    pub fn apply(&self, dataset: Dataset) -> Dataset {
        self.stages.iter().fold(dataset, |data, stage| stage.apply(data))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn duplicate_name(features: &[Feature]) -> Option<&str> {
    features
        .iter()
        .enumerate()
        .find(|(i, f)| features[..*i].iter().any(|g| g.name == f.name))
        .map(|(_, f)| f.name.as_str())
}
