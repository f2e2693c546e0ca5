//! Artifact and coordinator configuration from YAML

use crate::core::{
    feature::{Feature, FeatureType, Value},
    filter::Filter,
    job::Artifact,
    operation::{Estimator, Operation, OperationSlots},
    pipeline::Pipeline,
    transformer::{Transformer, TransformerKind},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_iterations() -> u32 {
    1
}

fn default_data_name() -> String {
    "data".to_string()
}

/// A submitted computation as authored by the user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Artifact name
    pub name: String,

    /// Components that hold data and run the jobs
    pub components: Vec<String>,

    /// Number of rounds
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Environment slot holding each component's local dataset
    #[serde(default = "default_data_name")]
    pub data: String,

    /// Features exposed by the source data
    pub features: Vec<Feature>,

    /// Query stages, applied in order
    #[serde(default)]
    pub stages: Vec<StageConfig>,

    /// Final step of each round
    #[serde(default)]
    pub plan: Option<PlanConfig>,
}

/// One query stage
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageConfig {
    Filter(FilterConfig),
    Transform(TransformConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub feature: String,
    /// Comparison name, e.g. `NUM_GREATER_THAN`
    pub operation: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// `rename`, `scale`, `binarize` or `drop`
    pub kind: String,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

/// Step run after the query stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanConfig {
    Train {
        label: String,
        #[serde(default)]
        test_fraction: f64,
        #[serde(default)]
        random_seed: Option<u64>,
    },
    Estimate {
        /// `count` or `mean`
        estimator: String,
        #[serde(default)]
        feature: Option<String>,
    },
}

impl ArtifactConfig {
    /// Load artifact configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse artifact configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ArtifactConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the artifact configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Artifact name cannot be empty");
        }

        if self.components.is_empty() {
            anyhow::bail!("Artifact '{}' has no components", self.name);
        }

        let mut seen = HashSet::new();
        for component in &self.components {
            if !seen.insert(component) {
                anyhow::bail!("Duplicate component: {}", component);
            }
        }

        if self.iterations == 0 {
            anyhow::bail!("Artifact '{}' must run at least one iteration", self.name);
        }

        let mut seen = HashSet::new();
        for feature in &self.features {
            if !seen.insert(&feature.name) {
                anyhow::bail!("Duplicate feature: {}", feature.name);
            }
        }

        // Stage errors carry the offending stage position
        self.pipeline()?;
        self.plan()?;

        Ok(())
    }

    /// Compile the stages into a pipeline
    pub fn pipeline(&self) -> Result<Pipeline> {
        let mut pipeline = Pipeline::new(self.features.clone());

        for (position, stage) in self.stages.iter().enumerate() {
            let result = match stage {
                StageConfig::Filter(f) => {
                    Filter::parse(&f.feature, &f.operation, &f.value).and_then(|f| pipeline.append(f))
                }
                StageConfig::Transform(t) => {
                    t.build(&pipeline).and_then(|t| pipeline.append(t))
                }
            };
            result.with_context(|| format!("Invalid stage #{} in artifact '{}'", position + 1, self.name))?;
        }

        Ok(pipeline)
    }

    /// Compile the plan into its operation
    pub fn plan(&self) -> Result<Option<Operation>> {
        let Some(plan) = &self.plan else {
            return Ok(None);
        };

        let operation = match plan {
            PlanConfig::Train {
                label,
                test_fraction,
                random_seed,
            } => {
                if !(0.0..1.0).contains(test_fraction) {
                    anyhow::bail!("test_fraction must be in [0, 1), got {}", test_fraction);
                }
                let mut slots = OperationSlots::new(
                    vec![self.data.clone()],
                    vec!["model".to_string(), "metrics".to_string()],
                );
                slots.random_seed = *random_seed;
                Operation::train(label, *test_fraction, slots)
            }
            PlanConfig::Estimate { estimator, feature } => {
                let estimator = match (estimator.as_str(), feature) {
                    ("count", _) => Estimator::Count,
                    ("mean", Some(feature)) => Estimator::Mean {
                        feature: feature.clone(),
                    },
                    ("mean", None) => anyhow::bail!("Mean estimator needs a feature"),
                    (other, _) => anyhow::bail!("Unknown estimator: {}", other),
                };
                Operation::estimate(
                    estimator,
                    OperationSlots::new(vec![self.data.clone()], vec!["estimate".to_string()]),
                )
            }
        };

        Ok(Some(operation))
    }

    /// Compile the configuration into an artifact ready for submission
    pub fn compile(&self) -> Result<Artifact> {
        let mut artifact = Artifact::new(
            self.name.clone(),
            self.pipeline()?,
            self.components.clone(),
            self.iterations,
        )
        .with_data(&self.data);
        artifact.plan = self.plan()?;
        Ok(artifact)
    }
}

impl TransformConfig {
    fn build(&self, pipeline: &Pipeline) -> crate::error::Result<Transformer> {
        let inputs = self
            .inputs
            .iter()
            .map(|name| pipeline.feature(name).cloned())
            .collect::<crate::error::Result<Vec<Feature>>>()?;

        let kind = match self.kind.as_str() {
            "rename" => TransformerKind::Rename,
            "scale" => TransformerKind::Scale {
                factor: self.factor.unwrap_or(1.0),
                offset: self.offset.unwrap_or(0.0),
            },
            "binarize" => TransformerKind::Binarize {
                threshold: self.threshold.unwrap_or(0.0),
            },
            "drop" => TransformerKind::Drop,
            other => {
                return Err(crate::error::Error::UnsupportedOperation(format!(
                    "unknown transformer kind \"{}\"",
                    other
                )))
            }
        };

        let outputs = self
            .outputs
            .iter()
            .zip(inputs.iter().map(|f| f.dtype).chain(std::iter::repeat(FeatureType::Numeric)))
            .map(|(name, dtype)| match &kind {
                TransformerKind::Rename => Feature::new(name.clone(), dtype),
                _ => Feature::numeric(name.clone()),
            })
            .collect();

        Transformer::new(kind, inputs, outputs)
    }
}

fn default_max_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("lockstep")
}

fn default_storage_root() -> PathBuf {
    data_dir().join("artifacts")
}

fn default_database() -> PathBuf {
    data_dir().join("jobs.db")
}

/// Runtime settings of the coordinator and its nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Root directory for job payloads
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// SQLite database holding jobs and locks
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Jobs a node runs concurrently
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// How long an idle node waits before polling again
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// RUNNING jobs older than this are moved to ERROR by the reaper
    #[serde(default)]
    pub lease_secs: Option<u64>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            database: default_database(),
            max_workers: default_max_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            lease_secs: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CoordinatorConfig = serde_yaml::from_str(yaml)?;
        if config.max_workers == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }
        Ok(config)
    }

    /// Load from an optional path, falling back to defaults
    pub fn load(path: Option<&str>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Option<chrono::Duration> {
        self.lease_secs
            .and_then(|secs| chrono::Duration::try_seconds(secs as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::StageOperation;

    const ARTIFACT: &str = r#"
name: "adult income"
components: ["node-a", "node-b"]
iterations: 2
features:
  - name: age
    dtype: numeric
  - name: income
    dtype: numeric
  - name: city
    dtype: string
stages:
  - filter:
      feature: age
      operation: NUM_GREATER_THAN
      value: 30
  - transform:
      kind: scale
      inputs: [income]
      outputs: [income_k]
      factor: 0.001
  - transform:
      kind: drop
      inputs: [city]
plan:
  train:
    label: income_k
    test_fraction: 0.2
    random_seed: 42
"#;

    #[test]
    fn test_parse_and_compile_artifact() {
        let config = ArtifactConfig::from_yaml(ARTIFACT).unwrap();
        assert_eq!(config.data, "data");

        let artifact = config.compile().unwrap();
        assert_eq!(artifact.pipeline.len(), 4);
        assert_eq!(artifact.iterations, 2);
        assert_eq!(artifact.jobs_per_round(), 5);
        assert_eq!(artifact.total_jobs(), 20);

        let names: Vec<&str> = artifact.pipeline.features().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["age", "income_k"]);
        assert!(matches!(
            artifact.pipeline.stage(1).unwrap().operation,
            StageOperation::Filter { .. }
        ));

        let plan = artifact.plan.unwrap();
        assert_eq!(plan.kind(), "train");
        assert_eq!(plan.slots().random_seed, Some(42));
    }

    #[test]
    fn test_unknown_filter_operation_fails() {
        let yaml = r#"
name: "bad"
components: ["node-a"]
features:
  - name: age
    dtype: numeric
stages:
  - filter:
      feature: age
      operation: NUM_ROUGHLY
      value: 3
"#;
        let err = ArtifactConfig::from_yaml(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("NUM_ROUGHLY"));
    }

    #[test]
    fn test_filter_on_missing_feature_fails() {
        let yaml = r#"
name: "bad"
components: ["node-a"]
features:
  - name: age
    dtype: numeric
stages:
  - filter:
      feature: salary
      operation: NUM_EQUALS
      value: 3
"#;
        let err = ArtifactConfig::from_yaml(yaml).unwrap_err();
        assert!(format!("{:#}", err).contains("salary"));
    }

    #[test]
    fn test_duplicate_component_fails() {
        let yaml = r#"
name: "dup"
components: ["node-a", "node-a"]
features: []
"#;
        assert!(ArtifactConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_iterations_fails() {
        let yaml = r#"
name: "none"
components: ["node-a"]
iterations: 0
features: []
"#;
        assert!(ArtifactConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_estimate_plan() {
        let yaml = r#"
name: "count"
components: ["node-a"]
features:
  - name: age
    dtype: numeric
plan:
  estimate:
    estimator: mean
    feature: age
"#;
        let artifact = ArtifactConfig::from_yaml(yaml).unwrap().compile().unwrap();
        let plan = artifact.plan.unwrap();
        assert_eq!(plan.kind(), "estimate");
        assert_eq!(plan.slots().env_names, vec!["estimate".to_string()]);
    }

    #[test]
    fn test_coordinator_config_defaults() {
        let config = CoordinatorConfig::from_yaml("lease_secs: 30\n").unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.poll_interval(), Duration::from_millis(200));
        assert_eq!(config.lease(), chrono::Duration::try_seconds(30));
        assert!(config.storage_root.ends_with("lockstep/artifacts"));
    }

    #[test]
    fn test_coordinator_config_rejects_zero_workers() {
        assert!(CoordinatorConfig::from_yaml("max_workers: 0\n").is_err());
    }
}
