use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate_stages;
use crate::error::ModelError;
use crate::stage::Stage;
use crate::status::ExecutionStatus;

/// Untyped key/value data attached to executions and stages.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// The two families of executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionType {
  #[default]
  Pipeline,
  Orchestration,
}

impl ExecutionType {
  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionType::Pipeline => "pipeline",
      ExecutionType::Orchestration => "orchestration",
    }
  }
}

impl fmt::Display for ExecutionType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ExecutionType {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "pipeline" => Ok(ExecutionType::Pipeline),
      "orchestration" => Ok(ExecutionType::Orchestration),
      _ => Err(ModelError::UnknownExecutionType(s.to_string())),
    }
  }
}

/// On-disk layout an execution was read from or will be written with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SchemaVersion {
  /// Single serialized document; execution status is derived from stages.
  Legacy,
  /// Flattened fields; execution status is stored.
  #[default]
  Current,
}

impl SchemaVersion {
  pub fn number(&self) -> u8 {
    match self {
      SchemaVersion::Legacy => 1,
      SchemaVersion::Current => 2,
    }
  }
}

/// Identifies an execution without holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExecutionRef {
  pub execution_type: ExecutionType,
  pub id: String,
}

/// The principal an execution runs as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
  #[serde(default)]
  pub user: Option<String>,
  #[serde(default)]
  pub allowed_accounts: Vec<String>,
}

impl Authentication {
  pub fn is_empty(&self) -> bool {
    self.user.is_none() && self.allowed_accounts.is_empty()
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDetails {
  #[serde(default)]
  pub name: Option<String>,
  /// Identifies the pipeline definition; stable across runs.
  #[serde(default)]
  pub pipeline_config_id: Option<String>,
  #[serde(default)]
  pub trigger: Context,
  #[serde(default)]
  pub notifications: Vec<serde_json::Value>,
  #[serde(default)]
  pub initial_config: Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestrationDetails {
  #[serde(default)]
  pub description: Option<String>,
}

/// Variant-specific execution data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ExecutionKind {
  Pipeline(PipelineDetails),
  Orchestration(OrchestrationDetails),
}

impl ExecutionKind {
  pub fn execution_type(&self) -> ExecutionType {
    match self {
      ExecutionKind::Pipeline(_) => ExecutionType::Pipeline,
      ExecutionKind::Orchestration(_) => ExecutionType::Orchestration,
    }
  }
}

/// A pipeline or orchestration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
  /// Empty until assigned, either by the caller or when first stored.
  #[serde(default)]
  pub id: String,
  pub application: String,
  #[serde(skip)]
  pub schema_version: SchemaVersion,
  /// Stored status. Only authoritative for [`SchemaVersion::Current`];
  /// read through [`Execution::visible_status`].
  #[serde(default)]
  pub status: ExecutionStatus,
  #[serde(default)]
  pub canceled: bool,
  #[serde(default)]
  pub canceled_by: Option<String>,
  #[serde(default)]
  pub cancellation_reason: Option<String>,
  #[serde(default)]
  pub parallel: bool,
  #[serde(default)]
  pub limit_concurrent: bool,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub build_time: Option<DateTime<Utc>>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub executing_instance: Option<String>,
  #[serde(default)]
  pub context: Context,
  #[serde(default)]
  pub app_config: Context,
  #[serde(default)]
  pub authentication: Authentication,
  #[serde(default)]
  pub stages: Vec<Stage>,
  #[serde(flatten)]
  pub kind: ExecutionKind,
}

impl Execution {
  fn new(application: impl Into<String>, kind: ExecutionKind) -> Self {
    Self {
      id: String::new(),
      application: application.into(),
      schema_version: SchemaVersion::Current,
      status: ExecutionStatus::NotStarted,
      canceled: false,
      canceled_by: None,
      cancellation_reason: None,
      parallel: false,
      limit_concurrent: false,
      build_time: None,
      start_time: None,
      end_time: None,
      executing_instance: None,
      context: Context::new(),
      app_config: Context::new(),
      authentication: Authentication::default(),
      stages: Vec::new(),
      kind,
    }
  }

  /// A new pipeline run with no id and no stages.
  pub fn pipeline(application: impl Into<String>) -> Self {
    Self::new(application, ExecutionKind::Pipeline(PipelineDetails::default()))
  }

  /// A new orchestration with no id and no stages.
  pub fn orchestration(application: impl Into<String>) -> Self {
    Self::new(
      application,
      ExecutionKind::Orchestration(OrchestrationDetails::default()),
    )
  }

  pub fn execution_type(&self) -> ExecutionType {
    self.kind.execution_type()
  }

  pub fn reference(&self) -> ExecutionRef {
    ExecutionRef {
      execution_type: self.execution_type(),
      id: self.id.clone(),
    }
  }

  pub fn pipeline_details(&self) -> Option<&PipelineDetails> {
    match &self.kind {
      ExecutionKind::Pipeline(details) => Some(details),
      ExecutionKind::Orchestration(_) => None,
    }
  }

  pub fn pipeline_details_mut(&mut self) -> Option<&mut PipelineDetails> {
    match &mut self.kind {
      ExecutionKind::Pipeline(details) => Some(details),
      ExecutionKind::Orchestration(_) => None,
    }
  }

  pub fn pipeline_config_id(&self) -> Option<&str> {
    self
      .pipeline_details()
      .and_then(|details| details.pipeline_config_id.as_deref())
  }

  /// Assign a time-ordered id if none is set, returning the id.
  pub fn ensure_id(&mut self) -> &str {
    if self.id.is_empty() {
      self.id = uuid::Uuid::now_v7().to_string();
      self.attach_stages();
    }
    &self.id
  }

  /// Append a stage, making this execution its owner.
  pub fn add_stage(&mut self, mut stage: Stage) {
    stage.execution = self.reference();
    self.stages.push(stage);
  }

  /// Re-stamp every stage's owner reference.
  pub fn attach_stages(&mut self) {
    let owner = self.reference();
    for stage in &mut self.stages {
      stage.execution = owner.clone();
    }
  }

  /// The status callers should see.
  ///
  /// Current records report the stored field; legacy records derive it from
  /// their stages. The two sources are never mixed.
  pub fn visible_status(&self) -> ExecutionStatus {
    match self.schema_version {
      SchemaVersion::Current => self.status,
      SchemaVersion::Legacy => aggregate_stages(&self.stages),
    }
  }

  pub fn stage_by_id(&self, stage_id: &str) -> Option<&Stage> {
    self.stages.iter().find(|stage| stage.id == stage_id)
  }

  pub fn stage_by_id_mut(&mut self, stage_id: &str) -> Option<&mut Stage> {
    self.stages.iter_mut().find(|stage| stage.id == stage_id)
  }

  pub fn stage_by_ref_id(&self, ref_id: &str) -> Option<&Stage> {
    self
      .stages
      .iter()
      .find(|stage| stage.ref_id.as_deref() == Some(ref_id))
  }

  /// Stages this stage depends on through `requisite_stage_ref_ids`.
  pub fn upstream_stages(&self, stage: &Stage) -> Vec<&Stage> {
    stage
      .requisite_stage_ref_ids
      .iter()
      .filter_map(|ref_id| self.stage_by_ref_id(ref_id))
      .collect()
  }

  /// Synthetic stages spawned by `stage_id`, in execution order.
  pub fn synthetic_children(&self, stage_id: &str) -> Vec<&Stage> {
    self
      .stages
      .iter()
      .filter(|stage| stage.parent_stage_id.as_deref() == Some(stage_id))
      .collect()
  }

  /// The nearest earlier stage with the same type as `stage_id`.
  pub fn preceding_stage_of_type(&self, stage_id: &str) -> Option<&Stage> {
    let position = self.stages.iter().position(|stage| stage.id == stage_id)?;
    let stage_type = &self.stages[position].stage_type;
    self.stages[..position]
      .iter()
      .rev()
      .find(|stage| &stage.stage_type == stage_type)
  }
}
