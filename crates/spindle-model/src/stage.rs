use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::aggregate;
use crate::error::ModelError;
use crate::execution::{Context, ExecutionRef};
use crate::status::ExecutionStatus;
use crate::task::Task;

/// Which side of its parent a synthetic stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyntheticStageOwner {
  StageBefore,
  StageAfter,
}

impl SyntheticStageOwner {
  pub fn as_str(&self) -> &'static str {
    match self {
      SyntheticStageOwner::StageBefore => "STAGE_BEFORE",
      SyntheticStageOwner::StageAfter => "STAGE_AFTER",
    }
  }
}

impl fmt::Display for SyntheticStageOwner {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SyntheticStageOwner {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "STAGE_BEFORE" => Ok(SyntheticStageOwner::StageBefore),
      "STAGE_AFTER" => Ok(SyntheticStageOwner::StageAfter),
      other => Err(ModelError::UnknownSyntheticStageOwner(other.to_string())),
    }
  }
}

/// A unit of work within an execution.
///
/// A stage does not own a pointer to its execution. `execution` identifies the
/// owner and is re-stamped by [`Execution`](crate::Execution) whenever the
/// stage is adopted or decoded; use the execution's lookup helpers to navigate
/// from a stage to its neighbours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
  pub id: String,
  #[serde(default)]
  pub ref_id: Option<String>,
  #[serde(rename = "type")]
  pub stage_type: String,
  #[serde(default)]
  pub name: String,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub end_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub status: ExecutionStatus,
  #[serde(default)]
  pub initialization_stage: bool,
  #[serde(default)]
  pub synthetic_stage_owner: Option<SyntheticStageOwner>,
  #[serde(default)]
  pub parent_stage_id: Option<String>,
  #[serde(default)]
  pub requisite_stage_ref_ids: BTreeSet<String>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub scheduled_time: Option<DateTime<Utc>>,
  #[serde(default)]
  pub context: Context,
  #[serde(default)]
  pub tasks: Vec<Task>,
  #[serde(skip)]
  pub execution: ExecutionRef,
}

impl Stage {
  pub fn new(id: impl Into<String>, stage_type: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      stage_type: stage_type.into(),
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn with_ref_id(mut self, ref_id: impl Into<String>) -> Self {
    self.ref_id = Some(ref_id.into());
    self
  }

  pub fn with_status(mut self, status: ExecutionStatus) -> Self {
    self.status = status;
    self
  }

  pub fn with_task(mut self, task: Task) -> Self {
    self.tasks.push(task);
    self
  }

  /// Mark this stage as a synthetic child of `parent_stage_id`.
  pub fn with_parent(mut self, parent_stage_id: impl Into<String>, owner: SyntheticStageOwner) -> Self {
    self.parent_stage_id = Some(parent_stage_id.into());
    self.synthetic_stage_owner = Some(owner);
    self
  }

  pub fn with_requisites<I, S>(mut self, ref_ids: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self
      .requisite_stage_ref_ids
      .extend(ref_ids.into_iter().map(Into::into));
    self
  }

  /// Whether this stage takes part in status aggregation.
  pub fn is_eligible(&self) -> bool {
    !self.tasks.is_empty()
  }

  pub fn is_synthetic(&self) -> bool {
    self.parent_stage_id.is_some()
  }

  /// Status of this stage derived from its tasks.
  ///
  /// Used in place of `status` when the stored stage status cannot be trusted.
  pub fn task_status(&self) -> ExecutionStatus {
    aggregate(self.tasks.iter().map(|task| task.status))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_task_status_follows_tasks() {
    let stage = Stage::new("s1", "deploy", "Deploy")
      .with_status(ExecutionStatus::Succeeded)
      .with_task(Task::new("1", "createServerGroup").with_status(ExecutionStatus::Succeeded))
      .with_task(Task::new("2", "waitForUp").with_status(ExecutionStatus::Running));

    assert_eq!(stage.task_status(), ExecutionStatus::Running);
  }

  #[test]
  fn test_stage_without_tasks_is_not_eligible() {
    let stage = Stage::new("s1", "wait", "Wait").with_status(ExecutionStatus::Terminal);
    assert!(!stage.is_eligible());
    assert_eq!(stage.task_status(), ExecutionStatus::NotStarted);
  }

  #[test]
  fn test_synthetic_owner_round_trips_through_str() {
    for owner in [SyntheticStageOwner::StageBefore, SyntheticStageOwner::StageAfter] {
      assert_eq!(owner.as_str().parse::<SyntheticStageOwner>(), Ok(owner));
    }
    assert!("STAGE_SOMEWHERE".parse::<SyntheticStageOwner>().is_err());
  }
}
