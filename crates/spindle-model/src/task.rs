use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::ExecutionStatus;

/// The smallest unit of work within a stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub status: ExecutionStatus,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub start_time: Option<DateTime<Utc>>,
  #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
  pub end_time: Option<DateTime<Utc>>,
  /// This task starts its owning stage.
  #[serde(default)]
  pub stage_start: bool,
  /// This task ends its owning stage.
  #[serde(default)]
  pub stage_end: bool,
}

impl Task {
  pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn with_status(mut self, status: ExecutionStatus) -> Self {
    self.status = status;
    self
  }
}
