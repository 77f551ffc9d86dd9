use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Status of an execution, stage, or task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
  #[default]
  NotStarted,
  Running,
  Suspended,
  Succeeded,
  Failed,
  Terminal,
  Canceled,
  Stopped,
}

impl ExecutionStatus {
  pub const ALL: [ExecutionStatus; 8] = [
    ExecutionStatus::NotStarted,
    ExecutionStatus::Running,
    ExecutionStatus::Suspended,
    ExecutionStatus::Succeeded,
    ExecutionStatus::Failed,
    ExecutionStatus::Terminal,
    ExecutionStatus::Canceled,
    ExecutionStatus::Stopped,
  ];

  /// The stored representation of this status.
  pub fn as_str(&self) -> &'static str {
    match self {
      ExecutionStatus::NotStarted => "NOT_STARTED",
      ExecutionStatus::Running => "RUNNING",
      ExecutionStatus::Suspended => "SUSPENDED",
      ExecutionStatus::Succeeded => "SUCCEEDED",
      ExecutionStatus::Failed => "FAILED",
      ExecutionStatus::Terminal => "TERMINAL",
      ExecutionStatus::Canceled => "CANCELED",
      ExecutionStatus::Stopped => "STOPPED",
    }
  }

  /// Whether this status stops the clock (an `end_time` is stamped on entry).
  pub fn is_complete(&self) -> bool {
    matches!(
      self,
      ExecutionStatus::Succeeded
        | ExecutionStatus::Failed
        | ExecutionStatus::Terminal
        | ExecutionStatus::Canceled
        | ExecutionStatus::Stopped
    )
  }
}

impl fmt::Display for ExecutionStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ExecutionStatus {
  type Err = ModelError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ExecutionStatus::ALL
      .into_iter()
      .find(|status| status.as_str().eq_ignore_ascii_case(s))
      .ok_or_else(|| ModelError::UnknownStatus(s.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_is_case_insensitive() {
    assert_eq!(
      "running".parse::<ExecutionStatus>(),
      Ok(ExecutionStatus::Running)
    );
    assert_eq!(
      "NOT_STARTED".parse::<ExecutionStatus>(),
      Ok(ExecutionStatus::NotStarted)
    );
    assert!("PAUSED".parse::<ExecutionStatus>().is_err());
  }

  #[test]
  fn test_serde_matches_stored_form() {
    for status in ExecutionStatus::ALL {
      let json = serde_json::to_string(&status).unwrap();
      assert_eq!(json, format!("\"{}\"", status.as_str()));
    }
  }

  #[test]
  fn test_complete_statuses() {
    let complete: Vec<_> = ExecutionStatus::ALL
      .into_iter()
      .filter(|s| s.is_complete())
      .collect();
    assert_eq!(
      complete,
      vec![
        ExecutionStatus::Succeeded,
        ExecutionStatus::Failed,
        ExecutionStatus::Terminal,
        ExecutionStatus::Canceled,
        ExecutionStatus::Stopped,
      ]
    );
  }
}
