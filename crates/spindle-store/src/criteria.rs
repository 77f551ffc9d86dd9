use std::collections::BTreeSet;

use spindle_model::ExecutionStatus;

/// Restrictions for per-pipeline and per-application queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionCriteria {
  /// Acceptable statuses. Empty accepts every status.
  pub statuses: BTreeSet<ExecutionStatus>,
  /// Maximum number of executions to return.
  pub limit: Option<usize>,
}

impl ExecutionCriteria {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn with_statuses<I>(mut self, statuses: I) -> Self
  where
    I: IntoIterator<Item = ExecutionStatus>,
  {
    self.statuses.extend(statuses);
    self
  }

  pub fn has_status_filter(&self) -> bool {
    !self.statuses.is_empty()
  }

  pub fn accepts(&self, status: ExecutionStatus) -> bool {
    self.statuses.is_empty() || self.statuses.contains(&status)
  }
}
