//! Status aggregation.
//!
//! A parent's status is computed from its children's statuses. The first
//! matching rule wins:
//!
//! 1. any `TERMINAL` → `TERMINAL`
//! 2. any `FAILED` → `FAILED`
//! 3. any `RUNNING` → `RUNNING`
//! 4. any `SUSPENDED` → `SUSPENDED`
//! 5. any `CANCELED` → `CANCELED`
//! 6. all `SUCCEEDED` (or `STOPPED`) → `SUCCEEDED`
//! 7. all `NOT_STARTED` → `NOT_STARTED`
//! 8. otherwise (partial progress) → `RUNNING`
//!
//! No children at all yields `NOT_STARTED`.

use crate::stage::Stage;
use crate::status::ExecutionStatus;

/// Aggregate child statuses into a parent status.
///
/// The caller is responsible for filtering out ineligible children first;
/// see [`aggregate_stages`].
pub fn aggregate<I>(statuses: I) -> ExecutionStatus
where
  I: IntoIterator<Item = ExecutionStatus>,
{
  let statuses: Vec<ExecutionStatus> = statuses.into_iter().collect();
  if statuses.is_empty() {
    return ExecutionStatus::NotStarted;
  }

  let any = |wanted: ExecutionStatus| statuses.contains(&wanted);

  for winner in [
    ExecutionStatus::Terminal,
    ExecutionStatus::Failed,
    ExecutionStatus::Running,
    ExecutionStatus::Suspended,
    ExecutionStatus::Canceled,
  ] {
    if any(winner) {
      return winner;
    }
  }

  if statuses
    .iter()
    .all(|s| matches!(s, ExecutionStatus::Succeeded | ExecutionStatus::Stopped))
  {
    return ExecutionStatus::Succeeded;
  }

  if statuses.iter().all(|s| *s == ExecutionStatus::NotStarted) {
    return ExecutionStatus::NotStarted;
  }

  ExecutionStatus::Running
}

/// Aggregate the statuses of the stages that carry at least one task.
pub fn aggregate_stages<'a, I>(stages: I) -> ExecutionStatus
where
  I: IntoIterator<Item = &'a Stage>,
{
  aggregate(
    stages
      .into_iter()
      .filter(|stage| stage.is_eligible())
      .map(|stage| stage.status),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::task::Task;
  use ExecutionStatus::*;

  fn stage(id: &str, status: ExecutionStatus) -> Stage {
    Stage::new(id, "test", id)
      .with_status(status)
      .with_task(Task::new("1", "task").with_status(status))
  }

  fn empty_stage(id: &str, status: ExecutionStatus) -> Stage {
    Stage::new(id, "test", id).with_status(status)
  }

  #[test]
  fn test_empty_is_not_started() {
    assert_eq!(aggregate(Vec::<ExecutionStatus>::new()), NotStarted);
  }

  #[test]
  fn test_terminal_wins_over_everything() {
    for other in ExecutionStatus::ALL {
      assert_eq!(aggregate([other, Terminal, other]), Terminal, "with {other}");
    }
  }

  #[test]
  fn test_failed_wins_over_everything_but_terminal() {
    for other in ExecutionStatus::ALL
      .into_iter()
      .filter(|s| *s != Terminal)
    {
      assert_eq!(aggregate([other, Failed]), Failed, "with {other}");
    }
  }

  #[test]
  fn test_running_wins_over_suspended() {
    assert_eq!(aggregate([Suspended, Running, Succeeded]), Running);
    assert_eq!(aggregate([Suspended, Succeeded]), Suspended);
  }

  #[test]
  fn test_all_succeeded() {
    assert_eq!(aggregate([Succeeded, Succeeded]), Succeeded);
    assert_eq!(aggregate([Succeeded, Stopped]), Succeeded);
  }

  #[test]
  fn test_all_not_started() {
    assert_eq!(aggregate([NotStarted, NotStarted]), NotStarted);
  }

  #[test]
  fn test_partial_progress_is_running() {
    assert_eq!(aggregate([Succeeded, Succeeded, NotStarted]), Running);
  }

  // Rules 5 and 6 extend the base precedence, which ends in "otherwise
  // RUNNING". Without them a canceled child next to finished ones, or a mix
  // of SUCCEEDED and STOPPED, would both read as RUNNING.
  #[test]
  fn test_canceled_and_stopped_extend_base_precedence() {
    // Rule 5: CANCELED ranks below every in-progress or failed status.
    assert_eq!(aggregate([Succeeded, Canceled]), Canceled);
    assert_eq!(aggregate([NotStarted, Canceled]), Canceled);
    assert_eq!(aggregate([Suspended, Canceled]), Suspended);
    assert_eq!(aggregate([Running, Canceled]), Running);
    assert_eq!(aggregate([Failed, Canceled]), Failed);

    // Rule 6: STOPPED counts as a successful completion.
    assert_eq!(aggregate([Stopped]), Succeeded);
    assert_eq!(aggregate([Stopped, Succeeded, Stopped]), Succeeded);
    assert_eq!(aggregate([Stopped, NotStarted]), Running);
  }

  #[test]
  fn test_stages_partial_progress() {
    let stages = [
      stage("a", Succeeded),
      stage("b", Succeeded),
      stage("c", NotStarted),
    ];
    assert_eq!(aggregate_stages(&stages), Running);
  }

  #[test]
  fn test_stages_terminal() {
    let stages = [
      stage("a", Terminal),
      stage("b", Succeeded),
      stage("c", NotStarted),
    ];
    assert_eq!(aggregate_stages(&stages), Terminal);
  }

  #[test]
  fn test_zero_task_stages_never_influence() {
    let base = vec![stage("a", Succeeded), stage("b", Running)];
    let expected = aggregate_stages(&base);

    for status in ExecutionStatus::ALL {
      let mut with_empty = base.clone();
      with_empty.insert(1, empty_stage("x", status));
      assert_eq!(aggregate_stages(&with_empty), expected, "with empty {status}");
    }
  }

  #[test]
  fn test_only_zero_task_stages_is_not_started() {
    let stages = [empty_stage("a", Terminal), empty_stage("b", Running)];
    assert_eq!(aggregate_stages(&stages), NotStarted);
    assert_eq!(aggregate_stages(&Vec::<Stage>::new()), NotStarted);
  }
}
