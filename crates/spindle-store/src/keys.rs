//! Key layout.
//!
//! ```text
//! pipeline:<id>                        execution record (hash)
//! orchestration:<id>                   execution record (hash)
//! allJobs:<type>                       every id of a type (set)
//! <type>:app:<application>             ids of a type for one application (set)
//! pipeline:executions:<configId>       pipeline runs scored by build time (scored set)
//! <type>Stage:<stageId>                legacy per-stage side record (hash)
//! ```

use spindle_model::ExecutionType;

/// Hash field holding the whole legacy document. Its presence marks a legacy record.
pub const LEGACY_FIELD: &str = "config";

/// Hash field listing stage ids in order.
pub const STAGE_INDEX_FIELD: &str = "stageIndex";

pub const STATUS_FIELD: &str = "status";

pub fn execution(execution_type: ExecutionType, id: &str) -> String {
  format!("{}:{}", execution_type, id)
}

pub fn all_ids(execution_type: ExecutionType) -> String {
  format!("allJobs:{}", execution_type)
}

pub fn application(execution_type: ExecutionType, application: &str) -> String {
  format!("{}:app:{}", execution_type, application)
}

pub fn pipeline_config(pipeline_config_id: &str) -> String {
  format!("pipeline:executions:{}", pipeline_config_id)
}

pub fn legacy_stage(execution_type: ExecutionType, stage_id: &str) -> String {
  format!("{}Stage:{}", execution_type, stage_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_key_layout() {
    assert_eq!(execution(ExecutionType::Pipeline, "1"), "pipeline:1");
    assert_eq!(all_ids(ExecutionType::Orchestration), "allJobs:orchestration");
    assert_eq!(application(ExecutionType::Pipeline, "app"), "pipeline:app:app");
    assert_eq!(pipeline_config("cfg"), "pipeline:executions:cfg");
    assert_eq!(legacy_stage(ExecutionType::Pipeline, "s1"), "pipelineStage:s1");
  }
}
