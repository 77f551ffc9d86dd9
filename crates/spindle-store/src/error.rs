//! Error types for the execution repository.

use spindle_kv::KvError;
use spindle_model::ExecutionType;
use thiserror::Error;

/// A stored record could not be turned into an execution, or back.
#[derive(Debug, Error)]
pub enum CodecError {
  /// A field holding JSON could not be parsed or produced.
  #[error("invalid JSON in field '{field}': {source}")]
  Json {
    field: String,
    #[source]
    source: serde_json::Error,
  },

  /// A scalar field holds a value of the wrong shape.
  #[error("invalid value for field '{field}': {message}")]
  InvalidField { field: String, message: String },

  /// A required field is absent.
  #[error("missing required field '{0}'")]
  MissingField(String),

  /// The stage index lists a stage with no stored fields.
  #[error("stage '{0}' is listed in the stage index but has no fields")]
  MissingStage(String),

  /// Following `parentStageId` links from this stage never reaches a root.
  #[error("stage '{0}' is part of a parent stage cycle")]
  StageCycle(String),
}

/// Errors surfaced by [`ExecutionRepository`](crate::ExecutionRepository).
#[derive(Debug, Error)]
pub enum RepositoryError {
  /// No record exists for the requested id.
  #[error("execution not found: {id}")]
  ExecutionNotFound {
    /// `None` when every execution type was searched.
    execution_type: Option<ExecutionType>,
    id: String,
  },

  /// A stored record is malformed.
  #[error("serialization error: {0}")]
  Serialization(#[from] CodecError),

  /// The key-value store failed.
  #[error("store error: {0}")]
  Kv(#[from] KvError),

  /// The operation only applies to records in the current schema.
  #[error("{operation} is not supported for legacy execution {id}")]
  UnsupportedSchema { operation: &'static str, id: String },

  /// Repository configuration is unusable.
  #[error("invalid repository config: {0}")]
  InvalidConfig(String),
}

impl RepositoryError {
  pub(crate) fn not_found(execution_type: ExecutionType, id: &str) -> Self {
    RepositoryError::ExecutionNotFound {
      execution_type: Some(execution_type),
      id: id.to_string(),
    }
  }

  pub fn is_not_found(&self) -> bool {
    matches!(self, RepositoryError::ExecutionNotFound { .. })
  }
}
