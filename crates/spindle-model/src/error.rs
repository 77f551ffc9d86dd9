use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
  #[error("unknown execution status: {0}")]
  UnknownStatus(String),

  #[error("unknown execution type: {0}")]
  UnknownExecutionType(String),

  #[error("unknown synthetic stage owner: {0}")]
  UnknownSyntheticStageOwner(String),
}
