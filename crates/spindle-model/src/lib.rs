//! Spindle Model
//!
//! This crate contains the in-memory representation of executions for Spindle.
//! An execution is either a `Pipeline` (a run of a reusable pipeline
//! definition) or an `Orchestration` (an ad-hoc run). Each execution owns an
//! ordered list of stages, and each stage owns an ordered list of tasks.
//!
//! Status is modelled in two generations:
//! - Current records carry an authoritative execution `status` field.
//! - Legacy records never trust a stored execution status; it is derived
//!   from the stages with [`aggregate_stages`].

mod aggregate;
mod error;
mod execution;
mod stage;
mod status;
mod task;

pub use aggregate::{aggregate, aggregate_stages};
pub use error::ModelError;
pub use execution::{
  Authentication, Context, Execution, ExecutionKind, ExecutionRef, ExecutionType,
  OrchestrationDetails, PipelineDetails, SchemaVersion,
};
pub use stage::{Stage, SyntheticStageOwner};
pub use status::ExecutionStatus;
pub use task::Task;
