//! Spindle Store
//!
//! Persistence and querying for pipeline and orchestration executions on top
//! of any [`KvStore`](spindle_kv::KvStore).
//!
//! - [`ExecutionRepository`] stores, mutates, and retrieves executions and
//!   keeps their membership indexes current.
//! - Records live in one of two layouts (see [`codec`]). A key's layout is
//!   fixed once written: new executions use the current layout, and existing
//!   legacy records are always rewritten as legacy.
//! - Multi-execution queries return an [`ExecutionStream`] fed by a bounded
//!   pool of fetch workers. Ids whose record has vanished are pruned from the
//!   index they came from.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use spindle_kv::MemoryKv;
//! use spindle_model::Execution;
//! use spindle_store::{ExecutionCriteria, ExecutionRepository};
//!
//! let repository = ExecutionRepository::with_defaults(Arc::new(MemoryKv::new()));
//!
//! let mut execution = Execution::pipeline("checkout");
//! repository.store(&mut execution).await?;
//!
//! let mut runs = repository
//!   .retrieve_for_pipeline_config("deploy-prod", &ExecutionCriteria::new().with_limit(5))
//!   .await?;
//! while let Some(run) = runs.next().await {
//!   println!("{} {}", run.id, run.visible_status());
//! }
//! ```

pub mod codec;
mod config;
mod criteria;
mod error;
pub mod keys;
mod repository;
mod stream;

pub use config::RepositoryConfig;
pub use criteria::ExecutionCriteria;
pub use error::{CodecError, RepositoryError};
pub use repository::ExecutionRepository;
pub use stream::ExecutionStream;
