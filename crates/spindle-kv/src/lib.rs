//! Spindle KV
//!
//! This crate provides the key-value store abstraction used to persist
//! executions. Three kinds of value live under a key:
//! - hashes (field → string value), holding execution records
//! - unordered sets, holding id membership indexes
//! - scored sets, holding id indexes ordered by a numeric score
//!
//! Two implementations are provided:
//! - [`MemoryKv`] keeps everything in process; suitable for tests and
//!   single-process use.
//! - [`SqliteKv`] persists to SQLite through a connection pool. Each operation
//!   borrows a pooled connection for its own duration only.

mod memory;
mod sqlite;

pub use memory::MemoryKv;
pub use sqlite::SqliteKv;

use std::collections::HashMap;

use async_trait::async_trait;

/// Error type for key-value operations.
#[derive(Debug, thiserror::Error)]
pub enum KvError {
  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// Applying the schema migrations failed.
  #[error("migration error: {0}")]
  Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Key-value store with hash, set, and scored-set values.
///
/// Every method is one round-trip to the backing store. Operations are
/// individually atomic; nothing coordinates separate calls.
#[async_trait]
pub trait KvStore: Send + Sync {
  /// Whether any value exists under `key`.
  async fn exists(&self, key: &str) -> Result<bool, KvError>;

  /// Remove whatever value is stored under `key`. Returns whether anything was removed.
  async fn delete(&self, key: &str) -> Result<bool, KvError>;

  /// Get one field of a hash.
  async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;

  /// Get every field of a hash. Missing keys yield an empty map.
  async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, KvError>;

  /// Get the same field from many hashes at once, in `keys` order.
  async fn hget_many(&self, keys: &[String], field: &str) -> Result<Vec<Option<String>>, KvError>;

  /// Whether a hash has `field`.
  async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError>;

  /// Set fields of a hash, leaving other fields untouched.
  async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;

  /// Replace a hash with exactly `fields`.
  async fn hreplace(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError>;

  /// Remove fields from a hash.
  async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), KvError>;

  /// Add a member to a set.
  async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;

  /// Remove a member from a set. Returns whether it was present.
  async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError>;

  /// All members of a set, in no particular order.
  async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;

  /// Add or re-score a member of a scored set.
  async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError>;

  /// Remove a member from a scored set. Returns whether it was present.
  async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError>;

  /// Members of a scored set, highest score first, up to `limit`.
  async fn zrevrange(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>, KvError>;
}
