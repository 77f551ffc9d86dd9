use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::{KvError, KvStore};

/// Keys bound per `hget_many` statement. Stays under SQLite's historical
/// limit of 999 bound variables, leaving one for the field.
const HGET_MANY_BATCH: usize = 900;

/// SQLite-based KV store implementation.
///
/// Hashes, sets, and scored sets live in three tables keyed by `(key, field)`
/// or `(key, member)`. Multi-row writes run inside a transaction, which rolls
/// back if dropped before commit.
#[derive(Debug, Clone)]
pub struct SqliteKv {
  pool: SqlitePool,
}

impl SqliteKv {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if needed) the database at `url` and run migrations.
  pub async fn connect(url: &str, max_connections: u32) -> Result<Self, KvError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
      .max_connections(max_connections)
      .connect_with(options)
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    debug!(url, max_connections, "sqlite kv store ready");
    Ok(store)
  }

  /// An in-memory database on a single connection that never expires.
  pub async fn in_memory() -> Result<Self, KvError> {
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .idle_timeout(None)
      .max_lifetime(None)
      .connect("sqlite::memory:")
      .await?;

    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), KvError> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }

  pub fn pool(&self) -> &SqlitePool {
    &self.pool
  }
}

#[async_trait]
impl KvStore for SqliteKv {
  async fn exists(&self, key: &str) -> Result<bool, KvError> {
    let found: i64 = sqlx::query_scalar(
      r#"
            SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ?)
                OR EXISTS(SELECT 1 FROM kv_set WHERE key = ?)
                OR EXISTS(SELECT 1 FROM kv_zset WHERE key = ?)
            "#,
    )
    .bind(key)
    .bind(key)
    .bind(key)
    .fetch_one(&self.pool)
    .await?;

    Ok(found != 0)
  }

  async fn delete(&self, key: &str) -> Result<bool, KvError> {
    let mut tx = self.pool.begin().await?;
    let mut removed = 0;
    for statement in [
      "DELETE FROM kv_hash WHERE key = ?",
      "DELETE FROM kv_set WHERE key = ?",
      "DELETE FROM kv_zset WHERE key = ?",
    ] {
      removed += sqlx::query(statement)
        .bind(key)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    }
    tx.commit().await?;

    Ok(removed > 0)
  }

  async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
    let value = sqlx::query_scalar("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
      .bind(key)
      .bind(field)
      .fetch_optional(&self.pool)
      .await?;

    Ok(value)
  }

  async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
    let rows: Vec<(String, String)> =
      sqlx::query_as("SELECT field, value FROM kv_hash WHERE key = ?")
        .bind(key)
        .fetch_all(&self.pool)
        .await?;

    Ok(rows.into_iter().collect())
  }

  async fn hget_many(&self, keys: &[String], field: &str) -> Result<Vec<Option<String>>, KvError> {
    let mut found: HashMap<String, String> = HashMap::new();
    for batch in keys.chunks(HGET_MANY_BATCH) {
      let mut builder = QueryBuilder::<Sqlite>::new("SELECT key, value FROM kv_hash WHERE field = ");
      builder.push_bind(field);
      builder.push(" AND key IN (");
      let mut separated = builder.separated(", ");
      for key in batch {
        separated.push_bind(key.as_str());
      }
      separated.push_unseparated(")");

      let rows: Vec<(String, String)> = builder.build_query_as().fetch_all(&self.pool).await?;
      found.extend(rows);
    }

    Ok(keys.iter().map(|key| found.get(key).cloned()).collect())
  }

  async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError> {
    let found: i64 =
      sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM kv_hash WHERE key = ? AND field = ?)")
        .bind(key)
        .bind(field)
        .fetch_one(&self.pool)
        .await?;

    Ok(found != 0)
  }

  async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await?;
    for (field, value) in fields {
      sqlx::query(
        r#"
            INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)
            ON CONFLICT (key, field) DO UPDATE SET value = excluded.value
            "#,
      )
      .bind(key)
      .bind(field)
      .bind(value)
      .execute(&mut *tx)
      .await?;
    }
    tx.commit().await?;

    Ok(())
  }

  async fn hreplace(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await?;
    sqlx::query("DELETE FROM kv_hash WHERE key = ?")
      .bind(key)
      .execute(&mut *tx)
      .await?;
    for (field, value) in fields {
      sqlx::query("INSERT INTO kv_hash (key, field, value) VALUES (?, ?, ?)")
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
  }

  async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), KvError> {
    let mut tx = self.pool.begin().await?;
    for field in fields {
      sqlx::query("DELETE FROM kv_hash WHERE key = ? AND field = ?")
        .bind(key)
        .bind(field)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(())
  }

  async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
    sqlx::query("INSERT OR IGNORE INTO kv_set (key, member) VALUES (?, ?)")
      .bind(key)
      .bind(member)
      .execute(&self.pool)
      .await?;

    Ok(())
  }

  async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
    let result = sqlx::query("DELETE FROM kv_set WHERE key = ? AND member = ?")
      .bind(key)
      .bind(member)
      .execute(&self.pool)
      .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
    let members = sqlx::query_scalar("SELECT member FROM kv_set WHERE key = ?")
      .bind(key)
      .fetch_all(&self.pool)
      .await?;

    Ok(members)
  }

  async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
    sqlx::query(
      r#"
            INSERT INTO kv_zset (key, member, score) VALUES (?, ?, ?)
            ON CONFLICT (key, member) DO UPDATE SET score = excluded.score
            "#,
    )
    .bind(key)
    .bind(member)
    .bind(score)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
    let result = sqlx::query("DELETE FROM kv_zset WHERE key = ? AND member = ?")
      .bind(key)
      .bind(member)
      .execute(&self.pool)
      .await?;

    Ok(result.rows_affected() > 0)
  }

  async fn zrevrange(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>, KvError> {
    // SQLite treats a negative LIMIT as unbounded.
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    let members = sqlx::query_scalar(
      r#"
            SELECT member FROM kv_zset
            WHERE key = ?
            ORDER BY score DESC, member DESC
            LIMIT ?
            "#,
    )
    .bind(key)
    .bind(limit)
    .fetch_all(&self.pool)
    .await?;

    Ok(members)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
      .iter()
      .map(|(k, v)| (k.to_string(), v.to_string()))
      .collect()
  }

  #[tokio::test]
  async fn test_hash_operations() {
    let kv = SqliteKv::in_memory().await.unwrap();

    assert!(!kv.exists("h").await.unwrap());
    kv.hset("h", &fields(&[("a", "1"), ("b", "2")])).await.unwrap();
    kv.hset("h", &fields(&[("a", "10")])).await.unwrap();

    assert!(kv.exists("h").await.unwrap());
    assert!(kv.hexists("h", "b").await.unwrap());
    assert!(!kv.hexists("h", "c").await.unwrap());
    assert_eq!(kv.hget("h", "a").await.unwrap(), Some("10".to_string()));

    kv.hreplace("h", &fields(&[("c", "3")])).await.unwrap();
    let all = kv.hget_all("h").await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all["c"], "3");

    kv.hdel("h", &["c".to_string()]).await.unwrap();
    assert!(!kv.exists("h").await.unwrap());
  }

  #[tokio::test]
  async fn test_hget_many_preserves_key_order() {
    let kv = SqliteKv::in_memory().await.unwrap();
    kv.hset("x", &fields(&[("status", "RUNNING")])).await.unwrap();
    kv.hset("z", &fields(&[("status", "FAILED"), ("other", "1")])).await.unwrap();

    let keys = vec!["z".to_string(), "missing".to_string(), "x".to_string()];
    let values = kv.hget_many(&keys, "status").await.unwrap();
    assert_eq!(
      values,
      vec![Some("FAILED".to_string()), None, Some("RUNNING".to_string())]
    );
    assert!(kv.hget_many(&[], "status").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_hget_many_beyond_bound_variable_limit() {
    let kv = SqliteKv::in_memory().await.unwrap();
    let keys: Vec<String> = (0..40_000).map(|i| format!("pipeline:{:05}", i)).collect();
    for key in keys.iter().step_by(1_000) {
      kv.hset(key, &fields(&[("status", "SUCCEEDED")])).await.unwrap();
    }
    kv.hset(&keys[39_999], &fields(&[("status", "TERMINAL")])).await.unwrap();

    let values = kv.hget_many(&keys, "status").await.unwrap();
    assert_eq!(values.len(), keys.len());
    assert_eq!(values[0].as_deref(), Some("SUCCEEDED"));
    assert_eq!(values[1], None);
    assert_eq!(values[31_000].as_deref(), Some("SUCCEEDED"));
    assert_eq!(values[39_999].as_deref(), Some("TERMINAL"));
    assert_eq!(values.iter().filter(|v| v.is_some()).count(), 41);
  }

  #[tokio::test]
  async fn test_sets_and_scored_sets() {
    let kv = SqliteKv::in_memory().await.unwrap();

    kv.sadd("s", "a").await.unwrap();
    kv.sadd("s", "a").await.unwrap();
    kv.sadd("s", "b").await.unwrap();
    let mut members = kv.smembers("s").await.unwrap();
    members.sort();
    assert_eq!(members, vec!["a", "b"]);
    assert!(kv.srem("s", "a").await.unwrap());
    assert!(!kv.srem("s", "a").await.unwrap());

    kv.zadd("z", "old", 1.0).await.unwrap();
    kv.zadd("z", "new", 3.0).await.unwrap();
    kv.zadd("z", "mid", 2.0).await.unwrap();
    assert_eq!(kv.zrevrange("z", None).await.unwrap(), vec!["new", "mid", "old"]);
    assert_eq!(kv.zrevrange("z", Some(1)).await.unwrap(), vec!["new"]);
    assert!(kv.zrem("z", "new").await.unwrap());
    assert_eq!(kv.zrevrange("z", None).await.unwrap(), vec!["mid", "old"]);
  }

  #[tokio::test]
  async fn test_delete_spans_value_kinds() {
    let kv = SqliteKv::in_memory().await.unwrap();
    kv.hset("k", &fields(&[("a", "1")])).await.unwrap();
    kv.sadd("k", "m").await.unwrap();

    assert!(kv.delete("k").await.unwrap());
    assert!(!kv.exists("k").await.unwrap());
    assert!(!kv.delete("k").await.unwrap());
  }

  #[tokio::test]
  async fn test_connect_persists_to_file() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("kv.db").display());

    {
      let kv = SqliteKv::connect(&url, 4).await.unwrap();
      kv.sadd("s", "member").await.unwrap();
      kv.pool().close().await;
    }

    let kv = SqliteKv::connect(&url, 4).await.unwrap();
    assert_eq!(kv.smembers("s").await.unwrap(), vec!["member"]);
  }
}
