use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{KvError, KvStore};

#[derive(Debug, Default)]
struct Data {
  hashes: HashMap<String, HashMap<String, String>>,
  sets: HashMap<String, BTreeSet<String>>,
  scored: HashMap<String, HashMap<String, f64>>,
}

/// In-memory KV store implementation.
///
/// Suitable for tests and single-process use. Nothing is persisted.
#[derive(Debug, Default)]
pub struct MemoryKv {
  data: RwLock<Data>,
}

impl MemoryKv {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl KvStore for MemoryKv {
  async fn exists(&self, key: &str) -> Result<bool, KvError> {
    let data = self.data.read().await;
    Ok(data.hashes.contains_key(key) || data.sets.contains_key(key) || data.scored.contains_key(key))
  }

  async fn delete(&self, key: &str) -> Result<bool, KvError> {
    let mut data = self.data.write().await;
    let hash = data.hashes.remove(key).is_some();
    let set = data.sets.remove(key).is_some();
    let scored = data.scored.remove(key).is_some();
    Ok(hash || set || scored)
  }

  async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
    let data = self.data.read().await;
    Ok(data.hashes.get(key).and_then(|hash| hash.get(field)).cloned())
  }

  async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
    let data = self.data.read().await;
    Ok(data.hashes.get(key).cloned().unwrap_or_default())
  }

  async fn hget_many(&self, keys: &[String], field: &str) -> Result<Vec<Option<String>>, KvError> {
    let data = self.data.read().await;
    Ok(
      keys
        .iter()
        .map(|key| data.hashes.get(key).and_then(|hash| hash.get(field)).cloned())
        .collect(),
    )
  }

  async fn hexists(&self, key: &str, field: &str) -> Result<bool, KvError> {
    let data = self.data.read().await;
    Ok(data.hashes.get(key).is_some_and(|hash| hash.contains_key(field)))
  }

  async fn hset(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
    if fields.is_empty() {
      return Ok(());
    }
    let mut data = self.data.write().await;
    let hash = data.hashes.entry(key.to_string()).or_default();
    for (field, value) in fields {
      hash.insert(field.clone(), value.clone());
    }
    Ok(())
  }

  async fn hreplace(&self, key: &str, fields: &[(String, String)]) -> Result<(), KvError> {
    let mut data = self.data.write().await;
    if fields.is_empty() {
      data.hashes.remove(key);
    } else {
      data
        .hashes
        .insert(key.to_string(), fields.iter().cloned().collect());
    }
    Ok(())
  }

  async fn hdel(&self, key: &str, fields: &[String]) -> Result<(), KvError> {
    let mut data = self.data.write().await;
    let now_empty = match data.hashes.get_mut(key) {
      Some(hash) => {
        for field in fields {
          hash.remove(field);
        }
        hash.is_empty()
      }
      None => false,
    };
    if now_empty {
      data.hashes.remove(key);
    }
    Ok(())
  }

  async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
    let mut data = self.data.write().await;
    data
      .sets
      .entry(key.to_string())
      .or_default()
      .insert(member.to_string());
    Ok(())
  }

  async fn srem(&self, key: &str, member: &str) -> Result<bool, KvError> {
    let mut data = self.data.write().await;
    let Some(set) = data.sets.get_mut(key) else {
      return Ok(false);
    };
    let removed = set.remove(member);
    if set.is_empty() {
      data.sets.remove(key);
    }
    Ok(removed)
  }

  async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
    let data = self.data.read().await;
    Ok(
      data
        .sets
        .get(key)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default(),
    )
  }

  async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), KvError> {
    let mut data = self.data.write().await;
    data
      .scored
      .entry(key.to_string())
      .or_default()
      .insert(member.to_string(), score);
    Ok(())
  }

  async fn zrem(&self, key: &str, member: &str) -> Result<bool, KvError> {
    let mut data = self.data.write().await;
    let Some(scored) = data.scored.get_mut(key) else {
      return Ok(false);
    };
    let removed = scored.remove(member).is_some();
    if scored.is_empty() {
      data.scored.remove(key);
    }
    Ok(removed)
  }

  async fn zrevrange(&self, key: &str, limit: Option<usize>) -> Result<Vec<String>, KvError> {
    let data = self.data.read().await;
    let Some(scored) = data.scored.get(key) else {
      return Ok(Vec::new());
    };

    let mut members: Vec<(&String, f64)> = scored.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| {
      b.1
        .partial_cmp(&a.1)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.0.cmp(a.0))
    });

    Ok(
      members
        .into_iter()
        .take(limit.unwrap_or(usize::MAX))
        .map(|(member, _)| member.clone())
        .collect(),
    )
  }
}
