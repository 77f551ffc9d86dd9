use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RepositoryError;

/// Sizing for the repository's query workers.
///
/// Two pools exist and never share capacity: a small one for scans over every
/// execution of a type, and a larger one for per-application and
/// per-pipeline queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
  /// Ids fetched per batch while streaming.
  pub chunk_size: usize,
  /// Workers serving `retrieve_all`.
  pub all_pool_size: usize,
  /// Workers serving per-application and per-pipeline queries.
  pub application_pool_size: usize,
}

impl Default for RepositoryConfig {
  fn default() -> Self {
    Self {
      chunk_size: 75,
      all_pool_size: 10,
      application_pool_size: 150,
    }
  }
}

impl RepositoryConfig {
  /// Load a config from a JSON file. Missing fields take their defaults.
  pub fn from_file(path: &Path) -> Result<Self, RepositoryError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
      RepositoryError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
    })?;
    Self::from_json(&content)
  }

  pub fn from_json(content: &str) -> Result<Self, RepositoryError> {
    let config: Self = serde_json::from_str(content)
      .map_err(|e| RepositoryError::InvalidConfig(format!("failed to parse config: {}", e)))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), RepositoryError> {
    for (name, value) in [
      ("chunk_size", self.chunk_size),
      ("all_pool_size", self.all_pool_size),
      ("application_pool_size", self.application_pool_size),
    ] {
      if value == 0 {
        return Err(RepositoryError::InvalidConfig(format!(
          "{} must be greater than zero",
          name
        )));
      }
    }
    Ok(())
  }
}
