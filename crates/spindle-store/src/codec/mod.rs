//! Record codec.
//!
//! Executions are stored as a hash under their key in one of two layouts:
//!
//! - **Current**: one field per scalar, a family of `stage.<id>.<attr>`
//!   fields per stage, and a `stageIndex` field listing stage ids in order.
//! - **Legacy**: a single `config` field holding the whole execution as JSON.
//!
//! The presence of the `config` field is the only thing that decides which
//! layout a key uses. [`StoredRecord`] captures that decision once per read so
//! callers branch on the tag rather than on what a decoded object looks like.

pub mod current;
pub mod legacy;

use std::collections::HashMap;

use spindle_model::{Execution, ExecutionType, SchemaVersion};

use crate::error::CodecError;
use crate::keys::LEGACY_FIELD;

/// The raw contents of an execution key, tagged by layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredRecord {
  Legacy(String),
  Current(HashMap<String, String>),
}

impl StoredRecord {
  /// Tag the fields read from a key. `None` when the key holds nothing.
  pub fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
    if fields.is_empty() {
      return None;
    }
    Some(match fields.remove(LEGACY_FIELD) {
      Some(blob) => StoredRecord::Legacy(blob),
      None => StoredRecord::Current(fields),
    })
  }

  pub fn schema(&self) -> SchemaVersion {
    match self {
      StoredRecord::Legacy(_) => SchemaVersion::Legacy,
      StoredRecord::Current(_) => SchemaVersion::Current,
    }
  }
}

/// Encode an execution in the layout named by its `schema_version`.
pub fn encode(execution: &Execution) -> Result<Vec<(String, String)>, CodecError> {
  match execution.schema_version {
    SchemaVersion::Current => current::encode(execution),
    SchemaVersion::Legacy => Ok(vec![(LEGACY_FIELD.to_string(), legacy::encode(execution)?)]),
  }
}

/// Decode a tagged record without any legacy stage side records.
pub fn decode(
  execution_type: ExecutionType,
  id: &str,
  record: &StoredRecord,
) -> Result<Execution, CodecError> {
  match record {
    StoredRecord::Current(fields) => current::decode(execution_type, id, fields),
    StoredRecord::Legacy(blob) => legacy::decode(execution_type, id, blob, &HashMap::new()),
  }
}
