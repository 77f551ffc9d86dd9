//! Single-document layout.
//!
//! Legacy records keep the whole execution in one JSON document. Stages may
//! additionally have side records under `<type>Stage:<stageId>` whose
//! `config` field overrides the copy embedded in the document. Decoding also
//! repairs two known defects in old documents: duplicate stage ids and stages
//! stored out of parent order.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use spindle_model::{Execution, ExecutionType, SchemaVersion, Stage};
use tracing::warn;

use crate::error::CodecError;
use crate::keys::{self, LEGACY_FIELD};

fn json_error(field: &str) -> impl FnOnce(serde_json::Error) -> CodecError + '_ {
  move |source| CodecError::Json {
    field: field.to_string(),
    source,
  }
}

fn parse_object(blob: &str) -> Result<Map<String, Value>, CodecError> {
  match serde_json::from_str(blob).map_err(json_error(LEGACY_FIELD))? {
    Value::Object(map) => Ok(map),
    _ => Err(CodecError::InvalidField {
      field: LEGACY_FIELD.to_string(),
      message: "expected a JSON object".to_string(),
    }),
  }
}

pub fn encode(execution: &Execution) -> Result<String, CodecError> {
  serde_json::to_string(execution).map_err(json_error(LEGACY_FIELD))
}

/// Stage ids named in a document, in stored order and including duplicates.
pub fn stage_ids(blob: &str) -> Result<Vec<String>, CodecError> {
  let document = parse_object(blob)?;
  Ok(
    document
      .get("stages")
      .and_then(Value::as_array)
      .map(|stages| {
        stages
          .iter()
          .filter_map(|stage| stage.get("id").and_then(Value::as_str))
          .map(str::to_string)
          .collect()
      })
      .unwrap_or_default(),
  )
}

/// Apply `update` to the top-level fields of a document and re-serialize it.
pub fn update<F>(blob: &str, update: F) -> Result<String, CodecError>
where
  F: FnOnce(&mut Map<String, Value>),
{
  let mut document = parse_object(blob)?;
  update(&mut document);
  serde_json::to_string(&document).map_err(json_error(LEGACY_FIELD))
}

/// Read the `canceled` flag without decoding the rest of the document.
pub fn is_canceled(blob: &str) -> Result<bool, CodecError> {
  let document = parse_object(blob)?;
  Ok(document.get("canceled").and_then(Value::as_bool).unwrap_or(false))
}

/// Decode a document, applying stage side records from `overlays`
/// (stage id to side record JSON).
pub fn decode(
  execution_type: ExecutionType,
  id: &str,
  blob: &str,
  overlays: &HashMap<String, String>,
) -> Result<Execution, CodecError> {
  let mut document = parse_object(blob)?;
  // The key family is authoritative for the variant.
  document.insert(
    "type".to_string(),
    Value::String(execution_type.as_str().to_string()),
  );

  let mut execution: Execution =
    serde_json::from_value(Value::Object(document)).map_err(json_error(LEGACY_FIELD))?;
  execution.id = id.to_string();
  execution.schema_version = SchemaVersion::Legacy;

  let stages = dedup_stages(id, std::mem::take(&mut execution.stages));
  let stages = apply_overlays(execution_type, stages, overlays)?;
  execution.stages = linearize(stages)?;
  execution.attach_stages();

  Ok(execution)
}

/// Keep the first stage for each id.
fn dedup_stages(execution_id: &str, stages: Vec<Stage>) -> Vec<Stage> {
  let before = stages.len();
  let mut seen = HashSet::new();
  let unique: Vec<Stage> = stages
    .into_iter()
    .filter(|stage| seen.insert(stage.id.clone()))
    .collect();

  if unique.len() < before {
    warn!(
      execution_id = %execution_id,
      duplicates = before - unique.len(),
      "dropped duplicate stage ids from legacy execution"
    );
  }
  unique
}

fn apply_overlays(
  execution_type: ExecutionType,
  stages: Vec<Stage>,
  overlays: &HashMap<String, String>,
) -> Result<Vec<Stage>, CodecError> {
  stages
    .into_iter()
    .map(|stage| match overlays.get(&stage.id) {
      Some(raw) => overlay_stage(execution_type, stage, raw),
      None => Ok(stage),
    })
    .collect()
}

/// Merge the top-level fields of a side record over an embedded stage.
fn overlay_stage(
  execution_type: ExecutionType,
  stage: Stage,
  raw: &str,
) -> Result<Stage, CodecError> {
  let field = keys::legacy_stage(execution_type, &stage.id);
  let overlay: Map<String, Value> = match serde_json::from_str(raw).map_err(json_error(&field))? {
    Value::Object(map) => map,
    _ => {
      return Err(CodecError::InvalidField {
        field,
        message: "expected a JSON object".to_string(),
      });
    }
  };

  let id = stage.id.clone();
  let mut merged = match serde_json::to_value(&stage).map_err(json_error(&field))? {
    Value::Object(map) => map,
    _ => Map::new(),
  };
  merged.extend(overlay);

  let mut stage: Stage =
    serde_json::from_value(Value::Object(merged)).map_err(json_error(&field))?;
  stage.id = id;
  Ok(stage)
}

/// Order stages so every synthetic stage follows its parent.
///
/// Stages are placed in an arena and walked depth first from the roots, each
/// parent emitted before its children. Roots and siblings keep their stored
/// relative order. A stage whose parent is absent is treated as a root. Any
/// stage the walk cannot reach sits on a parent cycle.
fn linearize(stages: Vec<Stage>) -> Result<Vec<Stage>, CodecError> {
  let index_of: HashMap<&str, usize> = stages
    .iter()
    .enumerate()
    .map(|(index, stage)| (stage.id.as_str(), index))
    .collect();

  let mut roots = Vec::new();
  let mut children: Vec<Vec<usize>> = vec![Vec::new(); stages.len()];
  for (index, stage) in stages.iter().enumerate() {
    match stage
      .parent_stage_id
      .as_deref()
      .and_then(|parent| index_of.get(parent))
    {
      Some(&parent) => children[parent].push(index),
      None => roots.push(index),
    }
  }

  let mut order = Vec::with_capacity(stages.len());
  let mut pending: Vec<usize> = roots.into_iter().rev().collect();
  while let Some(index) = pending.pop() {
    order.push(index);
    pending.extend(children[index].iter().rev());
  }

  if order.len() < stages.len() {
    let visited: HashSet<usize> = order.iter().copied().collect();
    let stuck = (0..stages.len())
      .find(|index| !visited.contains(index))
      .map(|index| stages[index].id.clone())
      .unwrap_or_default();
    return Err(CodecError::StageCycle(stuck));
  }

  let mut slots: Vec<Option<Stage>> = stages.into_iter().map(Some).collect();
  Ok(order.into_iter().filter_map(|index| slots[index].take()).collect())
}
