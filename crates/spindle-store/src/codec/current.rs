//! Flattened-field layout.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use spindle_model::{
  Execution, ExecutionKind, ExecutionStatus, ExecutionType, SchemaVersion, Stage,
  SyntheticStageOwner,
};

use crate::error::CodecError;
use crate::keys::{STAGE_INDEX_FIELD, STATUS_FIELD};

const STAGE_ATTRIBUTES: [&str; 13] = [
  "refId",
  "type",
  "name",
  "startTime",
  "endTime",
  "status",
  "initializationStage",
  "syntheticStageOwner",
  "parentStageId",
  "requisiteStageRefIds",
  "scheduledTime",
  "context",
  "tasks",
];

/// Name of the field holding one attribute of one stage.
pub fn stage_field(stage_id: &str, attribute: &str) -> String {
  format!("stage.{}.{}", stage_id, attribute)
}

/// Every field a stage can occupy.
pub fn stage_fields(stage_id: &str) -> Vec<String> {
  STAGE_ATTRIBUTES
    .iter()
    .map(|attribute| stage_field(stage_id, attribute))
    .collect()
}

/// Split a stored `stageIndex` value into stage ids.
pub fn parse_stage_index(value: &str) -> Vec<String> {
  value
    .split(',')
    .filter(|id| !id.is_empty())
    .map(str::to_string)
    .collect()
}

pub fn format_time(time: DateTime<Utc>) -> String {
  time.timestamp_millis().to_string()
}

#[derive(Default)]
struct FieldWriter {
  fields: Vec<(String, String)>,
}

impl FieldWriter {
  fn put(&mut self, name: impl Into<String>, value: impl Into<String>) {
    self.fields.push((name.into(), value.into()));
  }

  fn put_opt(&mut self, name: impl Into<String>, value: Option<&str>) {
    if let Some(value) = value {
      self.put(name, value);
    }
  }

  fn put_bool(&mut self, name: impl Into<String>, value: bool) {
    self.put(name, value.to_string());
  }

  fn put_time(&mut self, name: impl Into<String>, value: Option<DateTime<Utc>>) {
    if let Some(time) = value {
      self.put(name, format_time(time));
    }
  }

  fn put_json<T: Serialize>(&mut self, name: impl Into<String>, value: &T) -> Result<(), CodecError> {
    let name = name.into();
    let json = serde_json::to_string(value).map_err(|source| CodecError::Json {
      field: name.clone(),
      source,
    })?;
    self.put(name, json);
    Ok(())
  }
}

struct FieldReader<'a> {
  fields: &'a HashMap<String, String>,
}

impl<'a> FieldReader<'a> {
  fn new(fields: &'a HashMap<String, String>) -> Self {
    Self { fields }
  }

  fn string(&self, name: &str) -> Option<String> {
    self.fields.get(name).cloned()
  }

  fn required(&self, name: &str) -> Result<String, CodecError> {
    self
      .string(name)
      .ok_or_else(|| CodecError::MissingField(name.to_string()))
  }

  fn bool(&self, name: &str) -> Result<bool, CodecError> {
    match self.fields.get(name).map(String::as_str) {
      None => Ok(false),
      Some("true") => Ok(true),
      Some("false") => Ok(false),
      Some(other) => Err(invalid(name, format!("expected a boolean, got '{}'", other))),
    }
  }

  fn time(&self, name: &str) -> Result<Option<DateTime<Utc>>, CodecError> {
    let Some(raw) = self.fields.get(name) else {
      return Ok(None);
    };
    let millis: i64 = raw
      .parse()
      .map_err(|_| invalid(name, format!("expected epoch milliseconds, got '{}'", raw)))?;
    Utc
      .timestamp_millis_opt(millis)
      .single()
      .map(Some)
      .ok_or_else(|| invalid(name, format!("timestamp out of range: {}", millis)))
  }

  fn status(&self, name: &str) -> Result<ExecutionStatus, CodecError> {
    match self.fields.get(name) {
      None => Ok(ExecutionStatus::NotStarted),
      Some(raw) => raw.parse().map_err(|e| invalid(name, e)),
    }
  }

  fn json<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T, CodecError> {
    match self.fields.get(name) {
      None => Ok(T::default()),
      Some(raw) => serde_json::from_str(raw).map_err(|source| CodecError::Json {
        field: name.to_string(),
        source,
      }),
    }
  }
}

fn invalid(field: &str, message: impl ToString) -> CodecError {
  CodecError::InvalidField {
    field: field.to_string(),
    message: message.to_string(),
  }
}

/// Flatten an execution into hash fields.
pub fn encode(execution: &Execution) -> Result<Vec<(String, String)>, CodecError> {
  let mut writer = FieldWriter::default();

  writer.put("application", execution.application.as_str());
  writer.put(STATUS_FIELD, execution.status.as_str());
  writer.put_bool("canceled", execution.canceled);
  writer.put_opt("canceledBy", execution.canceled_by.as_deref());
  writer.put_opt("cancellationReason", execution.cancellation_reason.as_deref());
  writer.put_bool("parallel", execution.parallel);
  writer.put_bool("limitConcurrent", execution.limit_concurrent);
  writer.put_time("buildTime", execution.build_time);
  writer.put_time("startTime", execution.start_time);
  writer.put_time("endTime", execution.end_time);
  writer.put_opt("executingInstance", execution.executing_instance.as_deref());
  writer.put_json("authentication", &execution.authentication)?;
  writer.put_json("context", &execution.context)?;
  writer.put_json("appConfig", &execution.app_config)?;

  match &execution.kind {
    ExecutionKind::Pipeline(details) => {
      writer.put_opt("name", details.name.as_deref());
      writer.put_opt("pipelineConfigId", details.pipeline_config_id.as_deref());
      writer.put_json("trigger", &details.trigger)?;
      writer.put_json("notifications", &details.notifications)?;
      writer.put_json("initialConfig", &details.initial_config)?;
    }
    ExecutionKind::Orchestration(details) => {
      writer.put_opt("description", details.description.as_deref());
    }
  }

  for stage in &execution.stages {
    writer.fields.extend(encode_stage(stage)?);
  }

  if !execution.stages.is_empty() {
    let index: Vec<&str> = execution.stages.iter().map(|s| s.id.as_str()).collect();
    writer.put(STAGE_INDEX_FIELD, index.join(","));
  }

  Ok(writer.fields)
}

/// Flatten one stage into its `stage.<id>.*` fields.
pub fn encode_stage(stage: &Stage) -> Result<Vec<(String, String)>, CodecError> {
  let id = stage.id.as_str();
  let mut writer = FieldWriter::default();

  writer.put_opt(stage_field(id, "refId"), stage.ref_id.as_deref());
  writer.put(stage_field(id, "type"), stage.stage_type.as_str());
  writer.put(stage_field(id, "name"), stage.name.as_str());
  writer.put_time(stage_field(id, "startTime"), stage.start_time);
  writer.put_time(stage_field(id, "endTime"), stage.end_time);
  writer.put(stage_field(id, "status"), stage.status.as_str());
  writer.put_bool(stage_field(id, "initializationStage"), stage.initialization_stage);
  writer.put_opt(
    stage_field(id, "syntheticStageOwner"),
    stage.synthetic_stage_owner.map(|owner| owner.as_str()),
  );
  writer.put_opt(stage_field(id, "parentStageId"), stage.parent_stage_id.as_deref());
  if !stage.requisite_stage_ref_ids.is_empty() {
    let ids: Vec<&str> = stage
      .requisite_stage_ref_ids
      .iter()
      .map(String::as_str)
      .collect();
    writer.put(stage_field(id, "requisiteStageRefIds"), ids.join(","));
  }
  writer.put_time(stage_field(id, "scheduledTime"), stage.scheduled_time);
  writer.put_json(stage_field(id, "context"), &stage.context)?;
  writer.put_json(stage_field(id, "tasks"), &stage.tasks)?;

  Ok(writer.fields)
}

/// Rebuild an execution from its flattened fields.
pub fn decode(
  execution_type: ExecutionType,
  id: &str,
  fields: &HashMap<String, String>,
) -> Result<Execution, CodecError> {
  let reader = FieldReader::new(fields);
  let application = reader.required("application")?;

  let mut execution = match execution_type {
    ExecutionType::Pipeline => Execution::pipeline(application),
    ExecutionType::Orchestration => Execution::orchestration(application),
  };
  execution.id = id.to_string();
  execution.schema_version = SchemaVersion::Current;
  execution.status = reader.status(STATUS_FIELD)?;
  execution.canceled = reader.bool("canceled")?;
  execution.canceled_by = reader.string("canceledBy");
  execution.cancellation_reason = reader.string("cancellationReason");
  execution.parallel = reader.bool("parallel")?;
  execution.limit_concurrent = reader.bool("limitConcurrent")?;
  execution.build_time = reader.time("buildTime")?;
  execution.start_time = reader.time("startTime")?;
  execution.end_time = reader.time("endTime")?;
  execution.executing_instance = reader.string("executingInstance");
  execution.authentication = reader.json("authentication")?;
  execution.context = reader.json("context")?;
  execution.app_config = reader.json("appConfig")?;

  match &mut execution.kind {
    ExecutionKind::Pipeline(details) => {
      details.name = reader.string("name");
      details.pipeline_config_id = reader.string("pipelineConfigId");
      details.trigger = reader.json("trigger")?;
      details.notifications = reader.json("notifications")?;
      details.initial_config = reader.json("initialConfig")?;
    }
    ExecutionKind::Orchestration(details) => {
      details.description = reader.string("description");
    }
  }

  let stage_ids = reader
    .string(STAGE_INDEX_FIELD)
    .map(|index| parse_stage_index(&index))
    .unwrap_or_default();
  for stage_id in stage_ids {
    let stage = decode_stage(&reader, &stage_id)?;
    execution.stages.push(stage);
  }
  execution.attach_stages();

  Ok(execution)
}

fn decode_stage(reader: &FieldReader<'_>, id: &str) -> Result<Stage, CodecError> {
  let stage_type = reader
    .string(&stage_field(id, "type"))
    .ok_or_else(|| CodecError::MissingStage(id.to_string()))?;

  let owner_field = stage_field(id, "syntheticStageOwner");
  let synthetic_stage_owner = reader
    .string(&owner_field)
    .map(|raw| raw.parse::<SyntheticStageOwner>())
    .transpose()
    .map_err(|e| invalid(&owner_field, e))?;

  let requisite_stage_ref_ids: BTreeSet<String> = reader
    .string(&stage_field(id, "requisiteStageRefIds"))
    .map(|joined| parse_stage_index(&joined).into_iter().collect())
    .unwrap_or_default();

  Ok(Stage {
    id: id.to_string(),
    ref_id: reader.string(&stage_field(id, "refId")),
    stage_type,
    name: reader.string(&stage_field(id, "name")).unwrap_or_default(),
    start_time: reader.time(&stage_field(id, "startTime"))?,
    end_time: reader.time(&stage_field(id, "endTime"))?,
    status: reader.status(&stage_field(id, "status"))?,
    initialization_stage: reader.bool(&stage_field(id, "initializationStage"))?,
    synthetic_stage_owner,
    parent_stage_id: reader.string(&stage_field(id, "parentStageId")),
    requisite_stage_ref_ids,
    scheduled_time: reader.time(&stage_field(id, "scheduledTime"))?,
    context: reader.json(&stage_field(id, "context"))?,
    tasks: reader.json(&stage_field(id, "tasks"))?,
    execution: Default::default(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use spindle_model::Task;

  fn fields_of(execution: &Execution) -> HashMap<String, String> {
    encode(execution).unwrap().into_iter().collect()
  }

  #[test]
  fn test_absent_values_are_omitted() {
    let mut execution = Execution::orchestration("app");
    execution.id = "o1".to_string();
    let fields = fields_of(&execution);

    assert_eq!(fields["application"], "app");
    assert_eq!(fields["status"], "NOT_STARTED");
    for absent in [
      "buildTime",
      "startTime",
      "endTime",
      "executingInstance",
      "description",
      "canceledBy",
      "stageIndex",
    ] {
      assert!(!fields.contains_key(absent), "{absent} should be omitted");
    }
  }

  #[test]
  fn test_stage_fields_are_namespaced() {
    let mut execution = Execution::pipeline("app");
    execution.id = "p1".to_string();
    execution.add_stage(
      Stage::new("a", "deploy", "Deploy")
        .with_requisites(["x", "y"])
        .with_task(Task::new("1", "deploy")),
    );
    execution.add_stage(Stage::new("b", "wait", "Wait"));
    let fields = fields_of(&execution);

    assert_eq!(fields["stageIndex"], "a,b");
    assert_eq!(fields["stage.a.type"], "deploy");
    assert_eq!(fields["stage.a.requisiteStageRefIds"], "x,y");
    assert!(!fields.contains_key("stage.b.requisiteStageRefIds"));
    assert!(fields["stage.a.tasks"].contains("\"deploy\""));
  }

  #[test]
  fn test_stage_order_follows_index() {
    let mut execution = Execution::pipeline("app");
    execution.id = "p1".to_string();
    for id in ["z", "a", "m"] {
      execution.add_stage(Stage::new(id, "wait", id));
    }
    let decoded = decode(ExecutionType::Pipeline, "p1", &fields_of(&execution)).unwrap();
    let order: Vec<_> = decoded.stages.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(order, vec!["z", "a", "m"]);
    assert_eq!(decoded.stages[0].execution.id, "p1");
  }

  #[test]
  fn test_missing_stage_fields_fail() {
    let mut fields = HashMap::new();
    fields.insert("application".to_string(), "app".to_string());
    fields.insert("stageIndex".to_string(), "ghost".to_string());

    let err = decode(ExecutionType::Pipeline, "p1", &fields).unwrap_err();
    assert!(matches!(err, CodecError::MissingStage(id) if id == "ghost"));
  }

  #[test]
  fn test_malformed_values_fail() {
    let mut fields = HashMap::new();
    fields.insert("application".to_string(), "app".to_string());
    fields.insert("canceled".to_string(), "yes".to_string());
    assert!(matches!(
      decode(ExecutionType::Pipeline, "p1", &fields),
      Err(CodecError::InvalidField { .. })
    ));

    fields.insert("canceled".to_string(), "true".to_string());
    fields.insert("context".to_string(), "{not json".to_string());
    assert!(matches!(
      decode(ExecutionType::Pipeline, "p1", &fields),
      Err(CodecError::Json { .. })
    ));

    fields.remove("context");
    fields.insert("status".to_string(), "PAUSED".to_string());
    assert!(matches!(
      decode(ExecutionType::Pipeline, "p1", &fields),
      Err(CodecError::InvalidField { .. })
    ));
  }

  #[test]
  fn test_missing_application_fails() {
    let fields = HashMap::from([("status".to_string(), "RUNNING".to_string())]);
    assert!(matches!(
      decode(ExecutionType::Orchestration, "o1", &fields),
      Err(CodecError::MissingField(field)) if field == "application"
    ));
  }
}
