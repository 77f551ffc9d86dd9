use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use spindle_kv::KvStore;
use spindle_model::{
  Context, Execution, ExecutionStatus, ExecutionType, SchemaVersion, Stage,
};
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, StoredRecord, current, legacy};
use crate::config::RepositoryConfig;
use crate::criteria::ExecutionCriteria;
use crate::error::{CodecError, RepositoryError};
use crate::keys::{self, LEGACY_FIELD, STAGE_INDEX_FIELD, STATUS_FIELD};
use crate::stream::{ExecutionStream, IndexSource, StreamRequest, WorkerPool};

/// Persists executions and answers queries over them.
///
/// Cloning is cheap; clones share the store and both worker pools.
#[derive(Clone)]
pub struct ExecutionRepository {
  kv: Arc<dyn KvStore>,
  config: RepositoryConfig,
  all_pool: WorkerPool,
  application_pool: WorkerPool,
}

impl std::fmt::Debug for ExecutionRepository {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ExecutionRepository")
      .field("config", &self.config)
      .finish_non_exhaustive()
  }
}

/// Current time truncated to the millisecond precision records store.
fn now() -> DateTime<Utc> {
  let now = Utc::now();
  DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Newest first; ids are time-ordered.
fn sort_newest_first(ids: &mut [String]) {
  ids.sort_unstable_by(|a, b| b.cmp(a));
}

impl ExecutionRepository {
  pub fn new(kv: Arc<dyn KvStore>, config: RepositoryConfig) -> Result<Self, RepositoryError> {
    config.validate()?;
    Ok(Self {
      all_pool: WorkerPool::new("all", config.all_pool_size),
      application_pool: WorkerPool::new("application", config.application_pool_size),
      kv,
      config,
    })
  }

  pub fn with_defaults(kv: Arc<dyn KvStore>) -> Self {
    let config = RepositoryConfig::default();
    Self {
      all_pool: WorkerPool::new("all", config.all_pool_size),
      application_pool: WorkerPool::new("application", config.application_pool_size),
      kv,
      config,
    }
  }

  pub fn config(&self) -> &RepositoryConfig {
    &self.config
  }

  pub(crate) fn kv(&self) -> &dyn KvStore {
    self.kv.as_ref()
  }

  /// Which layout a key holds, if any.
  async fn schema_at(&self, key: &str) -> Result<Option<SchemaVersion>, RepositoryError> {
    if self.kv.hexists(key, LEGACY_FIELD).await? {
      return Ok(Some(SchemaVersion::Legacy));
    }
    if self.kv.exists(key).await? {
      return Ok(Some(SchemaVersion::Current));
    }
    Ok(None)
  }

  async fn require_schema(
    &self,
    execution_type: ExecutionType,
    id: &str,
  ) -> Result<(String, SchemaVersion), RepositoryError> {
    let key = keys::execution(execution_type, id);
    match self.schema_at(&key).await? {
      Some(schema) => Ok((key, schema)),
      None => Err(RepositoryError::not_found(execution_type, id)),
    }
  }

  async fn legacy_blob(
    &self,
    key: &str,
    execution_type: ExecutionType,
    id: &str,
  ) -> Result<String, RepositoryError> {
    self
      .kv
      .hget(key, LEGACY_FIELD)
      .await?
      .ok_or_else(|| RepositoryError::not_found(execution_type, id))
  }

  /// The layout an existing execution is stored in.
  pub async fn retrieve_schema(
    &self,
    execution_type: ExecutionType,
    id: &str,
  ) -> Result<SchemaVersion, RepositoryError> {
    self
      .require_schema(execution_type, id)
      .await
      .map(|(_, schema)| schema)
  }

  /// Write an execution and register it in every index it belongs to.
  ///
  /// Assigns an id and a build time when absent. New keys are written in the
  /// current layout; a key already holding a legacy record stays legacy.
  /// `execution.schema_version` is updated to the layout used.
  #[instrument(
    name = "repository_store",
    skip(self, execution),
    fields(
      execution_type = %execution.execution_type(),
      application = %execution.application,
    )
  )]
  pub async fn store(&self, execution: &mut Execution) -> Result<(), RepositoryError> {
    execution.ensure_id();
    if execution.build_time.is_none() {
      execution.build_time = Some(now());
    }

    let execution_type = execution.execution_type();
    let key = keys::execution(execution_type, &execution.id);
    execution.schema_version = match self.schema_at(&key).await? {
      Some(SchemaVersion::Legacy) => SchemaVersion::Legacy,
      _ => SchemaVersion::Current,
    };

    let fields = codec::encode(execution)?;
    self.kv.hreplace(&key, &fields).await?;

    if execution.schema_version == SchemaVersion::Legacy {
      // The document now carries every stage; stale side records would override it.
      for stage in &execution.stages {
        self
          .kv
          .delete(&keys::legacy_stage(execution_type, &stage.id))
          .await?;
      }
    }

    let id = execution.id.as_str();
    self.kv.sadd(&keys::all_ids(execution_type), id).await?;
    self
      .kv
      .sadd(&keys::application(execution_type, &execution.application), id)
      .await?;
    if let Some(pipeline_config_id) = execution.pipeline_config_id() {
      let score = execution
        .build_time
        .map(|time| time.timestamp_millis())
        .unwrap_or_default() as f64;
      self
        .kv
        .zadd(&keys::pipeline_config(pipeline_config_id), id, score)
        .await?;
    }

    info!(
      execution_id = %id,
      schema = execution.schema_version.number(),
      stages = execution.stages.len(),
      "execution_stored"
    );
    Ok(())
  }

  /// Merge `context` into the stored execution context of whichever
  /// execution has this id.
  #[instrument(name = "repository_store_context", skip(self, context))]
  pub async fn store_execution_context(
    &self,
    id: &str,
    context: &Context,
  ) -> Result<(), RepositoryError> {
    for execution_type in [ExecutionType::Pipeline, ExecutionType::Orchestration] {
      let key = keys::execution(execution_type, id);
      match self.schema_at(&key).await? {
        Some(SchemaVersion::Current) => {
          let mut merged: Context = match self.kv.hget(&key, "context").await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|source| codec_json("context", source))?,
            None => Context::new(),
          };
          merged.extend(context.clone());
          let raw = serde_json::to_string(&merged).map_err(|source| codec_json("context", source))?;
          self.kv.hset(&key, &[("context".to_string(), raw)]).await?;
        }
        Some(SchemaVersion::Legacy) => {
          let blob = self.legacy_blob(&key, execution_type, id).await?;
          let updated = legacy::update(&blob, |document| {
            let entry = document
              .entry("context")
              .or_insert_with(|| Value::Object(Context::new()));
            match entry {
              Value::Object(existing) => existing.extend(context.clone()),
              other => *other = Value::Object(context.clone()),
            }
          })?;
          self.kv.hset(&key, &[(LEGACY_FIELD.to_string(), updated)]).await?;
        }
        None => continue,
      }

      debug!(execution_id = %id, execution_type = %execution_type, "execution_context_stored");
      return Ok(());
    }

    Err(RepositoryError::ExecutionNotFound {
      execution_type: None,
      id: id.to_string(),
    })
  }

  /// Write one stage's fields into its execution's record.
  ///
  /// The stage is located through `stage.execution`. Only current-layout
  /// records support per-stage writes.
  #[instrument(
    name = "repository_store_stage",
    skip(self, stage),
    fields(execution_id = %stage.execution.id, stage_id = %stage.id)
  )]
  pub async fn store_stage(&self, stage: &Stage) -> Result<(), RepositoryError> {
    let owner = &stage.execution;
    let (key, schema) = self.require_schema(owner.execution_type, &owner.id).await?;
    if schema == SchemaVersion::Legacy {
      return Err(RepositoryError::UnsupportedSchema {
        operation: "store_stage",
        id: owner.id.clone(),
      });
    }

    let mut fields = current::encode_stage(stage)?;

    // Attributes that became absent must not keep their old values.
    let cleared: Vec<String> = current::stage_fields(&stage.id)
      .into_iter()
      .filter(|name| !fields.iter().any(|(field, _)| field == name))
      .collect();
    if !cleared.is_empty() {
      self.kv.hdel(&key, &cleared).await?;
    }

    let mut index = self
      .kv
      .hget(&key, STAGE_INDEX_FIELD)
      .await?
      .map(|raw| current::parse_stage_index(&raw))
      .unwrap_or_default();
    if !index.contains(&stage.id) {
      index.push(stage.id.clone());
      fields.push((STAGE_INDEX_FIELD.to_string(), index.join(",")));
    }

    self.kv.hset(&key, &fields).await?;
    debug!(status = %stage.status, "stage_stored");
    Ok(())
  }

  /// Remove a stage's fields and its `stageIndex` entry.
  #[instrument(name = "repository_remove_stage", skip(self))]
  pub async fn remove_stage(
    &self,
    execution_type: ExecutionType,
    execution_id: &str,
    stage_id: &str,
  ) -> Result<(), RepositoryError> {
    let (key, schema) = self.require_schema(execution_type, execution_id).await?;
    if schema == SchemaVersion::Legacy {
      return Err(RepositoryError::UnsupportedSchema {
        operation: "remove_stage",
        id: execution_id.to_string(),
      });
    }

    self.kv.hdel(&key, &current::stage_fields(stage_id)).await?;

    let index: Vec<String> = self
      .kv
      .hget(&key, STAGE_INDEX_FIELD)
      .await?
      .map(|raw| current::parse_stage_index(&raw))
      .unwrap_or_default()
      .into_iter()
      .filter(|id| id != stage_id)
      .collect();
    if index.is_empty() {
      self.kv.hdel(&key, &[STAGE_INDEX_FIELD.to_string()]).await?;
    } else {
      self
        .kv
        .hset(&key, &[(STAGE_INDEX_FIELD.to_string(), index.join(","))])
        .await?;
    }

    debug!("stage_removed");
    Ok(())
  }

  pub async fn cancel(&self, execution_type: ExecutionType, id: &str) -> Result<(), RepositoryError> {
    self.cancel_with_reason(execution_type, id, None, None).await
  }

  /// Flag an execution as canceled, recording who asked and why.
  ///
  /// Current records move from `NOT_STARTED` to `CANCELED`; any other status
  /// is left for the running stage to resolve. Legacy records only get the
  /// flag since their status is derived.
  #[instrument(name = "repository_cancel", skip(self))]
  pub async fn cancel_with_reason(
    &self,
    execution_type: ExecutionType,
    id: &str,
    canceled_by: Option<&str>,
    reason: Option<&str>,
  ) -> Result<(), RepositoryError> {
    let (key, schema) = self.require_schema(execution_type, id).await?;

    match schema {
      SchemaVersion::Current => {
        let mut fields = vec![("canceled".to_string(), "true".to_string())];
        if let Some(user) = canceled_by {
          fields.push(("canceledBy".to_string(), user.to_string()));
        }
        if let Some(reason) = reason {
          fields.push(("cancellationReason".to_string(), reason.to_string()));
        }

        let status = match self.kv.hget(&key, STATUS_FIELD).await? {
          Some(raw) => raw
            .parse::<ExecutionStatus>()
            .map_err(|e| codec_invalid(STATUS_FIELD, e))?,
          None => ExecutionStatus::NotStarted,
        };
        if status == ExecutionStatus::NotStarted {
          fields.push((
            STATUS_FIELD.to_string(),
            ExecutionStatus::Canceled.as_str().to_string(),
          ));
        }
        self.kv.hset(&key, &fields).await?;
      }
      SchemaVersion::Legacy => {
        let blob = self.legacy_blob(&key, execution_type, id).await?;
        let updated = legacy::update(&blob, |document| {
          document.insert("canceled".to_string(), Value::Bool(true));
          if let Some(user) = canceled_by {
            document.insert("canceledBy".to_string(), Value::String(user.to_string()));
          }
          if let Some(reason) = reason {
            document.insert(
              "cancellationReason".to_string(),
              Value::String(reason.to_string()),
            );
          }
        })?;
        self.kv.hset(&key, &[(LEGACY_FIELD.to_string(), updated)]).await?;
      }
    }

    info!(schema = schema.number(), "execution_canceled");
    Ok(())
  }

  pub async fn is_canceled(&self, execution_type: ExecutionType, id: &str) -> Result<bool, RepositoryError> {
    let (key, schema) = self.require_schema(execution_type, id).await?;
    match schema {
      SchemaVersion::Current => Ok(self.kv.hget(&key, "canceled").await?.as_deref() == Some("true")),
      SchemaVersion::Legacy => {
        let blob = self.legacy_blob(&key, execution_type, id).await?;
        Ok(legacy::is_canceled(&blob)?)
      }
    }
  }

  /// Set the stored status, stamping `startTime` on `RUNNING` and `endTime`
  /// on any complete status.
  ///
  /// Legacy records are left untouched: their status is always derived from
  /// their stages.
  #[instrument(name = "repository_update_status", skip(self))]
  pub async fn update_status(
    &self,
    execution_type: ExecutionType,
    id: &str,
    status: ExecutionStatus,
  ) -> Result<(), RepositoryError> {
    let (key, schema) = self.require_schema(execution_type, id).await?;
    if schema == SchemaVersion::Legacy {
      debug!("legacy_status_update_ignored");
      return Ok(());
    }

    let mut fields = vec![(STATUS_FIELD.to_string(), status.as_str().to_string())];
    if status == ExecutionStatus::Running {
      fields.push(("startTime".to_string(), current::format_time(now())));
    } else if status.is_complete() {
      fields.push(("endTime".to_string(), current::format_time(now())));
    }
    self.kv.hset(&key, &fields).await?;

    info!("execution_status_updated");
    Ok(())
  }

  /// Load and decode one execution.
  pub async fn retrieve(&self, execution_type: ExecutionType, id: &str) -> Result<Execution, RepositoryError> {
    let key = keys::execution(execution_type, id);
    let fields = self.kv.hget_all(&key).await?;
    let record = StoredRecord::from_fields(fields)
      .ok_or_else(|| RepositoryError::not_found(execution_type, id))?;

    let execution = match &record {
      StoredRecord::Current(fields) => current::decode(execution_type, id, fields)?,
      StoredRecord::Legacy(blob) => {
        let overlays = self.legacy_overlays(execution_type, blob).await?;
        legacy::decode(execution_type, id, blob, &overlays)?
      }
    };
    Ok(execution)
  }

  /// Fetch every stage side record of a legacy document in one round-trip.
  async fn legacy_overlays(
    &self,
    execution_type: ExecutionType,
    blob: &str,
  ) -> Result<HashMap<String, String>, RepositoryError> {
    let stage_ids = legacy::stage_ids(blob)?;
    if stage_ids.is_empty() {
      return Ok(HashMap::new());
    }

    let stage_keys: Vec<String> = stage_ids
      .iter()
      .map(|stage_id| keys::legacy_stage(execution_type, stage_id))
      .collect();
    let values = self.kv.hget_many(&stage_keys, LEGACY_FIELD).await?;

    Ok(
      stage_ids
        .into_iter()
        .zip(values)
        .filter_map(|(stage_id, value)| value.map(|raw| (stage_id, raw)))
        .collect(),
    )
  }

  /// Application and pipeline definition of a record, read without a full decode.
  async fn index_membership(
    &self,
    execution_type: ExecutionType,
    key: &str,
  ) -> Result<Option<(String, Option<String>, Vec<String>)>, RepositoryError> {
    let fields = self.kv.hget_all(key).await?;
    let Some(record) = StoredRecord::from_fields(fields) else {
      return Ok(None);
    };

    Ok(Some(match record {
      StoredRecord::Current(mut fields) => {
        let application = fields.remove("application").unwrap_or_default();
        (application, fields.remove("pipelineConfigId"), Vec::new())
      }
      StoredRecord::Legacy(blob) => {
        let document: Value =
          serde_json::from_str(&blob).map_err(|source| codec_json(LEGACY_FIELD, source))?;
        let text = |name: &str| document.get(name).and_then(Value::as_str).map(str::to_string);
        let application = text("application").unwrap_or_default();
        let pipeline_config_id = match execution_type {
          ExecutionType::Pipeline => text("pipelineConfigId"),
          ExecutionType::Orchestration => None,
        };
        (application, pipeline_config_id, legacy::stage_ids(&blob)?)
      }
    }))
  }

  /// Remove an execution and its index entries.
  ///
  /// Index cleanup is best-effort; the record itself and its entry in the
  /// type-wide id set are always removed. Deleting a missing id succeeds.
  #[instrument(name = "repository_delete", skip(self))]
  pub async fn delete(&self, execution_type: ExecutionType, id: &str) -> Result<(), RepositoryError> {
    let key = keys::execution(execution_type, id);

    match self.index_membership(execution_type, &key).await {
      Ok(Some((application, pipeline_config_id, legacy_stage_ids))) => {
        if let Err(e) = self
          .kv
          .srem(&keys::application(execution_type, &application), id)
          .await
        {
          warn!(error = %e, application = %application, "application_index_cleanup_failed");
        }
        if let Some(pipeline_config_id) = pipeline_config_id {
          if let Err(e) = self
            .kv
            .zrem(&keys::pipeline_config(&pipeline_config_id), id)
            .await
          {
            warn!(error = %e, pipeline_config_id = %pipeline_config_id, "pipeline_index_cleanup_failed");
          }
        }
        for stage_id in legacy_stage_ids {
          if let Err(e) = self.kv.delete(&keys::legacy_stage(execution_type, &stage_id)).await {
            warn!(error = %e, stage_id = %stage_id, "legacy_stage_cleanup_failed");
          }
        }
      }
      Ok(None) => debug!("execution_already_absent"),
      Err(e) => warn!(error = %e, "index_lookup_failed"),
    }

    self.kv.delete(&key).await?;
    self.kv.srem(&keys::all_ids(execution_type), id).await?;

    info!("execution_deleted");
    Ok(())
  }

  /// Every execution of a type, newest first.
  #[instrument(name = "repository_retrieve_all", skip(self))]
  pub async fn retrieve_all(&self, execution_type: ExecutionType) -> Result<ExecutionStream, RepositoryError> {
    let key = keys::all_ids(execution_type);
    let mut ids = self.kv.smembers(&key).await?;
    sort_newest_first(&mut ids);
    Ok(self.stream(execution_type, ids, IndexSource::Set(key), self.all_pool.clone(), None))
  }

  /// Every execution of a type for one application, newest first.
  #[instrument(name = "repository_retrieve_all_for_application", skip(self))]
  pub async fn retrieve_all_for_application(
    &self,
    execution_type: ExecutionType,
    application: &str,
  ) -> Result<ExecutionStream, RepositoryError> {
    let key = keys::application(execution_type, application);
    let mut ids = self.kv.smembers(&key).await?;
    sort_newest_first(&mut ids);
    Ok(self.stream(
      execution_type,
      ids,
      IndexSource::Set(key),
      self.application_pool.clone(),
      None,
    ))
  }

  /// Runs of one pipeline definition, most recent build first.
  #[instrument(name = "repository_retrieve_for_pipeline_config", skip(self, criteria))]
  pub async fn retrieve_for_pipeline_config(
    &self,
    pipeline_config_id: &str,
    criteria: &ExecutionCriteria,
  ) -> Result<ExecutionStream, RepositoryError> {
    let key = keys::pipeline_config(pipeline_config_id);
    let source = IndexSource::Scored(key.clone());

    if !criteria.has_status_filter() {
      let ids = self.kv.zrevrange(&key, criteria.limit).await?;
      return Ok(self.stream(
        ExecutionType::Pipeline,
        ids,
        source,
        self.application_pool.clone(),
        None,
      ));
    }

    let candidates = self.kv.zrevrange(&key, None).await?;
    let ids = self
      .filter_by_status(ExecutionType::Pipeline, candidates, criteria)
      .await?;
    Ok(self.stream(
      ExecutionType::Pipeline,
      ids,
      source,
      self.application_pool.clone(),
      Some(criteria),
    ))
  }

  /// Orchestrations of one application, newest first.
  #[instrument(name = "repository_retrieve_for_application", skip(self, criteria))]
  pub async fn retrieve_for_application(
    &self,
    application: &str,
    criteria: &ExecutionCriteria,
  ) -> Result<ExecutionStream, RepositoryError> {
    let execution_type = ExecutionType::Orchestration;
    let key = keys::application(execution_type, application);
    let mut candidates = self.kv.smembers(&key).await?;
    sort_newest_first(&mut candidates);

    let (ids, filter) = if criteria.has_status_filter() {
      let ids = self.filter_by_status(execution_type, candidates, criteria).await?;
      (ids, Some(criteria))
    } else {
      if let Some(limit) = criteria.limit {
        candidates.truncate(limit);
      }
      (candidates, None)
    };

    Ok(self.stream(
      execution_type,
      ids,
      IndexSource::Set(key),
      self.application_pool.clone(),
      filter,
    ))
  }

  /// Narrow ordered candidates by stored status with one batched read.
  ///
  /// Ids with no stored status (legacy records, or ids whose record is gone)
  /// are kept so the full fetch can derive their status or clean them up.
  /// Only ids whose stored status matched count toward the limit; the list
  /// ends at the limit-th of those and the stream caps what it emits.
  async fn filter_by_status(
    &self,
    execution_type: ExecutionType,
    candidates: Vec<String>,
    criteria: &ExecutionCriteria,
  ) -> Result<Vec<String>, RepositoryError> {
    let record_keys: Vec<String> = candidates
      .iter()
      .map(|id| keys::execution(execution_type, id))
      .collect();
    let statuses = self.kv.hget_many(&record_keys, STATUS_FIELD).await?;

    let mut ids = Vec::new();
    let mut confirmed = 0usize;
    for (id, status) in candidates.into_iter().zip(statuses) {
      if criteria.limit.is_some_and(|limit| confirmed >= limit) {
        break;
      }
      match status.map(|raw| raw.parse::<ExecutionStatus>()) {
        Some(Ok(status)) if !criteria.accepts(status) => continue,
        Some(Ok(_)) => confirmed += 1,
        // Decided after the full fetch.
        Some(Err(_)) | None => {}
      }
      ids.push(id);
    }

    debug!(
      candidates = record_keys.len(),
      accepted = ids.len(),
      confirmed,
      "status_filter_applied"
    );
    Ok(ids)
  }

  fn stream(
    &self,
    execution_type: ExecutionType,
    ids: Vec<String>,
    source: IndexSource,
    pool: WorkerPool,
    criteria: Option<&ExecutionCriteria>,
  ) -> ExecutionStream {
    if ids.is_empty() {
      return ExecutionStream::empty();
    }
    debug!(
      index = %source.key(),
      pool = pool.name(),
      pool_size = pool.size(),
      pool_available = pool.available(),
      candidates = ids.len(),
      "stream_started"
    );
    ExecutionStream::spawn(
      self.clone(),
      StreamRequest {
        execution_type,
        ids,
        source,
        pool,
        chunk_size: self.config.chunk_size,
        statuses: criteria.map(|criteria| criteria.statuses.clone()),
        limit: criteria.and_then(|criteria| criteria.limit),
      },
    )
  }
}

fn codec_json(field: &str, source: serde_json::Error) -> RepositoryError {
  RepositoryError::Serialization(CodecError::Json {
    field: field.to_string(),
    source,
  })
}

fn codec_invalid(field: &str, message: impl ToString) -> RepositoryError {
  RepositoryError::Serialization(CodecError::InvalidField {
    field: field.to_string(),
    message: message.to_string(),
  })
}
