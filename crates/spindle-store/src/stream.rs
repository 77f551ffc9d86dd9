//! Chunked, pool-bounded fetching of executions by id.
//!
//! A query resolves to an ordered list of ids and the index they came from.
//! A producer task walks that list in chunks: every id in a chunk is fetched
//! by its own spawned task once it holds a permit from the query's worker
//! pool, and the chunk's results are sent in candidate order before the next
//! chunk is scheduled. Consumers read an [`ExecutionStream`] and may stop at
//! any time.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use spindle_kv::{KvError, KvStore};
use spindle_model::{Execution, ExecutionStatus, ExecutionType};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::repository::ExecutionRepository;

/// The index a list of candidate ids was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum IndexSource {
  Set(String),
  Scored(String),
}

impl IndexSource {
  pub(crate) fn key(&self) -> &str {
    match self {
      IndexSource::Set(key) | IndexSource::Scored(key) => key,
    }
  }

  /// Drop an id that no longer resolves to a record.
  async fn remove(&self, kv: &dyn KvStore, id: &str) -> Result<bool, KvError> {
    match self {
      IndexSource::Set(key) => kv.srem(key, id).await,
      IndexSource::Scored(key) => kv.zrem(key, id).await,
    }
  }
}

/// A fixed number of fetch slots shared by every query routed to it.
#[derive(Debug, Clone)]
pub(crate) struct WorkerPool {
  name: &'static str,
  permits: Arc<Semaphore>,
  size: usize,
}

impl WorkerPool {
  pub(crate) fn new(name: &'static str, size: usize) -> Self {
    Self {
      name,
      permits: Arc::new(Semaphore::new(size)),
      size,
    }
  }

  pub(crate) fn name(&self) -> &'static str {
    self.name
  }

  pub(crate) fn size(&self) -> usize {
    self.size
  }

  pub(crate) fn available(&self) -> usize {
    self.permits.available_permits()
  }
}

/// What a producer should fetch and how.
pub(crate) struct StreamRequest {
  pub execution_type: ExecutionType,
  pub ids: Vec<String>,
  pub source: IndexSource,
  pub pool: WorkerPool,
  pub chunk_size: usize,
  /// When set, decoded executions whose visible status is not listed are dropped.
  pub statuses: Option<BTreeSet<ExecutionStatus>>,
  /// Stop after this many executions have been sent.
  pub limit: Option<usize>,
}

/// A lazily produced sequence of executions.
///
/// Dropping the stream, or calling [`ExecutionStream::cancel`], stops the
/// producer before its next chunk. Fetches already in flight run to
/// completion and their results are discarded.
#[derive(Debug)]
pub struct ExecutionStream {
  receiver: mpsc::Receiver<Execution>,
  cancel: CancellationToken,
}

impl ExecutionStream {
  pub(crate) fn spawn(repository: ExecutionRepository, request: StreamRequest) -> Self {
    let (sender, receiver) = mpsc::channel(request.chunk_size.max(1));
    let cancel = CancellationToken::new();
    tokio::spawn(produce(repository, request, sender, cancel.clone()));
    Self { receiver, cancel }
  }

  /// An empty stream, used when a query resolves to no candidates.
  pub(crate) fn empty() -> Self {
    let (_, receiver) = mpsc::channel(1);
    Self {
      receiver,
      cancel: CancellationToken::new(),
    }
  }

  /// Stop scheduling further chunks.
  pub fn cancel(&self) {
    self.cancel.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }
}

impl Stream for ExecutionStream {
  type Item = Execution;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

impl Drop for ExecutionStream {
  fn drop(&mut self) {
    self.cancel.cancel();
  }
}

async fn produce(
  repository: ExecutionRepository,
  request: StreamRequest,
  sender: mpsc::Sender<Execution>,
  cancel: CancellationToken,
) {
  let StreamRequest {
    execution_type,
    ids,
    source,
    pool,
    chunk_size,
    statuses,
    limit,
  } = request;
  let mut emitted = 0usize;

  for (chunk_index, chunk) in ids.chunks(chunk_size.max(1)).enumerate() {
    if cancel.is_cancelled() || sender.is_closed() {
      debug!(
        index = %source.key(),
        chunk = chunk_index,
        emitted,
        "stream_stopped"
      );
      return;
    }

    let handles: Vec<_> = chunk
      .iter()
      .cloned()
      .map(|id| {
        let repository = repository.clone();
        let permits = pool.permits.clone();
        tokio::spawn(async move {
          // The semaphore is never closed while a repository holds it.
          let _permit = permits.acquire_owned().await.ok();
          let result = repository.retrieve(execution_type, &id).await;
          (id, result)
        })
      })
      .collect();

    let results = tokio::select! {
        results = futures::future::join_all(handles) => results,
        _ = cancel.cancelled() => {
          debug!(index = %source.key(), chunk = chunk_index, emitted, "stream_cancelled");
          return;
        }
    };

    for joined in results {
      let (id, result) = match joined {
        Ok(pair) => pair,
        Err(e) => {
          error!(pool = pool.name(), error = %e, "stream_fetch_panicked");
          continue;
        }
      };

      match result {
        Ok(execution) => {
          if let Some(statuses) = &statuses {
            if !statuses.contains(&execution.visible_status()) {
              continue;
            }
          }
          if sender.send(execution).await.is_err() {
            return;
          }
          emitted += 1;
          if limit.is_some_and(|limit| emitted >= limit) {
            debug!(index = %source.key(), emitted, "stream_limit_reached");
            return;
          }
        }
        Err(e) if e.is_not_found() => {
          match source.remove(repository.kv(), &id).await {
            Ok(_) => debug!(index = %source.key(), execution_id = %id, "orphan_id_removed"),
            Err(e) => warn!(
              index = %source.key(),
              execution_id = %id,
              error = %e,
              "orphan_id_cleanup_failed"
            ),
          }
        }
        Err(e) => {
          error!(
            index = %source.key(),
            execution_id = %id,
            execution_type = %execution_type,
            error = %e,
            "stream_fetch_failed"
          );
        }
      }
    }
  }

  debug!(index = %source.key(), emitted, "stream_finished");
}
