//! Query serializer.
//!
//! All statements reach the engine through one FIFO queue drained by a
//! dedicated worker thread that owns the engine. Exactly one statement runs
//! at a time and statements complete in submission order.
//!
//! After a statement that touched anything, registered mutation listeners
//! are notified on the worker thread before the statement's completion runs
//! and before the next entry is dequeued. Anything a listener submits is
//! therefore queued behind every entry submitted before the mutation
//! finished.

use livesql_core::{Engine, Execution, Fingerprint, RelationSet, ResultSnapshot, Touched, Value};
use livesql_core_types::{RequestId, Sensitive};
use livesql_errors::{ExError, ExErrorKind, LiveError, Result};
use livesql_logging::{log_op_end, log_op_error, log_op_start};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};

/// How the worker runs a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Execute only
    Plain,
    /// Execute, then resolve the statement's dependency relations
    Describe,
}

/// Result of one successfully executed entry.
#[derive(Debug, Clone)]
pub struct Completed {
    pub snapshot: Arc<ResultSnapshot>,
    /// Present for `RunMode::Describe`
    pub dependencies: Option<RelationSet>,
}

pub type Completion = Box<dyn FnOnce(Result<Completed>) + Send>;

/// Receives the relations touched by every mutating statement.
pub trait MutationListener: Send + Sync {
    fn on_mutation(&self, touched: &Touched);
}

struct QueueEntry {
    request_id: RequestId,
    statement: Fingerprint,
    mode: RunMode,
    completion: Completion,
}

type Listeners = Arc<Mutex<Vec<Weak<dyn MutationListener>>>>;

/// Handle to the serializer queue. Cloning shares the same queue.
///
/// The worker exits once every clone has been dropped and the queue has
/// drained.
#[derive(Clone)]
pub struct Serializer {
    tx: mpsc::UnboundedSender<QueueEntry>,
    listeners: Listeners,
}

impl Serializer {
    /// Move `engine` onto a new worker thread.
    ///
    /// # Errors
    ///
    /// `Io` when the worker thread cannot be spawned.
    pub fn spawn<E: Engine>(engine: E) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners: Listeners = Arc::new(Mutex::new(Vec::new()));
        let worker_listeners = Arc::clone(&listeners);

        std::thread::Builder::new()
            .name("livesql-serializer".to_string())
            .spawn(move || run_worker(engine, rx, worker_listeners))
            .map_err(|e| {
                ExError::new(ExErrorKind::Io)
                    .with_op("spawn_serializer")
                    .with_message(e.to_string())
            })?;

        Ok(Self { tx, listeners })
    }

    /// Queue a statement and return a future for its result.
    ///
    /// The statement is queued when this is called, not when the future is
    /// first polled, so call order is execution order. Dropping the future
    /// does not unqueue the statement.
    pub fn submit(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Arc<ResultSnapshot>>> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        match Fingerprint::new(sql, params) {
            Ok(statement) => self.enqueue(
                statement,
                RunMode::Plain,
                Box::new(move |outcome: Result<Completed>| {
                    let _ = tx.send(outcome.map(|c| c.snapshot));
                }),
            ),
            Err(e) => {
                let _ = tx.send(Err(e));
            }
        }

        async move {
            rx.await
                .unwrap_or_else(|_| Err(LiveError::SerializerClosed.into()))
        }
    }

    /// Queue a statement with an explicit completion.
    ///
    /// If the worker is gone the completion runs immediately, on the calling
    /// thread, with a `SerializerClosed` error.
    pub fn enqueue(&self, statement: Fingerprint, mode: RunMode, completion: Completion) {
        let entry = QueueEntry {
            request_id: RequestId::new(),
            statement,
            mode,
            completion,
        };
        if let Err(mpsc::error::SendError(entry)) = self.tx.send(entry) {
            let err: ExError = LiveError::SerializerClosed.into();
            (entry.completion)(Err(err.with_request_id(entry.request_id)));
        }
    }

    /// Register a listener. Only a weak reference is kept.
    pub fn add_listener(&self, listener: Weak<dyn MutationListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    /// Whether the worker is still accepting entries.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

fn run_worker<E: Engine>(
    mut engine: E,
    mut rx: mpsc::UnboundedReceiver<QueueEntry>,
    listeners: Listeners,
) {
    tracing::debug!("serializer worker started");

    while let Some(entry) = rx.blocking_recv() {
        let QueueEntry {
            request_id,
            statement,
            mode,
            completion,
        } = entry;

        let (outcome, touched) = run_entry(&mut engine, &request_id, &statement, mode);

        if touched.is_mutation() {
            notify(&listeners, &touched);
        }
        completion(outcome);
    }

    tracing::debug!("serializer worker stopped");
}

fn run_entry<E: Engine>(
    engine: &mut E,
    request_id: &RequestId,
    statement: &Fingerprint,
    mode: RunMode,
) -> (Result<Completed>, Touched) {
    log_op_start!(
        "execute",
        request_id = %request_id,
        fingerprint = statement.sql(),
        params = %Sensitive::new(statement.params())
    );
    let start = Instant::now();

    let Execution { result, touched } = engine.execute(statement.sql(), statement.params());

    let outcome = result
        .map(|snapshot| {
            let dependencies = match mode {
                RunMode::Plain => None,
                RunMode::Describe => Some(describe(engine, statement)),
            };
            Completed {
                snapshot: Arc::new(snapshot),
                dependencies,
            }
        })
        .map_err(|e| {
            e.with_request_id(request_id.clone())
                .with_fingerprint(statement.sql())
        });

    match &outcome {
        Ok(completed) => {
            log_op_end!(
                "execute",
                duration_ms = start.elapsed().as_millis() as u64,
                request_id = %request_id,
                row_count = completed.snapshot.len() as u64
            );
        }
        Err(e) => {
            log_op_error!(
                "execute",
                e.clone(),
                duration_ms = start.elapsed().as_millis() as u64,
                request_id = %request_id
            );
        }
    }

    (outcome, touched)
}

/// Dependency lookup failures degrade to `Unknown`: the query then re-runs
/// on every mutation instead of missing one.
fn describe<E: Engine>(engine: &mut E, statement: &Fingerprint) -> RelationSet {
    engine.dependencies(statement.sql()).unwrap_or_else(|e| {
        tracing::warn!(
            fingerprint = statement.sql(),
            err.code = e.code(),
            "dependency lookup failed, treating as unknown"
        );
        RelationSet::Unknown
    })
}

fn notify(listeners: &Listeners, touched: &Touched) {
    let live: Vec<Arc<dyn MutationListener>> = {
        let mut guard = listeners.lock().unwrap_or_else(PoisonError::into_inner);
        guard.retain(|l| l.strong_count() > 0);
        guard.iter().filter_map(Weak::upgrade).collect()
    };
    for listener in live {
        listener.on_mutation(touched);
    }
}
