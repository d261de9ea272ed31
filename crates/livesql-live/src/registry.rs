//! Live query registry.
//!
//! One record exists per `(fingerprint, diff key)`. Records are created by
//! the first request, shared by later identical requests and torn down once
//! nothing references them. The registry listens to the serializer for
//! mutations and re-runs every record whose dependencies were touched.
//!
//! ## Locking
//!
//! Registry state sits behind one mutex. Callbacks are collected under the
//! lock and invoked after it is released. Statements are enqueued only
//! after the lock is released, because a closed serializer runs the
//! completion synchronously and the completion takes the lock again.

use crate::config::LiveConfig;
use crate::handle::{Callback, HandleShared, LiveResults, LiveUpdate, SubscriptionHandle};
use crate::serializer::{Completed, MutationListener, RunMode, Serializer};
use livesql_core::{diff, Delta, DiffKey, Fingerprint, RelationSet, ResultSnapshot, Touched, Value};
use livesql_core_types::{HandleId, LiveQueryId, SubscriberId};
use livesql_errors::{ExError, LiveError, Result};
use livesql_logging::{log_op_end, log_op_error, log_op_start};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Instant;
use tokio::sync::oneshot;

type RecordKey = (Fingerprint, Option<DiffKey>);

struct HandleSlot {
    shared: Arc<HandleShared>,
    /// Holds the record alive until the handle's first subscription
    leased: bool,
}

struct Subscriber {
    id: SubscriberId,
    handle: HandleId,
    active: Arc<AtomicBool>,
    callback: Callback,
}

struct LiveRecord {
    id: LiveQueryId,
    fingerprint: Fingerprint,
    key: Option<DiffKey>,
    /// Last good results; `None` until the initial run succeeds
    results: Option<LiveResults>,
    dependencies: RelationSet,
    /// A run is queued and has not executed yet
    pending_run: bool,
    cancelled: Arc<AtomicBool>,
    waiters: Vec<oneshot::Sender<Result<()>>>,
    handles: HashMap<HandleId, HandleSlot>,
    subscribers: Vec<Subscriber>,
}

impl LiveRecord {
    /// Results as seen by a handle attaching now.
    fn joined_results(&self) -> Option<LiveResults> {
        let results = self.results.as_ref()?;
        Some(match &self.key {
            Some(_) => LiveResults {
                snapshot: Arc::clone(&results.snapshot),
                delta: Some(Arc::new(Delta::initial(&results.snapshot))),
            },
            None => results.clone(),
        })
    }

    fn is_unreferenced(&self) -> bool {
        self.subscribers.is_empty() && !self.handles.values().any(|slot| slot.leased)
    }

    fn collect_callbacks(&self) -> Vec<(Arc<HandleShared>, Arc<AtomicBool>, Callback)> {
        self.subscribers
            .iter()
            .filter_map(|sub| {
                let slot = self.handles.get(&sub.handle)?;
                Some((
                    Arc::clone(&slot.shared),
                    Arc::clone(&sub.active),
                    Arc::clone(&sub.callback),
                ))
            })
            .collect()
    }

    fn publish(&self, results: &LiveResults) {
        for slot in self.handles.values() {
            if !slot.shared.is_disposed() {
                slot.shared.set_current(results.clone());
            }
        }
    }
}

#[derive(Default)]
struct RegistryState {
    by_key: HashMap<RecordKey, LiveQueryId>,
    records: HashMap<LiveQueryId, LiveRecord>,
}

impl RegistryState {
    fn remove(&mut self, id: LiveQueryId) -> Option<LiveRecord> {
        let record = self.records.remove(&id)?;
        self.by_key
            .remove(&(record.fingerprint.clone(), record.key.clone()));
        record.cancelled.store(true, Ordering::SeqCst);
        for slot in record.handles.values() {
            slot.shared.mark_detached();
        }
        Some(record)
    }

    /// The removed record must be dropped after the registry lock is
    /// released: its callbacks may own handles whose drop re-enters.
    #[must_use]
    fn teardown_if_unreferenced(&mut self, id: LiveQueryId) -> Option<LiveRecord> {
        let unreferenced = self
            .records
            .get(&id)
            .map(LiveRecord::is_unreferenced)
            .unwrap_or(false);
        if !unreferenced {
            return None;
        }
        let record = self.remove(id)?;
        tracing::debug!(
            live_id = %id,
            fingerprint = record.fingerprint.sql(),
            "live query torn down"
        );
        Some(record)
    }
}

impl LiveRecord {
    /// Detach the subscribers matching `pred`, deactivating them.
    fn take_subscribers(&mut self, pred: impl Fn(&Subscriber) -> bool) -> Vec<Subscriber> {
        let (removed, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.subscribers).into_iter().partition(pred);
        self.subscribers = kept;
        for sub in &removed {
            sub.active.store(false, Ordering::SeqCst);
        }
        removed
    }
}

/// A run to enqueue once the registry lock is released.
struct ScheduledRun {
    id: LiveQueryId,
    statement: Fingerprint,
    mode: RunMode,
    cancelled: Arc<AtomicBool>,
}

pub(crate) struct RegistryInner {
    serializer: Serializer,
    config: LiveConfig,
    state: Mutex<RegistryState>,
    this: Weak<RegistryInner>,
}

impl RegistryInner {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach a new handle, creating the record on first use.
    ///
    /// Returns a receiver when the handle must wait for the initial run.
    fn attach(
        &self,
        fingerprint: Fingerprint,
        key: Option<DiffKey>,
    ) -> (SubscriptionHandle, Option<oneshot::Receiver<Result<()>>>) {
        let mut state = self.lock();
        let record_key = (fingerprint.clone(), key.clone());

        if let Some(record) = state
            .by_key
            .get(&record_key)
            .copied()
            .and_then(|id| state.records.get_mut(&id))
        {
            let shared = Arc::new(HandleShared::new(record.id, key));
            record.handles.insert(
                shared.id,
                HandleSlot {
                    shared: Arc::clone(&shared),
                    leased: true,
                },
            );
            let handle = SubscriptionHandle::new(Arc::clone(&shared), self.this.clone());

            return match record.joined_results() {
                Some(results) => {
                    shared.set_current(results);
                    (handle, None)
                }
                None => {
                    let (tx, rx) = oneshot::channel();
                    record.waiters.push(tx);
                    (handle, Some(rx))
                }
            };
        }

        let id = LiveQueryId::next();
        let shared = Arc::new(HandleShared::new(id, key.clone()));
        let cancelled = Arc::new(AtomicBool::new(false));
        let (tx, rx) = oneshot::channel();

        let mut handles = HashMap::new();
        handles.insert(
            shared.id,
            HandleSlot {
                shared: Arc::clone(&shared),
                leased: true,
            },
        );
        state.records.insert(
            id,
            LiveRecord {
                id,
                fingerprint: fingerprint.clone(),
                key,
                results: None,
                dependencies: RelationSet::Unknown,
                pending_run: true,
                cancelled: Arc::clone(&cancelled),
                waiters: vec![tx],
                handles,
                subscribers: Vec::new(),
            },
        );
        state.by_key.insert(record_key, id);
        drop(state);

        tracing::debug!(live_id = %id, fingerprint = fingerprint.sql(), "live query registered");
        self.schedule(vec![ScheduledRun {
            id,
            statement: fingerprint,
            mode: RunMode::Describe,
            cancelled,
        }]);

        (
            SubscriptionHandle::new(shared, self.this.clone()),
            Some(rx),
        )
    }

    fn schedule(&self, runs: Vec<ScheduledRun>) {
        for run in runs {
            let registry = self.this.clone();
            let ScheduledRun {
                id,
                statement,
                mode,
                cancelled,
            } = run;
            self.serializer.enqueue(
                statement,
                mode,
                Box::new(move |outcome| {
                    if cancelled.load(Ordering::SeqCst) {
                        tracing::debug!(live_id = %id, "discarding result of torn down live query");
                        return;
                    }
                    if let Some(registry) = registry.upgrade() {
                        registry.complete(id, outcome);
                    }
                }),
            );
        }
    }

    /// Apply a finished run and deliver it.
    fn complete(&self, id: LiveQueryId, outcome: Result<Completed>) {
        let mut state = self.lock();
        let Some(record) = state.records.get_mut(&id) else {
            return;
        };
        record.pending_run = false;

        let initial = record.results.is_none();
        let update = outcome.and_then(|completed| {
            if let Some(dependencies) = completed.dependencies {
                record.dependencies = dependencies;
            }
            self.next_results(record, completed.snapshot)
        });

        let update = match update {
            Ok(Some(results)) => {
                record.publish(&results);
                record.results = Some(results.clone());
                for waiter in record.waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                if initial {
                    return;
                }
                Ok(results)
            }
            // Empty delta: the snapshot moved on silently
            Ok(None) => return,
            Err(e) => {
                let e = e.with_live_id(id).with_fingerprint(record.fingerprint.sql());
                if initial {
                    let removed = state.remove(id);
                    drop(state);
                    if let Some(record) = removed {
                        for waiter in record.waiters {
                            let _ = waiter.send(Err(e.clone()));
                        }
                    }
                    return;
                }
                tracing::warn!(live_id = %id, err.code = e.code(), "live query re-run failed");
                Err(e)
            }
        };

        let callbacks = state
            .records
            .get(&id)
            .map(LiveRecord::collect_callbacks)
            .unwrap_or_default();
        drop(state);

        deliver(id, &update, callbacks);
    }

    /// Results to publish for a new snapshot, or `None` when a keyed re-run
    /// changed nothing and empty deltas are suppressed.
    fn next_results(
        &self,
        record: &mut LiveRecord,
        snapshot: Arc<ResultSnapshot>,
    ) -> Result<Option<LiveResults>> {
        let Some(key) = &record.key else {
            return Ok(Some(LiveResults {
                snapshot,
                delta: None,
            }));
        };

        let empty = ResultSnapshot::empty();
        let prior = record
            .results
            .as_ref()
            .map(|r| r.snapshot.as_ref())
            .unwrap_or(&empty);
        let delta = diff(prior, &snapshot, key)?;

        if record.results.is_some() && delta.is_empty() && self.config.skip_empty_deltas {
            let silent = LiveResults {
                snapshot,
                delta: Some(Arc::new(delta)),
            };
            record.publish(&silent);
            record.results = Some(silent);
            return Ok(None);
        }

        Ok(Some(LiveResults {
            snapshot,
            delta: Some(Arc::new(delta)),
        }))
    }

    pub(crate) fn subscribe(
        &self,
        handle: &Arc<HandleShared>,
        callback: Callback,
    ) -> Result<SubscriberId> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&handle.live_id)
            .filter(|r| r.handles.contains_key(&handle.id))
            .ok_or_else(|| detached(handle.live_id))?;

        let id = SubscriberId::next();
        record.subscribers.push(Subscriber {
            id,
            handle: handle.id,
            active: Arc::new(AtomicBool::new(true)),
            callback,
        });
        if let Some(slot) = record.handles.get_mut(&handle.id) {
            slot.leased = false;
        }

        tracing::debug!(
            live_id = %handle.live_id,
            handle_id = %handle.id,
            subscriber_count = record.subscribers.len() as u64,
            "subscribed"
        );
        Ok(id)
    }

    pub(crate) fn unsubscribe(&self, handle: &Arc<HandleShared>, subscriber: SubscriberId) {
        let removed = {
            let mut state = self.lock();
            let Some(record) = state.records.get_mut(&handle.live_id) else {
                return;
            };
            let subscribers =
                record.take_subscribers(|sub| sub.id == subscriber && sub.handle == handle.id);
            (subscribers, state.teardown_if_unreferenced(handle.live_id))
        };
        // Dropped outside the lock.
        drop(removed);
    }

    /// Drop a disposed handle's slot and subscribers.
    pub(crate) fn release(&self, handle: &Arc<HandleShared>) {
        let removed = {
            let mut state = self.lock();
            let Some(record) = state.records.get_mut(&handle.live_id) else {
                return;
            };
            record.handles.remove(&handle.id);
            let subscribers = record.take_subscribers(|sub| sub.handle == handle.id);
            (subscribers, state.teardown_if_unreferenced(handle.live_id))
        };
        // Dropped outside the lock.
        drop(removed);
    }

    pub(crate) fn refresh(&self, handle: &Arc<HandleShared>) -> Result<()> {
        let mut state = self.lock();
        let record = state
            .records
            .get_mut(&handle.live_id)
            .ok_or_else(|| detached(handle.live_id))?;
        let run = self.claim_run(record, RunMode::Plain);
        drop(state);

        self.schedule(run.into_iter().collect());
        Ok(())
    }

    /// Mark a record as having a queued run, honouring coalescing.
    fn claim_run(&self, record: &mut LiveRecord, mode: RunMode) -> Option<ScheduledRun> {
        if record.pending_run && self.config.coalesce_reruns {
            return None;
        }
        record.pending_run = true;
        Some(ScheduledRun {
            id: record.id,
            statement: record.fingerprint.clone(),
            mode,
            cancelled: Arc::clone(&record.cancelled),
        })
    }
}

impl MutationListener for RegistryInner {
    fn on_mutation(&self, touched: &Touched) {
        // Schema changes may redefine views, so dependencies are re-resolved.
        let mode = match touched {
            Touched::Everything => RunMode::Describe,
            _ => RunMode::Plain,
        };

        let mut state = self.lock();
        let mut runs = Vec::new();
        for record in state.records.values_mut() {
            if record.dependencies.is_affected_by(touched) {
                runs.extend(self.claim_run(record, mode));
            }
        }
        drop(state);

        if !runs.is_empty() {
            tracing::debug!(rerun_count = runs.len() as u64, "scheduling live query re-runs");
        }
        self.schedule(runs);
    }
}

fn detached(live_id: LiveQueryId) -> ExError {
    LiveError::LiveQueryDetached { live_id }.into()
}

/// Invoke callbacks in registration order, skipping disposed handles and
/// removed subscribers.
fn deliver(
    id: LiveQueryId,
    update: &LiveUpdate,
    callbacks: Vec<(Arc<HandleShared>, Arc<AtomicBool>, Callback)>,
) {
    for (handle, active, callback) in callbacks {
        if !active.load(Ordering::SeqCst) {
            continue;
        }
        let outcome = handle.deliver(|| catch_unwind(AssertUnwindSafe(|| callback(update))));
        if matches!(outcome, Some(Err(_))) {
            tracing::error!(
                live_id = %id,
                handle_id = %handle.id,
                "subscriber callback panicked"
            );
        }
    }
}

/// Registry of live queries sharing one serializer.
#[derive(Clone)]
pub struct LiveRegistry {
    inner: Arc<RegistryInner>,
}

impl LiveRegistry {
    /// Create a registry and register it as a mutation listener.
    pub fn new(serializer: Serializer, config: LiveConfig) -> Self {
        let inner = Arc::new_cyclic(|this| RegistryInner {
            serializer: serializer.clone(),
            config,
            state: Mutex::new(RegistryState::default()),
            this: this.clone(),
        });
        let weak = Arc::downgrade(&inner);
        let listener: Weak<dyn MutationListener> = weak;
        serializer.add_listener(listener);
        Self { inner }
    }

    /// Live query delivering full snapshots.
    ///
    /// Resolves once the initial results are available. Identical requests
    /// share one record and one initial run.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for an empty statement; otherwise the initial run's
    /// error.
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<SubscriptionHandle> {
        self.register("live_query", sql, params, None).await
    }

    /// Live query that also delivers a keyed [`Delta`] with every update.
    ///
    /// # Errors
    ///
    /// As [`query`](Self::query), plus `Consistency` when the initial
    /// results contain a duplicate key and `InvalidInput` when the key
    /// column does not exist.
    pub async fn incremental_query(
        &self,
        sql: &str,
        params: Vec<Value>,
        key: impl Into<DiffKey>,
    ) -> Result<SubscriptionHandle> {
        self.register("live_incremental_query", sql, params, Some(key.into()))
            .await
    }

    async fn register(
        &self,
        op: &'static str,
        sql: &str,
        params: Vec<Value>,
        key: Option<DiffKey>,
    ) -> Result<SubscriptionHandle> {
        let fingerprint = Fingerprint::new(sql, params)?;
        log_op_start!(op, fingerprint = fingerprint.sql());
        let start = Instant::now();

        // The handle exists before the first await: dropping this future
        // disposes it like any other handle.
        let (handle, wait) = self.inner.attach(fingerprint, key);
        let ready = match wait {
            None => Ok(()),
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(LiveError::SerializerClosed.into())),
        };

        match ready {
            Ok(()) => {
                log_op_end!(
                    op,
                    duration_ms = start.elapsed().as_millis() as u64,
                    live_id = %handle.live_id(),
                    handle_id = %handle.id()
                );
                Ok(handle)
            }
            Err(e) => {
                log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
                Err(e)
            }
        }
    }

    /// Number of registered live queries.
    pub fn active_queries(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn serializer(&self) -> &Serializer {
        &self.inner.serializer
    }
}
