//! Consumer adapters.
//!
//! Glue for consumers that do not want to drive handles directly:
//!
//! - [`QuerySource`] accepts a query in any of the forms a caller may hold
//!   (statement text, a ready handle, or a handle still being created);
//!   [`live_sql!`](crate::live_sql) builds the statement-text form from
//!   interpolated values
//! - [`LiveView`] is a value holder for render loops; it is empty until its
//!   source resolves and then tracks the latest update
//! - [`LiveUpdates`] turns a handle into a `futures::Stream`

use crate::handle::{LiveResults, LiveUpdate, SubscriptionHandle};
use crate::LiveSql;
use futures::future::BoxFuture;
use futures::Stream;
use livesql_core::{DiffKey, Value};
use livesql_errors::{ExError, ExErrorKind, Result};
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// A live query in whichever form the caller has it.
pub enum QuerySource {
    /// Statement text; `key` selects an incremental query
    Sql {
        sql: String,
        params: Vec<Value>,
        key: Option<DiffKey>,
    },
    /// An already resolved handle
    Live(SubscriptionHandle),
    /// A handle that is still being created
    Pending(BoxFuture<'static, Result<SubscriptionHandle>>),
}

impl QuerySource {
    pub fn sql(sql: impl Into<String>, params: Vec<Value>) -> Self {
        QuerySource::Sql {
            sql: sql.into(),
            params,
            key: None,
        }
    }

    pub fn incremental(sql: impl Into<String>, params: Vec<Value>, key: impl Into<DiffKey>) -> Self {
        QuerySource::Sql {
            sql: sql.into(),
            params,
            key: Some(key.into()),
        }
    }

    /// Statement text with `{}` placeholders bound to `params` in order.
    ///
    /// Each `{}` becomes the positional parameter `?N`; `{{` and `}}` are
    /// literal braces. Values are never spliced into the text.
    ///
    /// # Errors
    ///
    /// `InvalidInput` when the placeholder count differs from `params.len()`.
    pub fn template(template: &str, params: Vec<Value>) -> Result<Self> {
        let mut sql = String::with_capacity(template.len());
        let mut placeholders = 0;
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match (c, chars.peek()) {
                ('{', Some('}')) => {
                    chars.next();
                    placeholders += 1;
                    sql.push_str(&format!("?{}", placeholders));
                }
                ('{', Some('{')) | ('}', Some('}')) => {
                    chars.next();
                    sql.push(c);
                }
                _ => sql.push(c),
            }
        }

        if placeholders != params.len() {
            return Err(ExError::new(ExErrorKind::InvalidInput)
                .with_op("sql_template")
                .with_message(format!(
                    "{} placeholders but {} values",
                    placeholders,
                    params.len()
                )));
        }
        Ok(Self::sql(sql, params))
    }

    /// Statement text of a `Sql` source.
    pub fn statement(&self) -> Option<&str> {
        match self {
            QuerySource::Sql { sql, .. } => Some(sql),
            _ => None,
        }
    }

    /// Make a statement-text source incremental. Other forms are unchanged.
    pub fn with_key(self, key: impl Into<DiffKey>) -> Self {
        match self {
            QuerySource::Sql { sql, params, .. } => QuerySource::Sql {
                sql,
                params,
                key: Some(key.into()),
            },
            other => other,
        }
    }

    /// Turn the source into a handle, registering a live query if needed.
    ///
    /// # Errors
    ///
    /// Whatever registering or awaiting the handle fails with.
    pub async fn resolve(self, live: &LiveSql) -> Result<SubscriptionHandle> {
        match self {
            QuerySource::Sql {
                sql,
                params,
                key: None,
            } => live.live_query(&sql, params).await,
            QuerySource::Sql {
                sql,
                params,
                key: Some(key),
            } => live.live_incremental_query(&sql, params, key).await,
            QuerySource::Live(handle) => Ok(handle),
            QuerySource::Pending(pending) => pending.await,
        }
    }
}

impl From<SubscriptionHandle> for QuerySource {
    fn from(handle: SubscriptionHandle) -> Self {
        QuerySource::Live(handle)
    }
}

impl From<&str> for QuerySource {
    fn from(sql: &str) -> Self {
        QuerySource::sql(sql, Vec::new())
    }
}

#[derive(Default)]
struct ViewState {
    latest: Option<LiveResults>,
    error: Option<ExError>,
    version: u64,
}

/// Latest results of a live query, for consumers that poll.
///
/// Binding a new source disposes the previously bound handle.
#[derive(Default)]
pub struct LiveView {
    handle: Option<SubscriptionHandle>,
    state: Arc<Mutex<ViewState>>,
}

impl LiveView {
    /// An unbound view; [`current`](Self::current) is `None`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `source` and track its updates.
    ///
    /// # Errors
    ///
    /// Resolution or subscription failure. The view is left unbound.
    pub async fn bind(&mut self, source: QuerySource, live: &LiveSql) -> Result<()> {
        if let Some(old) = self.handle.take() {
            old.dispose();
        }
        let state = Arc::new(Mutex::new(ViewState::default()));
        self.state = Arc::clone(&state);

        let handle = source.resolve(live).await?;

        let sink = Arc::clone(&state);
        handle.subscribe(move |update: &LiveUpdate| {
            let mut guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
            match update {
                Ok(results) => {
                    guard.latest = Some(results.clone());
                    guard.error = None;
                }
                Err(e) => guard.error = Some(e.clone()),
            }
            guard.version += 1;
        })?;

        // Read under the view lock so a concurrent delivery cannot be
        // overwritten by an older value.
        {
            let mut guard = state.lock().unwrap_or_else(PoisonError::into_inner);
            guard.latest = Some(handle.current());
            guard.version += 1;
        }

        self.handle = Some(handle);
        Ok(())
    }

    /// Latest good results, `None` until bound.
    pub fn current(&self) -> Option<LiveResults> {
        self.lock().latest.clone()
    }

    /// Error from the most recent update, cleared by the next good one.
    pub fn error(&self) -> Option<ExError> {
        self.lock().error.clone()
    }

    /// Increments on every change; cheap change detection for render loops.
    pub fn version(&self) -> u64 {
        self.lock().version
    }

    pub fn handle(&self) -> Option<&SubscriptionHandle> {
        self.handle.as_ref()
    }

    /// Dispose the bound handle, keeping the last results.
    pub fn unbind(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.dispose();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ViewState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream of updates for one handle.
///
/// The first item is the handle's current results; every later item is one
/// delivered update. Dropping the stream disposes the handle.
pub struct LiveUpdates {
    handle: SubscriptionHandle,
    rx: mpsc::UnboundedReceiver<LiveUpdate>,
}

impl LiveUpdates {
    /// # Errors
    ///
    /// `Disposed` or `Detached` when the handle can no longer subscribe.
    pub fn new(handle: SubscriptionHandle) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(handle.current()));
        handle.subscribe(move |update: &LiveUpdate| {
            let _ = tx.send(update.clone());
        })?;
        Ok(Self { handle, rx })
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }
}

impl Stream for LiveUpdates {
    type Item = LiveUpdate;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().rx.poll_recv(cx)
    }
}
