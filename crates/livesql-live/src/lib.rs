//! LiveSQL Live - reactive queries over a serialized SQL engine
//!
//! Provides:
//! - The query serializer: one FIFO queue, one statement at a time
//! - The live query registry: dedup, invalidation and re-runs
//! - Subscription handles with callback fan-out and disposal
//! - Consumer adapters (`QuerySource`, `LiveView`, `LiveUpdates`)
//!
//! # Usage
//!
//! ```no_run
//! # async fn demo(engine: impl livesql_core::Engine) -> livesql_errors::Result<()> {
//! use livesql_live::{LiveConfig, LiveSql};
//!
//! let live = LiveSql::open(engine, LiveConfig::default())?;
//! let handle = live.live_incremental_query("SELECT * FROM t", vec![], "id").await?;
//! handle.subscribe(|update| {
//!     if let Ok(results) = update {
//!         println!("{} rows", results.snapshot.len());
//!     }
//! })?;
//! live.query("UPDATE t SET value = 'x' WHERE id = 1", vec![]).await?;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod handle;
pub mod registry;
pub mod serializer;

mod macros;

pub use adapter::{LiveUpdates, LiveView, QuerySource};
pub use config::LiveConfig;
pub use handle::{Callback, LiveResults, LiveUpdate, SubscriptionHandle};
pub use registry::LiveRegistry;
pub use serializer::{MutationListener, RunMode, Serializer};

// Paths used by the exported macros.
#[doc(hidden)]
pub use livesql_core;

use livesql_core::{DiffKey, Engine, ResultSnapshot, Value};
use livesql_errors::Result;
use std::future::Future;
use std::sync::Arc;

/// Entry point: one engine, one serializer, one registry.
#[derive(Clone)]
pub struct LiveSql {
    registry: LiveRegistry,
}

impl LiveSql {
    /// Start the serializer worker for `engine`.
    ///
    /// # Errors
    ///
    /// `Io` when the worker thread cannot be started.
    pub fn open<E: Engine>(engine: E, config: LiveConfig) -> Result<Self> {
        let serializer = Serializer::spawn(engine)?;
        Ok(Self {
            registry: LiveRegistry::new(serializer, config),
        })
    }

    /// Run one statement through the serializer.
    ///
    /// Mutations made here re-run every live query they affect.
    pub fn query(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> impl Future<Output = Result<Arc<ResultSnapshot>>> + Send + 'static {
        self.registry.serializer().submit(sql, params)
    }

    /// See [`LiveRegistry::query`].
    ///
    /// # Errors
    ///
    /// Empty statement or initial run failure.
    pub async fn live_query(&self, sql: &str, params: Vec<Value>) -> Result<SubscriptionHandle> {
        self.registry.query(sql, params).await
    }

    /// See [`LiveRegistry::incremental_query`].
    ///
    /// # Errors
    ///
    /// Empty statement, initial run failure, duplicate or unknown key.
    pub async fn live_incremental_query(
        &self,
        sql: &str,
        params: Vec<Value>,
        key: impl Into<DiffKey>,
    ) -> Result<SubscriptionHandle> {
        self.registry.incremental_query(sql, params, key).await
    }

    pub fn registry(&self) -> &LiveRegistry {
        &self.registry
    }

    pub fn serializer(&self) -> &Serializer {
        self.registry.serializer()
    }
}
