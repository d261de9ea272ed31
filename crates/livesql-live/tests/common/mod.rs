// Shared fixtures for live-query integration tests.

use livesql_core::{Engine, Execution, RelationSet, Value};
use livesql_live::{LiveConfig, LiveSql};
use livesql_store::SqliteEngine;
use std::sync::{Arc, Condvar, Mutex};

/// Statements containing this marker block the worker until the gate opens.
pub const GATE_MARKER: &str = "/*gate*/";

/// Blocks gated statements until opened.
#[derive(Clone, Default)]
pub struct Gate {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl Gate {
    #[allow(dead_code)]
    pub fn open(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    fn wait(&self) {
        let (lock, cvar) = &*self.inner;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
    }
}

/// SQLite engine that records every statement it executes.
pub struct RecordingEngine {
    inner: SqliteEngine,
    log: Arc<Mutex<Vec<String>>>,
    gate: Gate,
}

impl Engine for RecordingEngine {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Execution {
        self.log.lock().unwrap().push(sql.to_string());
        if sql.contains(GATE_MARKER) {
            self.gate.wait();
        }
        self.inner.execute(sql, params)
    }

    fn dependencies(&mut self, sql: &str) -> livesql_core::Result<RelationSet> {
        self.inner.dependencies(sql)
    }
}

/// Statement log shared with a running engine.
#[derive(Clone)]
pub struct ExecLog(Arc<Mutex<Vec<String>>>);

impl ExecLog {
    #[allow(dead_code)]
    pub fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn count(&self, sql: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|s| s.as_str() == sql).count()
    }
}

pub struct Fixture {
    pub live: LiveSql,
    #[allow(dead_code)]
    pub log: ExecLog,
    #[allow(dead_code)]
    pub gate: Gate,
}

/// Table `t(id INTEGER PRIMARY KEY, value TEXT)` with rows (1,a) (2,b) (3,c),
/// plus an unrelated table `other(x)`.
#[allow(dead_code)]
pub async fn setup() -> Fixture {
    setup_with_config(LiveConfig::default()).await
}

pub async fn setup_with_config(config: LiveConfig) -> Fixture {
    let mut inner = SqliteEngine::open_in_memory().expect("Failed to open in-memory database");
    for sql in [
        "CREATE TABLE t (id INTEGER PRIMARY KEY, value TEXT)",
        "CREATE TABLE other (x INTEGER)",
        "INSERT INTO t (id, value) VALUES (1, 'a'), (2, 'b'), (3, 'c')",
    ] {
        inner.execute(sql, &[]).result.expect("setup statement failed");
    }

    let log = Arc::new(Mutex::new(Vec::new()));
    let gate = Gate::default();
    let engine = RecordingEngine {
        inner,
        log: Arc::clone(&log),
        gate: gate.clone(),
    };
    let live = LiveSql::open(engine, config).expect("Failed to start serializer");

    Fixture {
        live,
        log: ExecLog(log),
        gate,
    }
}

/// Wait until every statement queued so far, and every callback those
/// statements triggered, has run.
#[allow(dead_code)]
pub async fn barrier(live: &LiveSql) {
    live.query("SELECT 'barrier'", vec![])
        .await
        .expect("barrier statement failed");
}

/// Callback sink collecting updates.
#[derive(Clone, Default)]
pub struct Updates(Arc<Mutex<Vec<livesql_live::LiveUpdate>>>);

#[allow(dead_code)]
impl Updates {
    pub fn callback(&self) -> impl Fn(&livesql_live::LiveUpdate) + Send + Sync + 'static {
        let sink = Arc::clone(&self.0);
        move |update: &livesql_live::LiveUpdate| sink.lock().unwrap().push(update.clone())
    }

    pub fn take(&self) -> Vec<livesql_live::LiveUpdate> {
        std::mem::take(&mut *self.0.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}
