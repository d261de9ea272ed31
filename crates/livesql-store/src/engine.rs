//! SQLite-backed engine.

use crate::db;
use crate::errors::{from_rusqlite, statement_error, Result};
use crate::footprint::WriteGraph;
use livesql_core::relations::{classify, normalize_relation, referenced_relations, StatementKind};
use livesql_core::{
    Engine, Execution, FieldDescriptor, FieldType, RelationSet, ResultSnapshot, Row, Touched,
    Value,
};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Engine over one rusqlite connection.
///
/// Tables written by a statement (including writes made by triggers) are
/// collected through the connection's update hook, together with the
/// statement's own targets and any `WITHOUT ROWID` table its writes can
/// reach.
pub struct SqliteEngine {
    conn: Connection,
    written: Arc<Mutex<BTreeSet<String>>>,
    graph: Option<WriteGraph>,
}

impl SqliteEngine {
    /// Wrap an existing connection and install the update hook.
    pub fn new(conn: Connection) -> Self {
        let written = Arc::new(Mutex::new(BTreeSet::new()));
        let sink = Arc::clone(&written);
        conn.update_hook(Some(
            move |_action, _db: &str, table: &str, _rowid: i64| {
                if let Ok(mut set) = sink.lock() {
                    set.insert(normalize_relation(table));
                }
            },
        ));
        Self {
            conn,
            written,
            graph: None,
        }
    }

    /// Open and configure a database file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = db::open(path)?;
        db::configure(&conn)?;
        Ok(Self::new(conn))
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = db::open_in_memory()?;
        db::configure(&conn)?;
        Ok(Self::new(conn))
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn take_written(&self) -> BTreeSet<String> {
        match self.written.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn run(&self, sql: &str, params: &[Value], kind: StatementKind) -> Result<ResultSnapshot> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| statement_error(sql, e))?;

        let fields: Vec<FieldDescriptor> = stmt
            .columns()
            .iter()
            .map(|c| FieldDescriptor::new(c.name(), FieldType::from_declared(c.decl_type())))
            .collect();
        let width = fields.len();

        let mut rows = Vec::new();
        let mut cursor = stmt
            .query(params_from_iter(params.iter().map(SqlParam)))
            .map_err(|e| statement_error(sql, e))?;
        while let Some(row) = cursor.next().map_err(|e| statement_error(sql, e))? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value = row.get_ref(i).map_err(|e| statement_error(sql, e))?;
                values.push(from_value_ref(value));
            }
            rows.push(Row::new(values));
        }
        drop(cursor);
        drop(stmt);

        let snapshot = ResultSnapshot::new(fields, rows);
        Ok(match kind {
            StatementKind::Write => snapshot.with_rows_affected(self.conn.changes() as u64),
            _ => snapshot,
        })
    }

    /// Full touched set of a write: hook output, lexical targets and the
    /// hook-silent tables both can reach.
    fn write_footprint(&mut self, sql: &str, mut touched: BTreeSet<String>) -> Touched {
        match referenced_relations(sql) {
            RelationSet::Known(names) => touched.extend(names),
            RelationSet::Unknown => return Touched::Everything,
        }
        match self.silent_writes(&touched) {
            Ok(Some(silent)) => {
                touched.extend(silent);
                Touched::Relations(touched)
            }
            Ok(None) => Touched::Everything,
            Err(e) => {
                tracing::warn!(err.code = e.code(), "write graph unavailable, touching everything");
                Touched::Everything
            }
        }
    }

    fn silent_writes(&mut self, roots: &BTreeSet<String>) -> Result<Option<BTreeSet<String>>> {
        let stale = match &self.graph {
            Some(graph) => !graph.is_current(&self.conn)?,
            None => true,
        };
        if stale {
            self.graph = Some(WriteGraph::load(&self.conn)?);
        }
        Ok(self.graph.as_ref().and_then(|graph| graph.silent_writes(roots)))
    }

    /// Catalog definition of a view, if `name` is one.
    fn view_sql(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'view' AND lower(name) = ?1",
                [name],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
            .map(Option::flatten)
            .map_err(from_rusqlite)
    }
}

impl Engine for SqliteEngine {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Execution {
        let kind = classify(sql);
        self.take_written();
        let result = self.run(sql, params, kind);
        let written = self.take_written();

        let touched = match kind {
            StatementKind::Read if written.is_empty() => Touched::Nothing,
            StatementKind::Read => Touched::Relations(written),
            // Whole-table deletes and WITHOUT ROWID tables bypass the hook
            StatementKind::Write => self.write_footprint(sql, written),
            StatementKind::Other => Touched::Everything,
        };

        Execution { result, touched }
    }

    fn dependencies(&mut self, sql: &str) -> Result<RelationSet> {
        let RelationSet::Known(direct) = referenced_relations(sql) else {
            return Ok(RelationSet::Unknown);
        };

        let mut resolved = BTreeSet::new();
        let mut pending: Vec<String> = direct.into_iter().collect();
        while let Some(name) = pending.pop() {
            if !resolved.insert(name.clone()) {
                continue;
            }
            if let Some(definition) = self.view_sql(&name)? {
                match referenced_relations(&definition) {
                    RelationSet::Known(inner) => pending.extend(inner),
                    RelationSet::Unknown => return Ok(RelationSet::Unknown),
                }
            }
        }

        Ok(RelationSet::Known(resolved))
    }
}

struct SqlParam<'a>(&'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self.0 {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(r) => ValueRef::Real(*r),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(r) => Value::Real(r),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}
