//! Write footprint derived from the schema catalog.
//!
//! SQLite's update hook never fires for `WITHOUT ROWID` tables. Writes that
//! reach one of them directly, through a trigger or through a foreign-key
//! action are therefore recovered from the catalog: every table maps to the
//! tables its writes may cascade into, and the closure over that graph is
//! intersected with the set of hook-silent tables.

use crate::errors::{from_rusqlite, Result};
use livesql_core::relations::{normalize_relation, referenced_relations};
use livesql_core::RelationSet;
use rusqlite::Connection;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub(crate) struct WriteGraph {
    schema_version: i64,
    /// Tables a write to the key may cascade into
    edges: BTreeMap<String, RelationSet>,
    /// Tables the update hook does not report
    silent: BTreeSet<String>,
}

impl WriteGraph {
    pub(crate) fn load(conn: &Connection) -> Result<Self> {
        let schema_version = schema_version(conn)?;
        let mut edges: BTreeMap<String, RelationSet> = BTreeMap::new();
        let mut silent = BTreeSet::new();

        let mut stmt = conn
            .prepare("SELECT name, sql FROM sqlite_master WHERE type = 'table' AND sql IS NOT NULL")
            .map_err(from_rusqlite)?;
        let tables = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(from_rusqlite)?;
        for table in tables {
            let (name, sql) = table.map_err(from_rusqlite)?;
            if is_without_rowid(&sql) {
                silent.insert(normalize_relation(&name));
            }
        }
        drop(stmt);

        let mut stmt = conn
            .prepare(
                "SELECT m.name, f.\"table\" FROM sqlite_master m \
                 JOIN pragma_foreign_key_list(m.name) f WHERE m.type = 'table'",
            )
            .map_err(from_rusqlite)?;
        let references = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(from_rusqlite)?;
        for reference in references {
            let (child, parent) = reference.map_err(from_rusqlite)?;
            let child = RelationSet::from_names([normalize_relation(&child)]);
            add_edge(&mut edges, normalize_relation(&parent), child);
        }
        drop(stmt);

        let mut stmt = conn
            .prepare("SELECT tbl_name, sql FROM sqlite_master WHERE type = 'trigger'")
            .map_err(from_rusqlite)?;
        let triggers = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(from_rusqlite)?;
        for trigger in triggers {
            let (table, sql) = trigger.map_err(from_rusqlite)?;
            let targets = sql
                .as_deref()
                .and_then(trigger_body)
                .map(referenced_relations)
                .unwrap_or(RelationSet::Unknown);
            add_edge(&mut edges, normalize_relation(&table), targets);
        }

        Ok(Self {
            schema_version,
            edges,
            silent,
        })
    }

    /// Whether the catalog changed since this graph was built.
    pub(crate) fn is_current(&self, conn: &Connection) -> Result<bool> {
        Ok(schema_version(conn)? == self.schema_version)
    }

    /// Hook-silent tables a write to `roots` may change.
    ///
    /// `None` when a trigger on the way cannot be analysed.
    pub(crate) fn silent_writes(&self, roots: &BTreeSet<String>) -> Option<BTreeSet<String>> {
        if self.silent.is_empty() {
            return Some(BTreeSet::new());
        }

        let mut seen = BTreeSet::new();
        let mut pending: Vec<String> = roots.iter().cloned().collect();
        while let Some(table) = pending.pop() {
            if !seen.insert(table.clone()) {
                continue;
            }
            match self.edges.get(&table) {
                Some(RelationSet::Known(next)) => pending.extend(next.iter().cloned()),
                Some(RelationSet::Unknown) => return None,
                None => {}
            }
        }

        Some(seen.intersection(&self.silent).cloned().collect())
    }
}

fn schema_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA schema_version", [], |row| row.get(0))
        .map_err(from_rusqlite)
}

fn add_edge(edges: &mut BTreeMap<String, RelationSet>, from: String, to: RelationSet) {
    let merged = match edges.remove(&from) {
        Some(existing) => existing.union(to),
        None => to,
    };
    edges.insert(from, merged);
}

/// Table options follow the closing parenthesis of the column list.
fn is_without_rowid(create_sql: &str) -> bool {
    let options = create_sql
        .rfind(')')
        .map(|end| &create_sql[end + 1..])
        .unwrap_or("");
    let words: Vec<String> = options
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|w| !w.is_empty())
        .map(|w| w.to_ascii_uppercase())
        .collect();
    words.windows(2).any(|pair| pair[0] == "WITHOUT" && pair[1] == "ROWID")
}

/// Statements between `BEGIN` and `END` of a `CREATE TRIGGER`.
fn trigger_body(create_sql: &str) -> Option<&str> {
    let upper = create_sql.to_ascii_uppercase();
    let bytes = upper.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    upper.match_indices("BEGIN").find_map(|(at, _)| {
        let before = at.checked_sub(1).map(|i| bytes[i]);
        let after = bytes.get(at + 5).copied();
        let bounded = !before.is_some_and(is_word) && !after.is_some_and(is_word);
        bounded.then(|| &create_sql[at + 5..])
    })
}
