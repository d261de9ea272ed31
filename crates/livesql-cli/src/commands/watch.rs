//! Live query watch command
//!
//! Registers a live query, prints its initial results, runs each `--exec`
//! statement in order and prints every update the query receives.
//!
//! Usage: livesql watch --db <PATH> <SQL> [--key <COLUMN>] [--exec <SQL>]...

use super::{open_live, parse_param, CommandResult};
use clap::Args;
use livesql_core::ResultSnapshot;
use livesql_live::{LiveConfig, LiveUpdate};
use serde_json::{json, Value as JsonValue};
use std::io::Write;
use tokio::sync::mpsc;

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// SQLite database file
    #[arg(long, default_value = "livesql.db")]
    pub db: String,

    /// Query to watch
    pub sql: String,

    /// Row identity column; enables incremental deltas
    #[arg(long)]
    pub key: Option<String>,

    /// Statement to run after registering, repeatable
    #[arg(long = "exec")]
    pub exec: Vec<String>,

    /// Positional parameter for the watched query, repeatable
    #[arg(long = "param")]
    pub params: Vec<String>,
}

pub async fn execute(args: WatchArgs, config: &LiveConfig, out: &mut dyn Write) -> CommandResult {
    let live = open_live(&args.db, config)?;
    let params = args.params.iter().map(|p| parse_param(p)).collect();

    let handle = match &args.key {
        Some(key) => live.live_incremental_query(&args.sql, params, key.as_str()).await?,
        None => live.live_query(&args.sql, params).await?,
    };

    let initial = handle.current();
    writeln!(out, "{}", json!({ "initial": initial.snapshot.to_json() }))?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    handle.subscribe(move |update: &LiveUpdate| {
        let _ = tx.send(render_update(update));
    })?;

    for statement in &args.exec {
        live.query(statement, Vec::new()).await?;
    }
    // Everything queued before this has run, re-runs included.
    live.query("SELECT 1", Vec::new()).await?;
    handle.dispose();

    while let Ok(line) = rx.try_recv() {
        writeln!(out, "{}", line)?;
    }
    Ok(())
}

/// One output line per delivered update.
pub fn render_update(update: &LiveUpdate) -> JsonValue {
    match update {
        Ok(results) => match &results.delta {
            Some(delta) => {
                let snapshot: &ResultSnapshot = &results.snapshot;
                json!({
                    "delta": {
                        "added": rows_json(snapshot, &delta.added),
                        "updated": rows_json(snapshot, &delta.updated),
                        "removed": delta.removed,
                    }
                })
            }
            None => json!({ "update": results.snapshot.to_json() }),
        },
        Err(e) => json!({
            "error": { "code": e.code(), "message": e.to_string() }
        }),
    }
}

fn rows_json(snapshot: &ResultSnapshot, rows: &[livesql_core::Row]) -> Vec<JsonValue> {
    rows.iter().map(|r| snapshot.row_to_json(r)).collect()
}
