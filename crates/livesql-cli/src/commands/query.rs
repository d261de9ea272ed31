//! One-shot statement command
//!
//! Usage: livesql query --db <PATH> <SQL> [--param <VALUE>]...

use super::{open_live, parse_param, CommandResult};
use clap::Args;
use livesql_live::LiveConfig;
use std::io::Write;

#[derive(Debug, Args)]
pub struct QueryArgs {
    /// SQLite database file
    #[arg(long, default_value = "livesql.db")]
    pub db: String,

    /// Statement to run
    pub sql: String,

    /// Positional parameter, repeatable
    #[arg(long = "param")]
    pub params: Vec<String>,
}

pub async fn execute(args: QueryArgs, config: &LiveConfig, out: &mut dyn Write) -> CommandResult {
    let live = open_live(&args.db, config)?;
    let params = args.params.iter().map(|p| parse_param(p)).collect();

    let snapshot = live.query(&args.sql, params).await?;

    let mut json = snapshot.to_json();
    json["rows_affected"] = serde_json::json!(snapshot.rows_affected());
    writeln!(out, "{}", json)?;
    Ok(())
}
