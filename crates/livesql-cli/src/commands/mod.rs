pub mod query;
pub mod watch;

use livesql_core::Value;
use livesql_live::{LiveConfig, LiveSql};
use livesql_store::SqliteEngine;

pub type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Open a database file behind a fresh serializer.
pub fn open_live(db: &str, config: &LiveConfig) -> Result<LiveSql, Box<dyn std::error::Error>> {
    let engine = SqliteEngine::open(db)?;
    Ok(LiveSql::open(engine, config.clone())?)
}

/// Parse a `--param` argument.
///
/// `null`, integers and reals map to their SQL types; anything else is
/// text. Prefix with `:` to force text (`:42` binds the string "42").
pub fn parse_param(raw: &str) -> Value {
    if let Some(text) = raw.strip_prefix(':') {
        return Value::from(text);
    }
    if raw.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(r) = raw.parse::<f64>() {
        if r.is_finite() {
            return Value::Real(r);
        }
    }
    Value::from(raw)
}
