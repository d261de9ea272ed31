//! Error handling for livesql-store
//!
//! Maps rusqlite failures onto the shared ExError facility

use livesql_errors::{ExError, ExErrorKind};

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

/// Create an engine error from rusqlite::Error
pub fn from_rusqlite(err: rusqlite::Error) -> ExError {
    ExError::new(ExErrorKind::Engine)
        .with_op("sqlite")
        .with_message(err.to_string())
}

/// Engine error carrying the statement that failed
pub fn statement_error(sql: &str, err: rusqlite::Error) -> ExError {
    from_rusqlite(err).with_op("execute").with_fingerprint(sql)
}
