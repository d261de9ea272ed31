//! Query-building macros.

/// Build a [`QuerySource`](crate::QuerySource) from a template and values.
///
/// Every `{}` becomes a positional parameter bound to the next value, so
/// values are never spliced into the statement text. Evaluates to
/// `Result<QuerySource>`; see [`QuerySource::template`](crate::QuerySource::template).
///
/// # Example
///
/// ```
/// # use livesql_live::live_sql;
/// let id = 7_i64;
/// let source = live_sql!("SELECT * FROM t WHERE id = {} AND value <> {}", id, "x").unwrap();
/// assert_eq!(source.statement(), Some("SELECT * FROM t WHERE id = ?1 AND value <> ?2"));
/// ```
#[macro_export]
macro_rules! live_sql {
    ($template:expr $(,)?) => {
        $crate::QuerySource::template($template, ::std::vec::Vec::new())
    };
    ($template:expr, $($value:expr),+ $(,)?) => {
        $crate::QuerySource::template(
            $template,
            ::std::vec![$($crate::livesql_core::Value::from($value)),+],
        )
    };
}
