//! Engine seam.
//!
//! The serializer owns exactly one [`Engine`] and drives it from a single
//! worker, one statement at a time. Implementations never see concurrent
//! calls and may therefore hold non-`Sync` connection state.

use crate::model::{ResultSnapshot, Value};
use crate::relations::{referenced_relations, RelationSet};
use livesql_errors::Result;
use std::collections::BTreeSet;

/// Relations a statement may have changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Touched {
    /// Pure read; no live query needs to re-run
    Nothing,
    /// Writes confined to these relations (lowercase, unqualified)
    Relations(BTreeSet<String>),
    /// Schema change, transaction control or an unanalyzable statement
    Everything,
}

impl Touched {
    pub fn relations<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Touched::Relations(
            names
                .into_iter()
                .map(|n| crate::relations::normalize_relation(n.as_ref()))
                .collect(),
        )
    }

    /// Whether anything at all may have changed.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Touched::Nothing)
    }
}

/// Outcome of one statement run.
///
/// `touched` is reported even when `result` is an error: a statement may
/// fail after partially applying changes.
#[derive(Debug)]
pub struct Execution {
    pub result: Result<ResultSnapshot>,
    pub touched: Touched,
}

impl Execution {
    pub fn read(result: Result<ResultSnapshot>) -> Self {
        Self {
            result,
            touched: Touched::Nothing,
        }
    }
}

/// A SQL engine driven by the serializer.
pub trait Engine: Send + 'static {
    /// Run one statement with positional parameters.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Execution;

    /// Relations a read statement depends on.
    ///
    /// The default is a lexical scan of the statement text. Engines with a
    /// catalog should override this to resolve views.
    ///
    /// # Errors
    ///
    /// Implementations may fail when catalog lookup fails.
    fn dependencies(&mut self, sql: &str) -> Result<RelationSet> {
        Ok(referenced_relations(sql))
    }
}

impl<E: Engine + ?Sized> Engine for Box<E> {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Execution {
        (**self).execute(sql, params)
    }

    fn dependencies(&mut self, sql: &str) -> Result<RelationSet> {
        (**self).dependencies(sql)
    }
}
