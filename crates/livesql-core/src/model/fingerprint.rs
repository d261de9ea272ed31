//! Query fingerprints.
//!
//! Two live query requests share one registry record iff their fingerprints
//! are equal: identical normalized SQL text and pairwise same-value
//! parameters.

use crate::model::value::Value;
use livesql_errors::{LiveError, Result};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Normalized SQL text plus ordered parameters.
#[derive(Clone)]
pub struct Fingerprint {
    sql: Arc<str>,
    params: Arc<[Value]>,
}

impl Fingerprint {
    /// Build a fingerprint, rejecting statements that are empty after
    /// normalization.
    pub fn new(sql: &str, params: Vec<Value>) -> Result<Self> {
        let normalized = normalize_sql(sql);
        if normalized.is_empty() {
            return Err(LiveError::EmptyStatement.into());
        }
        Ok(Self {
            sql: Arc::from(normalized),
            params: Arc::from(params),
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }
}

/// Trim surrounding whitespace and trailing statement terminators.
///
/// Interior text is left untouched: collapsing whitespace would also
/// rewrite string literals.
pub fn normalize_sql(sql: &str) -> &str {
    sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace())
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.sql == other.sql
            && self.params.len() == other.params.len()
            && self
                .params
                .iter()
                .zip(other.params.iter())
                .all(|(a, b)| a.same_value(b))
    }
}

impl Eq for Fingerprint {}

impl Hash for Fingerprint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sql.hash(state);
        self.params.len().hash(state);
        for p in self.params.iter() {
            p.hash_same_value(state);
        }
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Parameters may hold user data; only their count is shown.
        f.debug_struct("Fingerprint")
            .field("sql", &self.sql)
            .field("params", &self.params.len())
            .finish()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livesql_errors::ExErrorKind;
    use std::collections::HashSet;

    #[test]
    fn test_normalization_trims_terminators() {
        assert_eq!(normalize_sql("  SELECT 1 ;\n"), "SELECT 1");
        assert_eq!(normalize_sql("SELECT ';'"), "SELECT ';'");
    }

    #[test]
    fn test_equal_fingerprints_hash_together() {
        let a = Fingerprint::new("SELECT * FROM t WHERE id = ?", vec![Value::Integer(1)]).unwrap();
        let b = Fingerprint::new("SELECT * FROM t WHERE id = ?;", vec![Value::Integer(1)]).unwrap();
        let c = Fingerprint::new("SELECT * FROM t WHERE id = ?", vec![Value::Integer(2)]).unwrap();

        let set: HashSet<Fingerprint> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&a));
    }

    #[test]
    fn test_params_compare_by_value_not_kind() {
        let a = Fingerprint::new("SELECT ?", vec![Value::Integer(1)]).unwrap();
        let b = Fingerprint::new("SELECT ?", vec![Value::Real(1.0)]).unwrap();
        assert_ne!(a, b);

        let nan_a = Fingerprint::new("SELECT ?", vec![Value::Real(f64::NAN)]).unwrap();
        let nan_b = Fingerprint::new("SELECT ?", vec![Value::Real(f64::NAN)]).unwrap();
        assert_eq!(nan_a, nan_b);
    }

    #[test]
    fn test_empty_statement_rejected() {
        let err = Fingerprint::new("  ;; ", vec![]).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_debug_hides_params() {
        let fp = Fingerprint::new("SELECT ?", vec![Value::from("secret")]).unwrap();
        assert!(!format!("{:?}", fp).contains("secret"));
    }
}
