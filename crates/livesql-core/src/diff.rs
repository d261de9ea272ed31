//! Incremental differ for keyed live queries.
//!
//! [`diff`] compares two snapshots of the same query and reports which rows
//! were added, updated (whole-row replace) or removed, using one column as
//! the row identity. Both sides are indexed once, so the cost is linear in
//! the number of rows.
//!
//! Output order is deterministic: `added` and `updated` follow the order of
//! the current snapshot, `removed` follows the order of the prior one.

use crate::model::{Delta, DiffKey, ResultSnapshot, Row, RowKey};
use livesql_errors::{LiveError, Result};
use std::collections::HashMap;

/// Compute the delta that turns `prior` into `current`.
///
/// # Errors
///
/// - `Consistency`: a key value appears twice within one snapshot
/// - `InvalidInput`: the key column is missing from a non-empty snapshot
pub fn diff(prior: &ResultSnapshot, current: &ResultSnapshot, key: &DiffKey) -> Result<Delta> {
    let current_col = key_column(current, key)?;
    let current_index = index_rows(current, current_col, key)?;

    if prior.is_empty() {
        return Ok(Delta::initial(current));
    }

    let prior_col = key_column(prior, key)?;
    let prior_index = index_rows(prior, prior_col, key)?;
    let same_shape = prior.fields() == current.fields();

    let mut delta = Delta::default();
    for row in current.rows() {
        let row_key = extract_key(row, current_col);
        match prior_index.get(&row_key) {
            None => delta.added.push(row.clone()),
            Some(&i) => {
                let old = &prior.rows()[i];
                if !same_shape || !rows_equal(current, old, row) {
                    delta.updated.push(row.clone());
                }
            }
        }
    }

    for row in prior.rows() {
        let row_key = extract_key(row, prior_col);
        if !current_index.contains_key(&row_key) {
            delta.removed.push(row_key);
        }
    }

    Ok(delta)
}

/// Locate the key column. An empty snapshot without columns (nothing ever
/// ran) is accepted and has no rows to index.
fn key_column(snapshot: &ResultSnapshot, key: &DiffKey) -> Result<usize> {
    match snapshot.column_index(key.column()) {
        Some(i) => Ok(i),
        None if snapshot.is_empty() && snapshot.fields().is_empty() => Ok(0),
        None => Err(LiveError::UnknownKeyColumn {
            column: key.column().to_string(),
        }
        .into()),
    }
}

fn extract_key(row: &Row, column: usize) -> RowKey {
    row.get(column).map(RowKey::from).unwrap_or(RowKey::Null)
}

fn index_rows(
    snapshot: &ResultSnapshot,
    column: usize,
    key: &DiffKey,
) -> Result<HashMap<RowKey, usize>> {
    let mut index = HashMap::with_capacity(snapshot.len());
    for (i, row) in snapshot.rows().iter().enumerate() {
        let row_key = extract_key(row, column);
        if index.contains_key(&row_key) {
            return Err(LiveError::DuplicateRowKey {
                column: key.column().to_string(),
                key: row_key.to_string(),
            }
            .into());
        }
        index.insert(row_key, i);
    }
    Ok(index)
}

fn rows_equal(snapshot: &ResultSnapshot, a: &Row, b: &Row) -> bool {
    a.len() == b.len()
        && a
            .values()
            .iter()
            .zip(b.values())
            .enumerate()
            .all(|(i, (x, y))| snapshot.field_type(i).values_equal(x, y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldDescriptor, FieldType, Value};
    use livesql_errors::ExErrorKind;

    fn kv(rows: &[(i64, &str)]) -> ResultSnapshot {
        ResultSnapshot::new(
            vec![
                FieldDescriptor::new("k", FieldType::Integer),
                FieldDescriptor::new("v", FieldType::Text),
            ],
            rows.iter()
                .map(|(k, v)| Row::new(vec![Value::Integer(*k), Value::from(*v)]))
                .collect(),
        )
    }

    #[test]
    fn test_added_updated_and_unchanged() {
        let prior = kv(&[(1, "a"), (2, "b")]);
        let current = kv(&[(1, "a"), (2, "c"), (3, "d")]);

        let delta = diff(&prior, &current, &DiffKey::from("k")).unwrap();

        assert_eq!(delta.added, kv(&[(3, "d")]).rows().to_vec());
        assert_eq!(delta.updated, kv(&[(2, "c")]).rows().to_vec());
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn test_removed_rows_report_keys_only() {
        let prior = kv(&[(1, "a"), (2, "b"), (3, "c")]);
        let current = kv(&[(2, "b")]);

        let delta = diff(&prior, &current, &DiffKey::from("k")).unwrap();

        assert!(delta.added.is_empty());
        assert!(delta.updated.is_empty());
        assert_eq!(delta.removed, vec![RowKey::from(1), RowKey::from(3)]);
    }

    #[test]
    fn test_duplicate_key_in_current_is_consistency_error() {
        let prior = kv(&[]);
        let current = kv(&[(1, "a"), (1, "b")]);

        let err = diff(&prior, &current, &DiffKey::from("k")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Consistency);
    }

    #[test]
    fn test_duplicate_key_in_prior_is_consistency_error() {
        let prior = kv(&[(1, "a"), (1, "b")]);
        let current = kv(&[(1, "a")]);

        let err = diff(&prior, &current, &DiffKey::from("k")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::Consistency);
    }

    #[test]
    fn test_unknown_key_column() {
        let err = diff(&kv(&[]), &kv(&[(1, "a")]), &DiffKey::from("id")).unwrap_err();
        assert_eq!(err.kind(), ExErrorKind::InvalidInput);
    }

    #[test]
    fn test_empty_prior_yields_initial_delta() {
        let delta = diff(
            &ResultSnapshot::empty(),
            &kv(&[(1, "a"), (2, "b")]),
            &DiffKey::from("k"),
        )
        .unwrap();
        assert_eq!(delta.added.len(), 2);
    }

    #[test]
    fn test_numeric_equality_ignores_storage_class() {
        let fields = vec![
            FieldDescriptor::new("k", FieldType::Integer),
            FieldDescriptor::new("n", FieldType::Numeric),
        ];
        let prior = ResultSnapshot::new(
            fields.clone(),
            vec![Row::new(vec![Value::Integer(1), Value::Integer(5)])],
        );
        let current = ResultSnapshot::new(
            fields,
            vec![Row::new(vec![Value::Integer(1), Value::Real(5.0)])],
        );

        let delta = diff(&prior, &current, &DiffKey::from("k")).unwrap();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_blob_change_detected() {
        let fields = vec![
            FieldDescriptor::new("k", FieldType::Integer),
            FieldDescriptor::new("b", FieldType::Blob),
        ];
        let prior = ResultSnapshot::new(
            fields.clone(),
            vec![Row::new(vec![Value::Integer(1), Value::Blob(vec![0, 1])])],
        );
        let current = ResultSnapshot::new(
            fields,
            vec![Row::new(vec![Value::Integer(1), Value::Blob(vec![0, 2])])],
        );

        let delta = diff(&prior, &current, &DiffKey::from("k")).unwrap();
        assert_eq!(delta.updated.len(), 1);
    }

    #[test]
    fn test_schema_change_replaces_every_kept_row() {
        let prior = kv(&[(1, "a")]);
        let current = ResultSnapshot::new(
            vec![
                FieldDescriptor::new("k", FieldType::Integer),
                FieldDescriptor::new("v", FieldType::Text),
                FieldDescriptor::new("w", FieldType::Text),
            ],
            vec![Row::new(vec![
                Value::Integer(1),
                Value::from("a"),
                Value::Null,
            ])],
        );

        let delta = diff(&prior, &current, &DiffKey::from("k")).unwrap();
        assert_eq!(delta.updated.len(), 1);
    }
}
