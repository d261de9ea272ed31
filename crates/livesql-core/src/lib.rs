//! LiveSQL Core - data model and pure algorithms for live queries
//!
//! This crate provides the engine-independent building blocks:
//! - Values, field descriptors, rows and immutable result snapshots
//! - Query fingerprints used to deduplicate live queries
//! - The incremental differ producing keyed row deltas
//! - Lexical relation analysis used for invalidation
//! - The `Engine` seam the serializer drives

pub mod diff;
pub mod engine;
pub mod model;
pub mod relations;

// Re-export commonly used types
pub use diff::diff;
pub use engine::{Engine, Execution, Touched};
pub use livesql_errors::{ExError, ExErrorKind, LiveError, Result};
pub use model::{
    Delta, DiffKey, FieldDescriptor, FieldType, Fingerprint, ResultSnapshot, Row, RowKey, Value,
};
pub use relations::RelationSet;
