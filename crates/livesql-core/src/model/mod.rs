pub mod delta;
pub mod fingerprint;
pub mod snapshot;
pub mod value;

pub use delta::{Delta, DiffKey, RowKey};
pub use fingerprint::Fingerprint;
pub use snapshot::{FieldDescriptor, ResultSnapshot, Row};
pub use value::{FieldType, Value};
