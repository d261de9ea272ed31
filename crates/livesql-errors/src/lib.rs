//! LiveSQL error facility
//!
//! Two layers, mirroring how errors flow through the system:
//!
//! - [`ExError`] is the canonical structured error. Every public operation
//!   returns it, every log event derives `err.kind` / `err.code` from it, and
//!   it is what subscribers receive when a live query fails.
//! - [`LiveError`] enumerates the specific domain failures raised inside the
//!   workspace. It converts into `ExError` with the right kind and context.

use livesql_core_types::{LiveQueryId, RequestId};
use thiserror::Error;

/// Result type alias using ExError
pub type Result<T> = std::result::Result<T, ExError>;

// ========== Error Facility ==========

/// Canonical error kind taxonomy
///
/// Each kind maps to a stable error code that can be used for programmatic
/// error handling, testing and external reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExErrorKind {
    // Input
    InvalidInput,

    // Engine
    /// A statement failed inside the SQL engine
    Engine,

    // Live queries
    /// Duplicate row identity (or similar) while diffing two snapshots
    Consistency,
    /// The handle was disposed by its consumer
    Disposed,
    /// The handle's live query was torn down
    Detached,
    /// The serializer worker is no longer accepting statements
    SerializerClosed,

    // Integration/IO
    Config,
    Io,
}

impl ExErrorKind {
    /// Get the stable error code for this kind
    pub fn code(&self) -> &'static str {
        match self {
            ExErrorKind::InvalidInput => "ERR_INVALID_INPUT",
            ExErrorKind::Engine => "ERR_ENGINE",
            ExErrorKind::Consistency => "ERR_CONSISTENCY",
            ExErrorKind::Disposed => "ERR_DISPOSED",
            ExErrorKind::Detached => "ERR_DETACHED",
            ExErrorKind::SerializerClosed => "ERR_SERIALIZER_CLOSED",
            ExErrorKind::Config => "ERR_CONFIG",
            ExErrorKind::Io => "ERR_IO",
        }
    }
}

/// Canonical structured error type
///
/// Carries a classification for programmatic handling plus optional
/// context (operation, fingerprint, live query, request) for debugging.
#[derive(Debug, Clone)]
pub struct ExError {
    kind: ExErrorKind,
    op: Option<String>,
    fingerprint: Option<String>,
    live_id: Option<LiveQueryId>,
    request_id: Option<RequestId>,
    message: String,
    source: Option<Box<ExError>>,
}

impl ExError {
    /// Create a new error with the specified kind
    pub fn new(kind: ExErrorKind) -> Self {
        Self {
            kind,
            op: None,
            fingerprint: None,
            live_id: None,
            request_id: None,
            message: String::new(),
            source: None,
        }
    }

    /// Add operation context
    pub fn with_op(mut self, op: impl Into<String>) -> Self {
        self.op = Some(op.into());
        self
    }

    /// Add the SQL text of the query the error belongs to
    pub fn with_fingerprint(mut self, sql: impl Into<String>) -> Self {
        self.fingerprint = Some(sql.into());
        self
    }

    /// Add live query context
    pub fn with_live_id(mut self, live_id: LiveQueryId) -> Self {
        self.live_id = Some(live_id);
        self
    }

    /// Add request ID context
    pub fn with_request_id(mut self, request_id: RequestId) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Add custom message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Add source error
    pub fn with_source(mut self, source: ExError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> ExErrorKind {
        self.kind
    }

    /// Get the stable error code
    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn op(&self) -> Option<&str> {
        self.op.as_deref()
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub fn live_id(&self) -> Option<LiveQueryId> {
        self.live_id
    }

    pub fn request_id(&self) -> Option<&RequestId> {
        self.request_id.as_ref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the source error, if any
    pub fn source_error(&self) -> Option<&ExError> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for ExError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.code())?;
        if let Some(op) = &self.op {
            write!(f, " in operation '{}'", op)?;
        }
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        if let Some(live_id) = &self.live_id {
            write!(f, " (live_id: {})", live_id)?;
        }
        if let Some(sql) = &self.fingerprint {
            write!(f, " (query: {})", sql)?;
        }
        Ok(())
    }
}

impl std::error::Error for ExError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|s| s as &(dyn std::error::Error + 'static))
    }
}

// ========== End Error Facility ==========

/// Domain failures raised by the live-query layer
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveError {
    /// Two rows of one snapshot share a row identity
    #[error("Duplicate row key {key} for column {column}")]
    DuplicateRowKey { column: String, key: String },

    /// The diff key names a column the snapshot does not have
    #[error("Diff key column not found: {column}")]
    UnknownKeyColumn { column: String },

    /// Statement text is empty after normalization
    #[error("Statement text is empty")]
    EmptyStatement,

    /// The handle was disposed
    #[error("Handle {handle} was disposed")]
    HandleDisposed { handle: String },

    /// The handle's live query is no longer registered
    #[error("Live query {live_id} is no longer registered")]
    LiveQueryDetached { live_id: LiveQueryId },

    /// The serializer worker has shut down
    #[error("Serializer is closed")]
    SerializerClosed,

    /// A configuration document could not be read or parsed
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl From<LiveError> for ExError {
    fn from(err: LiveError) -> Self {
        let message = err.to_string();
        match err {
            LiveError::DuplicateRowKey { .. } => ExError::new(ExErrorKind::Consistency)
                .with_op("diff")
                .with_message(message),
            LiveError::UnknownKeyColumn { .. } => ExError::new(ExErrorKind::InvalidInput)
                .with_op("diff")
                .with_message(message),
            LiveError::EmptyStatement => {
                ExError::new(ExErrorKind::InvalidInput).with_message(message)
            }
            LiveError::HandleDisposed { .. } => {
                ExError::new(ExErrorKind::Disposed).with_message(message)
            }
            LiveError::LiveQueryDetached { live_id } => ExError::new(ExErrorKind::Detached)
                .with_live_id(live_id)
                .with_message(message),
            LiveError::SerializerClosed => ExError::new(ExErrorKind::SerializerClosed)
                .with_op("submit")
                .with_message(message),
            LiveError::InvalidConfig { .. } => ExError::new(ExErrorKind::Config)
                .with_op("load_config")
                .with_message(message),
        }
    }
}
