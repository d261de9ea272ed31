//! Structured logging facility for LiveSQL
//!
//! This crate provides a canonical logging facility with:
//! - Single initialization point via `init(profile)`
//! - Structured logging macros (`log_op_start!`, `log_op_end!`, `log_op_error!`)
//! - Test capture mode for deterministic assertions
//!
//! # Usage
//!
//! ```rust
//! use livesql_logging::{init, Profile};
//!
//! // Initialize once at application startup
//! init(Profile::Development);
//! ```

pub mod init;
pub mod macros;
pub mod test_capture;

pub use init::{init, Profile};
pub use test_capture::{init_test_capture, CapturedEvent, TestCapture};

// Paths used by the exported macros.
#[doc(hidden)]
pub use livesql_core_types::schema;
#[doc(hidden)]
pub use livesql_errors::ExError;
#[doc(hidden)]
pub use tracing;
