//! Core types shared across LiveSQL facilities
//!
//! This crate provides foundational types used by the error, logging and
//! live-query layers:
//!
//! - **Identifiers**: RequestId, LiveQueryId, HandleId, SubscriberId
//! - **Sensitive data**: Sensitive<T> marker for automatic redaction
//! - **Schema constants**: Canonical field keys and event names

pub mod correlation;
pub mod schema;
pub mod sensitive;

pub use correlation::{HandleId, LiveQueryId, RequestId, SubscriberId};
pub use sensitive::Sensitive;
