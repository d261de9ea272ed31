//! LiveSQL Store - SQLite engine for live queries
//!
//! Provides:
//! - Connection helpers (open, in-memory, pragmas)
//! - `SqliteEngine`, an [`Engine`](livesql_core::Engine) backed by rusqlite
//!   that reports touched tables through SQLite's update hook and the
//!   catalog's trigger and foreign-key graph, and resolves view
//!   dependencies from the schema catalog

pub mod db;
pub mod engine;
pub mod errors;
mod footprint;

// Re-export key types
pub use engine::SqliteEngine;
pub use errors::Result;
