//! SQLite storage layer.
//!
//! A single-connection pool in WAL mode and the conversation store built on it.

pub mod conversation;
pub mod pool;
