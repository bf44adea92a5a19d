//! Shared domain types for chatkeep.
//!
//! Conversations, messages, the error taxonomy of the persistence layer and
//! its configuration shape.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod conversation;
pub mod error;
