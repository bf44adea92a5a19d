//! Infrastructure layer for chatkeep.
//!
//! Contains the implementations of the traits defined in `chatkeep-core`:
//! the SQLite conversation store, OS keychain and passphrase protectors, the
//! content key manager and the message content cipher.

pub mod config;
pub mod crypto;
pub mod sqlite;
