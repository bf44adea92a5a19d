//! Cryptographic operations for chatkeep.
//!
//! - `protector`: wrapping of the content key (OS keychain or passphrase)
//! - `key_manager`: loading, creating and caching the content key
//! - `cipher`: AES-256-CBC encryption of message content

pub mod cipher;
pub mod key_manager;
pub mod protector;
