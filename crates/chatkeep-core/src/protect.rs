//! SecretProtector trait definition.
//!
//! A secret protector wraps small secrets (the content key) with a mechanism
//! bound to the identity of the user running the process, so the wrapped
//! bytes are safe to persist. It is never used for message content directly.

use std::sync::Arc;

use chatkeep_types::error::ProtectionError;

/// Platform protect/unprotect primitive.
///
/// Implementations live in chatkeep-infra (e.g., `KeychainProtector`).
/// Both calls may block on the OS secret store; async callers should dispatch
/// them with `spawn_blocking`.
pub trait SecretProtector: Send + Sync + 'static {
    /// Wrap `plaintext` so it can be written to disk.
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError>;

    /// Recover bytes produced by [`SecretProtector::wrap`].
    ///
    /// Fails when the bytes were wrapped under a different identity or are
    /// corrupt.
    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, ProtectionError>;
}

impl<P: SecretProtector + ?Sized> SecretProtector for Arc<P> {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        (**self).wrap(plaintext)
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        (**self).unwrap(wrapped)
    }
}
