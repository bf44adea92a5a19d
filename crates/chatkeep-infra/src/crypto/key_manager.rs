//! Content key lifecycle: load the wrapped key from disk, or create one.
//!
//! The 32-byte AES key that encrypts message content is stored only in its
//! wrapped form. The first call to [`KeyManager::get_or_create_key`] unwraps
//! it (or generates and persists a new one); every later call returns the
//! cached key without touching the protector or the filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chatkeep_core::gate::InitGate;
use chatkeep_core::protect::SecretProtector;
use chatkeep_types::error::{KeyError, ProtectionError};

use super::protector::random_secret;

/// Content key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;

/// The unwrapped content key.
///
/// Debug output is redacted.
#[derive(Clone, PartialEq, Eq)]
pub struct ContentKey(Arc<[u8; KEY_LEN]>);

impl ContentKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        Self(Arc::new(random_secret()))
    }

    /// Build a key from raw bytes, or `None` if they are not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().ok()?;
        Some(Self(Arc::new(key)))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ContentKey(..)")
    }
}

/// Loads, creates and memoizes the content key.
pub struct KeyManager<P: SecretProtector> {
    key_path: PathBuf,
    protector: Arc<P>,
    cache: InitGate<ContentKey, KeyError>,
}

impl<P: SecretProtector> KeyManager<P> {
    pub fn new(key_path: impl Into<PathBuf>, protector: Arc<P>) -> Self {
        Self {
            key_path: key_path.into(),
            protector,
            cache: InitGate::new(),
        }
    }

    /// Path of the wrapped key file.
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Return the content key, loading or creating it on first use.
    ///
    /// A key file that cannot be unwrapped (corrupt, or wrapped under another
    /// identity) is replaced by a freshly generated key. Content encrypted
    /// under the old key becomes unreadable; this is logged at warn level.
    pub async fn get_or_create_key(&self) -> Result<ContentKey, KeyError> {
        let key_path = self.key_path.clone();
        let protector = Arc::clone(&self.protector);
        self.cache
            .ensure_ready(move || load_or_create(key_path, protector))
            .await
    }

    /// Drop the cached key; the next call reloads it from disk.
    pub fn forget(&self) {
        self.cache.reset();
    }
}

async fn load_or_create<P: SecretProtector>(
    key_path: PathBuf,
    protector: Arc<P>,
) -> Result<ContentKey, KeyError> {
    match tokio::fs::read(&key_path).await {
        Ok(wrapped) => match unwrap_key(Arc::clone(&protector), wrapped).await {
            Ok(key) => {
                tracing::debug!(path = %key_path.display(), "Content key loaded");
                return Ok(key);
            }
            Err(e) => {
                tracing::warn!(
                    path = %key_path.display(),
                    error = %e,
                    "Stored content key is unusable, generating a new one; \
                     messages encrypted under the old key can no longer be read"
                );
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %key_path.display(), "No content key on disk yet");
        }
        Err(e) => {
            return Err(KeyError::Io(format!(
                "failed to read {}: {e}",
                key_path.display()
            )));
        }
    }

    let key = ContentKey::generate();
    let wrapped = wrap_key(protector, key.clone()).await?;

    if let Some(parent) = key_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| KeyError::Io(format!("failed to create {}: {e}", parent.display())))?;
    }
    tokio::fs::write(&key_path, &wrapped)
        .await
        .map_err(|e| KeyError::Io(format!("failed to write {}: {e}", key_path.display())))?;

    tracing::info!(path = %key_path.display(), "Content key created");
    Ok(key)
}

async fn unwrap_key<P: SecretProtector>(
    protector: Arc<P>,
    wrapped: Vec<u8>,
) -> Result<ContentKey, ProtectionError> {
    let bytes = tokio::task::spawn_blocking(move || protector.unwrap(&wrapped))
        .await
        .map_err(|e| ProtectionError::Unavailable(format!("protector task failed: {e}")))??;
    ContentKey::from_bytes(&bytes).ok_or(ProtectionError::UnwrapFailed)
}

async fn wrap_key<P: SecretProtector>(
    protector: Arc<P>,
    key: ContentKey,
) -> Result<Vec<u8>, ProtectionError> {
    tokio::task::spawn_blocking(move || protector.wrap(key.as_bytes()))
        .await
        .map_err(|e| ProtectionError::Unavailable(format!("protector task failed: {e}")))?
}
