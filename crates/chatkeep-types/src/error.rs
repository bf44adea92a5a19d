use thiserror::Error;
use uuid::Uuid;

/// Errors from the platform secret protector that wraps the content key.
///
/// These errors never include key material.
#[derive(Debug, Clone, Error)]
pub enum ProtectionError {
    #[error("secret protector unavailable: {0}")]
    Unavailable(String),

    #[error("failed to wrap secret")]
    WrapFailed,

    #[error("failed to unwrap secret")]
    UnwrapFailed,
}

/// Errors from loading or creating the content key.
#[derive(Debug, Clone, Error)]
pub enum KeyError {
    #[error("key protection failed: {0}")]
    Protection(#[from] ProtectionError),

    #[error("key file error: {0}")]
    Io(String),
}

/// Errors from the content cipher.
///
/// IMPORTANT: never carries plaintext or ciphertext in Display/Debug output.
#[derive(Debug, Clone, Error)]
pub enum CipherError {
    #[error("content key unavailable: {0}")]
    Key(#[from] KeyError),

    #[error("encryption failed")]
    Encryption,

    #[error("decryption failed")]
    Decryption,
}

/// Errors from conversation store operations.
///
/// `Clone` so that a single initialization failure can be delivered to every
/// caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Initialization(String),

    #[error("key protection failed: {0}")]
    Protection(String),

    #[error("message encryption failed: {0}")]
    Encryption(String),

    #[error("message {0} could not be decrypted")]
    Decryption(Uuid),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("entity not found")]
    NotFound,
}

impl From<KeyError> for StoreError {
    fn from(err: KeyError) -> Self {
        match err {
            KeyError::Protection(e) => StoreError::Protection(e.to_string()),
            KeyError::Io(e) => StoreError::Storage(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Storage("disk I/O error".to_string());
        assert_eq!(err.to_string(), "storage error: disk I/O error");
    }

    #[test]
    fn test_decryption_error_names_message() {
        let id = Uuid::now_v7();
        let err = StoreError::Decryption(id);
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn test_key_error_maps_to_store_error() {
        let err: StoreError = KeyError::Protection(ProtectionError::WrapFailed).into();
        assert!(matches!(err, StoreError::Protection(_)));

        let err: StoreError = KeyError::Io("permission denied".to_string()).into();
        assert!(matches!(err, StoreError::Storage(msg) if msg == "permission denied"));
    }

    #[test]
    fn test_cipher_error_from_key_error() {
        let err: CipherError = KeyError::Protection(ProtectionError::UnwrapFailed).into();
        assert!(matches!(
            err,
            CipherError::Key(KeyError::Protection(ProtectionError::UnwrapFailed))
        ));

        let err: CipherError = KeyError::Io("is a directory".to_string()).into();
        let err: StoreError = match err {
            CipherError::Key(key) => key.into(),
            other => panic!("unexpected {other:?}"),
        };
        assert!(matches!(err, StoreError::Storage(msg) if msg == "is a directory"));
    }
}
