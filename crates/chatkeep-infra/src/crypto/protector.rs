//! Secret protectors that wrap the content key before it touches disk.
//!
//! Wrapping uses AES-256-GCM with a random nonce under a per-user wrapping
//! secret. Where that secret lives decides which identity can unwrap:
//! - `KeychainProtector`: in the OS keychain (macOS Keychain, Secret Service,
//!   Windows Credential Manager), created on first wrap
//! - `StaticKeyProtector`: supplied by the caller, either raw or derived from
//!   a passphrase with Argon2id
//!
//! Wrapped format: `nonce (12 bytes) || ciphertext || tag`
//!
//! SECURITY: Error types never contain plaintext or key material.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use chatkeep_core::protect::SecretProtector;
use chatkeep_types::error::ProtectionError;

/// Nonce size for AES-256-GCM (96 bits / 12 bytes).
const NONCE_SIZE: usize = 12;

/// Default keychain service name for the wrapping secret.
pub const DEFAULT_KEYCHAIN_SERVICE: &str = "chatkeep";
/// Keychain account holding the wrapping secret.
const KEYCHAIN_ACCOUNT: &str = "content-key-wrap";

/// AES-256-GCM wrapping under a 32-byte secret.
struct WrappingCipher {
    cipher: Aes256Gcm,
}

impl WrappingCipher {
    fn new(secret: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(secret.into()),
        }
    }

    /// Returns `nonce (12 bytes) || ciphertext`, with a fresh nonce per call.
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| ProtectionError::WrapFailed)?;

        let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    fn open(&self, data: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        if data.len() < NONCE_SIZE {
            return Err(ProtectionError::UnwrapFailed);
        }

        let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ProtectionError::UnwrapFailed)
    }
}

/// Protector whose wrapping secret is held by the caller.
///
/// Useful on headless hosts without a keychain daemon, and in tests.
pub struct StaticKeyProtector {
    cipher: WrappingCipher,
}

impl StaticKeyProtector {
    /// Create a protector from a raw 32-byte wrapping secret.
    pub fn new(secret: &[u8; 32]) -> Self {
        Self {
            cipher: WrappingCipher::new(secret),
        }
    }

    /// Derive the wrapping secret from a passphrase using Argon2id.
    ///
    /// OWASP parameters: 19 MiB memory, 2 iterations, parallelism 1. The salt
    /// is fixed so the same passphrase always unwraps the same key file.
    pub fn from_passphrase(passphrase: &str) -> Result<Self, ProtectionError> {
        use argon2::{Algorithm, Argon2, Params, Version};

        let params = Params::new(19456, 2, 1, Some(32))
            .map_err(|_| ProtectionError::Unavailable("invalid key derivation parameters".to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let salt = b"chatkeep-wrap-v1";
        let mut secret = [0u8; 32];
        argon2
            .hash_password_into(passphrase.as_bytes(), salt, &mut secret)
            .map_err(|_| ProtectionError::Unavailable("key derivation failed".to_string()))?;

        Ok(Self::new(&secret))
    }
}

impl SecretProtector for StaticKeyProtector {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        self.cipher.seal(plaintext)
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        self.cipher.open(wrapped)
    }
}

/// Protector backed by a wrapping secret in the OS keychain.
///
/// The secret is stored as a hex string (64 hex chars = 32 bytes) under
/// service=`{service}` account="content-key-wrap". It is created by the first
/// `wrap`; `unwrap` never creates it, so a profile without the entry cannot
/// unwrap anything.
pub struct KeychainProtector {
    service: String,
}

impl KeychainProtector {
    /// Create a KeychainProtector with the default service name "chatkeep".
    pub fn new() -> Self {
        Self::with_service(DEFAULT_KEYCHAIN_SERVICE)
    }

    /// Create a KeychainProtector with a custom service name.
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry, ProtectionError> {
        keyring::Entry::new(&self.service, KEYCHAIN_ACCOUNT)
            .map_err(|e| ProtectionError::Unavailable(e.to_string()))
    }

    /// Load the wrapping secret, or `None` if this profile has none yet.
    fn load_secret(&self) -> Result<Option<[u8; 32]>, ProtectionError> {
        match self.entry()?.get_password() {
            Ok(hex_secret) => decode_secret(&hex_secret).map(Some),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ProtectionError::Unavailable(e.to_string())),
        }
    }

    fn load_or_create_secret(&self) -> Result<[u8; 32], ProtectionError> {
        if let Some(secret) = self.load_secret()? {
            return Ok(secret);
        }

        tracing::info!(service = %self.service, "Creating keychain wrapping secret");
        let secret = random_secret();
        self.entry()?
            .set_password(&hex_encode(&secret))
            .map_err(|e| ProtectionError::Unavailable(e.to_string()))?;
        Ok(secret)
    }
}

impl Default for KeychainProtector {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretProtector for KeychainProtector {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let secret = self.load_or_create_secret()?;
        WrappingCipher::new(&secret).seal(plaintext)
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        let secret = self.load_secret()?.ok_or(ProtectionError::UnwrapFailed)?;
        WrappingCipher::new(&secret).open(wrapped)
    }
}

/// Protector selected by configuration.
pub enum ConfiguredProtector {
    Keychain(KeychainProtector),
    Static(StaticKeyProtector),
}

impl SecretProtector for ConfiguredProtector {
    fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        match self {
            ConfiguredProtector::Keychain(p) => p.wrap(plaintext),
            ConfiguredProtector::Static(p) => p.wrap(plaintext),
        }
    }

    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, ProtectionError> {
        match self {
            ConfiguredProtector::Keychain(p) => p.unwrap(wrapped),
            ConfiguredProtector::Static(p) => p.unwrap(wrapped),
        }
    }
}

/// Generate 32 random bytes using the OS CSPRNG.
pub(crate) fn random_secret() -> [u8; 32] {
    use aes_gcm::aead::rand_core::RngCore;
    let mut secret = [0u8; 32];
    OsRng.fill_bytes(&mut secret);
    secret
}

fn decode_secret(hex_secret: &str) -> Result<[u8; 32], ProtectionError> {
    let bytes = hex_decode(hex_secret)
        .map_err(|_| ProtectionError::Unavailable("corrupted secret in keychain".to_string()))?;
    bytes
        .try_into()
        .map_err(|_| ProtectionError::Unavailable("invalid secret length in keychain".to_string()))
}

/// Hex-encode bytes to string.
fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Hex-decode a string to bytes.
fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    if s.len() % 2 != 0 {
        return Err("odd length hex string".to_string());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            s.get(i..i + 2)
                .ok_or_else(|| format!("invalid hex at position {i}"))
                .and_then(|pair| {
                    u8::from_str_radix(pair, 16)
                        .map_err(|e| format!("invalid hex at position {i}: {e}"))
                })
        })
        .collect()
}
