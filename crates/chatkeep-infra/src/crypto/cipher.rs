//! Message content encryption (AES-256-CBC with PKCS#7 padding).
//!
//! Stored format: `base64(iv (16 bytes) || ciphertext)`, with a fresh random
//! IV per call. Rows written before encryption existed hold raw text; those
//! are recognized and returned unchanged instead of failing.

use std::sync::Arc;

use aes::Aes256;
use aes_gcm::aead::OsRng;
use aes_gcm::aead::rand_core::RngCore;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use cbc::{Decryptor, Encryptor};
use chatkeep_core::protect::SecretProtector;
use chatkeep_types::error::CipherError;
use cipher::block_padding::Pkcs7;
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use super::key_manager::{ContentKey, KeyManager};

/// IV length for AES-CBC.
pub const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Raw text shorter than this and without '=' is never an envelope.
const LEGACY_MAX_LEN: usize = 50;

/// How a stored content value should be read back.
#[derive(Debug, PartialEq, Eq)]
enum Stored<'a> {
    Empty,
    Legacy(&'a str),
    Envelope(Vec<u8>),
}

/// Note: legacy text of 50+ characters that happens to be valid, block-aligned
/// base64 is read as an envelope, and is skipped if it fails to decrypt.
fn classify(stored: &str) -> Stored<'_> {
    if stored.is_empty() {
        return Stored::Empty;
    }
    if is_legacy_plaintext(stored) {
        return Stored::Legacy(stored);
    }
    match BASE64.decode(stored) {
        Ok(raw) if raw.len() >= IV_LEN + BLOCK_LEN && (raw.len() - IV_LEN) % BLOCK_LEN == 0 => {
            Stored::Envelope(raw)
        }
        _ => Stored::Legacy(stored),
    }
}

/// Whether `stored` is short raw text that predates encryption.
///
/// Every envelope is at least 44 base64 characters and ends in '=' or is
/// 64+ characters long, so it never matches.
pub fn is_legacy_plaintext(stored: &str) -> bool {
    !stored.contains('=') && stored.len() < LEGACY_MAX_LEN
}

/// Encrypt `plaintext` under `key`. Empty input yields empty output.
pub fn seal(key: &ContentKey, plaintext: &str) -> Result<String, CipherError> {
    if plaintext.is_empty() {
        return Ok(String::new());
    }

    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let data = plaintext.as_bytes();
    let padded_len = (data.len() / BLOCK_LEN + 1) * BLOCK_LEN;
    let mut out = vec![0u8; IV_LEN + padded_len];
    out[..IV_LEN].copy_from_slice(&iv);
    out[IV_LEN..IV_LEN + data.len()].copy_from_slice(data);

    let ciphertext_len = Encryptor::<Aes256>::new_from_slices(key.as_bytes(), &iv)
        .map_err(|_| CipherError::Encryption)?
        .encrypt_padded_mut::<Pkcs7>(&mut out[IV_LEN..], data.len())
        .map_err(|_| CipherError::Encryption)?
        .len();
    out.truncate(IV_LEN + ciphertext_len);

    Ok(BASE64.encode(out))
}

/// Decrypt a stored value under `key`.
///
/// Empty input and legacy plaintext are returned unchanged. Padding or UTF-8
/// failure (wrong key, tampered bytes) is [`CipherError::Decryption`].
pub fn open(key: &ContentKey, stored: &str) -> Result<String, CipherError> {
    match classify(stored) {
        Stored::Empty => Ok(String::new()),
        Stored::Legacy(text) => Ok(text.to_string()),
        Stored::Envelope(raw) => open_envelope(key, raw),
    }
}

fn open_envelope(key: &ContentKey, mut raw: Vec<u8>) -> Result<String, CipherError> {
    let (iv, body) = raw.split_at_mut(IV_LEN);
    let plaintext = Decryptor::<Aes256>::new_from_slices(key.as_bytes(), iv)
        .map_err(|_| CipherError::Decryption)?
        .decrypt_padded_mut::<Pkcs7>(body)
        .map_err(|_| CipherError::Decryption)?;

    String::from_utf8(plaintext.to_vec()).map_err(|_| CipherError::Decryption)
}

/// Encrypts and decrypts message content with the managed content key.
///
/// The key is fetched lazily: empty and legacy values never touch it.
pub struct ContentCipher<P: SecretProtector> {
    keys: Arc<KeyManager<P>>,
}

impl<P: SecretProtector> ContentCipher<P> {
    pub fn new(keys: Arc<KeyManager<P>>) -> Self {
        Self { keys }
    }

    pub fn keys(&self) -> &KeyManager<P> {
        &self.keys
    }

    pub async fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let key = self.keys.get_or_create_key().await?;
        seal(&key, plaintext)
    }

    pub async fn decrypt(&self, stored: &str) -> Result<String, CipherError> {
        match classify(stored) {
            Stored::Empty => Ok(String::new()),
            Stored::Legacy(text) => Ok(text.to_string()),
            Stored::Envelope(raw) => {
                let key = self.keys.get_or_create_key().await?;
                open_envelope(&key, raw)
            }
        }
    }
}
