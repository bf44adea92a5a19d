//! Store configuration types for chatkeep.
//!
//! `StoreConfig` represents the optional `config.toml` in the data directory.
//! All fields have sensible defaults.

use serde::{Deserialize, Serialize};

/// File layout and protection settings for the conversation store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file name, relative to the data directory.
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Wrapped content key file name, relative to the data directory.
    #[serde(default = "default_key_file")]
    pub key_file: String,

    /// How long a statement waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_secs")]
    pub busy_timeout_secs: u64,

    #[serde(default)]
    pub protection: ProtectionConfig,
}

fn default_database_file() -> String {
    "chats.db".to_string()
}

fn default_key_file() -> String {
    "content_key.dat".to_string()
}

fn default_busy_timeout_secs() -> u64 {
    5
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: default_database_file(),
            key_file: default_key_file(),
            busy_timeout_secs: default_busy_timeout_secs(),
            protection: ProtectionConfig::default(),
        }
    }
}

/// Which mechanism wraps the content key before it is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectionBackend {
    /// OS keychain (macOS Keychain, Secret Service, Windows Credential Manager).
    #[default]
    Keychain,
    /// Passphrase from an environment variable, stretched with Argon2id.
    Passphrase,
}

/// Settings for the secret protector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionConfig {
    #[serde(default)]
    pub backend: ProtectionBackend,

    /// Keychain service name the wrapping secret is stored under.
    #[serde(default = "default_keychain_service")]
    pub keychain_service: String,

    /// Environment variable holding the passphrase for the passphrase backend.
    #[serde(default = "default_passphrase_env")]
    pub passphrase_env: String,
}

fn default_keychain_service() -> String {
    "chatkeep".to_string()
}

fn default_passphrase_env() -> String {
    "CHATKEEP_PASSPHRASE".to_string()
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            backend: ProtectionBackend::default(),
            keychain_service: default_keychain_service(),
            passphrase_env: default_passphrase_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default_values() {
        let config = StoreConfig::default();
        assert_eq!(config.database_file, "chats.db");
        assert_eq!(config.key_file, "content_key.dat");
        assert_eq!(config.busy_timeout_secs, 5);
        assert_eq!(config.protection.backend, ProtectionBackend::Keychain);
        assert_eq!(config.protection.keychain_service, "chatkeep");
    }

    #[test]
    fn test_store_config_deserialize_with_defaults() {
        let config: StoreConfig = toml::from_str("").unwrap();
        assert_eq!(config, StoreConfig::default());
    }

    #[test]
    fn test_store_config_deserialize_with_values() {
        let toml_str = r#"
database_file = "history.db"
busy_timeout_secs = 10

[protection]
backend = "passphrase"
passphrase_env = "MY_PASSPHRASE"
"#;
        let config: StoreConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.database_file, "history.db");
        assert_eq!(config.key_file, "content_key.dat");
        assert_eq!(config.busy_timeout_secs, 10);
        assert_eq!(config.protection.backend, ProtectionBackend::Passphrase);
        assert_eq!(config.protection.passphrase_env, "MY_PASSPHRASE");
        assert_eq!(config.protection.keychain_service, "chatkeep");
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let result: Result<StoreConfig, _> = toml::from_str("[protection]\nbackend = \"dpapi\"\n");
        assert!(result.is_err());
    }
}
