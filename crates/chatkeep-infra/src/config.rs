//! Store configuration loader for chatkeep.
//!
//! Reads `config.toml` from the data directory and deserializes it into
//! [`StoreConfig`]. Falls back to defaults when the file is missing or
//! malformed.

use std::path::{Path, PathBuf};

use chatkeep_types::config::{ProtectionBackend, ProtectionConfig, StoreConfig};
use chatkeep_types::error::ProtectionError;

use crate::crypto::protector::{ConfiguredProtector, KeychainProtector, StaticKeyProtector};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "CHATKEEP_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `CHATKEEP_DATA_DIR` environment variable
/// 2. Platform data directory (e.g., `~/.local/share/chatkeep` on Linux)
/// 3. `~/.chatkeep`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(data) = dirs::data_dir() {
        return data.join("chatkeep");
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".chatkeep");
    }

    // Last resort: current directory
    PathBuf::from(".chatkeep")
}

/// Load store configuration from `{data_dir}/config.toml`.
///
/// - If the file does not exist, returns [`StoreConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and returns the default.
pub async fn load_store_config(data_dir: &Path) -> StoreConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config.toml found at {}, using defaults", config_path.display());
            return StoreConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return StoreConfig::default();
        }
    };

    match toml::from_str::<StoreConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            tracing::warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            StoreConfig::default()
        }
    }
}

/// Build the secret protector selected by `[protection]`.
///
/// The passphrase backend fails with `Unavailable` when its environment
/// variable is unset or empty.
pub fn build_protector(config: &ProtectionConfig) -> Result<ConfiguredProtector, ProtectionError> {
    match config.backend {
        ProtectionBackend::Keychain => Ok(ConfiguredProtector::Keychain(
            KeychainProtector::with_service(&config.keychain_service),
        )),
        ProtectionBackend::Passphrase => {
            let passphrase = std::env::var(&config.passphrase_env)
                .ok()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    ProtectionError::Unavailable(format!("{} is not set", config.passphrase_env))
                })?;
            Ok(ConfiguredProtector::Static(StaticKeyProtector::from_passphrase(
                &passphrase,
            )?))
        }
    }
}
