//! Engine configuration, read from a TOML file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::crypto::{CompressionAlgorithm, HashAlgorithm, ProtectionParams, SymmetricAlgorithm};
use crate::error::{PgpkitError, Result};

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Value of the `Version:` armor header; empty to omit the header
    #[serde(default = "default_armor_version")]
    pub armor_version: String,
    /// Size of the chunks payloads are streamed in
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_symmetric")]
    pub symmetric_algorithm: SymmetricAlgorithm,
    #[serde(default = "default_hash")]
    pub hash_algorithm: HashAlgorithm,
    #[serde(default = "default_compression")]
    pub compression_algorithm: CompressionAlgorithm,
    /// Seconds a cached passphrase survives without being used
    #[serde(default = "default_passphrase_ttl")]
    pub passphrase_ttl_secs: u64,
    /// Upper bound for the delay between cache sweeps
    #[serde(default = "default_sweep_delay")]
    pub sweep_delay_secs: u64,
    /// Directory of the key store (defaults to `<home>/keys`)
    #[serde(default)]
    pub key_store_dir: Option<PathBuf>,
    /// Base URL of the HKP key server
    #[serde(default)]
    pub keyserver_url: Option<String>,
    /// Cipher and S2K settings for newly protected secret keys
    #[serde(default)]
    pub protection: ProtectionParams,
}

fn default_armor_version() -> String {
    format!("pgpkit {}", crate::VERSION)
}

fn default_chunk_size() -> usize {
    1 << 16
}

fn default_symmetric() -> SymmetricAlgorithm {
    SymmetricAlgorithm::Aes256
}

fn default_hash() -> HashAlgorithm {
    HashAlgorithm::Sha256
}

fn default_compression() -> CompressionAlgorithm {
    CompressionAlgorithm::Zlib
}

fn default_passphrase_ttl() -> u64 {
    600
}

fn default_sweep_delay() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            armor_version: default_armor_version(),
            chunk_size: default_chunk_size(),
            symmetric_algorithm: default_symmetric(),
            hash_algorithm: default_hash(),
            compression_algorithm: default_compression(),
            protection: ProtectionParams::default(),
            passphrase_ttl_secs: default_passphrase_ttl(),
            sweep_delay_secs: default_sweep_delay(),
            key_store_dir: None,
            keyserver_url: None,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from TOML text
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(PgpkitError::config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(PgpkitError::config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| PgpkitError::config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&text)
    }

    /// Loads the file if it exists, otherwise returns the defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No configuration file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PgpkitError::config("chunk_size must be positive"));
        }
        if self.hash_algorithm == HashAlgorithm::Md5 || self.protection.hash == HashAlgorithm::Md5 {
            return Err(PgpkitError::config("MD5 cannot be used for new signatures or keys"));
        }
        Ok(())
    }

    pub fn passphrase_ttl(&self) -> Duration {
        Duration::from_secs(self.passphrase_ttl_secs)
    }

    pub fn sweep_delay(&self) -> Duration {
        Duration::from_secs(self.sweep_delay_secs)
    }

    /// Armor `Version:` header value, if any
    pub fn armor_version(&self) -> Option<&str> {
        (!self.armor_version.is_empty()).then_some(self.armor_version.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = EngineConfig::from_toml("chunk_size = 1024\nhash_algorithm = \"Sha512\"\n").unwrap();
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.hash_algorithm, HashAlgorithm::Sha512);
        assert_eq!(config.symmetric_algorithm, SymmetricAlgorithm::Aes256);
        assert_eq!(config.protection, ProtectionParams::default());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig {
            keyserver_url: Some("https://keys.example.org".to_string()),
            ..EngineConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            EngineConfig::from_toml("chunk_size = 0"),
            Err(PgpkitError::Config(_))
        ));
        assert!(EngineConfig::from_toml("hash_algorithm = \"Md5\"").is_err());
        assert!(EngineConfig::from_toml("chunk_size = \"big\"").is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        assert_eq!(EngineConfig::load_or_default(&path).unwrap(), EngineConfig::default());

        let config = EngineConfig {
            armor_version: String::new(),
            ..EngineConfig::default()
        };
        config.save(&path).unwrap();
        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.armor_version(), None);
    }
}
