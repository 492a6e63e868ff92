use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nostrcal_core::CoreConfig;
use serde::{Deserialize, Serialize};

/// CLI configuration that can be loaded from a JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CliConfig {
    /// Where session state and `config.json` live
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Relays to use instead of the core configuration's
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relays: Vec<String>,

    /// Keep secrets in the OS keyring instead of the data directory
    #[serde(default)]
    pub keyring: bool,

    /// Credentials for nostr authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

/// Nostr credentials configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    /// nsec (unencrypted) or ncryptsec (encrypted) key
    pub key: String,

    /// Password for ncryptsec decryption (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl CliConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CliConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Core configuration for `data_dir` (flag, then file, then the platform
    /// default) with relay overrides applied.
    pub fn core_config(
        &self,
        data_dir: Option<PathBuf>,
        relays: &[String],
    ) -> Result<CoreConfig> {
        let data_dir = data_dir
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(default_data_dir);
        let mut config = CoreConfig::load(&data_dir)
            .with_context(|| format!("Failed to load configuration from {}", data_dir.display()))?;

        if !relays.is_empty() {
            config.relays = relays.to_vec();
        } else if !self.relays.is_empty() {
            config.relays = self.relays.clone();
        }
        Ok(config)
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("nostrcal")
}
