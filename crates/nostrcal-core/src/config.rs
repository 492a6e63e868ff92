use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_RELAYS;
use crate::policy::{ConnectPolicy, ProbePolicy, QueryPolicy, SignPolicy};
use crate::storage::StorageError;

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: PathBuf,
    pub relays: Vec<String>,
    pub probe: ProbePolicy,
    pub query: QueryPolicy,
    pub connect: ConnectPolicy,
    pub sign: SignPolicy,
}

impl CoreConfig {
    pub fn new<P: AsRef<Path>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            relays: DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect(),
            probe: ProbePolicy::default(),
            query: QueryPolicy::default(),
            connect: ConnectPolicy::default(),
            sign: SignPolicy::default(),
        }
    }

    /// Load `<data_dir>/config.json`, falling back to defaults when the file
    /// does not exist. The returned config always points at `data_dir`.
    pub fn load<P: AsRef<Path>>(data_dir: P) -> Result<Self, StorageError> {
        let data_dir = data_dir.as_ref();
        let path = data_dir.join(CONFIG_FILE);
        let mut config = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<CoreConfig>(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::new(data_dir),
            Err(e) => return Err(e.into()),
        };
        config.data_dir = data_dir.to_path_buf();
        if config.relays.is_empty() {
            config.relays = DEFAULT_RELAYS.iter().map(|r| r.to_string()).collect();
        }
        Ok(config)
    }

    pub fn save(&self) -> Result<(), StorageError> {
        fs::create_dir_all(&self.data_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        fs::write(self.data_dir.join(CONFIG_FILE), json)?;
        Ok(())
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self::new("nostrcal_data")
    }
}
