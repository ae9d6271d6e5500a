use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
    str::FromStr,
};

use crate::{
    error::TetherError,
    schema::{Registry, SchemaDeclaration},
};

pub const DEFAULT_CONFIG_FILE: &str = "tether.toml";
pub const DEFAULT_DB_FILE: &str = "tether.db";
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Upper bound on any single store call.
    pub timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from(DEFAULT_DB_FILE),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

/// Contents of `tether.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TetherConfig {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub tables: SchemaDeclaration,
}

impl TetherConfig {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<TetherConfig, TetherError> {
        tracing::debug!("Reading config from: {:?}", path.as_ref());
        let content = read_to_string(path)?;
        content.parse()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), TetherError> {
        let toml_string = toml::to_string(self)?;
        write(path, toml_string)?;
        Ok(())
    }

    /// A relative store path resolves against the directory holding the config file.
    pub fn store_path<P: AsRef<Path>>(&self, config_path: P) -> PathBuf {
        if self.store.path.is_absolute() {
            return self.store.path.clone();
        }
        match config_path.as_ref().parent() {
            Some(dir) => dir.join(&self.store.path),
            None => self.store.path.clone(),
        }
    }

    pub fn registry(&self) -> Result<Registry, TetherError> {
        Registry::build(&self.tables)
    }
}

impl FromStr for TetherConfig {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
