//! # strata-config
//!
//! Configuration management for Strata.
//!
//! Loads configuration from:
//! 1. `~/.strata/config.toml` (global)
//! 2. `.strata/config.toml` (project-local, overrides global key by key)
//! 3. Environment variables (highest priority)

#[macro_use]
pub mod logging;
pub mod path;
pub mod testing;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strata_store::shard::validate_name;
use strata_store::{FileState, FileStore, FileStoreBuilder, StateSet, StoreConfig, StoreError};

use crate::logging::LogLevel;

pub const ENV_ROOT: &str = "STRATA_ROOT";
pub const ENV_SHARD_ID_LENGTH: &str = "STRATA_SHARD_ID_LENGTH";
pub const ENV_LOG: &str = "STRATA_LOG";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML render error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreSection,
    pub logging: LoggingConfig,
}

/// `[store]`: where the store lives and how it lays out blobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// Parent of all state directories; `~` is expanded.
    pub root: PathBuf,
    /// State directory names under `root`, e.g. `incomplete`, `complete`.
    pub states: Vec<String>,
    #[serde(flatten)]
    pub layout: StoreConfig,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("~/.strata/store"),
            states: vec![
                "incomplete".to_string(),
                "complete".to_string(),
                "trash".to_string(),
            ],
            layout: StoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Config {
    /// Load config from standard locations
    pub fn load() -> Result<Self> {
        let global = Self::global_config_path();
        Self::load_from(global.as_deref(), Some(Path::new(".strata/config.toml")))
    }

    /// Load from explicit global and project files, then apply the
    /// environment. Missing files are skipped.
    pub fn load_from(global: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut table = toml::Table::new();
        for path in [global, project].into_iter().flatten() {
            if let Some(layer) = read_table(path)? {
                log_config_debug!("Loaded config layer", path = path.display().to_string());
                merge(&mut table, layer);
            }
        }

        let mut config: Config = table.try_into()?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Global config path: ~/.strata/config.toml
    pub fn global_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(".strata/config.toml"))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `STRATA_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(root) = lookup(ENV_ROOT) {
            self.store.root = PathBuf::from(root);
        }
        if let Some(len) = lookup(ENV_SHARD_ID_LENGTH) {
            self.store.layout.shard_id_length = len.parse().map_err(|_| {
                ConfigError::Invalid(format!("{ENV_SHARD_ID_LENGTH}={len:?} is not a number"))
            })?;
        }
        if let Some(level) = lookup(ENV_LOG) {
            self.logging.level = level.parse()?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.states.is_empty() {
            return Err(ConfigError::Invalid("store.states is empty".to_string()));
        }
        path::ensure_no_parent_refs(&self.store.root)
            .map_err(|e| ConfigError::Invalid(format!("store.root: {e:#}")))?;
        let mut seen = HashSet::new();
        for name in &self.store.states {
            validate_name(name)?;
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "store.states lists {name:?} twice"
                )));
            }
        }
        self.store.layout.validate()?;
        Ok(())
    }

    /// Generate default config TOML string
    pub fn default_toml() -> Result<String> {
        Ok(toml::to_string_pretty(&Config::default())?)
    }

    /// Absolute store root with `~` expanded.
    pub fn store_root(&self) -> Result<PathBuf> {
        path::absolutize(&self.store.root).map_err(|e| ConfigError::Invalid(format!("{e:#}")))
    }

    /// One state per configured name, in configuration order.
    pub fn state_set(&self) -> Result<StateSet> {
        let root = self.store_root()?;
        Ok(self
            .store
            .states
            .iter()
            .map(|name| FileState::under(&root, name))
            .collect())
    }

    /// Builder preloaded with this config's layout and states.
    pub fn store_builder(&self) -> Result<FileStoreBuilder> {
        let states = self.state_set()?;
        Ok(FileStore::builder(self.store.layout.clone()).states(states.iter().cloned()))
    }

    pub fn open_store(&self) -> Result<FileStore> {
        let store = self.store_builder()?.build()?;
        log_store_info!(
            "Opened file store",
            root = self.store.root.display().to_string(),
            states = self.store.states.len(),
        );
        Ok(store)
    }
}

fn read_table(path: &Path) -> Result<Option<toml::Table>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents.parse()?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Overlay `layer` onto `base`; nested tables merge, everything else is
/// replaced.
fn merge(base: &mut toml::Table, layer: toml::Table) {
    for (key, value) in layer {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(nested)) => {
                merge(existing, nested)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
