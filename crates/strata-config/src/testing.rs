//! Test environment abstraction for isolated testing.
//!
//! Provides `TestEnvironment` to manage:
//! - A temporary store root
//! - Global and project config files
//!
//! # Usage
//!
//! ```ignore
//! use strata_config::testing::TestEnvironment;
//!
//! #[test]
//! fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let store = env.open_store().unwrap();
//!     let complete = env.state("complete").unwrap();
//! }
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Context;
use strata_store::{FileState, FileStore};
use tempfile::TempDir;

use crate::Config;

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Isolated test environment with its own store root and config files
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    /// Store root; state directories are created below it
    pub store_root: PathBuf,
    /// Stand-in for `~/.strata/config.toml`
    pub global_config: PathBuf,
    /// Stand-in for `.strata/config.toml`
    pub project_config: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create a new isolated test environment
    pub fn new() -> anyhow::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let root = temp_dir.path();

        let store_root = root.join(format!("store-{test_id}"));
        let global_config = root.join("home/.strata/config.toml");
        let project_config = root.join("project/.strata/config.toml");
        for dir in [&store_root, &root.join("home/.strata"), &root.join("project/.strata")] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        Ok(Self {
            _temp_dir: temp_dir,
            store_root,
            global_config,
            project_config,
            test_id,
        })
    }

    /// Default config pointed at this environment's store root.
    pub fn config(&self) -> Config {
        let mut config = Config::default();
        config.store.root = self.store_root.clone();
        config
    }

    pub fn write_global_config(&self, contents: &str) -> anyhow::Result<()> {
        std::fs::write(&self.global_config, contents).context("Failed to write global config")
    }

    pub fn write_project_config(&self, contents: &str) -> anyhow::Result<()> {
        std::fs::write(&self.project_config, contents).context("Failed to write project config")
    }

    /// Load this environment's config files. Environment variables still
    /// apply.
    pub fn load_config(&self) -> anyhow::Result<Config> {
        Config::load_from(Some(&self.global_config), Some(&self.project_config))
            .context("Failed to load test config")
    }

    pub fn open_store(&self) -> anyhow::Result<FileStore> {
        self.config().open_store().context("Failed to open test store")
    }

    /// State with the given label under this environment's root.
    pub fn state(&self, label: &str) -> anyhow::Result<FileState> {
        let states = self.config().state_set()?;
        states
            .get(label)
            .cloned()
            .with_context(|| format!("No state named {label:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_creates_directories() {
        let env = TestEnvironment::new().unwrap();
        assert!(env.store_root.exists());
        assert!(env.global_config.parent().unwrap().exists());
        assert!(env.project_config.parent().unwrap().exists());
    }

    #[test]
    fn test_environment_has_unique_root() {
        let env1 = TestEnvironment::new().unwrap();
        let env2 = TestEnvironment::new().unwrap();
        assert_ne!(env1.store_root, env2.store_root);
        assert_ne!(env1.test_id, env2.test_id);
    }

    #[test]
    fn test_open_store_creates_states() {
        let env = TestEnvironment::new().unwrap();
        let store = env.open_store().unwrap();
        assert_eq!(store.states().len(), 3);
        assert!(env.store_root.join("incomplete").is_dir());
        assert!(env.state("trash").is_ok());
        assert!(env.state("missing").is_err());
    }
}
