//! Integration tests for strata-config
//!
//! These tests verify the full config loading pipeline with real file system
//! operations and a store opened from the result.

use std::path::PathBuf;

use strata_config::logging::LogLevel;
use strata_config::testing::TestEnvironment;
use strata_config::{Config, ConfigError};
use strata_store::MetadataType;

/// Test config loading from a real global config file
#[test]
fn test_load_global_config_from_file() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[store]
root = "/custom/strata"
states = ["download", "cache"]
shard_id_length = 1
dir_mode = 0o700

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = Config::load_from(Some(&env.global_config), None).unwrap();
    assert_eq!(config.store.root, PathBuf::from("/custom/strata"));
    assert_eq!(config.store.states, vec!["download", "cache"]);
    assert_eq!(config.store.layout.shard_id_length, 1);
    assert_eq!(config.store.layout.dir_mode, 0o700);
    assert_eq!(config.store.layout.data_file_name, "data");
    assert_eq!(config.logging.level, LogLevel::Debug);
}

/// Test config hierarchy: project config overrides global key by key
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(
        r#"
[store]
root = "/global/strata"
shard_id_length = 3

[logging]
level = "warn"
"#,
    )
    .unwrap();
    env.write_project_config(
        r#"
[store]
root = "/project/strata"
"#,
    )
    .unwrap();

    let config = env.load_config().unwrap();
    assert_eq!(config.store.root, PathBuf::from("/project/strata"));
    assert_eq!(config.store.layout.shard_id_length, 3);
    assert_eq!(config.logging.level, LogLevel::Warn);
}

#[test]
fn test_missing_files_give_defaults() {
    let env = TestEnvironment::new().unwrap();
    let config = env.load_config().unwrap();
    assert_eq!(config.store.states, Config::default().store.states);
}

#[test]
fn test_invalid_layout_is_rejected() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config("[store]\ndir_mode = 0o777\n").unwrap();

    let err = Config::load_from(Some(&env.global_config), None).unwrap_err();
    assert!(matches!(err, ConfigError::Store(_)));
}

#[test]
fn test_malformed_toml_is_reported() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config("[store\nroot = ").unwrap();

    let err = Config::load_from(Some(&env.global_config), None).unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)));
}

/// Test that the rendered default config loads back unchanged
#[test]
fn test_default_toml_loads() {
    let env = TestEnvironment::new().unwrap();
    env.write_global_config(&Config::default_toml().unwrap())
        .unwrap();

    let parsed = Config::load_from(Some(&env.global_config), None).unwrap();
    let mut expected = Config::default();
    expected
        .apply_overrides(|k| std::env::var(k).ok())
        .unwrap();
    assert_eq!(parsed, expected);
}

/// A store opened from config is usable end to end
#[test]
fn test_open_store_from_config() {
    let env = TestEnvironment::new().unwrap();
    let store = env.open_store().unwrap();
    let incomplete = env.state("incomplete").unwrap();
    let complete = env.state("complete").unwrap();
    let refcount = MetadataType::new("_refcount");

    store
        .create_file("abcd", &[incomplete.clone()], &incomplete, 0)
        .unwrap();
    store
        .write_file_metadata("abcd", &[incomplete.clone()], &refcount, &[1])
        .unwrap();
    store
        .move_file("abcd", &[incomplete.clone()], &complete)
        .unwrap();

    assert!(env.store_root.join("complete/ab/cd/abcd/data").is_file());
    assert_eq!(
        store
            .read_file_metadata("abcd", &[complete.clone()], &refcount)
            .unwrap(),
        vec![1]
    );
}
