//! Configuration lookup and store path resolution
//!
//! Tests touching LESSONSTORE_DB / LESSONSTORE_CONFIG are marked #[serial]
//! so they do not race on process environment.

use lessonstore_common::config::{
    resolve_store_path, IntegrityConfig, CONFIG_ENV_VAR, STORE_ENV_VAR,
};
use lessonstore_common::db::DEFAULT_STORE_FILE;
use lessonstore_common::Error;
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
#[serial]
fn test_env_var_beats_config_value() {
    env::set_var(STORE_ENV_VAR, "/tmp/from-env.db");

    let path = resolve_store_path(None, STORE_ENV_VAR, Some(Path::new("config.db")));
    assert_eq!(path, PathBuf::from("/tmp/from-env.db"));

    let path = resolve_store_path(Some(Path::new("cli.db")), STORE_ENV_VAR, None);
    assert_eq!(path, PathBuf::from("cli.db"), "CLI argument must win over env");

    env::remove_var(STORE_ENV_VAR);
}

#[test]
#[serial]
fn test_empty_env_var_is_ignored() {
    env::set_var(STORE_ENV_VAR, "");

    let config = IntegrityConfig::default();
    assert_eq!(config.resolve_store_path(None), PathBuf::from(DEFAULT_STORE_FILE));

    env::remove_var(STORE_ENV_VAR);
}

#[test]
#[serial]
fn test_load_from_env_named_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(
        &path,
        r#"
        log_level = "debug"

        [tags]
        fallback_tag = "unsorted"

        [duplicates]
        normalize_titles = true
        "#,
    )
    .unwrap();

    env::set_var(CONFIG_ENV_VAR, &path);
    let config = IntegrityConfig::load(None).unwrap();
    env::remove_var(CONFIG_ENV_VAR);

    assert_eq!(config.log_level, "debug");
    assert_eq!(config.tags.fallback_tag, "unsorted");
    assert!(config.duplicates.normalize_titles);
    assert_eq!(config.prerequisites.placeholder_prefixes, vec!["bt000000-".to_string()]);
}

#[test]
#[serial]
fn test_explicit_missing_file_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nope.toml");

    match IntegrityConfig::load(Some(&missing)) {
        Err(Error::Config(msg)) => assert!(msg.contains("nope.toml")),
        other => panic!("Expected Config error, got {:?}", other),
    }
}

#[test]
#[serial]
fn test_explicit_file_store_path_is_used() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lessonstore.toml");
    std::fs::write(&path, "store_path = \"corpus/lessons.db\"\n").unwrap();

    env::remove_var(STORE_ENV_VAR);
    let config = IntegrityConfig::load(Some(&path)).unwrap();
    assert_eq!(config.resolve_store_path(None), PathBuf::from("corpus/lessons.db"));
}
