//! Configuration loading and precedence tests

use pretty_assertions::assert_eq;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use trellis_config::{ConfigError, ConfigLoader, ProjectConfig, RenderConfig};

fn create_config_file(dir: &Path, content: &str) -> PathBuf {
    let config_path = dir.join("trellis.toml");
    fs::write(&config_path, content).unwrap();
    config_path
}

fn loader_with_global(dir: &Path, content: Option<&str>) -> ConfigLoader {
    let path = dir.join("global.toml");
    if let Some(content) = content {
        fs::write(&path, content).unwrap();
    }
    ConfigLoader::with_global_config_path(path)
}

fn clear_env() {
    for key in [
        "TRELLIS_DEBUG_RENDER_TREE",
        "TRELLIS_ALWAYS_REVALIDATE",
        "TRELLIS_STACK_CAPACITY",
        "TRELLIS_LOG",
    ] {
        env::remove_var(key);
    }
}

// ============================================================================
// Config Loading Tests
// ============================================================================

#[test]
#[serial]
fn test_load_when_no_config_exists() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let mut loader = loader_with_global(temp_dir.path(), None);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(!config.is_project());
    assert_eq!(config.render(), RenderConfig::default());
}

#[test]
#[serial]
fn test_load_with_empty_config() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "");

    let mut loader = loader_with_global(temp_dir.path(), None);
    let config = loader.load_from_directory(temp_dir.path()).unwrap();

    assert!(config.is_project());
    assert_eq!(config.render(), RenderConfig::default());
}

#[test]
#[serial]
fn test_load_from_explicit_file() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[rehydration]\nenabled = false\n");

    let mut loader = loader_with_global(temp_dir.path(), None);
    let config = loader.load_from_file(&path).unwrap();

    assert!(!config.render().rehydration);
}

#[test]
fn test_missing_explicit_file_is_not_found() {
    let temp_dir = TempDir::new().unwrap();
    let mut loader = loader_with_global(temp_dir.path(), None);
    let result = loader.load_from_file(&temp_dir.path().join("nope.toml"));

    assert!(matches!(result, Err(ConfigError::NotFound(_))));
}

#[test]
fn test_invalid_toml_reports_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = create_config_file(temp_dir.path(), "[vm\nstack_capacity = 1");

    match ProjectConfig::load_from_file(&path) {
        Err(ConfigError::TomlParseError { file, .. }) => assert_eq!(file, path),
        other => panic!("expected parse error, got {:?}", other),
    }
}

// ============================================================================
// Precedence Tests
// ============================================================================

#[test]
#[serial]
fn test_project_overrides_global() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[logging]\nfilter = \"trellis=trace\"\n");

    let mut loader = loader_with_global(
        temp_dir.path(),
        Some("[logging]\nfilter = \"info\"\n[vm]\nstack_capacity = 32\n"),
    );
    let render = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .render();

    assert_eq!(render.log_filter, "trellis=trace");
    assert_eq!(render.stack_capacity, 32);
}

#[rstest]
#[case("1", true)]
#[case("true", true)]
#[case("YES", true)]
#[case("0", false)]
#[case("off", false)]
#[serial]
fn test_always_revalidate_env(#[case] value: &str, #[case] expected: bool) {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[vm]\nalways_revalidate = false\n");

    env::set_var("TRELLIS_ALWAYS_REVALIDATE", value);
    let mut loader = loader_with_global(temp_dir.path(), None);
    let render = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .render();
    clear_env();

    assert_eq!(render.always_revalidate, expected);
}

#[test]
#[serial]
fn test_log_env_overrides_project() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[logging]\nfilter = \"warn\"\n");

    env::set_var("TRELLIS_LOG", "trellis_runtime=debug");
    let mut loader = loader_with_global(temp_dir.path(), None);
    let render = loader
        .load_from_directory(temp_dir.path())
        .unwrap()
        .render();
    clear_env();

    assert_eq!(render.log_filter, "trellis_runtime=debug");
}

#[test]
#[serial]
fn test_stack_capacity_out_of_range() {
    clear_env();
    let temp_dir = TempDir::new().unwrap();
    create_config_file(temp_dir.path(), "[vm]\nstack_capacity = 0\n");

    let mut loader = loader_with_global(temp_dir.path(), None);
    let result = loader.load_from_directory(temp_dir.path());

    assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
}
