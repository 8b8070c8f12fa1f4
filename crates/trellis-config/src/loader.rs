//! Configuration Loader
//!
//! Handles loading and merging configuration from multiple sources with proper precedence.

use crate::global::GlobalConfig;
use crate::project::{validate_stack_capacity, ProjectConfig};
use crate::{ConfigError, ConfigResult};
use std::env;
use std::path::{Path, PathBuf};

/// Name of the project configuration file
pub const PROJECT_CONFIG_FILE: &str = "trellis.toml";

/// Default evaluation stack capacity
pub const DEFAULT_STACK_CAPACITY: usize = 1024;

/// Default `tracing` filter directive
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Configuration loader
///
/// Loads configuration from multiple sources and merges them with proper precedence:
/// 1. Global config (~/.trellis/config.toml) - lowest priority
/// 2. Project config (./trellis.toml) - overrides global
/// 3. Environment variables (TRELLIS_*) - overrides project
/// 4. CLI flags - highest priority (handled by caller)
pub struct ConfigLoader {
    /// Cached global config path
    global_config_path: Option<PathBuf>,
}

/// Merged configuration result
#[derive(Debug, Clone)]
pub struct Config {
    /// Project configuration, with environment overrides applied
    pub project: ProjectConfig,

    /// Global configuration
    pub global: GlobalConfig,

    /// Project root directory (where trellis.toml was found)
    pub project_root: Option<PathBuf>,
}

/// Fully resolved settings handed to the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderConfig {
    pub stack_capacity: usize,
    pub debug_render_tree: bool,
    pub always_revalidate: bool,
    pub rehydration: bool,
    pub log_filter: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            stack_capacity: DEFAULT_STACK_CAPACITY,
            debug_render_tree: false,
            always_revalidate: false,
            rehydration: true,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            global_config_path: None,
        }
    }

    /// Use an explicit global config file instead of ~/.trellis/config.toml
    pub fn with_global_config_path(path: impl Into<PathBuf>) -> Self {
        Self {
            global_config_path: Some(path.into()),
        }
    }

    /// Load configuration starting from the given directory
    ///
    /// Walks up the directory tree to find trellis.toml, then loads and merges
    /// global config if it exists.
    pub fn load_from_directory(&mut self, start_dir: &Path) -> ConfigResult<Config> {
        let (project_root, project_config) = self.find_project_config(start_dir)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Load configuration from a specific project config file
    pub fn load_from_file(&mut self, config_path: &Path) -> ConfigResult<Config> {
        let project_config = ProjectConfig::load_from_file(config_path)?;
        let global_config = self.load_global_config().unwrap_or_default();
        let project_config = self.apply_env_overrides(project_config)?;

        let project_root = config_path.parent().map(|p| p.to_path_buf());

        Ok(Config {
            project: project_config,
            global: global_config,
            project_root,
        })
    }

    /// Find project configuration by walking up directory tree
    fn find_project_config(
        &self,
        start_dir: &Path,
    ) -> ConfigResult<(Option<PathBuf>, ProjectConfig)> {
        let mut current = start_dir.to_path_buf();

        loop {
            let config_path = current.join(PROJECT_CONFIG_FILE);

            if config_path.exists() {
                let project_config = ProjectConfig::load_from_file(&config_path)?;
                return Ok((Some(current), project_config));
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Ok((None, ProjectConfig::default())),
            }
        }
    }

    /// Load global configuration from ~/.trellis/config.toml
    fn load_global_config(&mut self) -> ConfigResult<GlobalConfig> {
        let path = match &self.global_config_path {
            Some(path) => path.clone(),
            None => {
                let path = GlobalConfig::global_config_path()?;
                self.global_config_path = Some(path.clone());
                path
            }
        };

        // Global config is optional
        if !path.exists() {
            return Ok(GlobalConfig::default());
        }

        GlobalConfig::load_from_file(&path)
    }

    /// Apply environment variable overrides to project config
    ///
    /// Recognized variables: TRELLIS_DEBUG_RENDER_TREE, TRELLIS_ALWAYS_REVALIDATE,
    /// TRELLIS_STACK_CAPACITY, TRELLIS_LOG
    fn apply_env_overrides(&self, mut config: ProjectConfig) -> ConfigResult<ProjectConfig> {
        if let Ok(value) = env::var("TRELLIS_DEBUG_RENDER_TREE") {
            config.vm.get_or_insert_with(Default::default).debug_render_tree =
                Some(parse_bool(&value));
        }

        if let Ok(value) = env::var("TRELLIS_ALWAYS_REVALIDATE") {
            config.vm.get_or_insert_with(Default::default).always_revalidate =
                Some(parse_bool(&value));
        }

        if let Ok(value) = env::var("TRELLIS_STACK_CAPACITY") {
            let capacity = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidValue {
                    field: "TRELLIS_STACK_CAPACITY".to_string(),
                    reason: format!("'{}' is not a positive integer", value),
                })?;
            validate_stack_capacity(capacity)?;
            config.vm.get_or_insert_with(Default::default).stack_capacity = Some(capacity);
        }

        if let Ok(filter) = env::var("TRELLIS_LOG") {
            if !filter.trim().is_empty() {
                config.logging.get_or_insert_with(Default::default).filter = Some(filter);
            }
        }

        Ok(config)
    }

    /// Get the global configuration directory (~/.trellis)
    pub fn global_config_dir() -> ConfigResult<PathBuf> {
        let home = dirs::home_dir().ok_or(ConfigError::HomeNotFound)?;
        Ok(home.join(".trellis"))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    /// Resolve effective settings (project > global > default)
    pub fn render(&self) -> RenderConfig {
        let mut merged = self.global.defaults.clone();
        merged.merge(&self.project);

        let defaults = RenderConfig::default();
        let vm = merged.vm.unwrap_or_default();

        RenderConfig {
            stack_capacity: vm.stack_capacity.unwrap_or(defaults.stack_capacity),
            debug_render_tree: vm.debug_render_tree.unwrap_or(defaults.debug_render_tree),
            always_revalidate: vm.always_revalidate.unwrap_or(defaults.always_revalidate),
            rehydration: merged
                .rehydration
                .and_then(|r| r.enabled)
                .unwrap_or(defaults.rehydration),
            log_filter: merged
                .logging
                .and_then(|l| l.filter)
                .unwrap_or(defaults.log_filter),
        }
    }

    /// Get the project root directory
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// Whether a trellis.toml was found
    pub fn is_project(&self) -> bool {
        self.project_root.is_some()
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;
    use tempfile::TempDir;

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

    fn isolated_loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader::with_global_config_path(dir.path().join("no-global.toml"))
    }

    #[test]
    #[serial]
    fn test_defaults_without_files() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(temp_dir.path()).unwrap();

        assert_eq!(config.render(), RenderConfig::default());
    }

    #[test]
    #[serial]
    fn test_find_project_config_in_parent() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(PROJECT_CONFIG_FILE),
            "[vm]\nalways_revalidate = true\n",
        )
        .unwrap();
        let nested = temp_dir.path().join("templates").join("partials");
        fs::create_dir_all(&nested).unwrap();

        let mut loader = isolated_loader(&temp_dir);
        let config = loader.load_from_directory(&nested).unwrap();

        assert_eq!(config.project_root(), Some(temp_dir.path()));
        assert!(config.render().always_revalidate);
    }

    #[test]
    #[serial]
    fn test_env_overrides_project() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        fs::write(
            temp_dir.path().join(PROJECT_CONFIG_FILE),
            "[vm]\nstack_capacity = 64\ndebug_render_tree = false\n",
        )
        .unwrap();

        env::set_var("TRELLIS_DEBUG_RENDER_TREE", "yes");
        env::set_var("TRELLIS_STACK_CAPACITY", "128");
        let mut loader = isolated_loader(&temp_dir);
        let render = loader.load_from_directory(temp_dir.path()).unwrap().render();
        clear_env();

        assert!(render.debug_render_tree);
        assert_eq!(render.stack_capacity, 128);
    }

    #[test]
    #[serial]
    fn test_bad_stack_capacity_env() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        env::set_var("TRELLIS_STACK_CAPACITY", "lots");
        let mut loader = isolated_loader(&temp_dir);
        let result = loader.load_from_directory(temp_dir.path());
        clear_env();

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }
}
