//! Project Configuration (trellis.toml)
//!
//! Handles project-level configuration stored in `trellis.toml` at the project root.

use crate::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Upper bound accepted for `vm.stack_capacity`
pub const MAX_STACK_CAPACITY: usize = 1 << 20;

/// Project configuration from trellis.toml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// VM settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmConfig>,

    /// Rehydration settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rehydration: Option<RehydrationConfig>,

    /// Logging settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// `[vm]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct VmConfig {
    /// Initial capacity of the evaluation stack
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_capacity: Option<usize>,

    /// Install the debug render tree collaborator
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug_render_tree: Option<bool>,

    /// Revalidate every opcode, ignoring cache-group skips
    #[serde(skip_serializing_if = "Option::is_none")]
    pub always_revalidate: Option<bool>,
}

/// `[rehydration]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct RehydrationConfig {
    /// Reuse server-rendered markup when block markers are present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing` env-filter directive, e.g. `trellis=debug`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ProjectConfig {
    /// Load project configuration from a file
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::IoError(e)
            }
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            file: path.to_path_buf(),
            error: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the project configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(capacity) = self.vm.as_ref().and_then(|vm| vm.stack_capacity) {
            validate_stack_capacity(capacity)?;
        }

        if let Some(filter) = self.logging.as_ref().and_then(|l| l.filter.as_deref()) {
            if filter.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "logging.filter".to_string(),
                    reason: "filter cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Merge another project config into this one
    /// Other config takes precedence for non-None values
    pub fn merge(&mut self, other: &ProjectConfig) {
        if let Some(vm) = &other.vm {
            let base = self.vm.get_or_insert_with(VmConfig::default);
            if vm.stack_capacity.is_some() {
                base.stack_capacity = vm.stack_capacity;
            }
            if vm.debug_render_tree.is_some() {
                base.debug_render_tree = vm.debug_render_tree;
            }
            if vm.always_revalidate.is_some() {
                base.always_revalidate = vm.always_revalidate;
            }
        }
        if other.rehydration.is_some() {
            self.rehydration = other.rehydration.clone();
        }
        if other.logging.is_some() {
            self.logging = other.logging.clone();
        }
    }
}

pub(crate) fn validate_stack_capacity(capacity: usize) -> ConfigResult<()> {
    if capacity == 0 || capacity > MAX_STACK_CAPACITY {
        return Err(ConfigError::InvalidValue {
            field: "vm.stack_capacity".to_string(),
            reason: format!("must be between 1 and {}", MAX_STACK_CAPACITY),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let config: ProjectConfig = toml::from_str(
            r#"
[vm]
stack_capacity = 256
debug_render_tree = true

[rehydration]
enabled = false

[logging]
filter = "trellis=trace"
"#,
        )
        .unwrap();

        assert_eq!(config.vm.as_ref().unwrap().stack_capacity, Some(256));
        assert_eq!(config.rehydration.unwrap().enabled, Some(false));
        assert_eq!(
            config.logging.unwrap().filter.as_deref(),
            Some("trellis=trace")
        );
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<ProjectConfig, _> = toml::from_str("[vm]\nturbo = true\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_zero_stack_capacity_invalid() {
        let config = ProjectConfig {
            vm: Some(VmConfig {
                stack_capacity: Some(0),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_merge_keeps_unset_vm_fields() {
        let mut base = ProjectConfig {
            vm: Some(VmConfig {
                stack_capacity: Some(64),
                debug_render_tree: Some(false),
                always_revalidate: None,
            }),
            ..Default::default()
        };
        let other = ProjectConfig {
            vm: Some(VmConfig {
                debug_render_tree: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        base.merge(&other);

        let vm = base.vm.unwrap();
        assert_eq!(vm.stack_capacity, Some(64));
        assert_eq!(vm.debug_render_tree, Some(true));
    }
}
