//! Layered settings for the trellis renderer.
//!
//! Three sources feed one [`Config`], each overriding the one before it:
//!
//! | source | location |
//! |---|---|
//! | user defaults | `~/.trellis/config.toml` |
//! | project | nearest `trellis.toml` walking up from the working directory |
//! | environment | `TRELLIS_LOG`, `TRELLIS_STACK_CAPACITY`, `TRELLIS_DEBUG_RENDER_TREE`, `TRELLIS_ALWAYS_REVALIDATE` |
//!
//! Command-line flags are applied by the caller on top of [`RenderConfig`].
//!
//! ```no_run
//! use trellis_config::ConfigLoader;
//! use std::path::Path;
//!
//! # fn main() -> trellis_config::ConfigResult<()> {
//! let render = ConfigLoader::new()
//!     .load_from_directory(Path::new("."))?
//!     .render();
//! assert!(render.stack_capacity > 0);
//! # Ok(())
//! # }
//! ```

pub mod global;
pub mod loader;
pub mod project;

use std::path::PathBuf;
use thiserror::Error;

pub use global::GlobalConfig;
pub use loader::{Config, ConfigLoader, RenderConfig};
pub use project::ProjectConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file {0} does not exist")]
    NotFound(PathBuf),

    #[error("could not read config: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{file} is not valid TOML: {error}")]
    TomlParseError {
        file: PathBuf,
        error: toml::de::Error,
    },

    #[error("bad value for `{field}`: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("cannot locate the home directory")]
    HomeNotFound,
}

pub type ConfigResult<T> = Result<T, ConfigError>;
