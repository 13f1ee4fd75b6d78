//! Configuration system for trawler.
//!
//! Provides TOML-based configuration with:
//! - Storage, crawler, sandbox, retry and generator settings, each with defaults
//! - Seed source lists (`[[sources.awesome_lists]]`, `[[sources.websites]]`)
//! - Config file layering (user config dir + project-local overrides)
//!
//! Every section is optional, so an empty file is a valid config.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, load_config, load_config_file, load_config_with_options,
    user_config_dir, user_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
