//! Configuration system for Tether.
//!
//! Provides TOML-based configuration with:
//! - Backend URL, static API key and project id
//! - Primary cache / durable mirror keys and the expiry safety buffer
//! - Per-query and per-hydration-stage deadlines
//! - Resume warm-up behaviour
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    default_data_dir, load_config, load_config_file, load_config_with_options, save_config,
    xdg_config_dir, xdg_config_path, LoadedConfig,
};
pub use error::{ConfigError, Result};
pub use types::*;
