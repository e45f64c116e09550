//! Configuration for pdaudio
//!
//! - [`EngineConfig`]: channel counts, rate, buffer geometry, startup patch
//! - Generic YAML config loading/saving
//! - Default config paths
//!
//! # Usage
//!
//! ```ignore
//! use pdaudio_core::config::{default_config_path, load_config, save_config, EngineConfig};
//!
//! let path = default_config_path(DEFAULT_CONFIG_FILE);
//! let config: EngineConfig = load_config(&path);
//! save_config(&config, &path)?;
//! ```

mod engine;
mod io;
mod paths;

pub use engine::{ConfigError, EngineConfig, PatchConfig};
pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};

/// File name of the engine configuration inside the config directory
pub const DEFAULT_CONFIG_FILE: &str = "pdaudio.yaml";
