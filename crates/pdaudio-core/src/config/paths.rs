//! Standard locations for pdaudio configuration files

use std::path::PathBuf;

/// Directory holding pdaudio configuration
///
/// Returns: `<config_dir>/pdaudio` (e.g. `~/.config/pdaudio` on Linux),
/// falling back to `./pdaudio` when the platform has no config directory.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pdaudio")
}

/// Get the default config file path
///
/// Returns: `<config_dir>/pdaudio/{filename}`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
