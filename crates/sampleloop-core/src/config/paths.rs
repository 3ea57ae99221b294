//! Standard locations for looper configuration files

use std::path::PathBuf;

/// Per-user config directory: `<config dir>/sampleloop`
///
/// Falls back to the current directory when the platform has no config dir.
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sampleloop")
}

/// Default path of a config file, e.g. `default_config_path("looper.yaml")`
pub fn default_config_path(filename: &str) -> PathBuf {
    default_config_dir().join(filename)
}
