//! Configuration for the looper
//!
//! - Generic YAML config loading/saving ([`load_config`], [`save_config`])
//! - [`LooperConfig`]: load limits, sweep period, level and audio settings
//! - Default config location
//!
//! # Usage
//!
//! ```ignore
//! use sampleloop_core::config::{default_config_path, load_config, LooperConfig};
//!
//! let path = default_config_path("looper.yaml");
//! let config: LooperConfig = load_config(&path);
//! let config = config.normalized();
//! ```

mod io;
mod paths;
mod settings;

pub use io::{load_config, save_config};
pub use paths::{default_config_dir, default_config_path};
pub use settings::LooperConfig;
