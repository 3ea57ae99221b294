//! Looper settings

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::types::{DEFAULT_MAX_DURATION_SECS, DEFAULT_SWEEP_INTERVAL_MS, MIN_SWEEP_INTERVAL_MS};

/// Top-level configuration, persisted as YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Sources must be strictly shorter than this (seconds)
    pub max_duration_secs: f64,
    /// How often the retirement sweep runs (milliseconds)
    pub sweep_interval_ms: u64,
    /// Output level at startup (0.0 - 1.0)
    pub initial_level: f32,
    /// Output device settings
    pub audio: AudioConfig,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            initial_level: 1.0,
            audio: AudioConfig::default(),
        }
    }
}

impl LooperConfig {
    /// Replace out-of-range values with usable ones
    pub fn normalized(mut self) -> Self {
        if !self.max_duration_secs.is_finite() || self.max_duration_secs <= 0.0 {
            log::warn!(
                "Invalid max_duration_secs {}, using {}",
                self.max_duration_secs,
                DEFAULT_MAX_DURATION_SECS
            );
            self.max_duration_secs = DEFAULT_MAX_DURATION_SECS;
        }
        self.sweep_interval_ms = self.sweep_interval_ms.max(MIN_SWEEP_INTERVAL_MS);
        self.initial_level = if self.initial_level.is_finite() {
            self.initial_level.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn with_max_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    pub fn with_sweep_interval_ms(mut self, ms: u64) -> Self {
        self.sweep_interval_ms = ms;
        self
    }
}
