//! Audio output configuration

use serde::{Deserialize, Serialize};

/// Largest block size we ask a device for (frames)
pub const MAX_BUFFER_SIZE: u32 = 8192;

/// Smallest block size we ask a device for (frames)
pub const MIN_BUFFER_SIZE: u32 = 64;

/// Block size when none is configured (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Preferred block size for the output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the device decide
    #[default]
    Default,
    /// Request a specific size in frames (clamped to a sane range)
    Fixed(u32),
}

impl BufferSize {
    /// Requested frames, or `None` for the device default
    pub fn as_frames(&self) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some((*frames).clamp(MIN_BUFFER_SIZE, MAX_BUFFER_SIZE)),
        }
    }

    /// Latency in milliseconds at `sample_rate`, if the size is known
    pub fn latency_ms(&self, sample_rate: u32) -> Option<f32> {
        self.as_frames()
            .map(|frames| (frames as f32 / sample_rate as f32) * 1000.0)
    }
}

/// Output device settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Output device name (None = system default)
    pub device: Option<String>,
    /// Preferred sample rate (None = device default)
    pub sample_rate: Option<u32>,
    /// Preferred block size
    pub buffer_size: BufferSize,
}

impl AudioConfig {
    pub fn with_device(mut self, name: impl Into<String>) -> Self {
        self.device = Some(name.into());
        self
    }

    pub fn with_sample_rate(mut self, rate: u32) -> Self {
        self.sample_rate = Some(rate);
        self
    }

    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }
}
