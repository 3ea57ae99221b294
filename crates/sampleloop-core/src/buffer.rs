//! Shared, immutable-after-publication audio sample storage
//!
//! A [`SampleBuffer`] is allocated once with a fixed channel and frame count,
//! filled by the loader while it is still uniquely owned, and then wrapped in
//! a [`SharedBuffer`] (`Arc<SampleBuffer>`) for publication. Once shared, the
//! type system only hands out `&SampleBuffer`, so the audio thread can read it
//! without any further locking.
//!
//! Storage is planar: channel `c` occupies `samples[c * frames..(c + 1) * frames]`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::engine::playback::in_render_context;
use crate::types::Sample;

/// Reference-counted handle to a published buffer
pub type SharedBuffer = Arc<SampleBuffer>;

/// Number of buffers that were destroyed on a thread inside a render callback.
/// Stays at zero as long as the retirement registry does its job.
static RENDER_THREAD_DROPS: AtomicUsize = AtomicUsize::new(0);

/// Storage for a buffer could not be reserved
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to allocate {channels} x {frames} samples for buffer '{name}'")]
pub struct AllocationError {
    pub name: String,
    pub channels: usize,
    pub frames: usize,
}

/// Fixed-size multichannel sample storage
pub struct SampleBuffer {
    name: String,
    channels: usize,
    frames: usize,
    sample_rate: u32,
    samples: Vec<Sample>,
}

impl SampleBuffer {
    /// Allocate a silent buffer of `channels` x `frames` samples
    ///
    /// The storage is reserved exactly once and never resized afterwards.
    pub fn new(
        name: impl Into<String>,
        channels: usize,
        frames: usize,
    ) -> Result<Self, AllocationError> {
        let name = name.into();
        let alloc_error = |name: String| AllocationError {
            name,
            channels,
            frames,
        };

        let total = match channels.checked_mul(frames) {
            Some(total) => total,
            None => return Err(alloc_error(name)),
        };

        let mut samples = Vec::new();
        if samples.try_reserve_exact(total).is_err() {
            return Err(alloc_error(name));
        }
        samples.resize(total, 0.0);

        log::debug!("Created buffer: {} ({} ch, {} frames)", name, channels, frames);

        Ok(Self {
            name,
            channels,
            frames,
            sample_rate: 0,
            samples,
        })
    }

    /// Build a buffer from per-channel sample slices (all must have equal length)
    pub fn from_channels(
        name: impl Into<String>,
        channels: &[&[Sample]],
    ) -> Result<Self, AllocationError> {
        let frames = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut buffer = Self::new(name, channels.len(), frames)?;
        for (ch, data) in channels.iter().enumerate() {
            let len = data.len().min(frames);
            buffer.channel_mut(ch)[..len].copy_from_slice(&data[..len]);
        }
        Ok(buffer)
    }

    /// Identifying name (usually the source file name)
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn num_channels(&self) -> usize {
        self.channels
    }

    #[inline]
    pub fn num_frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames == 0 || self.channels == 0
    }

    /// Sample rate the data was decoded at (0 if unknown)
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate;
    }

    /// Duration in seconds, or 0.0 when the sample rate is unknown
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f64 / self.sample_rate as f64
        }
    }

    /// Read-only view of one channel
    ///
    /// # Panics
    /// Panics if `channel >= num_channels()`.
    #[inline]
    pub fn channel(&self, channel: usize) -> &[Sample] {
        let start = channel * self.frames;
        &self.samples[start..start + self.frames]
    }

    /// Mutable view of one channel, only reachable before the buffer is shared
    #[inline]
    pub fn channel_mut(&mut self, channel: usize) -> &mut [Sample] {
        let start = channel * self.frames;
        &mut self.samples[start..start + self.frames]
    }

    /// Wrap into a shared handle; no mutable access is possible afterwards
    pub fn into_shared(self) -> SharedBuffer {
        Arc::new(self)
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("name", &self.name)
            .field("channels", &self.channels)
            .field("frames", &self.frames)
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

impl Drop for SampleBuffer {
    fn drop(&mut self) {
        if in_render_context() {
            // No logging here: we are on the audio thread
            RENDER_THREAD_DROPS.fetch_add(1, Ordering::Relaxed);
            return;
        }
        log::debug!("Deleted buffer: {}", self.name);
    }
}

/// How many buffers have ever been freed from inside a render callback
pub fn render_thread_drops() -> usize {
    RENDER_THREAD_DROPS.load(Ordering::Relaxed)
}
