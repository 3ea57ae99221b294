//! Control-side facade tying the looper together
//!
//! A UI only needs two operations, `open` and `clear`, plus a periodic `poll`
//! to publish finished loads and collect notifications. Everything the audio
//! thread needs is handed out through [`Looper::engine`].
//!
//! # Example
//!
//! ```ignore
//! use sampleloop_core::{config::LooperConfig, Looper};
//!
//! let mut looper = Looper::new(LooperConfig::default())?;
//! let _audio = looper.start_audio()?;
//!
//! looper.open("loop.wav");
//! // in the UI timer:
//! for event in looper.poll() {
//!     println!("{:?}", event);
//! }
//! looper.clear();
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::audio_file::{AudioSource, SymphoniaSource};
use crate::buffer::SharedBuffer;
use crate::config::LooperConfig;
use crate::engine::{BufferSlot, PlaybackAtomics, PlaybackEngine, RetirementRegistry, Sweeper};
use crate::loader::{LoadEvent, LoadPipeline, LoadState};

/// Owns the shared state and the control-side workers
pub struct Looper {
    config: LooperConfig,
    slot: Arc<BufferSlot>,
    registry: Arc<RetirementRegistry>,
    atomics: Arc<PlaybackAtomics>,
    pipeline: LoadPipeline,
    sweeper: Option<Sweeper>,
}

impl Looper {
    /// Create a looper decoding files with symphonia
    pub fn new(config: LooperConfig) -> std::io::Result<Self> {
        Self::with_source(config, Arc::new(SymphoniaSource))
    }

    /// Create a looper with a custom decoder
    pub fn with_source(config: LooperConfig, source: Arc<dyn AudioSource>) -> std::io::Result<Self> {
        let config = config.normalized();

        let slot = Arc::new(BufferSlot::new());
        let registry = Arc::new(RetirementRegistry::new());
        let atomics = Arc::new(PlaybackAtomics::new(config.initial_level));
        let sweeper = Sweeper::spawn(Arc::clone(&registry), config.sweep_interval())?;
        let pipeline = LoadPipeline::new(
            source,
            Arc::clone(&slot),
            Arc::clone(&registry),
            config.max_duration_secs,
        );

        log::info!(
            "Looper ready (max duration {:.2}s, sweep every {}ms)",
            config.max_duration_secs,
            config.sweep_interval_ms
        );

        Ok(Self {
            config,
            slot,
            registry,
            atomics,
            pipeline,
            sweeper: Some(sweeper),
        })
    }

    pub fn config(&self) -> &LooperConfig {
        &self.config
    }

    /// A playback engine bound to this looper's slot, for the render host
    ///
    /// Give exactly one engine to one audio callback.
    pub fn engine(&self) -> PlaybackEngine {
        PlaybackEngine::new(Arc::clone(&self.slot), Arc::clone(&self.atomics))
    }

    /// Open the configured output device and start looping into it
    #[cfg(feature = "cpal-backend")]
    pub fn start_audio(&self) -> crate::audio::AudioResult<crate::audio::PlaybackHandle> {
        let handle = crate::audio::start_playback(&self.config.audio, self.engine())?;
        self.pipeline.set_target_sample_rate(handle.sample_rate());
        Ok(handle)
    }

    /// Tell the loader the device sample rate (for mismatch warnings)
    pub fn set_output_sample_rate(&self, sample_rate: u32) {
        self.pipeline.set_target_sample_rate(sample_rate);
    }

    /// Start loading a file; the result arrives through `poll`
    pub fn open(&mut self, path: impl Into<PathBuf>) {
        self.pipeline.open(path);
    }

    /// Stop playback by emptying the slot
    pub fn clear(&self) {
        let previous = self.slot.clear();
        if let Some(buffer) = &previous {
            log::info!("Cleared buffer: {}", buffer.name());
        }
        drop(previous);
    }

    /// Publish finished loads and return their notifications (non-blocking)
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        self.pipeline.poll()
    }

    /// Wait up to `timeout` for the next load to finish and publish it
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<LoadEvent> {
        self.pipeline.poll_timeout(timeout)
    }

    pub fn load_state(&self) -> LoadState {
        self.pipeline.state()
    }

    /// Buffer currently in the slot
    pub fn current(&self) -> Option<SharedBuffer> {
        self.slot.current()
    }

    pub fn is_playing(&self) -> bool {
        !self.slot.is_empty()
    }

    pub fn set_level(&self, level: f32) {
        self.atomics.set_level(level);
    }

    pub fn level(&self) -> f32 {
        self.atomics.level()
    }

    /// Cursor as of the last rendered block
    pub fn position(&self) -> u64 {
        self.atomics.position()
    }

    /// Buffers kept alive by the retirement registry
    pub fn retained_buffers(&self) -> usize {
        self.registry.len()
    }

    /// Run a sweep right now instead of waiting for the timer
    pub fn sweep_now(&self) -> usize {
        self.registry.sweep()
    }

    /// Clear the slot and stop the sweep thread
    pub fn shutdown(&mut self) {
        self.clear();
        if let Some(mut sweeper) = self.sweeper.take() {
            sweeper.stop();
        }
    }
}

impl Drop for Looper {
    fn drop(&mut self) {
        self.shutdown();
    }
}
