//! Background buffer loading and publication
//!
//! Decoding runs on the rayon pool, never on the audio thread. A worker builds
//! and fully populates a [`SampleBuffer`], then sends it back over a channel.
//! The control thread picks results up in [`LoadPipeline::poll`] and performs
//! the single publish step: retain in the registry, then swap into the slot.
//!
//! ```text
//!  open(path) ──► rayon worker: open → validate → allocate → decode
//!                         │
//!                         │ LoadOutcome (channel)
//!                         ▼
//!  poll() on control thread: registry.retain → slot.publish → LoadEvent
//! ```
//!
//! Concurrent requests decode in parallel. Results are published in the order
//! they complete, so the last load to finish wins. A superseded buffer is still
//! retained and is reclaimed later by the sweep.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};

use super::error::{LoadError, LoadResult};
use crate::audio_file::AudioSource;
use crate::buffer::{SampleBuffer, SharedBuffer};
use crate::engine::{BufferSlot, RetirementRegistry};
use crate::types::MAX_CHANNELS;

/// Where the pipeline is in its `Idle -> Loading -> Published | Failed` cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    #[default]
    Idle,
    /// At least one request is still decoding
    Loading,
    /// The most recent completed request was published
    Published,
    /// The most recent completed request failed validation or decoding
    Failed,
}

/// Notification for the UI after a request completes
#[derive(Debug, Clone, PartialEq)]
pub enum LoadEvent {
    Published {
        name: String,
        channels: usize,
        frames: usize,
        sample_rate: u32,
        duration_secs: f64,
    },
    Failed {
        path: PathBuf,
        error: LoadError,
    },
}

/// Message from a worker back to the control thread
struct LoadOutcome {
    path: PathBuf,
    result: LoadResult<SampleBuffer>,
}

/// Asynchronous loader that publishes into a [`BufferSlot`]
pub struct LoadPipeline {
    source: Arc<dyn AudioSource>,
    slot: Arc<BufferSlot>,
    registry: Arc<RetirementRegistry>,
    result_tx: Sender<LoadOutcome>,
    result_rx: Receiver<LoadOutcome>,
    /// Device sample rate (0 = unknown); only used to warn about mismatches
    target_sample_rate: Arc<AtomicU32>,
    max_duration_secs: f64,
    in_flight: usize,
    state: LoadState,
}

impl LoadPipeline {
    pub fn new(
        source: Arc<dyn AudioSource>,
        slot: Arc<BufferSlot>,
        registry: Arc<RetirementRegistry>,
        max_duration_secs: f64,
    ) -> Self {
        let (result_tx, result_rx) = channel::unbounded();
        Self {
            source,
            slot,
            registry,
            result_tx,
            result_rx,
            target_sample_rate: Arc::new(AtomicU32::new(0)),
            max_duration_secs,
            in_flight: 0,
            state: LoadState::Idle,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Requests that have been opened but not yet collected by `poll`
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn max_duration_secs(&self) -> f64 {
        self.max_duration_secs
    }

    /// Update the output device's sample rate
    pub fn set_target_sample_rate(&self, sample_rate: u32) {
        self.target_sample_rate.store(sample_rate, Ordering::Relaxed);
    }

    /// Start loading `path` in the background (non-blocking)
    pub fn open(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        let source = Arc::clone(&self.source);
        let tx = self.result_tx.clone();
        let max_duration_secs = self.max_duration_secs;
        let target_rate = Arc::clone(&self.target_sample_rate);

        log::info!("Loader: queueing {:?}", path);
        self.in_flight += 1;
        self.state = LoadState::Loading;

        rayon::spawn(move || {
            let start = Instant::now();
            let result = load_buffer(source.as_ref(), &path, max_duration_secs);

            match &result {
                Ok(buffer) => {
                    log::info!(
                        "Loader: decoded {:?} ({} ch, {} frames) in {:?}",
                        path,
                        buffer.num_channels(),
                        buffer.num_frames(),
                        start.elapsed()
                    );
                    let device_rate = target_rate.load(Ordering::Relaxed);
                    if device_rate != 0 && buffer.sample_rate() != device_rate {
                        log::warn!(
                            "Loader: {:?} is {} Hz but the device runs at {} Hz; it will play at the wrong speed",
                            path,
                            buffer.sample_rate(),
                            device_rate
                        );
                    }
                }
                Err(e) => log::error!("Loader: failed to load {:?}: {}", path, e),
            }

            // Receiver gone means the pipeline was dropped; the buffer just frees here
            let _ = tx.send(LoadOutcome { path, result });
        });
    }

    /// Collect finished loads and publish them (control thread, non-blocking)
    pub fn poll(&mut self) -> Vec<LoadEvent> {
        let mut events = Vec::new();
        loop {
            match self.result_rx.try_recv() {
                Ok(outcome) => events.push(self.complete(outcome)),
                Err(TryRecvError::Empty) => break,
                // We own a sender, so this can't happen while `self` is alive
                Err(TryRecvError::Disconnected) => break,
            }
        }
        events
    }

    /// Block until the next load completes or `timeout` elapses
    pub fn poll_timeout(&mut self, timeout: Duration) -> Option<LoadEvent> {
        if self.in_flight == 0 {
            return None;
        }
        match self.result_rx.recv_timeout(timeout) {
            Ok(outcome) => Some(self.complete(outcome)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Retain `buffer` and make it the active buffer
    ///
    /// The replaced buffer is dropped here, on the calling (control) thread;
    /// the registry still holds it, so this is never the final release.
    pub fn publish(&self, buffer: SharedBuffer) {
        self.registry.retain(&buffer);
        let previous = self.slot.publish(buffer);
        drop(previous);
    }

    fn complete(&mut self, outcome: LoadOutcome) -> LoadEvent {
        self.in_flight = self.in_flight.saturating_sub(1);

        let event = match outcome.result {
            Ok(buffer) => {
                let event = LoadEvent::Published {
                    name: buffer.name().to_string(),
                    channels: buffer.num_channels(),
                    frames: buffer.num_frames(),
                    sample_rate: buffer.sample_rate(),
                    duration_secs: buffer.duration_secs(),
                };
                self.publish(buffer.into_shared());
                log::info!("Loader: published {:?}", outcome.path);
                self.state = LoadState::Published;
                event
            }
            Err(error) => {
                // An allocation failure returns the pipeline to idle rather than failed
                self.state = match error {
                    LoadError::Allocation(_) => LoadState::Idle,
                    _ => LoadState::Failed,
                };
                LoadEvent::Failed {
                    path: outcome.path,
                    error,
                }
            }
        };

        if self.in_flight > 0 {
            self.state = LoadState::Loading;
        }
        event
    }
}

/// Open, validate, allocate and fully populate a buffer for `path`
pub fn load_buffer(
    source: &dyn AudioSource,
    path: &Path,
    max_duration_secs: f64,
) -> LoadResult<SampleBuffer> {
    let mut reader = source.open(path)?;
    let info = reader.info();

    if info.channels == 0 || info.channels > MAX_CHANNELS {
        return Err(LoadError::InvalidChannelCount(info.channels));
    }
    if info.frames == 0 {
        return Err(LoadError::EmptySource);
    }

    if info.sample_rate == 0 {
        return Err(LoadError::UnsupportedFormat("Unknown sample rate".to_string()));
    }

    let duration_secs = info.duration_secs();
    if duration_secs >= max_duration_secs {
        return Err(LoadError::DurationExceeded {
            duration_secs,
            max_secs: max_duration_secs,
        });
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let frames = usize::try_from(info.frames).map_err(|_| {
        LoadError::Allocation(crate::buffer::AllocationError {
            name: name.clone(),
            channels: info.channels,
            frames: usize::MAX,
        })
    })?;

    let mut buffer = SampleBuffer::new(name, info.channels, frames)?;
    buffer.set_sample_rate(info.sample_rate);
    reader.read_into(&mut buffer)?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_file::{SourceInfo, SourceReader};
    use std::collections::HashMap;

    /// In-memory source keyed by file name; sample value = frame index
    struct FakeSource {
        entries: HashMap<String, SourceInfo>,
    }

    impl FakeSource {
        fn new(entries: &[(&str, SourceInfo)]) -> Arc<Self> {
            Arc::new(Self {
                entries: entries.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            })
        }
    }

    struct FakeReader(SourceInfo);

    impl SourceReader for FakeReader {
        fn info(&self) -> SourceInfo {
            self.0
        }

        fn read_into(&mut self, buffer: &mut SampleBuffer) -> LoadResult<()> {
            for ch in 0..buffer.num_channels() {
                for (i, s) in buffer.channel_mut(ch).iter_mut().enumerate() {
                    *s = i as f32;
                }
            }
            Ok(())
        }
    }

    impl AudioSource for FakeSource {
        fn open(&self, path: &Path) -> LoadResult<Box<dyn SourceReader>> {
            let key = path.to_string_lossy().to_string();
            match self.entries.get(&key) {
                Some(info) => Ok(Box::new(FakeReader(*info))),
                None => Err(LoadError::Io(format!("{}: not found", key))),
            }
        }
    }

    fn info(channels: usize, frames: u64, sample_rate: u32) -> SourceInfo {
        SourceInfo {
            channels,
            frames,
            sample_rate,
        }
    }

    fn pipeline(source: Arc<FakeSource>) -> (Arc<BufferSlot>, Arc<RetirementRegistry>, LoadPipeline) {
        let slot = Arc::new(BufferSlot::new());
        let registry = Arc::new(RetirementRegistry::new());
        let pipeline = LoadPipeline::new(source, Arc::clone(&slot), Arc::clone(&registry), 2.0);
        (slot, registry, pipeline)
    }

    fn wait(pipeline: &mut LoadPipeline) -> LoadEvent {
        pipeline
            .poll_timeout(Duration::from_secs(10))
            .expect("load did not complete")
    }

    #[test]
    fn test_successful_load_publishes() {
        let (slot, registry, mut pipeline) = pipeline(FakeSource::new(&[("a.wav", info(2, 100, 1000))]));
        assert_eq!(pipeline.state(), LoadState::Idle);

        pipeline.open("a.wav");
        assert_eq!(pipeline.state(), LoadState::Loading);

        let event = wait(&mut pipeline);
        assert!(matches!(event, LoadEvent::Published { ref name, channels: 2, frames: 100, .. } if name == "a.wav"));
        assert_eq!(pipeline.state(), LoadState::Published);

        let current = slot.current().unwrap();
        assert_eq!(current.channel(1)[99], 99.0);
        assert!(registry.contains(&current));
    }

    #[test]
    fn test_too_long_is_rejected_and_slot_untouched() {
        let (slot, registry, mut pipeline) = pipeline(FakeSource::new(&[
            ("short.wav", info(1, 100, 1000)),
            ("long.wav", info(1, 2000, 1000)),
        ]));

        pipeline.open("short.wav");
        wait(&mut pipeline);
        let generation = slot.generation();

        pipeline.open("long.wav");
        match wait(&mut pipeline) {
            LoadEvent::Failed { error, .. } => {
                assert!(matches!(error, LoadError::DurationExceeded { .. }));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(pipeline.state(), LoadState::Failed);
        assert_eq!(slot.generation(), generation);
        assert_eq!(slot.current().unwrap().name(), "short.wav");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_zero_length_never_published() {
        let (slot, _registry, mut pipeline) = pipeline(FakeSource::new(&[("empty.wav", info(2, 0, 1000))]));
        pipeline.open("empty.wav");
        assert!(matches!(
            wait(&mut pipeline),
            LoadEvent::Failed { error: LoadError::EmptySource, .. }
        ));
        assert!(slot.is_empty());
    }

    #[test]
    fn test_invalid_channel_count() {
        let (_slot, _registry, mut pipeline) = pipeline(FakeSource::new(&[("none.wav", info(0, 10, 1000))]));
        pipeline.open("none.wav");
        assert!(matches!(
            wait(&mut pipeline),
            LoadEvent::Failed { error: LoadError::InvalidChannelCount(0), .. }
        ));
    }

    #[test]
    fn test_unknown_sample_rate_is_unsupported() {
        let (slot, _registry, mut pipeline) = pipeline(FakeSource::new(&[("norate.wav", info(2, 100, 0))]));
        pipeline.open("norate.wav");
        match wait(&mut pipeline) {
            LoadEvent::Failed {
                error: LoadError::UnsupportedFormat(msg),
                ..
            } => assert!(msg.contains("sample rate")),
            other => panic!("expected UnsupportedFormat, got {:?}", other),
        }
        assert_eq!(pipeline.state(), LoadState::Failed);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_unreadable_source_fails() {
        let (slot, _registry, mut pipeline) = pipeline(FakeSource::new(&[]));
        pipeline.open("missing.wav");
        assert!(matches!(wait(&mut pipeline), LoadEvent::Failed { error: LoadError::Io(_), .. }));
        assert!(slot.is_empty());
    }

    #[test]
    fn test_allocation_failure_returns_to_idle() {
        // No duration limit, so the oversized request reaches allocation
        let slot = Arc::new(BufferSlot::new());
        let source = FakeSource::new(&[("huge.wav", info(MAX_CHANNELS, u64::MAX / 2, 48000))]);
        let mut pipeline = LoadPipeline::new(
            source,
            Arc::clone(&slot),
            Arc::new(RetirementRegistry::new()),
            f64::INFINITY,
        );
        pipeline.open("huge.wav");
        assert!(matches!(
            wait(&mut pipeline),
            LoadEvent::Failed { error: LoadError::Allocation(_), .. }
        ));
        assert_eq!(pipeline.state(), LoadState::Idle);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_concurrent_loads_all_retained() {
        let (slot, registry, mut pipeline) = pipeline(FakeSource::new(&[
            ("a.wav", info(1, 10, 1000)),
            ("b.wav", info(1, 20, 1000)),
            ("c.wav", info(1, 30, 1000)),
        ]));
        pipeline.open("a.wav");
        pipeline.open("b.wav");
        pipeline.open("c.wav");
        assert_eq!(pipeline.in_flight(), 3);

        let mut last = None;
        for _ in 0..3 {
            if let LoadEvent::Published { name, .. } = wait(&mut pipeline) {
                last = Some(name);
            }
        }
        assert_eq!(pipeline.in_flight(), 0);
        assert_eq!(pipeline.state(), LoadState::Published);
        assert_eq!(slot.generation(), 3);
        assert_eq!(slot.current().unwrap().name(), last.unwrap());

        // Superseded buffers are kept alive until swept
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.sweep(), 2);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_poll_without_requests_is_empty() {
        let (_slot, _registry, mut pipeline) = pipeline(FakeSource::new(&[]));
        assert!(pipeline.poll().is_empty());
        assert!(pipeline.poll_timeout(Duration::from_millis(1)).is_none());
    }
}
