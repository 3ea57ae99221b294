//! Per-callback looping playback
//!
//! [`PlaybackEngine::render`] is called once per audio block by the render
//! host. It grabs the published buffer with a non-blocking acquire, copies
//! frames into the output starting at the cursor, wraps the cursor at the end
//! of the buffer (sample-accurate loop, no crossfade) and fans input channels
//! out to the output channels with `output % input` wraparound.
//!
//! # Real-Time Safety
//!
//! - No locks beyond a `try_lock` on the slot
//! - No allocation: the acquired handle is an `Arc` clone (one atomic increment)
//! - No deallocation: the retirement registry always outlives our handle
//! - Contention or an empty slot produces silence and leaves the cursor alone

use std::cell::Cell;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use super::slot::BufferSlot;
use crate::types::Sample;

thread_local! {
    static IN_RENDER: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is inside [`PlaybackEngine::render`]
pub fn in_render_context() -> bool {
    IN_RENDER.with(|flag| flag.get())
}

/// Marks the current thread as rendering until dropped
struct RenderScope {
    was_rendering: bool,
}

impl RenderScope {
    #[inline]
    fn enter() -> Self {
        let was_rendering = IN_RENDER.with(|flag| flag.replace(true));
        Self { was_rendering }
    }
}

impl Drop for RenderScope {
    #[inline]
    fn drop(&mut self) {
        let was_rendering = self.was_rendering;
        IN_RENDER.with(|flag| flag.set(was_rendering));
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Lock-free shared state
// ────────────────────────────────────────────────────────────────────────────────

/// State shared between the render callback and the UI without locks
///
/// The UI writes the level; the render callback writes the position readout.
#[derive(Debug)]
pub struct PlaybackAtomics {
    /// Output level as `f32` bits
    level: AtomicU32,
    /// Cursor after the last rendered block
    position: AtomicU64,
    /// Frame count of the buffer rendered last (0 after a silent block)
    frames: AtomicU64,
}

impl PlaybackAtomics {
    pub fn new(level: f32) -> Self {
        Self {
            level: AtomicU32::new(clamp_level(level).to_bits()),
            position: AtomicU64::new(0),
            frames: AtomicU64::new(0),
        }
    }

    /// Current target level (0.0 - 1.0)
    #[inline]
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    /// Set the target level; the next block ramps towards it
    pub fn set_level(&self, level: f32) {
        self.level.store(clamp_level(level).to_bits(), Ordering::Relaxed);
    }

    /// Playback cursor as of the last block
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Length of the looping buffer as of the last block (0 = silent)
    #[inline]
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl Default for PlaybackAtomics {
    fn default() -> Self {
        Self::new(1.0)
    }
}

fn clamp_level(level: f32) -> f32 {
    if level.is_finite() {
        level.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// Output blocks
// ────────────────────────────────────────────────────────────────────────────────

/// Linear gain ramp across one output block
#[derive(Debug, Clone, Copy)]
pub struct GainRamp {
    start: f32,
    step: f32,
}

impl GainRamp {
    fn new(start: f32, end: f32, frames: usize) -> Self {
        let step = if frames > 0 && start != end {
            (end - start) / frames as f32
        } else {
            0.0
        };
        Self { start, step }
    }

    /// Gain for frame `index` of the block
    #[inline]
    pub fn at(&self, index: usize) -> f32 {
        self.start + self.step * index as f32
    }
}

/// An output buffer the render host hands to the engine
pub trait OutputBlock {
    fn num_channels(&self) -> usize;
    fn num_frames(&self) -> usize;
    /// Fill every channel with silence
    fn silence(&mut self);
    /// Write `source` to `channel` starting at block frame `offset`, scaled by `ramp`
    fn write(&mut self, channel: usize, offset: usize, source: &[Sample], ramp: &GainRamp);
}

/// Non-interleaved output: one slice per channel
///
/// The block length is the shortest channel. Frames past it in longer
/// channels are zeroed on construction so every sample is written.
pub struct PlanarOutput<'a, 'b> {
    channels: &'a mut [&'b mut [Sample]],
    frames: usize,
}

impl<'a, 'b> PlanarOutput<'a, 'b> {
    pub fn new(channels: &'a mut [&'b mut [Sample]]) -> Self {
        let frames = channels.iter().map(|c| c.len()).min().unwrap_or(0);
        for channel in channels.iter_mut() {
            channel[frames..].fill(0.0);
        }
        Self { channels, frames }
    }
}

impl OutputBlock for PlanarOutput<'_, '_> {
    fn num_channels(&self) -> usize {
        self.channels.len()
    }

    fn num_frames(&self) -> usize {
        self.frames
    }

    fn silence(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.fill(0.0);
        }
    }

    #[inline]
    fn write(&mut self, channel: usize, offset: usize, source: &[Sample], ramp: &GainRamp) {
        let dest = &mut self.channels[channel][offset..offset + source.len()];
        for (i, (out, &sample)) in dest.iter_mut().zip(source).enumerate() {
            *out = sample * ramp.at(offset + i);
        }
    }
}

/// Interleaved output `[c0, c1, .., c0, c1, ..]`, as delivered by cpal
pub struct InterleavedOutput<'a> {
    data: &'a mut [Sample],
    channels: usize,
}

impl<'a> InterleavedOutput<'a> {
    pub fn new(data: &'a mut [Sample], channels: usize) -> Self {
        Self { data, channels }
    }
}

impl OutputBlock for InterleavedOutput<'_> {
    fn num_channels(&self) -> usize {
        self.channels
    }

    fn num_frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.data.len() / self.channels
        }
    }

    fn silence(&mut self) {
        self.data.fill(0.0);
    }

    #[inline]
    fn write(&mut self, channel: usize, offset: usize, source: &[Sample], ramp: &GainRamp) {
        let channels = self.channels;
        for (i, &sample) in source.iter().enumerate() {
            let frame = offset + i;
            self.data[frame * channels + channel] = sample * ramp.at(frame);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────────
// PlaybackEngine
// ────────────────────────────────────────────────────────────────────────────────

/// Looping player driven by the audio callback
///
/// Owns the playback cursor; only the render thread mutates it.
pub struct PlaybackEngine {
    slot: Arc<BufferSlot>,
    atomics: Arc<PlaybackAtomics>,
    /// Frame offset into the active buffer
    cursor: usize,
    /// Publish generation the cursor refers to
    generation: Option<u64>,
    /// Level at the end of the previous block (ramp start)
    previous_level: f32,
}

impl PlaybackEngine {
    pub fn new(slot: Arc<BufferSlot>, atomics: Arc<PlaybackAtomics>) -> Self {
        let previous_level = atomics.level();
        Self {
            slot,
            atomics,
            cursor: 0,
            generation: None,
            previous_level,
        }
    }

    /// Shared atomics (clone the Arc to hand to the UI)
    pub fn atomics(&self) -> Arc<PlaybackAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Current cursor position in frames
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Render one block into `output`
    pub fn render<O: OutputBlock + ?Sized>(&mut self, output: &mut O) {
        // Declared first so it is dropped last, after the acquired handle
        let _scope = RenderScope::enter();

        let level = self.atomics.level();
        let start_level = if (level - self.previous_level).abs() <= f32::EPSILON {
            level
        } else {
            self.previous_level
        };
        self.previous_level = level;

        let acquired = match self.slot.try_acquire() {
            Some(acquired) => acquired,
            None => {
                output.silence();
                self.atomics.frames.store(0, Ordering::Relaxed);
                return;
            }
        };

        let buffer = &acquired.buffer;
        let input_channels = buffer.num_channels();
        let buffer_frames = buffer.num_frames();
        if input_channels == 0 || buffer_frames == 0 {
            output.silence();
            self.atomics.frames.store(0, Ordering::Relaxed);
            return;
        }

        if self.generation != Some(acquired.generation) {
            self.generation = Some(acquired.generation);
            self.cursor = 0;
        }
        if self.cursor >= buffer_frames {
            self.cursor = 0;
        }

        let output_channels = output.num_channels();
        let output_frames = output.num_frames();
        let ramp = GainRamp::new(start_level, level, output_frames);

        let mut offset = 0;
        while offset < output_frames {
            let frames_this_pass = (output_frames - offset).min(buffer_frames - self.cursor);

            for channel in 0..output_channels {
                let source = &buffer.channel(channel % input_channels)
                    [self.cursor..self.cursor + frames_this_pass];
                output.write(channel, offset, source, &ramp);
            }

            offset += frames_this_pass;
            self.cursor += frames_this_pass;
            if self.cursor == buffer_frames {
                self.cursor = 0;
            }
        }

        self.atomics.position.store(self.cursor as u64, Ordering::Relaxed);
        self.atomics.frames.store(buffer_frames as u64, Ordering::Relaxed);
    }

    /// Render into interleaved host memory
    pub fn render_interleaved(&mut self, data: &mut [Sample], channels: usize) {
        self.render(&mut InterleavedOutput::new(data, channels));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{SampleBuffer, SharedBuffer};

    /// Buffer whose sample at (ch, frame) is `ch * 1000 + frame`
    fn ramp_buffer(name: &str, channels: usize, frames: usize) -> SharedBuffer {
        let mut buffer = SampleBuffer::new(name, channels, frames).unwrap();
        for ch in 0..channels {
            for (i, s) in buffer.channel_mut(ch).iter_mut().enumerate() {
                *s = (ch * 1000 + i) as f32;
            }
        }
        buffer.into_shared()
    }

    fn engine_with(buffer: Option<SharedBuffer>) -> (Arc<BufferSlot>, PlaybackEngine) {
        let slot = Arc::new(BufferSlot::new());
        if let Some(buffer) = buffer {
            let _ = slot.publish(buffer);
        }
        let engine = PlaybackEngine::new(Arc::clone(&slot), Arc::new(PlaybackAtomics::new(1.0)));
        (slot, engine)
    }

    fn render_planar(engine: &mut PlaybackEngine, channels: usize, frames: usize) -> Vec<Vec<f32>> {
        let mut out = vec![vec![f32::NAN; frames]; channels];
        {
            let mut refs: Vec<&mut [f32]> = out.iter_mut().map(|c| c.as_mut_slice()).collect();
            engine.render(&mut PlanarOutput::new(&mut refs));
        }
        out
    }

    #[test]
    fn test_cursor_sequence_wraps_at_buffer_end() {
        let (_slot, mut engine) = engine_with(Some(ramp_buffer("a", 2, 100)));

        let mut cursors = Vec::new();
        let mut blocks = Vec::new();
        for _ in 0..3 {
            blocks.push(render_planar(&mut engine, 2, 40));
            cursors.push(engine.cursor());
        }
        assert_eq!(cursors, vec![40, 80, 20]);

        // Third block straddles the loop point: frames 80..100 then 0..20
        let third = &blocks[2];
        assert_eq!(third[0][0], 80.0);
        assert_eq!(third[0][19], 99.0);
        assert_eq!(third[0][20], 0.0);
        assert_eq!(third[1][39], 1019.0);
    }

    #[test]
    fn test_cursor_independent_of_block_segmentation() {
        let frames = 37;
        for sizes in [vec![1usize; 100], vec![64, 3, 33], vec![37, 37, 26], vec![100]] {
            let (_slot, mut engine) = engine_with(Some(ramp_buffer("seg", 1, frames)));
            let total: usize = sizes.iter().sum();
            for size in sizes {
                render_planar(&mut engine, 1, size);
            }
            assert_eq!(engine.cursor(), total % frames);
        }
    }

    #[test]
    fn test_full_loop_reproduces_buffer() {
        let buffer = ramp_buffer("loop", 2, 64);
        let (_slot, mut engine) = engine_with(Some(Arc::clone(&buffer)));
        let out = render_planar(&mut engine, 2, 64);
        assert_eq!(out[0], buffer.channel(0));
        assert_eq!(out[1], buffer.channel(1));
        assert_eq!(engine.cursor(), 0);
    }

    #[test]
    fn test_mono_fans_out_to_all_outputs() {
        let buffer = ramp_buffer("mono", 1, 50);
        let (_slot, mut engine) = engine_with(Some(Arc::clone(&buffer)));
        let out = render_planar(&mut engine, 2, 50);
        assert_eq!(out[0], buffer.channel(0));
        assert_eq!(out[1], buffer.channel(0));
    }

    #[test]
    fn test_channel_wraparound_uses_modulo() {
        let (_slot, mut engine) = engine_with(Some(ramp_buffer("three", 3, 10)));
        let out = render_planar(&mut engine, 5, 10);
        for (c, channel) in out.iter().enumerate() {
            let source = c % 3;
            for (i, &s) in channel.iter().enumerate() {
                assert_eq!(s, (source * 1000 + i) as f32);
            }
        }
    }

    #[test]
    fn test_extra_input_channels_are_ignored() {
        let (_slot, mut engine) = engine_with(Some(ramp_buffer("quad", 4, 8)));
        let out = render_planar(&mut engine, 1, 8);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][7], 7.0);
    }

    #[test]
    fn test_empty_slot_renders_silence() {
        let (_slot, mut engine) = engine_with(None);
        let out = render_planar(&mut engine, 2, 32);
        assert!(out.iter().flatten().all(|&s| s == 0.0));
        assert_eq!(engine.cursor(), 0);
    }

    #[test]
    fn test_clear_mid_playback_silences_without_advancing() {
        let (slot, mut engine) = engine_with(Some(ramp_buffer("a", 1, 100)));
        render_planar(&mut engine, 1, 30);
        assert_eq!(engine.cursor(), 30);

        drop(slot.clear());
        let out = render_planar(&mut engine, 1, 30);
        assert!(out[0].iter().all(|&s| s == 0.0));
        assert_eq!(engine.cursor(), 30);
        assert_eq!(engine.atomics().frames(), 0);
    }

    #[test]
    fn test_contended_slot_renders_silence() {
        let (slot, mut engine) = engine_with(Some(ramp_buffer("a", 1, 100)));
        render_planar(&mut engine, 1, 10);
        let out = slot.with_locked(|| render_planar(&mut engine, 1, 10));
        assert!(out[0].iter().all(|&s| s == 0.0));
        assert_eq!(engine.cursor(), 10);
    }

    #[test]
    fn test_publish_resets_cursor() {
        let (slot, mut engine) = engine_with(Some(ramp_buffer("a", 1, 100)));
        render_planar(&mut engine, 1, 30);
        drop(slot.publish(ramp_buffer("b", 1, 100)));

        let out = render_planar(&mut engine, 1, 10);
        assert_eq!(out[0][0], 0.0);
        assert_eq!(out[0][9], 9.0);
        assert_eq!(engine.cursor(), 10);
    }

    #[test]
    fn test_republish_after_clear_starts_from_zero() {
        let buffer = ramp_buffer("a", 1, 100);
        let (slot, mut engine) = engine_with(Some(Arc::clone(&buffer)));
        render_planar(&mut engine, 1, 30);
        drop(slot.clear());
        render_planar(&mut engine, 1, 30);
        drop(slot.publish(buffer));
        let out = render_planar(&mut engine, 1, 5);
        assert_eq!(out[0], vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_gain_ramps_linearly_across_block() {
        let mut buffer = SampleBuffer::new("ones", 1, 4).unwrap();
        buffer.channel_mut(0).fill(1.0);
        let (_slot, mut engine) = engine_with(Some(buffer.into_shared()));
        let atomics = engine.atomics();

        atomics.set_level(0.0);
        let out = render_planar(&mut engine, 1, 4);
        // ramp from 1.0 (initial) down to 0.0
        assert_eq!(out[0], vec![1.0, 0.75, 0.5, 0.25]);

        let out = render_planar(&mut engine, 1, 4);
        assert!(out[0].iter().all(|&s| s == 0.0));

        atomics.set_level(0.5);
        let out = render_planar(&mut engine, 1, 4);
        assert_eq!(out[0], vec![0.0, 0.125, 0.25, 0.375]);
    }

    #[test]
    fn test_level_is_clamped() {
        let atomics = PlaybackAtomics::new(3.0);
        assert_eq!(atomics.level(), 1.0);
        atomics.set_level(-1.0);
        assert_eq!(atomics.level(), 0.0);
        atomics.set_level(f32::NAN);
        assert_eq!(atomics.level(), 0.0);
    }

    #[test]
    fn test_uneven_planar_channels_are_fully_written() {
        let (_slot, mut engine) = engine_with(Some(ramp_buffer("a", 2, 100)));
        let mut left = vec![f32::NAN; 10];
        let mut right = vec![f32::NAN; 16];
        {
            let mut refs = [left.as_mut_slice(), right.as_mut_slice()];
            engine.render(&mut PlanarOutput::new(&mut refs));
        }
        assert_eq!(engine.cursor(), 10);
        assert_eq!(left[9], 9.0);
        assert_eq!(right[9], 1009.0);
        assert!(right[10..].iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_interleaved_matches_planar() {
        let buffer = ramp_buffer("il", 2, 16);
        let (_slot, mut engine) = engine_with(Some(Arc::clone(&buffer)));
        let mut data = vec![0.0f32; 2 * 12];
        engine.render_interleaved(&mut data, 2);
        for frame in 0..12 {
            assert_eq!(data[frame * 2], buffer.channel(0)[frame]);
            assert_eq!(data[frame * 2 + 1], buffer.channel(1)[frame]);
        }
        assert_eq!(engine.atomics().position(), 12);
        assert_eq!(engine.atomics().frames(), 16);
    }

    #[test]
    fn test_render_scope_flag() {
        assert!(!in_render_context());
        {
            let _scope = RenderScope::enter();
            assert!(in_render_context());
        }
        assert!(!in_render_context());
    }
}
