//! Audio file decoding
//!
//! The loader treats decoding as a black box behind two traits:
//!
//! - [`AudioSource`] opens a locator (a file path) and returns a reader
//! - [`SourceReader`] reports channel count, frame count and sample rate, then
//!   fills a pre-allocated [`SampleBuffer`]
//!
//! Splitting "open" from "read" lets the loader reject a source (too long,
//! empty, too many channels) before allocating anything for it.
//!
//! [`SymphoniaSource`] is the default implementation and handles every format
//! symphonia was built with (WAV and FLAC in this workspace).

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer as DecodeBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::buffer::SampleBuffer;
use crate::loader::{LoadError, LoadResult};

/// Stream properties known after opening a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    pub channels: usize,
    pub frames: u64,
    pub sample_rate: u32,
}

impl SourceInfo {
    /// Length in seconds (0.0 if the sample rate is unknown)
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.frames as f64 / self.sample_rate as f64
        }
    }
}

/// An opened source, ready to decode into a buffer
pub trait SourceReader: Send {
    fn info(&self) -> SourceInfo;

    /// Decode the whole source into `buffer`, which has exactly
    /// `info().channels` channels and `info().frames` frames
    fn read_into(&mut self, buffer: &mut SampleBuffer) -> LoadResult<()>;
}

/// Something that can open locators into readers
pub trait AudioSource: Send + Sync {
    fn open(&self, path: &Path) -> LoadResult<Box<dyn SourceReader>>;
}

// ────────────────────────────────────────────────────────────────────────────────
// Symphonia implementation
// ────────────────────────────────────────────────────────────────────────────────

/// Decodes files through symphonia's default probe and codec registry
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaSource;

impl AudioSource for SymphoniaSource {
    fn open(&self, path: &Path) -> LoadResult<Box<dyn SourceReader>> {
        let file = File::open(path).map_err(|e| LoadError::Io(format!("{}: {}", path.display(), e)))?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;
        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| LoadError::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| LoadError::UnsupportedFormat("Unknown sample rate".to_string()))?;
        let channels = params
            .channels
            .map(|c| c.count())
            .ok_or_else(|| LoadError::UnsupportedFormat("Unknown channel layout".to_string()))?;
        let frames = params
            .n_frames
            .ok_or_else(|| LoadError::UnsupportedFormat("Unknown stream length".to_string()))?;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| LoadError::UnsupportedFormat(e.to_string()))?;

        Ok(Box::new(SymphoniaReader {
            format,
            decoder,
            track_id,
            info: SourceInfo {
                channels,
                frames,
                sample_rate,
            },
        }))
    }
}

struct SymphoniaReader {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: SourceInfo,
}

impl SourceReader for SymphoniaReader {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn read_into(&mut self, buffer: &mut SampleBuffer) -> LoadResult<()> {
        let channels = buffer.num_channels();
        let capacity = buffer.num_frames();
        let mut written = 0usize;
        let mut decode_buf: Option<DecodeBuffer<f32>> = None;

        while written < capacity {
            let packet = match self.format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    break;
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(msg)) => {
                    // Corrupt packet: skip it, the rest of the stream may be fine
                    log::warn!("Skipping undecodable packet: {}", msg);
                    continue;
                }
                Err(e) => return Err(LoadError::Decode(e.to_string())),
            };

            let spec = *decoded.spec();
            let needed = decoded.capacity() * spec.channels.count();
            if decode_buf.as_ref().map_or(true, |b| b.capacity() < needed) {
                decode_buf = Some(DecodeBuffer::new(decoded.capacity() as u64, spec));
            }
            let Some(buf) = decode_buf.as_mut() else {
                continue;
            };
            buf.copy_interleaved_ref(decoded);

            let src_channels = spec.channels.count().max(1);
            let samples = buf.samples();
            let frames = (samples.len() / src_channels).min(capacity - written);

            for ch in 0..channels.min(src_channels) {
                let dest = &mut buffer.channel_mut(ch)[written..written + frames];
                for (i, out) in dest.iter_mut().enumerate() {
                    *out = samples[i * src_channels + ch];
                }
            }
            written += frames;
        }

        if written < capacity {
            log::warn!(
                "Source ended after {} of {} frames; remainder left silent",
                written,
                capacity
            );
        }
        Ok(())
    }
}
