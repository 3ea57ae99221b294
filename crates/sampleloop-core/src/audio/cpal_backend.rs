//! CPAL output stream hosting the playback engine

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, SampleFormat, Stream, StreamConfig};

use super::config::AudioConfig;
use super::error::{AudioError, AudioResult};
use crate::engine::PlaybackEngine;

/// Keeps the output stream alive. Drop this to stop audio.
pub struct PlaybackHandle {
    _stream: Stream,
    device_name: String,
    sample_rate: u32,
    channels: u16,
    buffer_size: Option<u32>,
}

impl PlaybackHandle {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Sample rate of the output stream
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Requested block size in frames (None = device default)
    pub fn buffer_size(&self) -> Option<u32> {
        self.buffer_size
    }

    /// One-way output latency in milliseconds, if the block size is known
    pub fn latency_ms(&self) -> Option<f32> {
        self.buffer_size
            .map(|frames| (frames as f32 / self.sample_rate as f32) * 1000.0)
    }
}

/// Names of the output devices on the default host
pub fn output_device_names() -> AudioResult<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Open the configured output device and start rendering `engine` into it
///
/// The engine is moved into the stream callback; the control thread keeps
/// talking to it through the buffer slot and the playback atomics.
pub fn start_playback(config: &AudioConfig, mut engine: PlaybackEngine) -> AudioResult<PlaybackHandle> {
    let device = find_output_device(config)?;
    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using audio device: {}", device_name);

    let stream_config = get_output_config(&device, config)?;
    let channels = stream_config.channels;
    let sample_rate = stream_config.sample_rate.0;
    let buffer_size = config.buffer_size.as_frames();

    log::info!(
        "Audio config: {} channels, {}Hz, {} frames",
        channels,
        sample_rate,
        buffer_size.map_or_else(|| "default".to_string(), |f| f.to_string())
    );

    let output_channels = channels as usize;
    let stream = device
        .build_output_stream(
            &stream_config,
            move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                engine.render_interleaved(data, output_channels);
            },
            move |err| {
                log::error!("Audio stream error: {}", err);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))?;

    stream
        .play()
        .map_err(|e| AudioError::StreamPlayError(e.to_string()))?;
    log::info!("Audio stream started");

    Ok(PlaybackHandle {
        _stream: stream,
        device_name,
        sample_rate,
        channels,
        buffer_size,
    })
}

fn find_output_device(config: &AudioConfig) -> AudioResult<cpal::Device> {
    let host = cpal::default_host();
    match &config.device {
        None => host.default_output_device().ok_or(AudioError::NoDevice),
        Some(name) => host
            .output_devices()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .find(|d| d.name().map(|n| &n == name).unwrap_or(false))
            .ok_or_else(|| AudioError::DeviceNotFound(name.clone())),
    }
}

/// Pick an f32 output configuration, preferring the configured sample rate
fn get_output_config(device: &cpal::Device, config: &AudioConfig) -> AudioResult<StreamConfig> {
    let default_config = device
        .default_output_config()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?;
    let target_rate = config.sample_rate.unwrap_or(default_config.sample_rate().0);

    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| AudioError::ConfigError(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let best = supported
        .iter()
        .find(|c| target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0)
        .map(|c| c.clone().with_sample_rate(cpal::SampleRate(target_rate)))
        .or_else(|| {
            supported.first().map(|c| {
                let fallback = c.max_sample_rate();
                log::warn!(
                    "Audio device doesn't support {}Hz, falling back to {}Hz",
                    target_rate,
                    fallback.0
                );
                c.clone().with_sample_rate(fallback)
            })
        })
        .ok_or_else(|| AudioError::ConfigError("No f32 output configuration".to_string()))?;

    let mut stream_config: StreamConfig = best.config();
    stream_config.buffer_size = match config.buffer_size.as_frames() {
        Some(frames) => CpalBufferSize::Fixed(frames),
        None => CpalBufferSize::Default,
    };
    Ok(stream_config)
}
