//! Audio backend error types

use thiserror::Error;

/// Errors that can occur while opening the output stream
#[derive(Error, Debug)]
pub enum AudioError {
    /// No default output device
    #[error("No audio output device available")]
    NoDevice,

    /// Configured device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to query or pick a device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build the output stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start the stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
