//! Load pipeline error types

use thiserror::Error;

use crate::buffer::AllocationError;

/// Errors that can end a load attempt
///
/// None of these affect what is currently playing: a failed load never
/// touches the buffer slot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    /// Source could not be opened or read
    #[error("IO error: {0}")]
    Io(String),

    /// Source opened but its contents could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// No reader for this container or codec
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Source is at least as long as the configured maximum
    #[error("Source is {duration_secs:.2}s long, must be shorter than {max_secs:.2}s")]
    DurationExceeded { duration_secs: f64, max_secs: f64 },

    /// Source has no frames; looping it would never advance
    #[error("Source contains no audio frames")]
    EmptySource,

    /// Channel count is zero or unreasonably large
    #[error("Invalid channel count: {0}")]
    InvalidChannelCount(usize),

    /// Buffer storage could not be reserved
    #[error(transparent)]
    Allocation(#[from] AllocationError),
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        LoadError::Io(e.to_string())
    }
}

/// Result type for load operations
pub type LoadResult<T> = Result<T, LoadError>;
