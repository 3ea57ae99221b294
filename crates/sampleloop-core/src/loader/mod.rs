//! Background loading of audio files into shared buffers
//!
//! The [`LoadPipeline`] decodes off the audio thread and hands finished
//! buffers back to the control thread, which publishes them.

mod error;
mod pipeline;

pub use error::{LoadError, LoadResult};
pub use pipeline::{load_buffer, LoadEvent, LoadPipeline, LoadState};
