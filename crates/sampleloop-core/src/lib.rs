//! Sampleloop Core - real-time safe looping playback of loaded audio buffers
//!
//! A control thread loads audio files into shared buffers and publishes them;
//! the audio callback loops whatever buffer is currently published without
//! ever blocking, allocating or freeing memory.

pub mod audio;
pub mod audio_file;
pub mod buffer;
pub mod config;
pub mod engine;
pub mod loader;
pub mod player;
pub mod types;

pub use buffer::{SampleBuffer, SharedBuffer};
pub use player::Looper;
pub use types::*;
