//! Render host: drives the playback engine from an output device
//!
//! The cpal backend (feature `cpal-backend`, on by default) opens an f32
//! output stream and moves the [`PlaybackEngine`](crate::engine::PlaybackEngine)
//! into the stream callback, so the engine is owned exclusively by the audio
//! thread:
//!
//! ```text
//! ┌──────────────────┐  publish/clear   ┌──────────────┐  try_acquire  ┌──────────────────┐
//! │  Control thread  │─────────────────►│  BufferSlot  │◄──────────────│ cpal audio thread│
//! │ (UI + loader)    │                  │ (spin lock)  │               │ (PlaybackEngine) │
//! └──────────────────┘                  └──────────────┘               └──────────────────┘
//!          │ set_level                                                          ▲
//!          └──────────────────────── PlaybackAtomics (relaxed) ─────────────────┘
//! ```
//!
//! Other hosts can skip this module entirely and call
//! [`PlaybackEngine::render`](crate::engine::PlaybackEngine::render) themselves.

mod config;
mod error;

#[cfg(feature = "cpal-backend")]
mod cpal_backend;

pub use config::{AudioConfig, BufferSize, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE, MIN_BUFFER_SIZE};
pub use error::{AudioError, AudioResult};

#[cfg(feature = "cpal-backend")]
pub use cpal_backend::{output_device_names, start_playback, PlaybackHandle};
