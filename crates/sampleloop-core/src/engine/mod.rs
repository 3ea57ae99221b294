//! Real-time side of the looper: slot, retirement and playback
//!
//! - [`BufferSlot`]: the spin-guarded "current buffer" shared with the audio thread
//! - [`RetirementRegistry`] / [`Sweeper`]: keep retired buffers alive until
//!   they can be freed off the audio thread
//! - [`PlaybackEngine`]: the per-block looping renderer

pub mod playback;
pub mod retire;
pub mod slot;

pub use playback::{
    GainRamp, InterleavedOutput, OutputBlock, PlanarOutput, PlaybackAtomics, PlaybackEngine,
};
pub use retire::{RetirementRegistry, Sweeper, ORPHANED_STRONG_COUNT};
pub use slot::{AcquiredBuffer, BufferSlot};
