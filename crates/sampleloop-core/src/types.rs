//! Common types and constants for Sampleloop

/// Audio sample type used for storage and rendering
pub type Sample = f32;

/// Longest source accepted by default, in seconds (sources must be shorter)
pub const DEFAULT_MAX_DURATION_SECS: f64 = 2.0;

/// Default period of the retirement sweep, in milliseconds
pub const DEFAULT_SWEEP_INTERVAL_MS: u64 = 500;

/// Lower bound for the sweep period so a bad config can't spin the sweeper
pub const MIN_SWEEP_INTERVAL_MS: u64 = 10;

/// Upper bound on channels a decoded source may have
pub const MAX_CHANNELS: usize = 64;
