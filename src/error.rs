//! Error types shared across the touch pipeline
//!
//! Library-level failures are typed with `thiserror` so callers can match on
//! them; the binary wraps them in `anyhow` with context.

use thiserror::Error;

/// Invalid configuration detected at configuration time
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// Sample rate must be finite and strictly positive
    #[error("invalid sample rate {0} Hz (must be finite and > 0)")]
    InvalidSampleRate(f64),

    /// Cutoff must lie strictly between 0 and a quarter of the sample rate
    #[error("invalid cutoff {cutoff} Hz for sample rate {sample_rate} Hz (must be in (0, {}))", .sample_rate / 4.0)]
    InvalidCutoff { cutoff: f64, sample_rate: f64 },

    /// Cropping leaves no usable sensor area
    #[error("sensor resolution {x_res}x{y_res} is too small for crop {crop_x}x{crop_y}")]
    InvalidCrop {
        x_res: u32,
        y_res: u32,
        crop_x: u32,
        crop_y: u32,
    },

    /// Display must have a non-zero area
    #[error("display geometry {width}x{height} has no area")]
    InvalidDisplay { width: u32, height: u32 },
}

/// Failures reported by a skeleton source
#[derive(Debug, Error)]
pub enum SensorError {
    /// Waiting for the next update failed (transient)
    #[error("sensor update failed: {0}")]
    Update(String),

    /// Joint lookup failed for one user
    #[error("joint lookup failed for user {user}: {reason}")]
    Joint { user: u32, reason: String },

    /// The source has no more data (end of a recording)
    #[error("sensor stream ended")]
    EndOfStream,

    /// Too many consecutive update failures
    #[error("sensor failed {0} consecutive times, giving up")]
    Exhausted(u32),

    /// I/O while reading a recording
    #[error("sensor I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed recording line
    #[error("malformed recording at line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// A frame sink could not accept a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The consumer side has gone away
    #[error("frame consumer disconnected")]
    Disconnected,

    /// The consumer is not keeping up
    #[error("frame consumer is full")]
    Full,
}
