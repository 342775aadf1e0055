//! Error taxonomy shared by the pipeline components.

use std::path::PathBuf;

use thiserror::Error;

use crate::pipeline::Mode;

/// Errors surfaced to the caller of the pipeline API.
///
/// None of these are fatal to the process: a failed mode switch leaves the
/// previous mode in place, a failed image load keeps the previous image.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("capture device {index} unavailable: {reason}")]
    DeviceUnavailable { index: usize, reason: String },

    #[error("failed to load image {path}: {reason}")]
    ImageLoad { path: PathBuf, reason: String },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("operation requires {expected:?} mode (currently {actual:?})")]
    WrongMode { expected: Mode, actual: Mode },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to spawn {what} thread: {source}")]
    Spawn {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("capture loop thread panicked")]
    CaptureLoopPanicked,

    #[error("detection worker is shut down")]
    WorkerStopped,

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Failure of a single detection pass. The pass is abandoned; the pipeline
/// carries on with the next frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(crate::capture::PixelFormat),

    #[error("decoder fault: {0}")]
    Backend(String),
}

/// Per-frame failure from a capture handle. Transient failures skip the tick.
#[derive(Debug, Error)]
pub enum GrabError {
    #[error("no frame available: {0}")]
    Transient(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Convert(#[from] ConvertError),
}

/// Raw device payload could not be turned into an RGB24 frame.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("payload of {actual} bytes does not match {width}x{height} {format:?}")]
    SizeMismatch {
        width: u32,
        height: u32,
        format: crate::capture::PixelFormat,
        actual: usize,
    },

    #[error("jpeg decode failed: {0}")]
    Jpeg(String),

    #[error("no conversion from {0:?}")]
    Unsupported(crate::capture::PixelFormat),
}

/// Presentation surface failure.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("surface error: {0}")]
    Surface(String),
}

pub type Result<T, E = ScanError> = std::result::Result<T, E>;
