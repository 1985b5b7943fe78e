//! Pipeline-level errors.

use crate::capture::ConfigError;
use thiserror::Error;

/// Fatal errors raised while building or starting a pipeline.
///
/// A pipeline that fails with one of these never starts.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("insufficient chunk buffers: {requested} requested, at least {minimum} needed")]
    InsufficientBuffers { requested: usize, minimum: usize },
    #[error("unsupported source format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to spawn decode thread: {0}")]
    ThreadSpawn(#[from] std::io::Error),
}

/// Stream-level problems reported to the owner of a running pipeline.
///
/// These are recorded in the grab context rather than returned, so neither
/// the capture context nor the decode thread ever unwinds because of them.
/// The owner should restart the USB stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("no chunk completed within {frames} frames")]
    Desync { frames: u64 },
    #[error("{consecutive} consecutive chunks failed to decode")]
    DecodeFailures { consecutive: u32 },
}
