//! Error types for apdmvs.
//!
//! Configuration and resource failures surface as `Err`; per-pixel data
//! problems (out-of-range depth, failed plane fits) never do. They are
//! carried in-band as `PixelState::Unknown` or an unreliable mark.

use thiserror::Error;

/// Result alias for apdmvs operations.
pub type Result<T> = std::result::Result<T, ApdError>;

/// Errors that can occur when running the stereo pipeline.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ApdError {
    /// The input data or parameters are invalid.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Image dimensions are zero or overflow.
    #[error("invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: usize, height: usize },
    /// A pixel buffer is shorter than its dimensions require.
    #[error("buffer too small: needed {needed}, got {got}")]
    BufferTooSmall { needed: usize, got: usize },
    /// A run parameter or pipeline setting is unusable.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    /// A problem references more images than the fixed per-problem cap.
    #[error("image count {count} exceeds the cap of {max}")]
    TooManyImages { count: usize, max: usize },
    /// The pairing list produced no problems.
    #[error("no problems produced from pairing list {path}")]
    NoProblems { path: String },
    /// Buffer allocation or dispatch failure; aborts the current run.
    #[error("resource error in problem {problem} during {phase}: {reason}")]
    Resource {
        problem: usize,
        phase: &'static str,
        reason: String,
    },
    /// The compute device (worker pool) could not be set up.
    #[error("device error: {reason}")]
    Device { reason: String },
    /// File system failure.
    #[error("i/o error at {path}: {reason}")]
    Io { path: String, reason: String },
    /// A text or binary input file is malformed.
    #[error("parse error in {path} (line {line}): {reason}")]
    Parse {
        path: String,
        line: usize,
        reason: String,
    },
    /// Image decoding or encoding failed.
    #[error("image i/o error: {reason}")]
    ImageIo { reason: String },
}

impl ApdError {
    /// Returns true for errors that stem from bad configuration or inputs.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            ApdError::Configuration { .. }
                | ApdError::TooManyImages { .. }
                | ApdError::NoProblems { .. }
                | ApdError::Parse { .. }
                | ApdError::InvalidInput(_)
        )
    }

    /// Returns true for allocation and dispatch failures.
    pub fn is_resource(&self) -> bool {
        matches!(self, ApdError::Resource { .. } | ApdError::Device { .. })
    }

    pub(crate) fn config(reason: impl Into<String>) -> Self {
        ApdError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        ApdError::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Allocates a zero-initialized buffer, mapping allocation failure to a
/// resource error tagged with the problem and phase.
pub(crate) fn try_alloc<T: Clone>(
    len: usize,
    value: T,
    problem: usize,
    phase: &'static str,
) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|err| ApdError::Resource {
        problem,
        phase,
        reason: err.to_string(),
    })?;
    buf.resize(len, value);
    Ok(buf)
}
