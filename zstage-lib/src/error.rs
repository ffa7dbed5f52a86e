use crate::axis::Axis;
use crate::constants::FRAME_SIZE;
use std::io;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The primary error type for the `zstage-lib` library.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serial connection is closed")]
    Closed,

    #[error("Serial link lock poisoned by a panicking holder")]
    LinkPoisoned,

    #[error("Timeout after {timeout:?}: expected {expected} bytes, got {received}")]
    Timeout {
        expected: usize,
        received: usize,
        timeout: Duration,
    },

    #[error("Unit id mismatch: expected {expected}, got {received} (response {})", hex::encode(.raw))]
    IdentityMismatch {
        expected: u8,
        received: u8,
        raw: [u8; FRAME_SIZE],
    },

    #[error("Invalid frame: expected {expected} bytes, got {actual}")]
    InvalidFrame { expected: usize, actual: usize },

    #[error("Invalid target position: {0} mm")]
    InvalidTarget(f64),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Axis {0} is not configured in this session")]
    UnknownAxis(Axis),
}

/// Coarse classification of a [`StageError`], used by callers to choose
/// between aborting the session and retrying the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorKind {
    /// Port closed or driver-level failure. Fatal to the session.
    Connection,
    /// No complete response frame within the deadline.
    Timeout,
    /// A well-formed response addressed from another unit.
    IdentityMismatch,
    /// Bad arguments or configuration; nothing was sent.
    Usage,
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Serial(_) | StageError::Io(_) | StageError::Closed | StageError::LinkPoisoned => {
                ErrorKind::Connection
            }
            StageError::Timeout { .. } => ErrorKind::Timeout,
            StageError::IdentityMismatch { .. } => ErrorKind::IdentityMismatch,
            StageError::InvalidFrame { .. }
            | StageError::InvalidTarget(_)
            | StageError::InvalidConfig(_)
            | StageError::UnknownAxis(_) => ErrorKind::Usage,
        }
    }

    /// True for errors a caller may reasonably retry after a fresh buffer reset.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Timeout | ErrorKind::IdentityMismatch)
    }
}

pub type Result<T> = std::result::Result<T, StageError>;
