//! Error surface of the engine.

use std::io;

use thiserror::Error;

/// A specialized result type for ring operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the [`Ring`](crate::Ring) façade.
///
/// Failures of individual I/O operations are never reported through this
/// type; they travel as a negative `result` on the operation descriptor.
#[derive(Debug, Error)]
pub enum Error {
    /// The ring was closed, or never initialized.
    #[error("ring is not initialized")]
    Uninitialized,

    /// No submission queue entry is available; submit before preparing
    /// further operations.
    #[error("no free submission queue entry")]
    RingFull,

    /// A required descriptor field was left unset.
    #[error("missing `{0}` value")]
    MissingArgument(&'static str),

    /// A descriptor field held a value the operation cannot use.
    #[error("bad `{0}` value")]
    BadArgument(&'static str),

    /// The buffer-ring registry is at capacity.
    #[error("buffer ring registry is full")]
    TooManyBufferRings,

    /// Mapping buffer-ring memory failed.
    #[error("failed to map buffer ring memory")]
    MapFailed(#[source] io::Error),

    /// Allocating buffer-ring backing storage failed.
    #[error("failed to allocate buffers")]
    AllocFailed,

    /// A kernel error, passed through verbatim.
    #[error(transparent)]
    Os(#[from] io::Error),
}

impl Error {
    /// Whether this error is a retryable interruption of a blocking wait
    /// (`EINTR` or `EAGAIN`). The interrupted completion was not consumed;
    /// the caller may simply wait again.
    pub fn is_interrupted(&self) -> bool {
        match self {
            Error::Os(e) => matches!(
                e.raw_os_error(),
                Some(libc::EINTR) | Some(libc::EAGAIN)
            ),
            _ => false,
        }
    }

    /// The underlying OS error code, if any.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Os(e) => e.raw_os_error(),
            Error::MapFailed(e) => e.raw_os_error(),
            _ => None,
        }
    }
}
