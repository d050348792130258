//! Error types shared by the rivulet stream layer.

use thiserror::Error;

/// Errors produced by the byte source and bit cache layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The source delivered fewer bytes than requested. This is the one and
    /// only end-of-stream signal in the pull model; whether it is a clean
    /// end or a truncation is decided by the caller from context.
    #[error("end of stream")]
    EndOfStream,

    /// The source refused a byte seek. The requested target is reported so
    /// callers can bound further search rather than abort.
    #[error("seek to byte offset {offset} refused by source")]
    SeekFailed {
        /// Absolute byte offset that was requested.
        offset: u64,
    },

    /// A caller-supplied argument was out of range (bit width, alignment).
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
}

/// Result type alias using the core error.
pub type Result<T> = std::result::Result<T, Error>;
