//! Error types for stream operations.

use thiserror::Error;

/// Completion code reported when an I/O failure carries no OS error number (`EIO`).
pub const FALLBACK_ERROR_CODE: i32 = 5;

/// Errors surfaced by channels and streams.
///
/// Cancellation is not represented here: disposing an operation simply
/// stops event delivery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Nonzero completion code reported by the platform primitive.
    #[error("system error (code {0})")]
    System(i32),

    /// An operation was scheduled on a channel that is already closed.
    #[error("channel is closed")]
    ChannelClosed,

    /// The descriptor could not produce a channel.
    #[error("failed to open channel: {0}")]
    ChannelOpen(String),
}

impl Error {
    /// Maps a completion code to an error; `0` means success.
    pub fn from_code(code: i32) -> Option<Self> {
        (code != 0).then_some(Error::System(code))
    }

    /// Returns the platform code for system errors.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::System(code) => Some(*code),
            _ => None,
        }
    }

    /// Converts an I/O error into a completion code.
    pub fn code_of(err: &std::io::Error) -> i32 {
        match err.raw_os_error() {
            Some(code) if code != 0 => code,
            _ => FALLBACK_ERROR_CODE,
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> std::io::Error {
        match err {
            Error::System(code) => std::io::Error::from_raw_os_error(code),
            Error::ChannelClosed => std::io::Error::new(std::io::ErrorKind::NotConnected, err),
            Error::ChannelOpen(_) => std::io::Error::other(err),
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
