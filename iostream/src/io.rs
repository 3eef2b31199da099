//! Completion shape of the platform I/O primitive.

use bytes::Bytes;

/// One callback from a scheduled read or write.
///
/// For reads `data` holds bytes that became available. For writes it
/// holds the bytes not yet flushed, so its length is the outstanding
/// count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// No further completions follow.
    pub done: bool,
    /// Bytes read, or bytes still unflushed for writes.
    pub data: Option<Bytes>,
    /// Platform error code; `0` on success.
    pub error: i32,
}

impl Completion {
    /// A non-final completion carrying data.
    pub fn partial(data: impl Into<Bytes>) -> Self {
        Self { done: false, data: Some(data.into()), error: 0 }
    }

    /// A final, successful completion.
    pub fn finished(data: Option<Bytes>) -> Self {
        Self { done: true, data, error: 0 }
    }

    /// A final completion reporting a platform error code.
    pub fn failed(data: Option<Bytes>, error: i32) -> Self {
        Self { done: true, data, error }
    }
}

/// Invoked on the queue for every completion of a scheduled operation.
pub type CompletionHandler = Box<dyn FnMut(Completion) + Send + 'static>;

/// Invoked once on the queue when a channel is released, with `0` on a clean release.
pub type CleanupHandler = Box<dyn FnOnce(i32) + Send + 'static>;

/// Direction a derived channel is opened for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Read-oriented channel.
    Read,
    /// Write-oriented channel.
    Write,
}
