//! Platform I/O abstraction.
//!
//! A [`Descriptor`] stands for an OS handle (socket, pipe). Streams never
//! touch it directly; they open a derived [`RawChannel`] per operation,
//! schedule one read or write on it, and close it when the operation ends.
//!
//! # Implementations
//!
//! - `ScriptedDescriptor`: completions are injected by hand (testing)
//! - `TokioDescriptor`: drives any tokio `AsyncRead + AsyncWrite`

use bytes::Bytes;

use crate::config::StreamConfig;
use crate::error::Result;
use crate::io::{ChannelKind, CleanupHandler, CompletionHandler};
use crate::queue::Queue;

mod scripted;
mod tokio_io;

pub use scripted::{Scheduled, ScriptedChannel, ScriptedDescriptor};
pub use tokio_io::{TokioChannel, TokioDescriptor};

/// An OS handle that derived channels can be opened over.
pub trait Descriptor: Send + Sync + 'static {
    /// Channel type this descriptor derives.
    type Channel: RawChannel;

    /// Opens a derived channel tuned by `config`.
    ///
    /// Every completion of an operation scheduled on the returned channel
    /// is delivered on `queue`. `cleanup` runs on `queue` exactly once,
    /// when the platform releases the channel.
    fn open(
        &self,
        kind: ChannelKind,
        config: &StreamConfig,
        queue: &Queue,
        cleanup: CleanupHandler,
    ) -> Result<Self::Channel>;
}

/// Raw scheduling primitives of an open channel.
///
/// None of these block. Callers guarantee `close` is invoked at most once.
pub trait RawChannel: Send + Sync + 'static {
    /// Minimum bytes buffered before a read completion is delivered.
    fn set_low_water(&self, bytes: usize);

    /// Schedules a read of up to `length` bytes starting at `offset`.
    fn read(&self, offset: u64, length: usize, handler: CompletionHandler);

    /// Schedules a write of `data` starting at `offset`.
    fn write(&self, offset: u64, data: Bytes, handler: CompletionHandler);

    /// Cancels anything pending and releases the channel.
    fn close(&self);
}
