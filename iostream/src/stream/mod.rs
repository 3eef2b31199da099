//! Back-pressured byte streams over a duplex descriptor.
//!
//! A stream is a descriptor plus the queue its completions run on. Each
//! read or write opens its own derived channel, owns it for the lifetime
//! of the operation and closes it on the terminal event or on disposal.
//!
//! ```text
//!   read(min_bytes)  ──► Channel(Read)  ──► ReadEvents   Next(Bytes)*  Completed | Failed
//!   write(buffer)    ──► Channel(Write) ──► WriteProgress Next(usize)* Completed | Failed
//!   write_stream(in) ──► write(..) per buffer ──► AggregateProgress (sum of outstanding)
//! ```

use bytes::Bytes;
use futures::stream::Stream;

use crate::config::{DEFAULT_MIN_BYTES, StreamConfig};
use crate::queue::Queue;
use crate::transport::Descriptor;

pub mod aggregate;
mod event;
mod operation;
pub mod reader;
pub mod writer;

pub use aggregate::{AggregateProgress, WriteRegistry};
pub use event::{Disposable, Event, Events, ReadEvents, WriteProgress};

pub(crate) type ChannelOf<S> = <<S as IoStream>::Descriptor as Descriptor>::Channel;

/// Something that can hand out derived channels for stream operations.
pub trait IoStream {
    /// Descriptor operations open their channels over.
    type Descriptor: Descriptor;

    /// The descriptor shared by every operation of this stream.
    fn descriptor(&self) -> &Self::Descriptor;

    /// Queue that every completion of this stream is delivered on.
    fn queue(&self) -> &Queue;

    /// Config applied to every operation and every channel it opens.
    fn config(&self) -> StreamConfig {
        StreamConfig::default()
    }
}

/// Read side of a stream.
pub trait ReadableIoStream: IoStream {
    /// Reads until end of input, delivering chunks of at least `min_bytes`
    /// (the last chunk may be shorter). A `min_bytes` of zero means one.
    fn read(&self, min_bytes: usize) -> (ReadEvents, Disposable) {
        reader::read(self, min_bytes)
    }

    /// Reads with the smallest low water mark.
    fn read_any(&self) -> (ReadEvents, Disposable) {
        self.read(DEFAULT_MIN_BYTES)
    }
}

/// Write side of a stream.
pub trait WritableIoStream: IoStream {
    /// Writes `buffer`, reporting the bytes still unflushed after each step.
    fn write(&self, buffer: Bytes) -> (WriteProgress, Disposable) {
        writer::write(self, buffer)
    }

    /// Starts a write for every buffer `input` yields and folds their
    /// progress into one outstanding-byte total.
    fn write_stream<S>(&self, input: S) -> AggregateProgress<'_, Self, S>
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        AggregateProgress::new(self, input)
    }
}

/// Readable and writable stream over a single descriptor.
#[derive(Debug, Clone)]
pub struct Duplex<D> {
    descriptor: D,
    queue: Queue,
    config: StreamConfig,
}

impl<D: Descriptor> Duplex<D> {
    /// A stream with the default config.
    pub fn new(descriptor: D, queue: Queue) -> Self {
        Self::with_config(descriptor, queue, StreamConfig::default())
    }

    /// A stream whose operations and channels use `config`.
    pub fn with_config(descriptor: D, queue: Queue, config: StreamConfig) -> Self {
        Self { descriptor, queue, config }
    }
}

impl<D: Descriptor> IoStream for Duplex<D> {
    type Descriptor = D;

    fn descriptor(&self) -> &D {
        &self.descriptor
    }

    fn queue(&self) -> &Queue {
        &self.queue
    }

    fn config(&self) -> StreamConfig {
        self.config
    }
}

impl<D: Descriptor> ReadableIoStream for Duplex<D> {}

impl<D: Descriptor> WritableIoStream for Duplex<D> {}
