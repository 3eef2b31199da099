//! Events, event streams and disposal handles.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::channel::mpsc::UnboundedReceiver;
use futures::stream::{FusedStream, Stream, StreamExt};

use super::operation::Lifecycle;
use crate::error::Error;

/// One event of a stream operation.
///
/// `Completed` and `Failed` are terminal: exactly one of them ends an
/// operation that runs to exhaustion, and nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<T> {
    /// A data chunk (reads) or an outstanding-byte count (writes).
    Next(T),
    /// The operation finished successfully.
    Completed,
    /// The operation failed.
    Failed(Error),
}

impl<T> Event<T> {
    /// The payload of a `Next` event.
    pub fn into_next(self) -> Option<T> {
        match self {
            Event::Next(value) => Some(value),
            _ => None,
        }
    }
}

/// Consumer side of an operation.
///
/// Yields `None` after the terminal event, or as soon as the operation is
/// disposed; events still buffered at disposal time are discarded.
///
/// Keeps the operation alive. Once this stream and every [`Disposable`]
/// of the operation are dropped, the operation releases its channel.
pub struct Events<T> {
    rx: UnboundedReceiver<Event<T>>,
    op: Arc<dyn Dispose>,
}

impl<T> Events<T> {
    pub(crate) fn new(rx: UnboundedReceiver<Event<T>>, op: Arc<dyn Dispose>) -> Self {
        Self { rx, op }
    }

    /// True once the operation has reached a terminal event.
    pub fn is_finished(&self) -> bool {
        self.op.lifecycle().is_terminated()
    }
}

impl<T> Stream for Events<T> {
    type Item = Event<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event<T>>> {
        if self.op.lifecycle().is_disposed() {
            return Poll::Ready(None);
        }
        self.rx.poll_next_unpin(cx)
    }
}

impl<T> FusedStream for Events<T> {
    fn is_terminated(&self) -> bool {
        self.op.lifecycle().is_disposed() || self.rx.is_terminated()
    }
}

/// Events of a read: data chunks.
pub type ReadEvents = Events<bytes::Bytes>;

/// Events of a write: bytes still outstanding.
pub type WriteProgress = Events<usize>;

pub(crate) trait Dispose: Send + Sync {
    fn dispose(&self);
    fn lifecycle(&self) -> &Lifecycle;
}

/// Releases an operation's channel and silences its event stream.
///
/// Idempotent, and a no-op once the operation has finished on its own.
/// Dropping a handle does not cancel anything.
#[derive(Clone)]
pub struct Disposable {
    target: Arc<dyn Dispose>,
}

impl Disposable {
    pub(crate) fn new(target: Arc<dyn Dispose>) -> Self {
        Self { target }
    }

    /// Cancels the operation unless it already finished.
    pub fn dispose(&self) {
        self.target.dispose();
    }

    /// True if the operation was cancelled before reaching a terminal event.
    pub fn is_disposed(&self) -> bool {
        self.target.lifecycle().is_disposed()
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
