//! Open/closed bookkeeping over a raw platform channel.
//!
//! [`Channel`] is the unit of lifetime for one stream operation. It
//! refuses scheduling once closed, drops completions that arrive after
//! closure, and releases the underlying channel exactly once no matter
//! how many times [`Channel::close`] is called.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::io::{ChannelKind, CleanupHandler, Completion, CompletionHandler};
use crate::queue::Queue;
use crate::transport::{Descriptor, RawChannel};

/// Channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Channel is open and operations may be scheduled.
    Open,

    /// Channel is closed.
    Closed,
}

/// A derived channel owned by a single stream operation.
pub struct Channel<C> {
    raw: C,
    kind: ChannelKind,
    closed: Arc<AtomicBool>,
}

impl<C: RawChannel> Channel<C> {
    /// Opens a derived channel of `kind` over `descriptor`.
    pub fn open<D>(
        descriptor: &D,
        kind: ChannelKind,
        config: &StreamConfig,
        queue: &Queue,
        cleanup: CleanupHandler,
    ) -> Result<Self>
    where
        D: Descriptor<Channel = C>,
    {
        let raw = descriptor.open(kind, config, queue, cleanup)?;
        log::debug!("{:?} channel opened on queue {}", kind, queue.label());
        Ok(Self {
            raw,
            kind,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Direction the channel was opened for.
    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    /// Current open/closed state.
    pub fn state(&self) -> ChannelState {
        if self.closed.load(Ordering::Acquire) {
            ChannelState::Closed
        } else {
            ChannelState::Open
        }
    }

    /// True until the first successful [`Channel::close`].
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Sets the minimum bytes buffered before a read completion fires.
    pub fn set_low_water_mark(&self, bytes: usize) -> Result<()> {
        self.ensure_open()?;
        self.raw.set_low_water(bytes);
        Ok(())
    }

    /// Schedules a read of up to `max_length` bytes starting at `offset`.
    pub fn schedule_read<F>(&self, offset: u64, max_length: usize, on_event: F) -> Result<()>
    where
        F: FnMut(Completion) + Send + 'static,
    {
        self.ensure_open()?;
        log::trace!("{:?} channel: read scheduled, max_length={}", self.kind, max_length);
        self.raw.read(offset, max_length, self.guard(on_event));
        Ok(())
    }

    /// Schedules a write of `data` starting at `offset`.
    pub fn schedule_write<F>(&self, offset: u64, data: Bytes, on_event: F) -> Result<()>
    where
        F: FnMut(Completion) + Send + 'static,
    {
        self.ensure_open()?;
        log::trace!("{:?} channel: write scheduled, len={}", self.kind, data.len());
        self.raw.write(offset, data, self.guard(on_event));
        Ok(())
    }

    /// Closes the channel, cancelling whatever is pending on it.
    ///
    /// Returns `true` only for the call that actually released it.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        log::debug!("{:?} channel closed", self.kind);
        self.raw.close();
        true
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() { Ok(()) } else { Err(Error::ChannelClosed) }
    }

    fn guard<F>(&self, mut on_event: F) -> CompletionHandler
    where
        F: FnMut(Completion) + Send + 'static,
    {
        let closed = self.closed.clone();
        Box::new(move |completion: Completion| {
            if closed.load(Ordering::Acquire) {
                log::trace!("dropping completion delivered after close");
                return;
            }
            on_event(completion);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Scheduled, ScriptedDescriptor};
    use std::sync::Mutex;

    fn open(kind: ChannelKind) -> (Queue, ScriptedDescriptor, Channel<crate::transport::ScriptedChannel>) {
        let queue = Queue::new("channel");
        let descriptor = ScriptedDescriptor::new();
        let config = StreamConfig::default();
        let channel =
            Channel::open(&descriptor, kind, &config, &queue, Box::new(|_: i32| {})).unwrap();
        (queue, descriptor, channel)
    }

    #[test]
    fn test_close_is_idempotent() {
        let (_queue, descriptor, channel) = open(ChannelKind::Read);
        assert_eq!(channel.kind(), ChannelKind::Read);
        assert_eq!(channel.state(), ChannelState::Open);

        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.close());

        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(descriptor.last_channel().unwrap().close_calls(), 1);
    }

    #[test]
    fn test_scheduling_after_close_fails() {
        let (_queue, descriptor, channel) = open(ChannelKind::Write);
        channel.close();

        let result = channel.schedule_write(0, Bytes::from_static(b"late"), |_| {});
        assert_eq!(result, Err(Error::ChannelClosed));
        assert_eq!(channel.set_low_water_mark(4), Err(Error::ChannelClosed));
        assert!(descriptor.last_channel().unwrap().scheduled().is_empty());
    }

    #[test]
    fn test_low_water_mark_reaches_platform() {
        let (_queue, descriptor, channel) = open(ChannelKind::Read);
        channel.set_low_water_mark(512).unwrap();
        channel.schedule_read(0, 1024, |_| {}).unwrap();

        let raw = descriptor.last_channel().unwrap();
        assert_eq!(raw.low_water(), 512);
        assert_eq!(raw.scheduled(), vec![Scheduled::Read { offset: 0, length: 1024 }]);
    }

    #[test]
    fn test_completions_after_close_are_dropped() {
        let (queue, descriptor, channel) = open(ChannelKind::Read);
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        channel
            .schedule_read(0, 64, move |_| *counter.lock().unwrap() += 1)
            .unwrap();

        let raw = descriptor.last_channel().unwrap();
        raw.complete(Completion::partial(&b"one"[..]));
        queue.run_pending();
        assert_eq!(*seen.lock().unwrap(), 1);

        raw.complete(Completion::partial(&b"two"[..]));
        channel.close();
        queue.run_pending();
        assert_eq!(*seen.lock().unwrap(), 1);
    }
}
