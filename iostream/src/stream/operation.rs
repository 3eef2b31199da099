//! Lifecycle of a single stream operation.
//!
//! Callbacks, the consumer's event stream and the disposal handle all
//! share one atomic state word. Whoever moves it out of `ACTIVE` first
//! wins: a terminal event and a disposal can race, but only one of them
//! closes the channel and at most one terminal event is ever sent.
//!
//! Only the consumer side holds the operation strongly. Platform
//! callbacks hold a `Weak`, so an operation nobody can observe any more
//! is dropped, and dropping it releases the channel.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use futures::channel::mpsc::{self, UnboundedSender};

use super::event::{Dispose, Event, Events};
use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::io::{CleanupHandler, Completion, CompletionHandler};
use crate::transport::RawChannel;

const ACTIVE: u8 = 0;
const TERMINATED: u8 = 1;
const DISPOSED: u8 = 2;

pub(crate) struct Lifecycle {
    state: AtomicU8,
}

impl Lifecycle {
    fn new() -> Self {
        Self { state: AtomicU8::new(ACTIVE) }
    }

    fn advance(&self, to: u8) -> bool {
        self.state
            .compare_exchange(ACTIVE, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.load(Ordering::Acquire) == ACTIVE
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.state.load(Ordering::Acquire) == TERMINATED
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.state.load(Ordering::Acquire) == DISPOSED
    }
}

pub(crate) struct Operation<T, C: RawChannel> {
    label: &'static str,
    lifecycle: Lifecycle,
    channel: OnceLock<Channel<C>>,
    events: UnboundedSender<Event<T>>,
}

impl<T, C: RawChannel> Operation<T, C> {
    fn close_channel(&self) {
        if let Some(channel) = self.channel.get() {
            channel.close();
        }
    }
}

impl<T, C> Operation<T, C>
where
    T: Send + 'static,
    C: RawChannel,
{
    pub(crate) fn new(label: &'static str) -> (Arc<Self>, Events<T>) {
        let (tx, rx) = mpsc::unbounded();
        let op = Arc::new(Self {
            label,
            lifecycle: Lifecycle::new(),
            channel: OnceLock::new(),
            events: tx,
        });
        let events = Events::new(rx, op.clone());
        (op, events)
    }

    pub(crate) fn attach(&self, channel: Channel<C>) -> Result<&Channel<C>> {
        if self.channel.set(channel).is_err() {
            return Err(Error::ChannelClosed);
        }
        self.channel.get().ok_or(Error::ChannelClosed)
    }

    pub(crate) fn next(&self, item: T) {
        if !self.lifecycle.is_active() {
            return;
        }
        if self.events.unbounded_send(Event::Next(item)).is_err() {
            log::debug!("{} events have no consumer, releasing channel", self.label);
            self.dispose();
        }
    }

    pub(crate) fn complete(&self) {
        self.terminate(Event::Completed);
    }

    pub(crate) fn fail(&self, err: Error) {
        self.terminate(Event::Failed(err));
    }

    fn terminate(&self, event: Event<T>) {
        if !self.lifecycle.advance(TERMINATED) {
            return;
        }
        log::debug!("{} operation terminated: {:?}", self.label, DebugTerminal(&event));
        // Closed before the consumer can observe the terminal event.
        self.close_channel();
        let _ = self.events.unbounded_send(event);
        self.events.close_channel();
    }

    /// Completion handler that forwards to `on_event` while the operation lives.
    pub(crate) fn completion_handler<F>(self: &Arc<Self>, on_event: F) -> CompletionHandler
    where
        F: Fn(&Self, Completion) + Send + 'static,
    {
        let op = Arc::downgrade(self);
        Box::new(move |completion: Completion| match op.upgrade() {
            Some(op) => on_event(&op, completion),
            None => log::trace!("completion for a dropped operation ignored"),
        })
    }

    /// Cleanup handler that fails the operation on a nonzero release code.
    pub(crate) fn cleanup_handler(self: &Arc<Self>) -> CleanupHandler {
        let op: Weak<Self> = Arc::downgrade(self);
        Box::new(move |code: i32| {
            let Some(op) = op.upgrade() else {
                return;
            };
            if let Some(err) = Error::from_code(code) {
                log::debug!("{} channel released with code {}", op.label, code);
                op.fail(err);
            }
        })
    }
}

impl<T, C> Dispose for Operation<T, C>
where
    T: Send + 'static,
    C: RawChannel,
{
    fn dispose(&self) {
        if !self.lifecycle.advance(DISPOSED) {
            return;
        }
        log::debug!("{} operation disposed", self.label);
        self.close_channel();
        self.events.close_channel();
    }

    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }
}

impl<T, C: RawChannel> Drop for Operation<T, C> {
    fn drop(&mut self) {
        if self.lifecycle.advance(DISPOSED) {
            log::debug!("{} operation dropped while active", self.label);
            self.close_channel();
        }
    }
}

struct DebugTerminal<'a, T>(&'a Event<T>);

impl<T> std::fmt::Debug for DebugTerminal<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Event::Next(_) => f.write_str("Next"),
            Event::Completed => f.write_str("Completed"),
            Event::Failed(err) => write!(f, "Failed({})", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StreamConfig;
    use crate::io::ChannelKind;
    use crate::queue::Queue;
    use crate::stream::Disposable;
    use crate::transport::{ScriptedChannel, ScriptedDescriptor};
    use futures::{FutureExt, StreamExt};

    type TestOp = Operation<usize, ScriptedChannel>;

    fn attached() -> (Arc<TestOp>, Events<usize>, ScriptedChannel, Queue) {
        let queue = Queue::new("op");
        let descriptor = ScriptedDescriptor::new();
        let (op, events) = Operation::new("test");
        let channel = Channel::open(
            &descriptor,
            ChannelKind::Write,
            &StreamConfig::default(),
            &queue,
            op.cleanup_handler(),
        )
        .unwrap();
        op.attach(channel).unwrap();
        (op, events, descriptor.last_channel().unwrap(), queue)
    }

    #[test]
    fn test_only_first_terminal_event_is_delivered() {
        let (op, events, raw, _queue) = attached();
        op.next(3);
        op.fail(Error::System(5));
        op.complete();
        op.next(1);

        let seen: Vec<_> = futures::executor::block_on(events.collect());
        assert_eq!(seen, vec![Event::Next(3), Event::Failed(Error::System(5))]);
        assert_eq!(raw.close_calls(), 1);
    }

    #[test]
    fn test_dispose_after_terminal_is_noop() {
        let (op, mut events, raw, _queue) = attached();
        op.complete();

        let handle = Disposable::new(op.clone());
        handle.dispose();
        handle.dispose();

        assert!(!handle.is_disposed());
        assert_eq!(events.next().now_or_never(), Some(Some(Event::Completed)));
        assert_eq!(raw.close_calls(), 1);
    }

    #[test]
    fn test_dispose_discards_buffered_events() {
        let (op, mut events, raw, _queue) = attached();
        op.next(10);
        op.next(4);

        Disposable::new(op.clone()).dispose();
        op.complete();

        assert_eq!(events.next().now_or_never(), Some(None));
        assert_eq!(raw.close_calls(), 1);
    }

    #[test]
    fn test_second_attach_is_rejected() {
        let (op, _events, _raw, queue) = attached();
        let other = Channel::open(
            &ScriptedDescriptor::new(),
            ChannelKind::Write,
            &StreamConfig::default(),
            &queue,
            Box::new(|_: i32| {}),
        )
        .unwrap();
        assert_eq!(op.attach(other).err(), Some(Error::ChannelClosed));
    }

    #[test]
    fn test_callbacks_do_not_keep_operation_alive() {
        let (op, events, raw, queue) = attached();
        let mut handler = op.completion_handler(|op: &TestOp, _| op.next(1));
        let cleanup = op.cleanup_handler();

        drop(events);
        drop(op);
        assert!(raw.is_closed());
        assert_eq!(raw.close_calls(), 1);

        // Both handlers outlive the operation and are inert.
        handler(Completion::partial(&b"late"[..]));
        cleanup(7);
        queue.run_pending();
        assert_eq!(raw.close_calls(), 1);
    }

    #[test]
    fn test_next_without_consumer_disposes() {
        let (op, events, raw, _queue) = attached();
        let handle = Disposable::new(op.clone());
        drop(events);

        op.next(5);
        assert!(handle.is_disposed());
        assert!(raw.is_closed());

        op.complete();
        assert_eq!(raw.close_calls(), 1);
    }
}
