//! Scripted backend whose completions are injected by the caller.
//!
//! Nothing happens until a test calls [`ScriptedChannel::complete`]; the
//! completion is then delivered through the queue like a real one.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;

use super::{Descriptor, RawChannel};
use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::io::{ChannelKind, CleanupHandler, Completion, CompletionHandler};
use crate::queue::{Queue, lock};

/// An operation recorded by a scripted channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    /// A read of up to `length` bytes.
    Read {
        /// Start offset.
        offset: u64,
        /// Maximum total length.
        length: usize,
    },
    /// A write of `data`.
    Write {
        /// Start offset.
        offset: u64,
        /// Payload handed to the channel.
        data: Bytes,
    },
}

#[derive(Default)]
struct DescriptorState {
    channels: Mutex<Vec<ScriptedChannel>>,
    invalid: Option<String>,
}

/// Descriptor that hands out [`ScriptedChannel`]s and remembers them.
#[derive(Clone, Default)]
pub struct ScriptedDescriptor {
    state: Arc<DescriptorState>,
}

impl ScriptedDescriptor {
    /// A descriptor that opens channels successfully.
    pub fn new() -> Self {
        Self::default()
    }

    /// A descriptor whose every `open` fails with `reason`.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            state: Arc::new(DescriptorState {
                channels: Mutex::new(Vec::new()),
                invalid: Some(reason.into()),
            }),
        }
    }

    /// Channels opened so far, oldest first.
    pub fn channels(&self) -> Vec<ScriptedChannel> {
        lock(&self.state.channels).clone()
    }

    /// Most recently opened channel.
    pub fn last_channel(&self) -> Option<ScriptedChannel> {
        lock(&self.state.channels).last().cloned()
    }

    /// Number of channels opened so far.
    pub fn opened(&self) -> usize {
        lock(&self.state.channels).len()
    }
}

impl Descriptor for ScriptedDescriptor {
    type Channel = ScriptedChannel;

    fn open(
        &self,
        kind: ChannelKind,
        config: &StreamConfig,
        queue: &Queue,
        cleanup: CleanupHandler,
    ) -> Result<ScriptedChannel> {
        if let Some(reason) = &self.state.invalid {
            return Err(Error::ChannelOpen(reason.clone()));
        }
        let channel = ScriptedChannel {
            inner: Arc::new(ChannelState {
                kind,
                config: *config,
                queue: queue.clone(),
                low_water: AtomicUsize::new(0),
                handler: Mutex::new(None),
                cleanup: Mutex::new(Some(cleanup)),
                scheduled: Mutex::new(Vec::new()),
                close_calls: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        };
        lock(&self.state.channels).push(channel.clone());
        Ok(channel)
    }
}

struct ChannelState {
    kind: ChannelKind,
    config: StreamConfig,
    queue: Queue,
    low_water: AtomicUsize,
    handler: Mutex<Option<CompletionHandler>>,
    cleanup: Mutex<Option<CleanupHandler>>,
    scheduled: Mutex<Vec<Scheduled>>,
    close_calls: AtomicUsize,
    closed: AtomicBool,
}

/// Channel that records what is scheduled on it.
#[derive(Clone)]
pub struct ScriptedChannel {
    inner: Arc<ChannelState>,
}

impl ScriptedChannel {
    /// Direction the channel was opened for.
    pub fn kind(&self) -> ChannelKind {
        self.inner.kind
    }

    /// Config the channel was opened with.
    pub fn config(&self) -> StreamConfig {
        self.inner.config
    }

    /// Low-water mark last set on the channel.
    pub fn low_water(&self) -> usize {
        self.inner.low_water.load(Ordering::Acquire)
    }

    /// Operations scheduled so far, oldest first.
    pub fn scheduled(&self) -> Vec<Scheduled> {
        lock(&self.inner.scheduled).clone()
    }

    /// How many times `close` reached the platform layer.
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::Acquire)
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queues delivery of `completion` to the pending operation.
    ///
    /// Dropped silently if the channel has been closed by the time the
    /// queue runs it.
    pub fn complete(&self, completion: Completion) {
        let inner = self.inner.clone();
        self.inner.queue.submit(move || {
            if inner.closed.load(Ordering::Acquire) {
                return;
            }
            // Taken out so the handler may close this channel without deadlocking.
            let handler = lock(&inner.handler).take();
            let Some(mut handler) = handler else {
                return;
            };
            handler(completion);
            if !inner.closed.load(Ordering::Acquire) {
                let mut slot = lock(&inner.handler);
                if slot.is_none() {
                    *slot = Some(handler);
                }
            }
        });
    }

    /// Simulates the platform tearing the channel down with `code`.
    pub fn abort(&self, code: i32) {
        if let Some(cleanup) = lock(&self.inner.cleanup).take() {
            self.inner.queue.submit(move || cleanup(code));
        }
    }

    fn arm(&self, op: Scheduled, handler: CompletionHandler) {
        if self.is_closed() {
            return;
        }
        lock(&self.inner.scheduled).push(op);
        *lock(&self.inner.handler) = Some(handler);
    }
}

impl RawChannel for ScriptedChannel {
    fn set_low_water(&self, bytes: usize) {
        self.inner.low_water.store(bytes, Ordering::Release);
    }

    fn read(&self, offset: u64, length: usize, handler: CompletionHandler) {
        self.arm(Scheduled::Read { offset, length }, handler);
    }

    fn write(&self, offset: u64, data: Bytes, handler: CompletionHandler) {
        self.arm(Scheduled::Write { offset, data }, handler);
    }

    fn close(&self) {
        self.inner.close_calls.fetch_add(1, Ordering::AcqRel);
        self.inner.closed.store(true, Ordering::Release);
        let pending = lock(&self.inner.handler).take();
        drop(pending);
        if let Some(cleanup) = lock(&self.inner.cleanup).take() {
            self.inner.queue.submit(move || cleanup(0));
        }
    }
}
