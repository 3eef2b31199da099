//! Backend over tokio I/O objects.
//!
//! Each scheduled operation runs as its own task on the runtime the
//! descriptor was created in. Completions are posted to the channel's
//! queue; closing the channel cancels the task.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use super::{Descriptor, RawChannel};
use crate::config::{DEFAULT_MIN_BYTES, StreamConfig};
use crate::error::{Error, Result};
use crate::io::{ChannelKind, CleanupHandler, Completion, CompletionHandler};
use crate::queue::{Queue, lock};

struct Halves<T> {
    reader: tokio::sync::Mutex<ReadHalf<T>>,
    writer: tokio::sync::Mutex<WriteHalf<T>>,
}

/// Descriptor wrapping a tokio `AsyncRead + AsyncWrite` object.
///
/// Reads use `read_buffer_size` and writes use `write_chunk_size` from the
/// config each channel is opened with.
pub struct TokioDescriptor<T> {
    io: Arc<Halves<T>>,
    runtime: Handle,
}

impl<T> TokioDescriptor<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wraps `io`, capturing the current runtime for spawned operations.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(io: T) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| Error::ChannelOpen(e.to_string()))?;
        let (reader, writer) = tokio::io::split(io);
        Ok(Self {
            io: Arc::new(Halves {
                reader: tokio::sync::Mutex::new(reader),
                writer: tokio::sync::Mutex::new(writer),
            }),
            runtime,
        })
    }
}

impl<T> Descriptor for TokioDescriptor<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    type Channel = TokioChannel<T>;

    fn open(
        &self,
        kind: ChannelKind,
        config: &StreamConfig,
        queue: &Queue,
        cleanup: CleanupHandler,
    ) -> Result<TokioChannel<T>> {
        log::debug!("opening {:?} channel on queue {}", kind, queue.label());
        Ok(TokioChannel {
            kind,
            io: self.io.clone(),
            runtime: self.runtime.clone(),
            config: *config,
            queue: queue.clone(),
            low_water: AtomicUsize::new(DEFAULT_MIN_BYTES),
            cancel: CancellationToken::new(),
            cleanup: Mutex::new(Some(cleanup)),
        })
    }
}

/// Posts completions for one operation to the queue.
#[derive(Clone)]
struct Delivery {
    queue: Queue,
    handler: Arc<Mutex<CompletionHandler>>,
}

impl Delivery {
    fn new(queue: &Queue, handler: CompletionHandler) -> Self {
        Self {
            queue: queue.clone(),
            handler: Arc::new(Mutex::new(handler)),
        }
    }

    fn send(&self, completion: Completion) {
        let handler = self.handler.clone();
        self.queue.submit(move || {
            let mut handler = lock(&handler);
            (*handler)(completion);
        });
    }
}

/// Channel derived from a [`TokioDescriptor`].
pub struct TokioChannel<T> {
    kind: ChannelKind,
    io: Arc<Halves<T>>,
    runtime: Handle,
    config: StreamConfig,
    queue: Queue,
    low_water: AtomicUsize,
    cancel: CancellationToken,
    cleanup: Mutex<Option<CleanupHandler>>,
}

impl<T> RawChannel for TokioChannel<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    fn set_low_water(&self, bytes: usize) {
        self.low_water.store(bytes.max(1), Ordering::Release);
    }

    fn read(&self, offset: u64, length: usize, handler: CompletionHandler) {
        let io = self.io.clone();
        let cancel = self.cancel.clone();
        let delivery = Delivery::new(&self.queue, handler);
        let low_water = self.low_water.load(Ordering::Acquire);
        let buffer_size = self.config.read_buffer_size;
        log::trace!("scheduling read offset={} length={} low_water={}", offset, length, low_water);

        self.runtime.spawn(async move {
            let mut reader = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                reader = io.reader.lock() => reader,
            };
            let mut buf = vec![0u8; buffer_size];
            let mut pending = BytesMut::new();
            let mut total = 0usize;

            loop {
                if total >= length {
                    delivery.send(Completion::finished(Some(pending.split().freeze())));
                    return;
                }
                let want = buffer_size.min(length - total);
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log::trace!("read cancelled after {} bytes", total);
                        return;
                    }
                    result = reader.read(&mut buf[..want]) => result,
                };
                match result {
                    Ok(0) => {
                        log::trace!("read reached end of stream after {} bytes", total);
                        delivery.send(Completion::finished(Some(pending.split().freeze())));
                        return;
                    }
                    Ok(n) => {
                        total += n;
                        pending.extend_from_slice(&buf[..n]);
                        if pending.len() >= low_water && total < length {
                            delivery.send(Completion::partial(pending.split().freeze()));
                        }
                    }
                    Err(e) => {
                        log::debug!("read failed: {}", e);
                        delivery.send(Completion::failed(
                            Some(pending.split().freeze()),
                            Error::code_of(&e),
                        ));
                        return;
                    }
                }
            }
        });
    }

    fn write(&self, offset: u64, data: Bytes, handler: CompletionHandler) {
        let io = self.io.clone();
        let cancel = self.cancel.clone();
        let delivery = Delivery::new(&self.queue, handler);
        let chunk_size = self.config.write_chunk_size;
        log::trace!("scheduling write offset={} len={}", offset, data.len());

        self.runtime.spawn(async move {
            let mut writer = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                writer = io.writer.lock() => writer,
            };
            let mut remaining = data;

            while remaining.has_remaining() {
                let take = chunk_size.min(remaining.len());
                let result = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        log::trace!("write cancelled with {} bytes outstanding", remaining.len());
                        return;
                    }
                    result = writer.write(&remaining[..take]) => result,
                };
                match result {
                    Ok(0) => {
                        let e = std::io::Error::from(std::io::ErrorKind::WriteZero);
                        delivery.send(Completion::failed(Some(remaining), Error::code_of(&e)));
                        return;
                    }
                    Ok(n) => {
                        remaining.advance(n);
                        if remaining.has_remaining() {
                            delivery.send(Completion::partial(remaining.clone()));
                        }
                    }
                    Err(e) => {
                        log::debug!("write failed: {}", e);
                        delivery.send(Completion::failed(Some(remaining), Error::code_of(&e)));
                        return;
                    }
                }
            }

            let flushed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                flushed = writer.flush() => flushed,
            };
            match flushed {
                Ok(()) => delivery.send(Completion::finished(Some(Bytes::new()))),
                Err(e) => delivery.send(Completion::failed(None, Error::code_of(&e))),
            }
        });
    }

    fn close(&self) {
        log::debug!("closing {:?} channel", self.kind);
        self.cancel.cancel();
        if let Some(cleanup) = lock(&self.cleanup).take() {
            self.queue.submit(move || cleanup(0));
        }
    }
}
