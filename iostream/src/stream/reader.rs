//! Readable side: turns read completions into a stream of data chunks.

use bytes::Bytes;

use super::event::{Disposable, ReadEvents};
use super::operation::Operation;
use super::{ChannelOf, IoStream};
use crate::channel::Channel;
use crate::config::DEFAULT_MIN_BYTES;
use crate::error::Error;
use crate::io::{ChannelKind, Completion};
use crate::transport::RawChannel;

/// Starts a read over a fresh read channel derived from `stream`.
///
/// Chunks are delivered once at least `min_bytes` are buffered; only the
/// chunk that arrives with the final completion may be shorter.
pub fn read<S>(stream: &S, min_bytes: usize) -> (ReadEvents, Disposable)
where
    S: IoStream + ?Sized,
{
    let (op, events) = Operation::<Bytes, ChannelOf<S>>::new("read");
    let disposable = Disposable::new(op.clone());

    let config = stream.config();
    let channel = match Channel::open(
        stream.descriptor(),
        ChannelKind::Read,
        &config,
        stream.queue(),
        op.cleanup_handler(),
    ) {
        Ok(channel) => channel,
        Err(err) => {
            op.fail(err);
            return (events, disposable);
        }
    };

    let scheduled = op.attach(channel).and_then(|channel| {
        channel.set_low_water_mark(min_bytes.max(DEFAULT_MIN_BYTES))?;
        channel.schedule_read(0, config.read_length, op.completion_handler(on_read))
    });
    if let Err(err) = scheduled {
        op.fail(err);
    }

    (events, disposable)
}

fn on_read<C: RawChannel>(op: &Operation<Bytes, C>, completion: Completion) {
    let Completion { done, data, error } = completion;
    log::trace!(
        "read completion: done={} len={} error={}",
        done,
        data.as_ref().map_or(0, Bytes::len),
        error
    );

    if let Some(chunk) = data.filter(|chunk| !chunk.is_empty()) {
        op.next(chunk);
    }
    // Any nonzero code is terminal, final flag or not.
    if let Some(err) = Error::from_code(error) {
        op.fail(err);
    } else if done {
        op.complete();
    }
}
