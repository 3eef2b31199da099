//! Writable side: one scheduled write, reported as outstanding-byte progress.

use bytes::Bytes;

use super::event::{Disposable, WriteProgress};
use super::operation::Operation;
use super::{ChannelOf, IoStream};
use crate::channel::Channel;
use crate::error::Error;
use crate::io::{ChannelKind, Completion};
use crate::transport::RawChannel;

/// Writes `buffer` over a fresh write channel derived from `stream`.
///
/// Each completion reports how many bytes are still unflushed. The
/// caller decides what to do with a remainder after a failure; nothing
/// is resubmitted here.
pub fn write<S>(stream: &S, buffer: Bytes) -> (WriteProgress, Disposable)
where
    S: IoStream + ?Sized,
{
    let (op, progress) = Operation::<usize, ChannelOf<S>>::new("write");
    let disposable = Disposable::new(op.clone());

    if buffer.is_empty() {
        op.complete();
        return (progress, disposable);
    }

    let config = stream.config();
    let channel = match Channel::open(
        stream.descriptor(),
        ChannelKind::Write,
        &config,
        stream.queue(),
        op.cleanup_handler(),
    ) {
        Ok(channel) => channel,
        Err(err) => {
            op.fail(err);
            return (progress, disposable);
        }
    };

    let scheduled = op.attach(channel).and_then(|channel| {
        channel.schedule_write(0, buffer, op.completion_handler(on_write))
    });
    if let Err(err) = scheduled {
        op.fail(err);
    }

    (progress, disposable)
}

fn on_write<C: RawChannel>(op: &Operation<usize, C>, completion: Completion) {
    let Completion { done, data, error } = completion;
    if let Some(remaining) = data {
        log::trace!("write progress: {} bytes outstanding", remaining.len());
        op.next(remaining.len());
    }
    if let Some(err) = Error::from_code(error) {
        op.fail(err);
    } else if done {
        op.complete();
    }
}
