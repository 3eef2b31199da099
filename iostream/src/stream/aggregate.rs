//! Folds many concurrent writes into one back-pressure signal.
//!
//! Every buffer pulled from the input starts its own write and gets the
//! next index. The registry keeps the latest outstanding count per index;
//! each member progress event yields the sum over all members still in
//! flight. Members leave the registry on their terminal event. The
//! aggregate itself has no terminal event: it ends once the input is
//! exhausted and every member has finished.
//!
//! All bookkeeping is owned by the [`AggregateProgress`] value and only
//! touched from `poll_next`, so it is confined to whichever task polls it.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::{SelectAll, Stream, StreamExt};

use super::WritableIoStream;
use super::event::{Disposable, Event, WriteProgress};

/// Outstanding-byte bookkeeping keyed by write index.
#[derive(Debug, Default)]
pub struct WriteRegistry {
    next_index: u64,
    outstanding: BTreeMap<u64, usize>,
    handles: BTreeMap<u64, Disposable>,
}

impl WriteRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new member write and returns its index.
    pub fn admit(&mut self, handle: Disposable) -> u64 {
        let index = self.next_index;
        self.next_index += 1;
        self.handles.insert(index, handle);
        index
    }

    /// Records the latest outstanding count of `index`; returns the new total.
    pub fn record(&mut self, index: u64, remaining: usize) -> usize {
        if self.handles.contains_key(&index) {
            self.outstanding.insert(index, remaining);
        }
        self.total()
    }

    /// Forgets a member that reached its terminal event.
    pub fn retire(&mut self, index: u64) {
        self.outstanding.remove(&index);
        self.handles.remove(&index);
    }

    /// Sum of the latest outstanding counts.
    pub fn total(&self) -> usize {
        self.outstanding.values().sum()
    }

    /// Number of members that have not finished.
    pub fn in_flight(&self) -> usize {
        self.handles.len()
    }

    /// True when no member is in flight.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Disposes every member still in flight.
    pub fn dispose_all(&mut self) {
        self.outstanding.clear();
        for (_, handle) in std::mem::take(&mut self.handles) {
            handle.dispose();
        }
    }
}

struct Member {
    index: u64,
    progress: WriteProgress,
}

impl Stream for Member {
    type Item = (u64, Event<usize>);

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let index = self.index;
        self.progress
            .poll_next_unpin(cx)
            .map(|event| event.map(|event| (index, event)))
    }
}

/// Combined progress of every write started from an input stream.
///
/// Dropping it disposes the member writes that are still in flight.
pub struct AggregateProgress<'a, W: ?Sized, S> {
    writer: &'a W,
    input: Option<S>,
    members: SelectAll<Member>,
    registry: WriteRegistry,
}

impl<'a, W, S> AggregateProgress<'a, W, S>
where
    W: WritableIoStream + ?Sized,
    S: Stream<Item = Bytes> + Unpin,
{
    /// Aggregates the writes `writer` starts for each buffer of `input`.
    pub fn new(writer: &'a W, input: S) -> Self {
        Self {
            writer,
            input: Some(input),
            members: SelectAll::new(),
            registry: WriteRegistry::new(),
        }
    }

    /// Sum of the latest outstanding counts of unfinished writes.
    pub fn outstanding(&self) -> usize {
        self.registry.total()
    }

    /// Number of member writes that have not finished.
    pub fn in_flight(&self) -> usize {
        self.registry.in_flight()
    }

    fn start(&mut self, buffer: Bytes) {
        let len = buffer.len();
        let (progress, handle) = self.writer.write(buffer);
        let index = self.registry.admit(handle);
        log::trace!("aggregate: write #{} started, {} bytes", index, len);
        self.members.push(Member { index, progress });
    }
}

impl<W, S> Stream for AggregateProgress<'_, W, S>
where
    W: WritableIoStream + ?Sized,
    S: Stream<Item = Bytes> + Unpin,
{
    type Item = usize;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<usize>> {
        let this = self.get_mut();
        loop {
            if let Some(input) = this.input.as_mut() {
                match input.poll_next_unpin(cx) {
                    Poll::Ready(Some(buffer)) => {
                        this.start(buffer);
                        continue;
                    }
                    Poll::Ready(None) => {
                        log::trace!("aggregate: input exhausted");
                        this.input = None;
                    }
                    Poll::Pending => {}
                }
            }

            match this.members.poll_next_unpin(cx) {
                Poll::Ready(Some((index, Event::Next(remaining)))) => {
                    return Poll::Ready(Some(this.registry.record(index, remaining)));
                }
                Poll::Ready(Some((index, Event::Completed))) => {
                    log::trace!("aggregate: write #{} completed", index);
                    this.registry.retire(index);
                }
                Poll::Ready(Some((index, Event::Failed(err)))) => {
                    log::warn!("aggregate: write #{} failed: {}", index, err);
                    this.registry.retire(index);
                }
                Poll::Ready(None) if this.input.is_none() => return Poll::Ready(None),
                Poll::Ready(None) | Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<W: ?Sized, S> Drop for AggregateProgress<'_, W, S> {
    fn drop(&mut self) {
        if !self.registry.is_empty() {
            log::debug!("aggregate dropped with {} write(s) in flight", self.registry.in_flight());
        }
        self.registry.dispose_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Completion;
    use crate::queue::Queue;
    use crate::stream::Duplex;
    use crate::transport::{ScriptedChannel, ScriptedDescriptor};
    use futures::FutureExt;
    use futures::channel::mpsc;

    fn duplex() -> (Duplex<ScriptedDescriptor>, ScriptedDescriptor, Queue) {
        let _ = env_logger::builder().is_test(true).try_init();
        let descriptor = ScriptedDescriptor::new();
        let queue = Queue::new("aggregate");
        (Duplex::new(descriptor.clone(), queue.clone()), descriptor, queue)
    }

    fn poll<St: Stream + Unpin>(stream: &mut St) -> Option<Option<St::Item>> {
        stream.next().now_or_never()
    }

    fn remaining(len: usize) -> Completion {
        Completion::partial(vec![0u8; len])
    }

    #[test]
    fn test_registry_sums_latest_counts() {
        let (stream, _descriptor, _queue) = duplex();
        let mut registry = WriteRegistry::new();
        let (_p0, h0) = stream.write(Bytes::new());
        let (_p1, h1) = stream.write(Bytes::new());

        let a = registry.admit(h0);
        let b = registry.admit(h1);
        assert_eq!((a, b), (0, 1));

        assert_eq!(registry.record(a, 8), 8);
        assert_eq!(registry.record(b, 3), 11);
        assert_eq!(registry.record(a, 2), 5);
        registry.retire(a);
        assert_eq!(registry.total(), 3);
        assert_eq!(registry.record(a, 100), 3);
        assert_eq!(registry.in_flight(), 1);
    }

    #[test]
    fn test_interleaved_members_sum_and_settle_to_zero() {
        let (stream, descriptor, queue) = duplex();
        let (tx, rx) = mpsc::unbounded();
        let mut progress = stream.write_stream(rx);

        tx.unbounded_send(Bytes::from(vec![1u8; 8])).unwrap();
        tx.unbounded_send(Bytes::from(vec![2u8; 3])).unwrap();
        tx.close_channel();
        assert_eq!(poll(&mut progress), None);
        assert_eq!(progress.in_flight(), 2);

        let channels: Vec<ScriptedChannel> = descriptor.channels();
        let (first, second) = (&channels[0], &channels[1]);

        second.complete(remaining(3));
        first.complete(remaining(8));
        queue.run_pending();
        let partial = poll(&mut progress).flatten().unwrap();
        assert!(partial == 3 || partial == 8);
        assert_eq!(poll(&mut progress), Some(Some(11)));

        first.complete(Completion::finished(Some(Bytes::new())));
        queue.run_pending();
        assert_eq!(poll(&mut progress), Some(Some(3)));

        second.complete(Completion::finished(Some(Bytes::new())));
        queue.run_pending();
        assert_eq!(poll(&mut progress), Some(Some(0)));

        assert_eq!(poll(&mut progress), Some(None));
        assert_eq!(progress.outstanding(), 0);
        assert!(channels.iter().all(|c| c.close_calls() == 1));
    }

    #[test]
    fn test_every_interleaving_tracks_latest_values() {
        let first_seq = [8usize, 0];
        let second_seq = [3usize, 0];
        // Each order is a sequence of member picks: 0 = first, 1 = second.
        let orders: [[usize; 4]; 6] = [
            [0, 0, 1, 1],
            [0, 1, 0, 1],
            [0, 1, 1, 0],
            [1, 0, 0, 1],
            [1, 0, 1, 0],
            [1, 1, 0, 0],
        ];

        for order in orders {
            let (stream, descriptor, queue) = duplex();
            let input = futures::stream::iter(vec![
                Bytes::from(vec![0u8; 8]),
                Bytes::from(vec![0u8; 3]),
            ]);
            let mut progress = stream.write_stream(input);
            assert_eq!(poll(&mut progress), None);

            let channels = descriptor.channels();
            let seqs = [&first_seq[..], &second_seq[..]];
            let mut cursor = [0usize; 2];
            let mut latest = [0usize; 2];

            for member in order {
                let value = seqs[member][cursor[member]];
                cursor[member] += 1;
                latest[member] = value;
                let completion = if value == 0 {
                    Completion::finished(Some(Bytes::new()))
                } else {
                    remaining(value)
                };
                channels[member].complete(completion);
                queue.run_pending();

                assert_eq!(poll(&mut progress), Some(Some(latest[0] + latest[1])));
            }

            assert_eq!(poll(&mut progress), Some(None));
        }
    }

    #[test]
    fn test_failed_member_leaves_without_ending_aggregate() {
        let (stream, descriptor, queue) = duplex();
        let (tx, rx) = mpsc::unbounded();
        let mut progress = stream.write_stream(rx);

        tx.unbounded_send(Bytes::from_static(b"doomed")).unwrap();
        tx.unbounded_send(Bytes::from_static(b"fine")).unwrap();
        assert_eq!(poll(&mut progress), None);
        let channels = descriptor.channels();

        channels[0].complete(remaining(6));
        channels[1].complete(remaining(4));
        queue.run_pending();
        let partial = poll(&mut progress).flatten().unwrap();
        assert!(partial == 6 || partial == 4);
        assert_eq!(poll(&mut progress), Some(Some(10)));

        channels[0].complete(Completion::failed(None, 104));
        queue.run_pending();
        assert_eq!(poll(&mut progress), None);
        assert_eq!(progress.outstanding(), 4);

        // Input still open: the aggregate keeps running with no members.
        channels[1].complete(Completion::finished(Some(Bytes::new())));
        queue.run_pending();
        assert_eq!(poll(&mut progress), Some(Some(0)));
        assert_eq!(poll(&mut progress), None);

        tx.unbounded_send(Bytes::from_static(b"more")).unwrap();
        assert_eq!(poll(&mut progress), None);
        assert_eq!(descriptor.opened(), 3);

        drop(tx);
        descriptor.channels()[2].complete(Completion::finished(Some(Bytes::new())));
        queue.run_pending();
        assert_eq!(poll(&mut progress), Some(Some(0)));
        assert_eq!(poll(&mut progress), Some(None));
    }

    #[test]
    fn test_empty_buffers_finish_immediately() {
        let (stream, descriptor, _queue) = duplex();
        let input = futures::stream::iter(vec![Bytes::new(), Bytes::new()]);
        let mut progress = stream.write_stream(input);

        assert_eq!(poll(&mut progress), Some(None));
        assert_eq!(descriptor.opened(), 0);
    }

    #[test]
    fn test_drop_disposes_in_flight_writes() {
        let (stream, descriptor, queue) = duplex();
        let input = futures::stream::iter(vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        let mut progress = stream.write_stream(input);
        assert_eq!(poll(&mut progress), None);

        let channels = descriptor.channels();
        channels[0].complete(Completion::finished(Some(Bytes::new())));
        queue.run_pending();
        assert_eq!(poll(&mut progress), Some(Some(0)));

        drop(progress);
        assert!(channels.iter().all(|c| c.is_closed() && c.close_calls() == 1));
    }
}
