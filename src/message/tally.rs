//! A communicator wrapper that counts traffic.

use super::comm::{Communicator, Payload, Tag};
use crate::error::Result;
use std::cell::RefCell;
use std::collections::BTreeMap;

/// Message counts keyed by `(source, dest, tag)`.
pub type Counts = BTreeMap<(usize, usize, Tag), usize>;

/// Wraps a communicator and counts every message it sends and receives.
///
/// Collected over a whole group, the send and receive counts must match for
/// every `(source, dest, tag)`: a send that is never received, or a receive
/// with no send, is a protocol bug that would eventually hang a rank.
pub struct Tally<C> {
    inner: C,
    sent: RefCell<Counts>,
    received: RefCell<Counts>,
}

impl<C: Communicator> Tally<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            sent: RefCell::new(Counts::new()),
            received: RefCell::new(Counts::new()),
        }
    }

    /// Consume the wrapper, returning the (sent, received) counts.
    pub fn into_counts(self) -> (Counts, Counts) {
        (self.sent.into_inner(), self.received.into_inner())
    }
}

impl<C: Communicator> Communicator for Tally<C> {
    fn rank(&self) -> usize {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        self.inner.send(dest, tag, payload)?;
        *self.sent.borrow_mut().entry((self.rank(), dest, tag)).or_default() += 1;
        Ok(())
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Payload> {
        let payload = self.inner.recv(source, tag)?;
        *self.received.borrow_mut().entry((source, self.rank(), tag)).or_default() += 1;
        Ok(payload)
    }

    fn barrier(&self) -> Result<()> {
        self.inner.barrier()
    }
}

/// Merge per-rank counts into group totals.
pub fn merge<I: IntoIterator<Item = Counts>>(parts: I) -> Counts {
    let mut total = Counts::new();
    for part in parts {
        for (key, n) in part {
            *total.entry(key).or_default() += n;
        }
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ChannelGroup;

    #[test]
    fn tally_counts_both_directions() {
        let group = ChannelGroup::new(2);
        let a = Tally::new(group.communicator(0));
        let b = Tally::new(group.communicator(1));

        a.send_scalar(1, Tag::Column(1), 1.0).unwrap();
        a.send_scalar(1, Tag::Column(1), 2.0).unwrap();
        b.recv_scalar(0, Tag::Column(1)).unwrap();
        b.recv_scalar(0, Tag::Column(1)).unwrap();

        let (sent, _) = a.into_counts();
        let (_, received) = b.into_counts();
        assert_eq!(sent, received);
        assert_eq!(sent[&(0, 1, Tag::Column(1))], 2);
    }
}
