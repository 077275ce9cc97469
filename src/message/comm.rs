//! Message tags, payloads and the [`Communicator`] trait with its
//! tree-based collectives.

use super::util;
use crate::error::{Error, Result};

/// Identifies what a message is for. Tags are not unique over a run: the
/// column tags repeat every iteration, and receivers rely on per-pair FIFO
/// delivery to consume them in the sender's order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Tag {
    /// A ghost value for the given grid column.
    Column(usize),
    /// The negated corner value, sent from the timing rank back to rank 0.
    Corner,
    /// Down-going leg of a collective.
    Broadcast,
    /// Up-going leg of a collective.
    Reduce,
}

impl Tag {
    /// Packs the tag into a single word for the wire. The low two bits hold
    /// the kind, the column index sits above them.
    pub fn to_wire(self) -> u64 {
        match self {
            Tag::Column(j) => (j as u64) << 2,
            Tag::Corner => 1,
            Tag::Broadcast => 2,
            Tag::Reduce => 3,
        }
    }

    pub fn from_wire(word: u64) -> Self {
        match word & 3 {
            0 => Tag::Column((word >> 2) as usize),
            1 => Tag::Corner,
            2 => Tag::Broadcast,
            _ => Tag::Reduce,
        }
    }
}

/// The body of a message.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Scalar(f64),
    Bytes(Vec<u8>),
}

/// A message in flight, as seen by the receiving side.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Envelope {
    pub source: usize,
    pub tag: Tag,
    pub payload: Payload,
}

/// Point-to-point message passing between the ranks of a fixed group.
///
/// Implementors provide `send` and `recv` for a transport; barrier,
/// broadcast and the all-agree vote are provided on top of them. Every rank
/// must enter the collectives in the same order.
pub trait Communicator {
    /// This rank's index in the group.
    fn rank(&self) -> usize;

    /// Number of ranks in the group.
    fn size(&self) -> usize;

    /// Hand a message to the transport. Returns once the message is queued
    /// for delivery; it does not wait for the matching receive.
    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()>;

    /// Block until a message from `source` carrying `tag` is available.
    /// Messages from `source` with other tags are held back for later
    /// receives, in arrival order.
    fn recv(&self, source: usize, tag: Tag) -> Result<Payload>;

    fn send_scalar(&self, dest: usize, tag: Tag, value: f64) -> Result<()> {
        self.send(dest, tag, Payload::Scalar(value))
    }

    fn recv_scalar(&self, source: usize, tag: Tag) -> Result<f64> {
        match self.recv(source, tag)? {
            Payload::Scalar(value) => Ok(value),
            Payload::Bytes(_) => Err(Error::Protocol(format!(
                "expected a scalar from rank {} with tag {:?}",
                source, tag
            ))),
        }
    }

    /// Block until every rank of the group has entered the barrier.
    fn barrier(&self) -> Result<()> {
        self.all_agree(true).map(|_| ())
    }

    /// Binomial-tree broadcast from `root`. The root passes `Some(bytes)`,
    /// the other ranks pass `None`; every rank returns the root's bytes.
    fn broadcast(&self, root: usize, bytes: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let size = self.size();
        let relative = (self.rank() + size - root) % size;

        let bytes = if relative == 0 {
            bytes.ok_or_else(|| Error::Protocol("broadcast root has nothing to send".into()))?
        } else {
            let parent = (util::tree_parent(relative) + root) % size;
            match self.recv(parent, Tag::Broadcast)? {
                Payload::Bytes(bytes) => bytes,
                Payload::Scalar(_) => {
                    return Err(Error::Protocol("expected bytes in broadcast".into()))
                }
            }
        };
        for child in util::tree_children(relative, size) {
            self.send((child + root) % size, Tag::Broadcast, Payload::Bytes(bytes.clone()))?;
        }
        Ok(bytes)
    }

    /// Every rank votes; every rank learns whether all of them voted `true`.
    /// The vote is reduced up a binomial tree rooted at the last rank and the
    /// outcome is broadcast back down the same tree.
    fn all_agree(&self, ok: bool) -> Result<bool> {
        let size = self.size();
        let root = size - 1;
        let relative = (self.rank() + size - root) % size;
        let mut all = ok;

        for child in util::tree_children(relative, size) {
            all &= self.recv_scalar((child + root) % size, Tag::Reduce)? != 0.0;
        }
        if relative != 0 {
            let parent = (util::tree_parent(relative) + root) % size;
            self.send_scalar(parent, Tag::Reduce, if all { 1.0 } else { 0.0 })?;
        }
        let outcome = self.broadcast(root, (relative == 0).then(|| vec![all as u8]))?;
        Ok(outcome.first() == Some(&1))
    }
}
