//! Provides an in-process communicator based on crossbeam channels.
//!
//! Every ordered pair of ranks gets its own unbounded channel, so delivery is
//! FIFO per pair by construction and a send never waits for the receiver.

use super::comm::{Communicator, Envelope, Payload, Tag};
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::cell::RefCell;
use std::sync::{Arc, Barrier};

/// The shared wiring of an in-process group: a channel per ordered pair of
/// ranks and a group barrier. The group is `Sync`, so rank threads can each
/// take their own endpoint with [`ChannelGroup::communicator`].
pub struct ChannelGroup {
    /// `links[dest][source]`
    links: Vec<Vec<(Sender<Envelope>, Receiver<Envelope>)>>,
    barrier: Arc<Barrier>,
}

impl ChannelGroup {
    pub fn new(size: usize) -> Self {
        let links = (0..size)
            .map(|_| (0..size).map(|_| crossbeam_channel::unbounded()).collect())
            .collect();
        Self {
            links,
            barrier: Arc::new(Barrier::new(size)),
        }
    }

    pub fn size(&self) -> usize {
        self.links.len()
    }

    /// Returns the endpoint for the given rank. Each rank should take exactly
    /// one endpoint; two endpoints for the same rank would compete for its
    /// inbound messages.
    pub fn communicator(&self, rank: usize) -> ChannelCommunicator {
        let outbox = self.links.iter().map(|row| row[rank].0.clone()).collect();
        let inbox = self.links[rank].iter().map(|(_, r)| r.clone()).collect();
        ChannelCommunicator {
            rank,
            outbox,
            inbox,
            barrier: self.barrier.clone(),
            undelivered: RefCell::new(Vec::new()),
        }
    }
}

pub struct ChannelCommunicator {
    rank: usize,
    /// `outbox[dest]` carries messages from this rank to `dest`.
    outbox: Vec<Sender<Envelope>>,
    /// `inbox[source]` carries messages from `source` to this rank.
    inbox: Vec<Receiver<Envelope>>,
    barrier: Arc<Barrier>,
    undelivered: RefCell<Vec<Envelope>>,
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.outbox.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        let envelope = Envelope {
            source: self.rank,
            tag,
            payload,
        };
        self.outbox[dest]
            .send(envelope)
            .map_err(|_| Error::Disconnected(dest))
    }

    fn recv(&self, source: usize, tag: Tag) -> Result<Payload> {
        let mut undelivered = self.undelivered.borrow_mut();

        if let Some(index) = undelivered
            .iter()
            .position(|e| e.source == source && e.tag == tag)
        {
            return Ok(undelivered.remove(index).payload);
        }
        loop {
            let envelope = self.inbox[source]
                .recv()
                .map_err(|_| Error::Disconnected(source))?;
            if envelope.tag == tag {
                return Ok(envelope.payload);
            }
            undelivered.push(envelope)
        }
    }

    fn barrier(&self) -> Result<()> {
        self.barrier.wait();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn messages_between_a_pair_arrive_in_order() {
        let group = ChannelGroup::new(2);
        let a = group.communicator(0);
        let b = group.communicator(1);

        for j in 1..10 {
            a.send_scalar(1, Tag::Column(j), j as f64).unwrap();
        }
        for j in 1..10 {
            assert_eq!(b.recv_scalar(0, Tag::Column(j)).unwrap(), j as f64);
        }
    }

    #[test]
    fn repeated_tags_are_consumed_in_send_order() {
        let group = ChannelGroup::new(2);
        let a = group.communicator(0);
        let b = group.communicator(1);

        for iteration in 0..3 {
            a.send_scalar(1, Tag::Column(1), iteration as f64).unwrap();
        }
        for iteration in 0..3 {
            assert_eq!(b.recv_scalar(0, Tag::Column(1)).unwrap(), iteration as f64);
        }
    }

    #[test]
    fn out_of_order_tags_are_held_back() {
        let group = ChannelGroup::new(2);
        let a = group.communicator(0);
        let b = group.communicator(1);

        a.send_scalar(1, Tag::Column(1), 1.0).unwrap();
        a.send_scalar(1, Tag::Corner, -5.0).unwrap();
        assert_eq!(b.recv_scalar(0, Tag::Corner).unwrap(), -5.0);
        assert_eq!(b.recv_scalar(0, Tag::Column(1)).unwrap(), 1.0);
    }

    #[test]
    fn collectives_work_across_threads() {
        let group = ChannelGroup::new(5);

        thread::scope(|scope| {
            let handles: Vec<_> = (0..5)
                .map(|rank| {
                    let comm = group.communicator(rank);
                    scope.spawn(move || {
                        comm.barrier().unwrap();
                        let bytes = comm.broadcast(2, (rank == 2).then(|| vec![1, 2, 3])).unwrap();
                        let agreed = comm.all_agree(rank != 3).unwrap();
                        let unanimous = comm.all_agree(true).unwrap();
                        (bytes, agreed, unanimous)
                    })
                })
                .collect();

            for handle in handles {
                let (bytes, agreed, unanimous) = handle.join().unwrap();
                assert_eq!(bytes, vec![1, 2, 3]);
                assert!(!agreed);
                assert!(unanimous);
            }
        });
    }
}
