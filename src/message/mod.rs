//! A minimal distributed message-passing API.
//!
//! This module exports a minimal message-passing API, which is encapsulated
//! by the [`Communicator`] trait. Implementors only need to write tagged
//! `send` and `recv` operations for a given transport layer: crossbeam
//! channels between threads in [`ChannelCommunicator`], or TCP sockets in
//! [`TcpCommunicator`]. The trait then provides default implementations for
//! the barrier, broadcast, and all-agree collectives.

mod channel;
mod comm;
mod tally;
mod tcp;
mod util;

pub use channel::{ChannelCommunicator, ChannelGroup};
pub use comm::{Communicator, Payload, Tag};
pub use tally::{merge, Counts, Tally};
pub use tcp::{loopback_group, loopback_peer, TcpCommunicator};
