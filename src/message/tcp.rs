//! Provides a message-passing communicator based on TCP sockets.
//!
//! TCP is a connection-oriented protocol, which means that a connection must
//! be established between the sending and receiving ends of the socket in
//! order to read from or write to a stream. Each rank opens at most one
//! outgoing connection per peer, so the stream order of that connection is
//! the FIFO order of the pair.

use super::comm::{Communicator, Envelope, Payload, Tag};
use super::util;
use crate::error::{Error, Result};
use crossbeam_channel::{Receiver, Sender};
use std::cell::RefCell;
use std::collections::hash_map::{Entry, HashMap};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

const SCALAR: u8 = 0;
const BYTES: u8 = 1;
const CONNECT_RETRY: Duration = Duration::from_millis(20);

/// Serialize an envelope into a single frame: source, tag, payload kind,
/// payload length, payload bytes.
fn encode_frame(envelope: &Envelope) -> Vec<u8> {
    let (kind, body) = match &envelope.payload {
        Payload::Scalar(value) => (SCALAR, value.to_le_bytes().to_vec()),
        Payload::Bytes(bytes) => (BYTES, bytes.clone()),
    };
    let mut frame = Vec::with_capacity(25 + body.len());
    frame.extend_from_slice(&(envelope.source as u64).to_le_bytes());
    frame.extend_from_slice(&envelope.tag.to_wire().to_le_bytes());
    frame.push(kind);
    frame.extend_from_slice(&(body.len() as u64).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

/// Read one frame written by [`encode_frame`] off the stream.
fn read_frame<R: Read>(stream: &mut R) -> io::Result<Envelope> {
    let source = util::read_u64(stream)? as usize;
    let tag = Tag::from_wire(util::read_u64(stream)?);
    let [kind] = util::read_bytes_array::<_, 1>(stream)?;
    let len = util::read_u64(stream)? as usize;
    let body = util::read_bytes_vec(stream, len)?;

    let payload = match kind {
        SCALAR => {
            let bytes: [u8; 8] = body.as_slice().try_into().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "scalar payload must be 8 bytes")
            })?;
            Payload::Scalar(f64::from_le_bytes(bytes))
        }
        BYTES => Payload::Bytes(body),
        other => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown payload kind {}", other),
            ))
        }
    };
    Ok(Envelope {
        source,
        tag,
        payload,
    })
}

/// Accepts incoming connections and funnels every frame read from them into
/// a single inbox channel. One reader thread is spawned per accepted
/// connection; the threads are detached and end when their peer hangs up.
fn spawn_acceptor(listener: TcpListener, inbox: Sender<Envelope>) {
    thread::spawn(move || {
        for stream in listener.incoming() {
            let mut stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    log::warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            let inbox = inbox.clone();
            thread::spawn(move || loop {
                match read_frame(&mut stream) {
                    Ok(envelope) => {
                        if inbox.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => {
                        log::warn!("dropping connection after read error: {}", e);
                        break;
                    }
                }
            });
        }
    });
}

pub struct TcpCommunicator {
    rank: usize,
    peers: Vec<SocketAddr>,
    connect_timeout: Duration,
    streams: RefCell<HashMap<usize, TcpStream>>,
    inbox: Receiver<Envelope>,
    undelivered: RefCell<Vec<Envelope>>,
}

impl TcpCommunicator {
    /// Binds this rank's listener at `peers[rank]`. Outgoing connections are
    /// opened lazily on first send, retrying for up to `connect_timeout`
    /// while the peer comes up.
    pub fn new(rank: usize, peers: Vec<SocketAddr>, connect_timeout: Duration) -> Result<Self> {
        let address = *peers
            .get(rank)
            .ok_or_else(|| Error::Launch(format!("rank {} is not in a group of {} peers", rank, peers.len())))?;
        let listener = TcpListener::bind(address)?;
        Ok(Self::with_listener(rank, listener, peers, connect_timeout))
    }

    /// Like [`TcpCommunicator::new`], but accepting on a listener the caller
    /// has already bound. `peers[rank]` should be that listener's address.
    pub fn with_listener(rank: usize, listener: TcpListener, peers: Vec<SocketAddr>, connect_timeout: Duration) -> Self {
        let (inbox_s, inbox) = crossbeam_channel::unbounded();
        if let Ok(address) = listener.local_addr() {
            log::debug!("rank {} listening on {}", rank, address);
        }
        spawn_acceptor(listener, inbox_s);

        Self {
            rank,
            peers,
            connect_timeout,
            streams: RefCell::new(HashMap::new()),
            inbox,
            undelivered: RefCell::new(Vec::new()),
        }
    }

    fn connect(&self, dest: usize) -> Result<TcpStream> {
        let address = self.peers[dest];
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            match TcpStream::connect(address) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    log::debug!("rank {} connected to rank {} at {}", self.rank, dest, address);
                    return Ok(stream);
                }
                Err(e) if Instant::now() < deadline => {
                    log::trace!("rank {} waiting for rank {}: {}", self.rank, dest, e);
                    thread::sleep(CONNECT_RETRY)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, dest: usize, tag: Tag, payload: Payload) -> Result<()> {
        let frame = encode_frame(&Envelope {
            source: self.rank,
            tag,
            payload,
        });
        let mut streams = self.streams.borrow_mut();
        let stream = match streams.entry(dest) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(self.connect(dest)?),
        };
        stream.write_all(&frame)?;
        Ok(())
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
            let envelope = self
                .inbox
                .recv()
                .map_err(|_| Error::Disconnected(source))?;
            if envelope.source == source && envelope.tag == tag {
                return Ok(envelope.payload);
            }
            undelivered.push(envelope)
        }
    }
}

/// The loopback address of rank `rank` when a whole group runs on this host:
/// port `base_port + rank`, or port 0 for every rank when `base_port` is 0.
pub fn loopback_peer(base_port: u16, rank: usize) -> Result<SocketAddr> {
    let port = if base_port == 0 {
        Some(0)
    } else {
        u16::try_from(rank).ok().and_then(|rank| base_port.checked_add(rank))
    };
    port.map(|port| SocketAddr::from(([127, 0, 0, 1], port)))
        .ok_or_else(|| Error::Launch(format!("no loopback port for rank {} above base port {}", rank, base_port)))
}

/// Binds a loopback listener for each of `size` ranks and wires them into a
/// group. With `base_port` 0 the system picks free ports; the peer list is
/// built from the addresses the listeners actually got.
pub fn loopback_group(base_port: u16, size: usize, connect_timeout: Duration) -> Result<Vec<TcpCommunicator>> {
    let addresses = (0..size)
        .map(|rank| loopback_peer(base_port, rank))
        .collect::<Result<Vec<_>>>()?;
    let listeners = addresses
        .into_iter()
        .map(TcpListener::bind)
        .collect::<io::Result<Vec<_>>>()?;
    let peers = listeners
        .iter()
        .map(TcpListener::local_addr)
        .collect::<io::Result<Vec<_>>>()?;

    Ok(listeners
        .into_iter()
        .enumerate()
        .map(|(rank, listener)| TcpCommunicator::with_listener(rank, listener, peers.clone(), connect_timeout))
        .collect())
}
