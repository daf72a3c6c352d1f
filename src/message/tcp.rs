use std::collections::HashMap;
use std::io::{self, prelude::*};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use log::{error, info, warn};

use super::backoff::{ExponentialBackoff, Retry};
use super::comm::{Communicator, Tag};
use super::mailbox::{Envelope, Mailbox};
use super::util;
use crate::error::{Error, Result};

const RETRY_WAIT: Duration = Duration::from_millis(250);
const RETRY_MAX_WAIT: Duration = Duration::from_millis(5000);
const CONNECT_ATTEMPTS: usize = 40;

/// Frames larger than this are refused on both ends, so a corrupt length
/// prefix cannot trigger an unbounded allocation.
const MAX_FRAME_SIZE: u64 = 1 << 30;

enum Outbound {
    Message(usize, Envelope),
    Flush(Sender<std::result::Result<(), String>>),
}

/// A communicator for ranks in separate processes, possibly on separate
/// hosts. Each rank listens on its own address from the peer list and
/// opens one connection to every peer it sends to. Outbound messages are
/// written by a background thread, in the order they were sent; every frame
/// is acknowledged by the receiver.
///
pub struct TcpCommunicator {
    rank: usize,
    num_peers: usize,
    outbound: Option<Sender<Outbound>>,
    loopback: Sender<Envelope>,
    mailbox: Mailbox,
    tag: AtomicU64,
    send_thread: Option<JoinHandle<()>>,
}

impl TcpCommunicator {
    /// Bind this rank's address and start the background threads. Peers
    /// are connected lazily, on the first message to each of them.
    ///
    pub fn connect(rank: usize, peers: Vec<SocketAddr>) -> Result<Self> {
        Self::connect_with_timeout(rank, peers, None)
    }

    pub fn connect_with_timeout(rank: usize, peers: Vec<SocketAddr>, timeout: Option<Duration>) -> Result<Self> {
        let addr = *peers.get(rank).ok_or_else(|| {
            Error::configuration(format!("rank {} is not in a peer list of {}", rank, peers.len()))
        })?;
        let listener = TcpListener::bind(addr)
            .map_err(|e| Error::transport(format!("could not listen on {}: {}", addr, e)))?;

        let (inbound_sink, inbound_src) = crossbeam_channel::unbounded();
        let (outbound_sink, outbound_src) = crossbeam_channel::unbounded();

        Self::start_listener(listener, inbound_sink.clone());
        let send_thread = Self::start_serial_sender(peers.clone(), outbound_src);

        Ok(Self {
            rank,
            num_peers: peers.len(),
            outbound: Some(outbound_sink),
            loopback: inbound_sink,
            mailbox: Mailbox::new(inbound_src, timeout),
            tag: AtomicU64::new(0),
            send_thread: Some(send_thread),
        })
    }

    fn start_serial_sender(
        peers: Vec<SocketAddr>,
        outbound_src: crossbeam_channel::Receiver<Outbound>,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            let mut table: HashMap<usize, TcpStream> = HashMap::new();
            let mut failure: Option<String> = None;

            for item in outbound_src {
                match item {
                    Outbound::Message(rank, envelope) => {
                        if failure.is_some() {
                            continue;
                        }
                        if let Err(e) = Self::deliver(&mut table, &peers, rank, &envelope) {
                            error!("failed to send message to {}: {}", peers[rank], e);
                            failure = Some(format!("send to rank {} failed: {}", rank, e));
                        }
                    }
                    Outbound::Flush(reply) => {
                        reply.send(failure.clone().map_or(Ok(()), Err)).ok();
                    }
                }
            }
            info!("outbound sender shutting down");
        })
    }

    fn deliver(
        table: &mut HashMap<usize, TcpStream>,
        peers: &[SocketAddr],
        rank: usize,
        envelope: &Envelope,
    ) -> io::Result<()> {
        if !table.contains_key(&rank) {
            table.insert(rank, Self::connect_with_retry(peers[rank])?);
        }
        let stream = table
            .get_mut(&rank)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no stream"))?;

        let size = envelope.data.len() as u64;
        stream.write_all(&envelope.tag.to_le_bytes())?;
        stream.write_all(&(envelope.source as u64).to_le_bytes())?;
        stream.write_all(&size.to_le_bytes())?;
        stream.write_all(&envelope.data)?;

        let ack = util::read_u64(stream)?;

        if ack != size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("sent {} bytes but the receiver acknowledged {}", size, ack),
            ));
        }
        Ok(())
    }

    fn start_listener(listener: TcpListener, inbound: Sender<Envelope>) -> JoinHandle<()> {
        thread::spawn(move || {
            if let Ok(addr) = listener.local_addr() {
                info!("listening on {}", addr);
            }
            for stream in listener.incoming() {
                match stream {
                    Ok(stream) => {
                        Self::handle_connection(stream, inbound.clone());
                    }
                    Err(e) => error!("failed to accept a connection: {}", e),
                }
            }
        })
    }

    fn handle_connection(mut stream: TcpStream, inbound: Sender<Envelope>) -> JoinHandle<()> {
        let remote = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string());
        info!("receiving connection from {}", remote);

        thread::spawn(move || loop {
            match Self::read_frame(&mut stream) {
                Ok(Some(envelope)) => {
                    let size = envelope.data.len() as u64;

                    if inbound.send(envelope).is_err() {
                        break;
                    }
                    if let Err(e) = stream.write_all(&size.to_le_bytes()) {
                        error!("connection from {} failed: {}", remote, e);
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("connection from {} failed: {}", remote, e);
                    break;
                }
            }
        })
    }

    /// Read one frame, or return `None` if the peer closed the connection
    /// between frames.
    fn read_frame<R: Read>(stream: &mut R) -> io::Result<Option<Envelope>> {
        let tag = match util::read_u64(stream) {
            Ok(tag) => tag,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        };
        let source = util::read_u64(stream)? as usize;
        let size = util::read_u64(stream)?;

        if size > MAX_FRAME_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {} bytes from rank {} exceeds the {} byte limit", size, source, MAX_FRAME_SIZE),
            ));
        }
        let data = util::read_bytes_vec(stream, size as usize)?;
        Ok(Some(Envelope { tag, source, data }))
    }

    fn connect_with_retry(addr: SocketAddr) -> io::Result<TcpStream> {
        ExponentialBackoff::new(RETRY_WAIT, RETRY_MAX_WAIT, 2)
            .take(CONNECT_ATTEMPTS)
            .retry(
                || TcpStream::connect(addr),
                |e, delay| {
                    warn!("connect to {} failed: {}, retrying in {:?}", addr, e, delay);
                    thread::sleep(delay)
                },
            )
            .unwrap_or_else(|| Err(io::Error::new(io::ErrorKind::NotConnected, "no connection attempts")))
    }

    fn outbound(&self) -> Result<&Sender<Outbound>> {
        self.outbound
            .as_ref()
            .ok_or_else(|| Error::transport("communicator is shut down"))
    }
}

impl Communicator for TcpCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.num_peers
    }

    fn next_tag(&self) -> Tag {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }

    fn send(&self, rank: usize, tag: Tag, data: Vec<u8>) -> Result<()> {
        if rank >= self.num_peers {
            return Err(Error::transport(format!("no rank {} in a group of {}", rank, self.num_peers)));
        }
        if rank != self.rank && data.len() as u64 > MAX_FRAME_SIZE {
            return Err(Error::transport(format!(
                "message of {} bytes to rank {} exceeds the {} byte frame limit", data.len(), rank, MAX_FRAME_SIZE)));
        }
        let envelope = Envelope { tag, source: self.rank, data };

        if rank == self.rank {
            self.loopback
                .send(envelope)
                .map_err(|_| Error::transport("inbound channel disconnected"))
        } else {
            self.outbound()?
                .send(Outbound::Message(rank, envelope))
                .map_err(|_| Error::transport("outbound sender has stopped"))
        }
    }

    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)> {
        let envelope = self.mailbox.recv(tag)?;
        Ok((envelope.source, envelope.data))
    }

    fn flush(&self) -> Result<()> {
        let (reply, done) = crossbeam_channel::bounded(1);
        self.outbound()?
            .send(Outbound::Flush(reply))
            .map_err(|_| Error::transport("outbound sender has stopped"))?;
        done.recv()
            .map_err(|_| Error::transport("outbound sender has stopped"))?
            .map_err(Error::Transport)
    }
}

impl Drop for TcpCommunicator {
    fn drop(&mut self) {
        self.outbound.take();

        if let Some(handle) = self.send_thread.take() {
            if handle.join().is_err() {
                error!("outbound sender panicked");
            }
        }
    }
}
