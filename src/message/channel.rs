use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crossbeam_channel::Sender;

use super::comm::{Communicator, Tag};
use super::mailbox::{Envelope, Mailbox};
use crate::error::{Error, Result};

/// A communicator for ranks that live in the same process, typically one
/// per thread. Messages travel over unbounded crossbeam channels, so sends
/// complete immediately and `flush` has nothing to wait for.
///
pub struct ChannelCommunicator {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    mailbox: Mailbox,
    tag: AtomicU64,
}

impl ChannelCommunicator {
    /// Create a fully connected group of the given size. Element `r` of the
    /// result is rank `r`, ready to be moved to its own thread.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        Self::group_with_timeout(size, None)
    }

    /// Like `group`, but a receive that waits longer than the timeout fails
    /// with a transport error instead of blocking forever.
    ///
    pub fn group_with_timeout(size: usize, timeout: Option<Duration>) -> Vec<Self> {
        let (sinks, srcs): (Vec<_>, Vec<_>) = (0..size).map(|_| crossbeam_channel::unbounded()).unzip();

        srcs.into_iter()
            .enumerate()
            .map(|(rank, src)| Self {
                rank,
                peers: sinks.clone(),
                mailbox: Mailbox::new(src, timeout),
                tag: AtomicU64::new(0),
            })
            .collect()
    }

    /// Return the number of messages received but not yet asked for.
    ///
    pub fn buffered(&self) -> usize {
        self.mailbox.buffered()
    }
}

impl Communicator for ChannelCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn next_tag(&self) -> Tag {
        self.tag.fetch_add(1, Ordering::SeqCst)
    }

    fn send(&self, rank: usize, tag: Tag, data: Vec<u8>) -> Result<()> {
        let peer = self
            .peers
            .get(rank)
            .ok_or_else(|| Error::transport(format!("no rank {} in a group of {}", rank, self.peers.len())))?;
        peer.send(Envelope { tag, source: self.rank, data })
            .map_err(|_| Error::transport(format!("rank {} has hung up", rank)))
    }

    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)> {
        let envelope = self.mailbox.recv(tag)?;
        Ok((envelope.source, envelope.data))
    }
}




// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use std::thread;

    fn run<F, T>(size: usize, f: F) -> Vec<T>
    where
        F: Fn(ChannelCommunicator) -> T + Send + Sync + Copy + 'static,
        T: Send + 'static,
    {
        let handles: Vec<_> = ChannelCommunicator::group_with_timeout(size, Some(Duration::from_secs(10)))
            .into_iter()
            .map(|comm| thread::spawn(move || f(comm)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn collectives_agree_for_many_group_sizes() {
        for size in 1..=7 {
            let results = run(size, |comm| {
                let sum = comm.all_reduce_value(comm.rank() as u64 + 1, |a, b| a + b).unwrap();
                let max = comm.all_reduce_value(comm.rank(), usize::max).unwrap();
                let gathered = comm.all_gather_value(&(comm.rank() * 10)).unwrap();
                let hello = "hello".to_string();
                let root = comm.broadcast_value(Some(&hello).filter(|_| comm.rank() == 0)).unwrap();
                comm.barrier().unwrap();
                (sum, max, gathered, root)
            });
            let n = size as u64;
            for (sum, max, gathered, root) in results {
                assert_eq!(sum, n * (n + 1) / 2);
                assert_eq!(max, size - 1);
                assert_eq!(gathered, (0..size).map(|r| r * 10).collect::<Vec<_>>());
                assert_eq!(root, "hello");
            }
        }
    }

    #[test]
    fn all_to_all_routes_by_destination() {
        let results = run(3, |comm| {
            let outgoing: Vec<_> = (0..3).map(|dest| (comm.rank(), dest)).collect();
            comm.all_to_all_value(outgoing).unwrap()
        });
        for (rank, incoming) in results.into_iter().enumerate() {
            assert_eq!(incoming, vec![(0, rank), (1, rank), (2, rank)]);
        }
    }

    #[test]
    fn point_to_point_messages_match_by_tag() {
        let results = run(2, |comm| {
            let a = comm.next_tag();
            let b = comm.next_tag();
            let other = 1 - comm.rank();
            comm.send(other, b, vec![2]).unwrap();
            comm.send(other, a, vec![1]).unwrap();
            let first = comm.recv(a).unwrap();
            let second = comm.recv(b).unwrap();
            (first, second)
        });
        assert_eq!(results[0], ((1, vec![1]), (1, vec![2])));
        assert_eq!(results[1], ((0, vec![1]), (0, vec![2])));
    }
}
