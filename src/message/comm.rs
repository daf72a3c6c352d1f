use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{codec, util};
use crate::error::{Error, Result};

/// Messages are matched by tag. Every rank draws tags from its own counter,
/// and since all ranks call the collective operations in the same order, the
/// counters advance in lock step and the tags line up.
pub type Tag = u64;

/// Interface for a group of processes that can exchange messages over a
/// network. The underlying transport can in principle be TCP, in-process
/// channels, or a higher level abstraction like MPI.
///
pub trait Communicator {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to return the next tag in this process's
    /// sequence.
    fn next_tag(&self) -> Tag;

    /// Must be implemented to send a message to a peer (possibly this
    /// process). This method must return immediately, in other words it is
    /// not allowed to block until a matching receive is posted.
    fn send(&self, rank: usize, tag: Tag, message: Vec<u8>) -> Result<()>;

    /// Must be implemented to receive a message with the given tag from any
    /// of the peers, returning the sender's rank along with the message.
    /// Messages with other tags that arrive in the meantime are kept for
    /// later. This method is allowed to block until a message is ready.
    fn recv(&self, tag: Tag) -> Result<(usize, Vec<u8>)>;

    /// Block until every message sent so far has left this process. Returns
    /// immediately for transports that deliver on send.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Implements a binomial tree broadcast from rank 0. The message buffer
    /// must be `Some` if this is rank 0, and it must be `None` otherwise.
    ///
    fn broadcast(&self, value: Option<Vec<u8>>) -> Result<Vec<u8>> {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(tag)?.1,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, tag, value.clone())?
            }
        }
        Ok(value)
    }

    /// Implements a binomial tree reduce. All ranks return `None` except for
    /// rank 0. The operator must be commutative and associative, since the
    /// order in which partial results arrive is not fixed.
    ///
    fn reduce<F>(&self, f: F, mut value: Vec<u8>) -> Result<Option<Vec<u8>>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Result<Vec<u8>>,
        Self: Sized,
    {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(tag)?.1)?
                }
            } else {
                self.send(r - one, tag, value)?;
                return Ok(None);
            }
        }
        Ok(Some(value))
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator.
    ///
    fn all_reduce<F>(&self, f: F, value: Vec<u8>) -> Result<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Result<Vec<u8>>,
        Self: Sized,
    {
        let reduced = self.reduce(f, value)?;
        self.broadcast(reduced)
    }

    /// Every rank contributes one buffer and receives every rank's buffer,
    /// ordered by rank.
    ///
    fn all_gather(&self, value: Vec<u8>) -> Result<Vec<Vec<u8>>> {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        for peer in (0..p).filter(|&peer| peer != r) {
            self.send(peer, tag, value.clone())?
        }
        let mut result = vec![Vec::new(); p];
        result[r] = value;

        for _ in 1..p {
            let (source, bytes) = self.recv(tag)?;
            result[source] = bytes
        }
        Ok(result)
    }

    /// Every rank provides one buffer for each rank, and receives the buffers
    /// addressed to it, ordered by sender.
    ///
    fn all_to_all(&self, mut values: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>> {
        let tag = self.next_tag();
        let r = self.rank();
        let p = self.size();

        if values.len() != p {
            return Err(Error::transport(format!(
                "all-to-all needs {} buffers, got {}", p, values.len())));
        }
        let own = std::mem::take(&mut values[r]);

        for (peer, bytes) in values.into_iter().enumerate().filter(|(peer, _)| *peer != r) {
            self.send(peer, tag, bytes)?
        }
        let mut result = vec![Vec::new(); p];
        result[r] = own;

        for _ in 1..p {
            let (source, bytes) = self.recv(tag)?;
            result[source] = bytes
        }
        Ok(result)
    }

    /// Block until every rank has reached this point.
    ///
    fn barrier(&self) -> Result<()>
    where
        Self: Sized,
    {
        self.all_reduce(|a, _| Ok(a), Vec::new()).map(|_| ())
    }

    /// Typed broadcast from rank 0.
    ///
    fn broadcast_value<T>(&self, value: Option<&T>) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Self: Sized,
    {
        let bytes = value.map(codec::encode).transpose()?;
        codec::decode(&self.broadcast(bytes)?)
    }

    /// Typed all-reduce.
    ///
    fn all_reduce_value<T, F>(&self, value: T, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: Fn(T, T) -> T,
        Self: Sized,
    {
        let bytes = self.all_reduce(
            |a, b| codec::encode(&f(codec::decode(&a)?, codec::decode(&b)?)),
            codec::encode(&value)?,
        )?;
        codec::decode(&bytes)
    }

    /// Typed all-gather.
    ///
    fn all_gather_value<T>(&self, value: &T) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        Self: Sized,
    {
        self.all_gather(codec::encode(value)?)?
            .iter()
            .map(|bytes| codec::decode(bytes))
            .collect()
    }

    /// Typed all-to-all.
    ///
    fn all_to_all_value<T>(&self, values: Vec<T>) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
        Self: Sized,
    {
        let bytes = values.iter().map(codec::encode).collect::<Result<Vec<_>>>()?;
        self.all_to_all(bytes)?
            .iter()
            .map(|bytes| codec::decode(bytes))
            .collect()
    }
}
