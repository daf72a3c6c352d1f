use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use log::debug;
use serde::{Deserialize, Serialize};

use super::comm::Tag;
use crate::error::{Error, Result};

/// A message in flight: the payload along with its tag and sender.
///
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: Tag,
    pub source: usize,
    pub data: Vec<u8>,
}

/// The Mailbox enforces tag matching on incoming messages. Messages which
/// arrive for a tag that nobody has asked for yet are kept until the local
/// process requests that tag.
///
pub struct Mailbox {
    inbound: Receiver<Envelope>,
    buffer: Mutex<HashMap<Tag, VecDeque<Envelope>>>,
    timeout: Option<Duration>,
}

impl Mailbox {
    pub fn new(inbound: Receiver<Envelope>, timeout: Option<Duration>) -> Self {
        Self {
            inbound,
            buffer: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Block until a message with the given tag is available, and return it.
    /// Fails if the transport hangs up, or if nothing arrives before the
    /// timeout.
    ///
    pub fn recv(&self, tag: Tag) -> Result<Envelope> {
        let mut buffer = self
            .buffer
            .lock()
            .map_err(|_| Error::transport("mailbox lock poisoned"))?;

        if let Some(queue) = buffer.get_mut(&tag) {
            if let Some(envelope) = queue.pop_front() {
                if queue.is_empty() {
                    buffer.remove(&tag);
                }
                return Ok(envelope);
            }
        }

        loop {
            let envelope = match self.timeout {
                Some(timeout) => self.inbound.recv_timeout(timeout).map_err(|e| match e {
                    RecvTimeoutError::Timeout => Error::transport(format!("timed out waiting for tag {}", tag)),
                    RecvTimeoutError::Disconnected => Error::transport("inbound channel disconnected"),
                })?,
                None => self
                    .inbound
                    .recv()
                    .map_err(|_| Error::transport("inbound channel disconnected"))?,
            };

            if envelope.tag == tag {
                return Ok(envelope);
            }
            debug!(
                "message from rank {} for tag {} arrived while waiting on {}, buffering",
                envelope.source, envelope.tag, tag
            );
            buffer.entry(envelope.tag).or_default().push_back(envelope)
        }
    }

    /// Return the number of messages received but not yet requested.
    ///
    pub fn buffered(&self) -> usize {
        self.buffer
            .lock()
            .map(|buffer| buffer.values().map(VecDeque::len).sum())
            .unwrap_or(0)
    }
}
