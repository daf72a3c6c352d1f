//! This module exports a minimal message-passing API, which is encapsulated
//! by a `Communicator` trait. Implementors only need to write tagged `send`
//! and `recv` operations for a given transport layer; an in-process channel
//! transport and a pure-Rust TCP transport are included. The trait then
//! provides default implementations for broadcast, reduce, all-reduce,
//! all-gather, all-to-all and barrier operations.
//!

mod backoff;
pub mod channel;
pub mod codec;
pub mod comm;
pub mod mailbox;
pub mod tcp;
pub mod util;

pub use channel::ChannelCommunicator;
pub use comm::{Communicator, Tag};
pub use tcp::TcpCommunicator;
