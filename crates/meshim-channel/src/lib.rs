//! Connection channels for meshim servers.
//!
//! A [`Channel`] wraps one accepted connection: a bounded outbound queue
//! drained by a dedicated write loop, a single-reader read loop that hands
//! Binary payloads to a [`MessageListener`], and an idempotent close.
//!
//! This crate also defines the contracts a local server fulfils for the mesh
//! container ([`Server`], [`Acceptor`], [`MessageListener`],
//! [`StateListener`]) and the concurrent [`Registry`] used for both channels
//! and outbound mesh clients.

pub mod channel;
pub mod conn;
pub mod error;
pub mod event;
pub mod registry;
pub mod server;

pub use channel::{
    Channel, ChannelConfig, DEFAULT_QUEUE_CAPACITY, DEFAULT_READ_WAIT, DEFAULT_WRITE_WAIT,
};
pub use conn::{BoxedReader, BoxedWriter, Conn, FrameReader, FrameWriter};
pub use error::{ChannelError, Result};
pub use event::Event;
pub use registry::{ChannelRegistry, Identified, Registry};
pub use server::{Acceptor, Agent, MessageListener, Server, StateListener, DEFAULT_LOGIN_WAIT};
