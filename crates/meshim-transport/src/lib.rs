//! TCP collaborators for meshim processes.
//!
//! - [`TcpServer`]: the local server, one [`Channel`](meshim_channel::Channel) per accepted socket
//! - [`TcpDialer`] / [`InnerAcceptor`]: the inner handshake between mesh processes
//! - [`Client`]: one outbound connection to a remote service instance

pub mod client;
pub mod dialer;
pub mod error;
pub mod handshake;
pub mod server;

pub use client::{Client, ClientOptions, DEFAULT_HEARTBEAT};
pub use dialer::{Dialer, DialerContext};
pub use error::{Result, TransportError};
pub use handshake::{InnerAcceptor, TcpDialer};
pub use server::{RandomAcceptor, ServerOptions, TcpServer};

/// Protocol name mesh processes advertise for the inner TCP transport.
pub const PROTOCOL_TCP: &str = "tcp";
