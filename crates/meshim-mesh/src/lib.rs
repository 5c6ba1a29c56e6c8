//! The mesh container coordinates a process's place in the service mesh.
//!
//! It owns the local server's lifecycle, keeps one [`ClientPool`] of
//! outbound connections per declared dependency in sync with discovery, and
//! forwards packets to a [`Selector`]-chosen instance. Packets that come back
//! through those connections are pushed to the local channels they name.

pub mod container;
pub mod error;
mod monitor;
pub mod pool;
pub mod selector;

pub use container::{Container, ContainerBuilder, ContainerConfig, DEFAULT_SHUTDOWN_GRACE, DEFAULT_WARMUP};
pub use error::{MeshError, Result};
pub use pool::{ClientPool, PooledClient};
pub use selector::{HashSelector, Selector};
