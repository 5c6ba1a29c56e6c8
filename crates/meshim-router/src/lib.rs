//! Command routing for services behind the mesh.
//!
//! A [`Router`] maps a packet's command to a chain of [`Handler`]s and runs
//! the chain against a pooled [`Context`]. The context answers the sender,
//! dispatches to other users through a [`Dispatcher`] and reads or writes
//! sessions in a [`SessionStorage`]. [`ServHandler`] plugs all of this into
//! a local server as its acceptor and listeners.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod router;
pub mod serv;
pub mod storage;

pub use context::{Context, Handler, HandlerFunc, TAG_AUTO_GENERATED};
pub use dispatcher::Dispatcher;
pub use error::{Result, RouterError};
pub use router::{Router, MAX_POOLED_CONTEXTS};
pub use serv::ServHandler;
pub use storage::{MemoryStorage, SessionStorage};
