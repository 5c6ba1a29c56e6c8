//! Instant-messaging gateway and service mesh over framed TCP.
//!
//! # Crate Structure
//!
//! - [`frame`]: length-prefixed frames with an opcode
//! - [`packet`]: logic and heartbeat packets carried in Binary frames
//! - [`channel`]: server-side connections, their registry and the server traits
//! - [`naming`]: service registrations and discovery
//! - [`transport`]: TCP server, dialer and outbound mesh client
//! - [`mesh`]: the mesh container, client pools and instance selection
//! - [`router`]: command routing and session storage for services
//! - [`gateway`] / [`handler`]: the bundled gateway and login/chat handlers
//! - [`config`]: JSON node configuration used by the `meshim` binary

/// Re-export frame types.
pub mod frame {
    pub use meshim_frame::*;
}

/// Re-export packet types.
pub mod packet {
    pub use meshim_packet::*;
}

/// Re-export channel types.
pub mod channel {
    pub use meshim_channel::*;
}

/// Re-export naming types.
pub mod naming {
    pub use meshim_naming::*;
}

/// Re-export transport types.
pub mod transport {
    pub use meshim_transport::*;
}

/// Re-export mesh container types.
pub mod mesh {
    pub use meshim_mesh::*;
}

/// Re-export router types.
pub mod router {
    pub use meshim_router::*;
}

pub mod config;
pub mod gateway;
pub mod handler;
