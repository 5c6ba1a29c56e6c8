use meshim_channel::ChannelError;
use meshim_naming::NamingError;
use meshim_packet::PacketError;
use meshim_transport::TransportError;

/// Errors that can occur in the mesh container.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    #[error("container has been initialized")]
    AlreadyInitialized,

    #[error("container is not initialized")]
    NotInitialized,

    #[error("container has started")]
    AlreadyStarted,

    #[error("container has closed")]
    AlreadyClosed,

    #[error("container is not started")]
    NotStarted,

    #[error("naming is not configured")]
    NamingNotConfigured,

    #[error("dialer is not configured")]
    DialerNotConfigured,

    /// Command or channel id missing.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The service is not a declared dependency.
    #[error("service {0} not found")]
    ServiceNotFound(String),

    /// The dependency has no routable instance.
    #[error("no services found for {0}")]
    NoServiceFound(String),

    /// The selected instance left the pool before it could be used.
    #[error("no client found for {0}")]
    ClientNotFound(String),

    #[error("unexpected service protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("dest.server is incorrect, {actual} != {expected}")]
    WrongDestination { expected: String, actual: String },

    #[error("dest.channels is missing")]
    MissingDestChannels,

    /// The monitor endpoint could not bind.
    #[error("monitor listener failed: {0}")]
    Monitor(#[source] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Naming(#[from] NamingError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl MeshError {
    /// Whether trying again later may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MeshError::ClientNotFound(_) | MeshError::NoServiceFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, MeshError>;
