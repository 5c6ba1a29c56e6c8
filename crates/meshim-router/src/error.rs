use meshim_mesh::MeshError;
use meshim_packet::PacketError;

/// Errors raised while routing a request or touching session storage.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("session not found")]
    SessionNotFound,

    #[error("storage: {0}")]
    Storage(String),

    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error(transparent)]
    Packet(#[from] PacketError),
}

pub type Result<T> = std::result::Result<T, RouterError>;
