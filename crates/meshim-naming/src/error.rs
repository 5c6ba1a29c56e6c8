/// Errors reported by discovery backends.
#[derive(Debug, thiserror::Error)]
pub enum NamingError {
    /// No instance is registered under the given service id.
    #[error("service {0} not found")]
    NotFound(String),

    /// A subscription for the service name already exists.
    #[error("service {0} already subscribed")]
    AlreadySubscribed(String),

    /// The registration is missing required fields.
    #[error("invalid registration: {0}")]
    InvalidRegistration(String),

    /// The backend itself failed.
    #[error("naming backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, NamingError>;
