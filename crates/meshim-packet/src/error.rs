/// Errors that can occur while encoding or decoding packets.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// The payload does not start with a known packet magic.
    #[error("invalid packet magic")]
    InvalidMagic,

    /// The payload ended before the declared lengths were satisfied.
    #[error("truncated packet (need {needed} bytes, have {available})")]
    Truncated { needed: usize, available: usize },

    /// A length-prefixed field is longer than its prefix can express.
    #[error("field too long ({len} bytes, max {max})")]
    FieldTooLong { len: usize, max: usize },

    /// A string field is not valid UTF-8.
    #[error("invalid utf-8 in packet field")]
    InvalidUtf8,

    /// Nothing to decode.
    #[error("data is empty")]
    Empty,

    /// Header or body JSON failed to (de)serialize.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PacketError>;
