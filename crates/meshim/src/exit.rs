use std::fmt;
use std::io;

use meshim::config::ConfigError;
use meshim::mesh::MeshError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const CONFIG: i32 = 78;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn config_error(err: ConfigError) -> CliError {
    let code = match &err {
        ConfigError::Io { source, .. } if source.kind() == io::ErrorKind::NotFound => USAGE,
        ConfigError::Io { .. } | ConfigError::Invalid(_) => CONFIG,
        ConfigError::Parse { .. } => DATA_INVALID,
    };
    CliError::new(code, err.to_string())
}

pub fn mesh_error(context: &str, err: MeshError) -> CliError {
    match err {
        MeshError::Transport(_) | MeshError::Channel(_) | MeshError::Monitor(_) => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        MeshError::NamingNotConfigured | MeshError::DialerNotConfigured => {
            CliError::new(INTERNAL, format!("{context}: {err}"))
        }
        other => CliError::new(FAILURE, format!("{context}: {other}")),
    }
}
