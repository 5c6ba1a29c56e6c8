//! Node configuration file.
//!
//! ```json
//! {
//!   "service_id": "gate-1",
//!   "service_name": "gateway",
//!   "listen": "0.0.0.0:8000",
//!   "public_address": "10.0.0.5",
//!   "public_port": 8000,
//!   "deps": ["login", "chat"],
//!   "peers": [
//!     { "id": "login-1", "name": "login", "address": "10.0.0.6", "port": 8100, "protocol": "tcp" }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use meshim_mesh::{ContainerConfig, DEFAULT_SHUTDOWN_GRACE, DEFAULT_WARMUP};
use meshim_naming::{MemoryNaming, ServiceRegistration};
use meshim_transport::{ClientOptions, ServerOptions, PROTOCOL_TCP};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_read_wait_secs() -> u64 {
    meshim_channel::DEFAULT_READ_WAIT.as_secs()
}

fn default_login_wait_secs() -> u64 {
    meshim_channel::DEFAULT_LOGIN_WAIT.as_secs()
}

fn default_warmup_secs() -> u64 {
    DEFAULT_WARMUP.as_secs()
}

/// Everything one gateway or service process needs to join the mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub service_id: String,
    pub service_name: String,
    /// Local bind address.
    pub listen: String,
    /// Address other processes dial; empty keeps the node out of discovery.
    #[serde(default)]
    pub public_address: String,
    #[serde(default)]
    pub public_port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Services this node forwards to.
    #[serde(default)]
    pub deps: Vec<String>,
    /// Known instances of other services.
    #[serde(default)]
    pub peers: Vec<ServiceRegistration>,
    #[serde(default = "default_read_wait_secs")]
    pub read_wait_secs: u64,
    #[serde(default = "default_login_wait_secs")]
    pub login_wait_secs: u64,
    #[serde(default = "default_warmup_secs")]
    pub warmup_secs: u64,
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_id.is_empty() {
            return Err(ConfigError::Invalid("service_id is empty".into()));
        }
        if self.service_name.is_empty() {
            return Err(ConfigError::Invalid("service_name is empty".into()));
        }
        if self.listen.is_empty() {
            return Err(ConfigError::Invalid("listen is empty".into()));
        }
        if let Some(peer) = self.peers.iter().find(|peer| peer.id == self.service_id) {
            return Err(ConfigError::Invalid(format!(
                "peer {} reuses this node's service_id",
                peer.id
            )));
        }
        Ok(())
    }

    /// This node's own discovery record.
    pub fn registration(&self) -> ServiceRegistration {
        let mut registration = ServiceRegistration::new(
            self.service_id.clone(),
            self.service_name.clone(),
            PROTOCOL_TCP,
            self.public_address.clone(),
            self.public_port,
        );
        registration.tags = self.tags.clone();
        registration
    }

    /// Discovery backend seeded with the static peers.
    pub fn naming(&self) -> MemoryNaming {
        MemoryNaming::with_services(self.peers.iter().cloned())
    }

    pub fn server_options(&self) -> ServerOptions {
        ServerOptions {
            login_wait: Duration::from_secs(self.login_wait_secs),
            read_wait: Duration::from_secs(self.read_wait_secs),
            ..ServerOptions::default()
        }
    }

    pub fn container_config(&self) -> ContainerConfig {
        ContainerConfig {
            warmup: Duration::from_secs(self.warmup_secs),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            client: ClientOptions::default(),
        }
    }
}
