use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Meta key holding the routing state of a discovered instance.
pub const KEY_SERVICE_STATE: &str = "service_state";

/// Routing state of a discovered instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Just discovered; connected but not yet selectable.
    Young,
    /// Eligible for routing.
    Adult,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Young => "young",
            ServiceState::Adult => "adult",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One announced instance of a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub id: String,
    pub name: String,
    /// Public ip or domain.
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl ServiceRegistration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        protocol: impl Into<String>,
        address: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
            port,
            protocol: protocol.into(),
            ..Self::default()
        }
    }

    /// Address a dialer connects to: `host:port` for tcp, otherwise
    /// `protocol://host:port`.
    pub fn dial_url(&self) -> String {
        if self.protocol == "tcp" {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("{}://{}:{}", self.protocol, self.address, self.port)
        }
    }

    /// True when the instance can be reached from other processes.
    pub fn is_public(&self) -> bool {
        !self.address.is_empty() && self.port != 0
    }
}

impl fmt::Display for ServiceRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "id:{},name:{},address:{},port:{},ns:{},tags:{:?}",
            self.id, self.name, self.address, self.port, self.namespace, self.tags
        )
    }
}
