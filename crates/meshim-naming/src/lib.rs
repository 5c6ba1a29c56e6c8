//! Service discovery interface for the meshim container.
//!
//! The container never talks to a concrete discovery backend; it consumes
//! the [`Naming`] trait. [`MemoryNaming`] is an in-process backend used for
//! static topologies, local development and tests.

pub mod error;
pub mod memory;
pub mod registration;

use std::sync::Arc;

use async_trait::async_trait;

pub use error::{NamingError, Result};
pub use memory::MemoryNaming;
pub use registration::{ServiceRegistration, ServiceState, KEY_SERVICE_STATE};

/// Invoked by a discovery backend with the full instance list of a service
/// whenever its topology changes.
pub type ServiceCallback = Arc<dyn Fn(Vec<ServiceRegistration>) + Send + Sync>;

/// Discovery backend.
#[async_trait]
pub trait Naming: Send + Sync {
    /// Currently registered instances of `service_name`.
    async fn find(&self, service_name: &str) -> Result<Vec<ServiceRegistration>>;

    /// Watch `service_name` for topology changes.
    async fn subscribe(&self, service_name: &str, callback: ServiceCallback) -> Result<()>;

    /// Stop watching `service_name`.
    async fn unsubscribe(&self, service_name: &str) -> Result<()>;

    /// Announce an instance.
    async fn register(&self, registration: &ServiceRegistration) -> Result<()>;

    /// Withdraw an instance by id.
    async fn deregister(&self, service_id: &str) -> Result<()>;
}
