use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{NamingError, Result};
use crate::registration::ServiceRegistration;
use crate::{Naming, ServiceCallback};

/// In-process discovery backend.
///
/// Registering or deregistering an instance notifies the subscriber of that
/// service name with the full current instance list. Subscribing does not
/// replay the current list; callers pair it with [`Naming::find`].
#[derive(Default)]
pub struct MemoryNaming {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    /// Keyed by service id; ordered so that `find` is deterministic.
    services: BTreeMap<String, ServiceRegistration>,
    subscribers: HashMap<String, ServiceCallback>,
}

impl MemoryNaming {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a backend with a static set of instances.
    pub fn with_services(services: impl IntoIterator<Item = ServiceRegistration>) -> Self {
        let naming = Self::new();
        {
            let mut state = naming.lock();
            for service in services {
                state.services.insert(service.id.clone(), service);
            }
        }
        naming
    }

    /// Whether `service_name` currently has a subscriber.
    pub fn is_subscribed(&self, service_name: &str) -> bool {
        self.lock().subscribers.contains_key(service_name)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panicking callback never runs under the lock, so poisoning only
        // means another thread panicked between two map operations.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn instances_of(state: &State, service_name: &str) -> Vec<ServiceRegistration> {
        state
            .services
            .values()
            .filter(|service| service.name == service_name)
            .cloned()
            .collect()
    }

    fn notify(&self, service_name: &str) {
        let pending = {
            let state = self.lock();
            state
                .subscribers
                .get(service_name)
                .cloned()
                .map(|callback| (callback, Self::instances_of(&state, service_name)))
        };
        if let Some((callback, services)) = pending {
            debug!(
                service = service_name,
                instances = services.len(),
                "notifying subscriber"
            );
            callback(services);
        }
    }
}

#[async_trait]
impl Naming for MemoryNaming {
    async fn find(&self, service_name: &str) -> Result<Vec<ServiceRegistration>> {
        let state = self.lock();
        Ok(Self::instances_of(&state, service_name))
    }

    async fn subscribe(&self, service_name: &str, callback: ServiceCallback) -> Result<()> {
        let mut state = self.lock();
        if state.subscribers.contains_key(service_name) {
            return Err(NamingError::AlreadySubscribed(service_name.to_string()));
        }
        state
            .subscribers
            .insert(service_name.to_string(), callback);
        Ok(())
    }

    async fn unsubscribe(&self, service_name: &str) -> Result<()> {
        self.lock().subscribers.remove(service_name);
        Ok(())
    }

    async fn register(&self, registration: &ServiceRegistration) -> Result<()> {
        if registration.id.is_empty() || registration.name.is_empty() {
            return Err(NamingError::InvalidRegistration(
                "id and name are required".to_string(),
            ));
        }
        self.lock()
            .services
            .insert(registration.id.clone(), registration.clone());
        info!(id = %registration.id, name = %registration.name, "service registered");
        self.notify(&registration.name);
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let removed = self.lock().services.remove(service_id);
        let removed = removed.ok_or_else(|| NamingError::NotFound(service_id.to_string()))?;
        info!(id = %service_id, name = %removed.name, "service deregistered");
        self.notify(&removed.name);
        Ok(())
    }
}
