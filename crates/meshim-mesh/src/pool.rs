use std::sync::{Arc, Mutex};

use meshim_channel::{Identified, Registry};
use meshim_naming::{ServiceRegistration, ServiceState, KEY_SERVICE_STATE};
use meshim_transport::Client;
use tokio::time::Instant;

/// An outbound client plus the discovery record it was built from.
///
/// The instance becomes routable once `ready_at` has passed.
pub struct PooledClient {
    client: Client,
    registration: ServiceRegistration,
    ready_at: Mutex<Instant>,
}

impl PooledClient {
    pub fn new(client: Client, registration: ServiceRegistration, ready_at: Instant) -> Self {
        Self {
            client,
            registration,
            ready_at: Mutex::new(ready_at),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn registration(&self) -> &ServiceRegistration {
        &self.registration
    }

    pub fn ready_at(&self) -> Instant {
        *self.ready_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Move `ready_at` earlier, never later.
    pub fn promote(&self, ready_at: Instant) {
        let mut current = self.ready_at.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if ready_at < *current {
            *current = ready_at;
        }
    }

    pub fn state_at(&self, now: Instant) -> ServiceState {
        if now >= self.ready_at() {
            ServiceState::Adult
        } else {
            ServiceState::Young
        }
    }

    /// Meta value with `service_state` materialised for `now`.
    pub fn meta_value(&self, key: &str, now: Instant) -> Option<String> {
        if key == KEY_SERVICE_STATE {
            return Some(self.state_at(now).as_str().to_string());
        }
        self.registration.meta.get(key).cloned()
    }

    /// The registration as selectors see it.
    fn snapshot(&self, now: Instant) -> ServiceRegistration {
        let mut registration = self.registration.clone();
        registration.meta.insert(
            KEY_SERVICE_STATE.to_string(),
            self.state_at(now).as_str().to_string(),
        );
        registration
    }
}

impl Identified for PooledClient {
    fn id(&self) -> &str {
        &self.registration.id
    }
}

impl std::fmt::Debug for PooledClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledClient")
            .field("id", &self.registration.id)
            .field("ready_at", &self.ready_at())
            .finish_non_exhaustive()
    }
}

/// Live outbound connections to the instances of one service.
pub struct ClientPool {
    name: String,
    clients: Registry<PooledClient>,
}

impl ClientPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clients: Registry::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, client: Arc<PooledClient>) {
        self.clients.add(client);
    }

    pub fn remove(&self, id: &str) -> Option<Arc<PooledClient>> {
        self.clients.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PooledClient>> {
        self.clients.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.clients.contains(id)
    }

    pub fn all(&self) -> Vec<Arc<PooledClient>> {
        self.clients.all()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Registrations whose `key` meta equals `value`, ordered by id.
    pub fn services(&self, key: &str, value: &str) -> Vec<ServiceRegistration> {
        let now = Instant::now();
        let mut services: Vec<_> = self
            .clients
            .filter(|client| client.meta_value(key, now).as_deref() == Some(value))
            .iter()
            .map(|client| client.snapshot(now))
            .collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        services
    }

    /// Instances whose warm-up has elapsed.
    pub fn adult_services(&self) -> Vec<ServiceRegistration> {
        self.services(KEY_SERVICE_STATE, ServiceState::Adult.as_str())
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("name", &self.name)
            .field("clients", &self.clients.len())
            .finish()
    }
}
