use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use meshim_channel::{Event, Identified, Server};
use meshim_frame::OpCode;
use meshim_naming::{Naming, ServiceCallback, ServiceRegistration};
use meshim_packet::{Header, LogicPkt, META_DEST_CHANNELS, META_DEST_SERVER};
use meshim_transport::{Client, ClientOptions, Dialer, TransportError, PROTOCOL_TCP};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{MeshError, Result};
use crate::monitor::{self, MeshStats};
use crate::pool::{ClientPool, PooledClient};
use crate::selector::{HashSelector, Selector};

/// How long an instance discovered by a live notification stays young.
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(10);
/// How long the local server gets to drain on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

const STATE_UNINITIALIZED: u8 = 0;
const STATE_INITIALIZED: u8 = 1;
const STATE_STARTED: u8 = 2;
const STATE_CLOSED: u8 = 3;

#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub warmup: Duration,
    pub shutdown_grace: Duration,
    /// Options for every outbound mesh client.
    pub client: ClientOptions,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            warmup: DEFAULT_WARMUP,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            client: ClientOptions::default(),
        }
    }
}

#[derive(Default)]
pub struct ContainerBuilder {
    naming: Option<Arc<dyn Naming>>,
    dialer: Option<Arc<dyn Dialer>>,
    selector: Option<Arc<dyn Selector>>,
    config: ContainerConfig,
}

impl ContainerBuilder {
    pub fn naming(mut self, naming: Arc<dyn Naming>) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Defaults to [`HashSelector`].
    pub fn selector(mut self, selector: Arc<dyn Selector>) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn config(mut self, config: ContainerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.config.warmup = warmup;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn build(self) -> Arc<Container> {
        Arc::new(Container {
            naming: self.naming,
            dialer: self.dialer,
            selector: self
                .selector
                .unwrap_or_else(|| Arc::new(HashSelector) as Arc<dyn Selector>),
            config: self.config,
            state: AtomicU8::new(STATE_UNINITIALIZED),
            server: OnceLock::new(),
            deps: OnceLock::new(),
            pools: RwLock::new(HashMap::new()),
            build_lock: tokio::sync::Mutex::new(()),
            quit: Event::new(),
            stats: MeshStats::default(),
            monitor: tokio::sync::OnceCell::new(),
        })
    }
}

/// A process's handle on the service mesh.
///
/// Lifecycle: [`init`](Container::init) once, then
/// [`start`](Container::start) once, then shutdown once. Each transition
/// fails if it has already happened.
pub struct Container {
    naming: Option<Arc<dyn Naming>>,
    dialer: Option<Arc<dyn Dialer>>,
    selector: Arc<dyn Selector>,
    config: ContainerConfig,
    state: AtomicU8,
    server: OnceLock<Arc<dyn Server>>,
    deps: OnceLock<BTreeSet<String>>,
    pools: RwLock<HashMap<String, Arc<ClientPool>>>,
    build_lock: tokio::sync::Mutex<()>,
    quit: Event,
    stats: MeshStats,
    monitor: tokio::sync::OnceCell<SocketAddr>,
}

impl Container {
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::default()
    }

    /// Attach the local server and declare the services this process sends to.
    pub fn init<I, S>(&self, server: Arc<dyn Server>, deps: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.transition(STATE_UNINITIALIZED, STATE_INITIALIZED)?;
        let deps: BTreeSet<String> = deps.into_iter().map(Into::into).collect();
        info!(
            id = %server.service_id(),
            name = %server.registration().name,
            deps = ?deps,
            "container initialized"
        );
        let _ = self.server.set(server);
        let _ = self.deps.set(deps);
        Ok(())
    }

    /// Start, then block until a termination signal or
    /// [`trigger_shutdown`](Container::trigger_shutdown), then shut down.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.start_background().await?;
        tokio::select! {
            _ = self.quit.done() => info!("shutdown requested"),
            signal = wait_for_signal() => info!(signal, "shutdown"),
        }
        self.shutdown().await
    }

    /// Start the local server, connect to every dependency and register,
    /// without waiting for shutdown.
    pub async fn start_background(self: &Arc<Self>) -> Result<()> {
        let naming = self.naming()?;
        self.transition(STATE_INITIALIZED, STATE_STARTED)?;
        let server = self.server()?;

        let runner = Arc::clone(&server);
        tokio::spawn(async move {
            if let Err(err) = runner.start().await {
                error!(error = %err, "local server stopped");
            }
        });

        for dep in self.deps() {
            let pool = Arc::new(ClientPool::new(dep.clone()));
            self.write_pools().insert(dep.clone(), Arc::clone(&pool));
            let container = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = container.connect_to_service(pool).await {
                    error!(service = %dep, error = %err, "connect to service failed");
                }
            });
        }

        let registration = server.registration();
        if registration.is_public() {
            if let Err(err) = naming.register(registration).await {
                error!(error = %err, "register failed");
            }
        }
        Ok(())
    }

    /// Serve `/health` and `/metrics` on `listen` until shutdown.
    ///
    /// Only the first call binds; later calls return the bound address.
    pub async fn enable_monitor(self: &Arc<Self>, listen: &str) -> Result<SocketAddr> {
        let addr = self
            .monitor
            .get_or_try_init(|| monitor::serve(Arc::downgrade(self), listen, self.quit.clone()))
            .await?;
        Ok(*addr)
    }

    /// Ask a running [`start`](Container::start) to shut down.
    pub fn trigger_shutdown(&self) {
        self.quit.fire();
    }

    /// Forward `packet` to one instance of `service_name`.
    pub async fn forward(&self, service_name: &str, packet: LogicPkt) -> Result<()> {
        if packet.header.command.is_empty() {
            return Err(MeshError::InvalidPacket("command is empty in packet".into()));
        }
        if packet.header.channel_id.is_empty() {
            return Err(MeshError::InvalidPacket("channel id is empty in packet".into()));
        }
        self.forward_with_selector(service_name, packet, self.selector.as_ref())
            .await
    }

    /// Forward `packet` to the instance of `service_name` chosen by
    /// `selector`, tagged with this process as `dest.server`.
    pub async fn forward_with_selector(
        &self,
        service_name: &str,
        mut packet: LogicPkt,
        selector: &dyn Selector,
    ) -> Result<()> {
        let target = self.lookup(service_name, &packet.header, selector)?;
        packet.add_meta(META_DEST_SERVER, self.service_id()?);
        debug!(
            target = %target.id(),
            header = %packet.header,
            "forward message"
        );
        target.client().send(packet.marshal()?).await?;
        self.stats.forwarded();
        Ok(())
    }

    /// Push `packet` to `channels` behind `gateway`, as one message.
    ///
    /// The gateway link is shared by every user behind it, so this waits for
    /// room in its queue instead of dropping the packet.
    pub async fn push(
        &self,
        gateway: &str,
        channels: &[String],
        mut packet: LogicPkt,
    ) -> Result<()> {
        packet.add_meta(META_DEST_SERVER, gateway);
        packet.add_meta(META_DEST_CHANNELS, channels.join(","));
        let server = self.server()?;
        server.send(gateway, packet.marshal()?).await?;
        self.stats.pushed();
        Ok(())
    }

    /// Deliver a packet that arrived from the mesh to the local channels
    /// named in its `dest.channels`. Each channel is pushed independently.
    pub fn push_message(&self, mut packet: LogicPkt) -> Result<()> {
        let server = self.server()?;
        let own = server.service_id();
        let dest = packet.get_meta(META_DEST_SERVER).unwrap_or_default();
        if dest != own {
            return Err(MeshError::WrongDestination {
                expected: own.to_string(),
                actual: dest.to_string(),
            });
        }
        let channels = packet
            .del_meta(META_DEST_CHANNELS)
            .ok_or(MeshError::MissingDestChannels)?;
        packet.del_meta(META_DEST_SERVER);
        let payload = packet.marshal()?;
        debug!(channels = %channels, header = %packet.header, "push to channels");

        for channel in channels.split(',').filter(|id| !id.is_empty()) {
            match server.push(channel, payload.clone()) {
                Ok(()) => self.stats.pushed(),
                Err(err) => {
                    self.stats.push_failed();
                    debug!(channel = %channel, error = %err, "push failed");
                }
            }
        }
        Ok(())
    }

    /// Stop the local server, leave discovery and drop every outbound client.
    pub async fn shutdown(&self) -> Result<()> {
        if let Err(err) = self.state.compare_exchange(
            STATE_STARTED,
            STATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            return Err(match err {
                STATE_CLOSED => MeshError::AlreadyClosed,
                _ => MeshError::NotStarted,
            });
        }
        self.quit.fire();
        let server = self.server()?;
        let grace = self.config.shutdown_grace;

        match tokio::time::timeout(grace, server.shutdown(grace)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "server shutdown failed"),
            Err(_) => warn!(grace = ?grace, "server shutdown exceeded grace period"),
        }
        if let Some(naming) = &self.naming {
            if let Err(err) = naming.deregister(server.service_id()).await {
                warn!(error = %err, "deregister failed");
            }
            for dep in self.deps() {
                if let Err(err) = naming.unsubscribe(&dep).await {
                    warn!(service = %dep, error = %err, "unsubscribe failed");
                }
            }
        }
        let pools: Vec<_> = self.read_pools().values().cloned().collect();
        for pool in pools {
            for client in pool.all() {
                client.client().close().await;
            }
        }
        info!("shutdown");
        Ok(())
    }

    pub fn service_id(&self) -> Result<&str> {
        self.server
            .get()
            .map(|server| server.service_id())
            .ok_or(MeshError::NotInitialized)
    }

    pub fn pool(&self, service_name: &str) -> Option<Arc<ClientPool>> {
        self.read_pools().get(service_name).cloned()
    }

    pub fn config(&self) -> &ContainerConfig {
        &self.config
    }

    /// Every dependency pool, ordered by service name.
    pub fn pools(&self) -> Vec<Arc<ClientPool>> {
        let mut pools: Vec<_> = self.read_pools().values().cloned().collect();
        pools.sort_by(|a, b| a.name().cmp(b.name()));
        pools
    }

    pub(crate) fn stats(&self) -> &MeshStats {
        &self.stats
    }

    fn lookup(
        &self,
        service_name: &str,
        header: &Header,
        selector: &dyn Selector,
    ) -> Result<Arc<PooledClient>> {
        let pool = self
            .pool(service_name)
            .ok_or_else(|| MeshError::ServiceNotFound(service_name.to_string()))?;
        let services = pool.adult_services();
        let id = selector
            .lookup(header, &services)
            .ok_or_else(|| MeshError::NoServiceFound(service_name.to_string()))?;
        pool.get(&id).ok_or(MeshError::ClientNotFound(id))
    }

    async fn connect_to_service(self: Arc<Self>, pool: Arc<ClientPool>) -> Result<()> {
        let naming = self.naming()?;
        let name = pool.name().to_string();

        let runtime = tokio::runtime::Handle::current();
        let weak = Arc::downgrade(&self);
        let watched = Arc::clone(&pool);
        let callback: ServiceCallback = Arc::new(move |services: Vec<ServiceRegistration>| {
            let Some(container) = weak.upgrade() else {
                return;
            };
            for service in services {
                if watched.contains(&service.id) {
                    continue;
                }
                info!(service = %service, "watch a new service");
                let ready_at = Instant::now() + container.config.warmup;
                let container = Arc::clone(&container);
                let pool = Arc::clone(&watched);
                runtime.spawn(async move {
                    if let Err(err) = container.build_client(&pool, service, ready_at).await {
                        warn!(error = %err, "build client failed");
                    }
                });
            }
        });
        naming.subscribe(&name, callback).await?;

        let services = naming.find(&name).await?;
        info!(service = %name, instances = services.len(), "find service");
        for service in services {
            if let Err(err) = self.build_client(&pool, service, Instant::now()).await {
                warn!(error = %err, "build client failed");
            }
        }
        Ok(())
    }

    /// Connect to `service` and add it to `pool` unless it is already there.
    ///
    /// An existing entry is only promoted to `ready_at` if that is earlier.
    pub(crate) async fn build_client(
        self: &Arc<Self>,
        pool: &Arc<ClientPool>,
        service: ServiceRegistration,
        ready_at: Instant,
    ) -> Result<Option<Arc<PooledClient>>> {
        let _guard = self.build_lock.lock().await;
        if let Some(existing) = pool.get(&service.id) {
            existing.promote(ready_at);
            return Ok(None);
        }
        if service.protocol != PROTOCOL_TCP {
            return Err(MeshError::UnsupportedProtocol(service.protocol));
        }
        let dialer = self.dialer.clone().ok_or(MeshError::DialerNotConfigured)?;

        let client = Client::new(
            service.id.clone(),
            service.name.clone(),
            dialer,
            self.config.client.clone(),
        )
        .with_meta(service.meta.clone());
        client.connect(&service.dial_url()).await?;

        let pooled = Arc::new(PooledClient::new(client, service, ready_at));
        pool.add(Arc::clone(&pooled));

        let container = Arc::clone(self);
        let owner = Arc::clone(pool);
        let reading = Arc::clone(&pooled);
        tokio::spawn(async move {
            if let Err(err) = container.read_loop(&reading).await {
                debug!(id = %reading.id(), error = %err, "client read loop ended");
            }
            owner.remove(reading.id());
            reading.client().close().await;
        });
        Ok(Some(pooled))
    }

    async fn read_loop(&self, pooled: &PooledClient) -> std::result::Result<(), TransportError> {
        let client = pooled.client();
        info!(id = %client.id(), name = %client.name(), "read loop started");
        loop {
            let frame = client.read().await?;
            if frame.opcode != OpCode::Binary {
                continue;
            }
            let packet = match LogicPkt::decode(&frame.payload) {
                Ok(packet) => packet,
                Err(err) => {
                    info!(id = %client.id(), error = %err, "undecodable packet");
                    continue;
                }
            };
            if let Err(err) = self.push_message(packet) {
                info!(id = %client.id(), error = %err, "push message failed");
            }
        }
    }

    fn transition(&self, from: u8, to: u8) -> Result<()> {
        self.state
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|current| match current {
                STATE_UNINITIALIZED => MeshError::NotInitialized,
                STATE_INITIALIZED => MeshError::AlreadyInitialized,
                STATE_STARTED => MeshError::AlreadyStarted,
                _ => MeshError::AlreadyClosed,
            })
    }

    fn naming(&self) -> Result<Arc<dyn Naming>> {
        self.naming.clone().ok_or(MeshError::NamingNotConfigured)
    }

    fn server(&self) -> Result<Arc<dyn Server>> {
        self.server.get().cloned().ok_or(MeshError::NotInitialized)
    }

    fn deps(&self) -> Vec<String> {
        self.deps
            .get()
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn read_pools(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Arc<ClientPool>>> {
        self.pools.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_pools(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Arc<ClientPool>>> {
        self.pools.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut term, mut hup, mut quit) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
        signal(SignalKind::quit()),
    ) {
        (Ok(term), Ok(hup), Ok(quit)) => (term, hup, quit),
        _ => {
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
        _ = hup.recv() => "SIGHUP",
        _ = quit.recv() => "SIGQUIT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}
