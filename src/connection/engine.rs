//! Connection engine: turns discovery events into at-most-one live
//! connection per (peer, service), running connector tasks for the client
//! side and accept loops for the server side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::discovery::{DiscoveryEngine, DiscoveryListener};
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::service::{ServiceDescription, ServiceId};
use crate::transport::Transport;

use super::manager::ConnectionManager;
use super::stream::{Connection, Role};

/// Client-side callbacks for one service looked for over the network.
///
/// All callbacks run on engine tasks and must not block; hand heavy work
/// to your own tasks. `on_connected` receives connections that already won
/// the dedup race and are registered.
pub trait ServiceClient: Send + Sync + 'static {
    /// A peer came into radio range.
    fn on_peer_discovered(&self, _peer: &Peer) {}

    /// The service was resolved on a peer. Informational; whether a
    /// connection is attempted is decided by [`should_connect_to`].
    ///
    /// [`should_connect_to`]: ServiceClient::should_connect_to
    fn on_service_discovered(&self, _peer: &Peer, _description: &ServiceDescription) {}

    /// Whether to dial this peer for this service.
    fn should_connect_to(&self, peer: &Peer, description: &ServiceDescription) -> bool;

    /// An outbound connection was established and registered.
    fn on_connected(&self, connection: Arc<Connection>);

    /// An outbound connection attempt failed. Not called for attempts
    /// that lost the dedup race; those are not failures.
    fn on_connection_failed(&self, _peer: &Peer, _description: &ServiceDescription, _error: &Error) {
    }
}

/// Server-side callback for one advertised service.
pub trait ServiceServer: Send + Sync + 'static {
    /// An inbound connection was accepted and registered.
    fn on_client_connected(&self, connection: Arc<Connection>);
}

struct ConnectorHandle {
    id: u64,
    service: ServiceId,
    handle: JoinHandle<()>,
}

struct AcceptorHandle {
    description: ServiceDescription,
    handle: JoinHandle<()>,
}

struct EngineState {
    running: bool,
    clients: HashMap<ServiceId, Arc<dyn ServiceClient>>,
    connectors: Vec<ConnectorHandle>,
    acceptors: HashMap<ServiceId, AcceptorHandle>,
    next_task_id: u64,
}

struct EngineInner<T: Transport> {
    transport: Arc<T>,
    discovery: Arc<DiscoveryEngine<T>>,
    manager: Arc<ConnectionManager>,
    config: EngineConfig,
    state: Mutex<EngineState>,
}

/// Orchestrates connection establishment on top of a [`DiscoveryEngine`].
///
/// The engine guarantees at most one live connection per (peer, service)
/// pair regardless of which side initiated: every established stream,
/// outbound or inbound, passes through the [`ConnectionManager`]'s atomic
/// register step, and the newcomer loses ties.
pub struct ConnectionEngine<T: Transport> {
    inner: Arc<EngineInner<T>>,
}

impl<T: Transport> ConnectionEngine<T> {
    /// Create an engine over `transport`, driven by `discovery`.
    pub fn new(
        transport: Arc<T>,
        discovery: Arc<DiscoveryEngine<T>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                transport,
                discovery,
                manager: Arc::new(ConnectionManager::new()),
                config,
                state: Mutex::new(EngineState {
                    running: false,
                    clients: HashMap::new(),
                    connectors: Vec::new(),
                    acceptors: HashMap::new(),
                    next_task_id: 0,
                }),
            }),
        }
    }

    /// The registry of live connections.
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.inner.manager
    }

    /// Start the engine and the underlying discovery engine. Fails
    /// without side effects when the radio is unavailable.
    pub fn start(&self) -> Result<()> {
        if !self.inner.transport.is_available() {
            warn!("radio unavailable, connection engine stays inert");
            return Err(Error::unavailable("no radio adapter"));
        }
        self.inner.discovery.start()?;
        self.inner.state.lock().unwrap().running = true;
        debug!("connection engine started");
        Ok(())
    }

    /// Whether the engine has been started and not shut down since.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }

    /// Look for `description` nearby and connect to peers offering it,
    /// subject to `client`'s [`ServiceClient::should_connect_to`].
    ///
    /// Idempotent while a client for the same service is active.
    pub fn start_discovery_for_service(
        &self,
        description: ServiceDescription,
        client: Arc<dyn ServiceClient>,
    ) -> Result<()> {
        let identifier = description.identifier();
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!(service = %description, "engine not running, client not registered");
                return Err(Error::NotRunning);
            }
            if state.clients.contains_key(&identifier) {
                debug!(service = %description, "client already registered, ignoring");
                return Ok(());
            }
            state.clients.insert(identifier, client);
        }
        let bridge = Arc::new(ClientBridge {
            inner: Arc::downgrade(&self.inner),
            service: identifier,
        });
        let registered = self
            .inner
            .discovery
            .start_discovery_for_service(description, bridge);
        if registered.is_err() {
            // discovery refused the registration; a client without one
            // would never see events
            self.inner.state.lock().unwrap().clients.remove(&identifier);
        }
        registered
    }

    /// Stop looking for `description`: the discovery registration is
    /// removed and in-flight connection attempts for it are cancelled.
    /// Established connections stay open.
    pub async fn stop_discovery_for_service(&self, description: &ServiceDescription) {
        let identifier = description.identifier();
        let cancelled: Vec<ConnectorHandle> = {
            let mut state = self.inner.state.lock().unwrap();
            state.clients.remove(&identifier);
            let (cancelled, kept) = state
                .connectors
                .drain(..)
                .partition(|c| c.service == identifier);
            state.connectors = kept;
            cancelled
        };
        debug!(service = %description, cancelled = cancelled.len(), "client discovery stopped");
        for connector in &cancelled {
            connector.handle.abort();
        }
        for connector in cancelled {
            let _ = tokio::time::timeout(self.inner.config.shutdown_wait, connector.handle).await;
        }
        self.inner.discovery.stop_discovery_for_service(description).await;
    }

    /// Advertise `description` and accept inbound connections for it,
    /// delivering each accepted client to `server`.
    ///
    /// Idempotent while the service is advertised. The accept loop
    /// tolerates transient failures; after too many in a row the service
    /// is unadvertised and gives up.
    pub async fn start_service(
        &self,
        description: ServiceDescription,
        server: Arc<dyn ServiceServer>,
    ) -> Result<()> {
        let identifier = description.identifier();
        // the acceptor slot is claimed before the advertise call awaits,
        // so a concurrent start_service for the same description sees it
        // and advertises at most once
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!(service = %description, "engine not running, service not started");
                return Err(Error::NotRunning);
            }
            if state.acceptors.contains_key(&identifier) {
                debug!(service = %description, "service already advertised, ignoring");
                return Ok(());
            }
            let inner = Arc::clone(&self.inner);
            let desc = description.clone();
            let handle = tokio::spawn(async move {
                EngineInner::accept_loop(inner, desc, server).await;
            });
            state.acceptors.insert(
                identifier,
                AcceptorHandle {
                    description: description.clone(),
                    handle,
                },
            );
        }
        if let Err(e) = self
            .inner
            .transport
            .advertise(&description, self.inner.config.discoverable_time)
            .await
        {
            if let Some(acceptor) = self.inner.state.lock().unwrap().acceptors.remove(&identifier)
            {
                acceptor.handle.abort();
            }
            return Err(e);
        }
        debug!(service = %description, "service advertised");
        Ok(())
    }

    /// Stop advertising `description` and cancel its accept loop.
    /// Established connections stay open.
    pub async fn stop_service(&self, description: &ServiceDescription) {
        let acceptor = {
            let mut state = self.inner.state.lock().unwrap();
            state.acceptors.remove(&description.identifier())
        };
        let Some(acceptor) = acceptor else {
            debug!(service = %description, "service not advertised, nothing to stop");
            return;
        };
        acceptor.handle.abort();
        let _ = tokio::time::timeout(self.inner.config.shutdown_wait, acceptor.handle).await;
        if let Err(e) = self.inner.transport.unadvertise(description).await {
            debug!(service = %description, error = %e, "unadvertise failed");
        }
        debug!(service = %description, "service stopped");
    }

    /// Start (or restart) the underlying peer scan.
    pub async fn start_peer_scan(&self) -> Result<()> {
        self.inner.discovery.start_peer_scan().await
    }

    /// Stop the underlying peer scan.
    pub async fn stop_peer_scan(&self) -> Result<()> {
        self.inner.discovery.stop_peer_scan().await
    }

    /// Re-query already known peers for services without a full scan.
    pub async fn refresh_nearby_services(&self) -> Result<()> {
        self.inner.discovery.refresh().await
    }

    /// Toggle the little-endian identifier workaround on the underlying
    /// discovery engine.
    pub fn set_check_little_endian_identifiers(&self, check: bool) {
        self.inner
            .discovery
            .set_check_little_endian_identifiers(check);
    }

    /// Close every connection for `description` that this end dialed.
    pub fn disconnect_from_services(&self, description: &ServiceDescription) {
        self.inner
            .manager
            .close_for_service(description, Some(Role::Client));
    }

    /// Close every connection for `description` that this end accepted.
    pub fn disconnect_clients(&self, description: &ServiceDescription) {
        self.inner
            .manager
            .close_for_service(description, Some(Role::Server));
    }

    /// Tear everything down: cancel connector and acceptor tasks (waiting
    /// a bounded time for each), withdraw advertisements, close every
    /// connection, and stop the discovery engine. The engine can be
    /// started again afterwards.
    pub async fn shutdown(&self) {
        let (connectors, acceptors) = {
            let mut state = self.inner.state.lock().unwrap();
            state.running = false;
            state.clients.clear();
            let connectors: Vec<ConnectorHandle> = state.connectors.drain(..).collect();
            let acceptors: Vec<AcceptorHandle> =
                state.acceptors.drain().map(|(_, a)| a).collect();
            (connectors, acceptors)
        };
        debug!(
            connectors = connectors.len(),
            acceptors = acceptors.len(),
            "shutting down connection engine"
        );
        for connector in &connectors {
            connector.handle.abort();
        }
        for acceptor in &acceptors {
            acceptor.handle.abort();
        }
        for connector in connectors {
            let _ = tokio::time::timeout(self.inner.config.shutdown_wait, connector.handle).await;
        }
        for acceptor in acceptors {
            let _ = tokio::time::timeout(self.inner.config.shutdown_wait, acceptor.handle).await;
            if let Err(e) = self.inner.transport.unadvertise(&acceptor.description).await {
                debug!(service = %acceptor.description, error = %e, "unadvertise failed");
            }
        }
        self.inner.manager.close_all();
        self.inner.discovery.stop().await;
    }
}

impl<T: Transport> EngineInner<T> {
    fn spawn_connector(
        self: &Arc<Self>,
        peer: Peer,
        description: ServiceDescription,
        client: Arc<dyn ServiceClient>,
    ) {
        // id allocation, spawn, and push happen under one lock; the task
        // removes itself at the end, which needs this lock, so the push
        // is always ordered before the removal
        let mut state = self.state.lock().unwrap();
        if !state.running {
            return;
        }
        state.next_task_id += 1;
        let id = state.next_task_id;
        let service = description.identifier();
        let jitter_max = self.config.connect_jitter.as_millis() as u64;
        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            // spread out simultaneous dial attempts
            if jitter_max > 0 {
                let delay = rand::thread_rng().gen_range(0..=jitter_max);
                tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            }
            debug!(peer = %peer, service = %description, "connecting");
            match inner.transport.connect(&peer, description.identifier()).await {
                // no await from here on: cancellation cannot separate the
                // register step from the callback
                Ok(stream) => {
                    let connection =
                        Connection::new(peer.clone(), description.clone(), Role::Client, stream);
                    match inner.manager.register(connection) {
                        Some(connection) => {
                            debug!(peer = %peer, service = %description, "connected as client");
                            client.on_connected(connection);
                        }
                        None => {
                            debug!(peer = %peer, service = %description, "lost dedup race");
                        }
                    }
                }
                Err(e) => {
                    warn!(peer = %peer, service = %description, error = %e, "connect failed");
                    client.on_connection_failed(&peer, &description, &e);
                }
            }
            inner
                .state
                .lock()
                .unwrap()
                .connectors
                .retain(|c| c.id != id);
        });
        state.connectors.push(ConnectorHandle {
            id,
            service,
            handle,
        });
    }

    async fn accept_loop(
        inner: Arc<Self>,
        description: ServiceDescription,
        server: Arc<dyn ServiceServer>,
    ) {
        let identifier = description.identifier();
        let mut consecutive_failures: u32 = 0;
        loop {
            match inner.transport.accept(identifier).await {
                Ok((peer, stream)) => {
                    consecutive_failures = 0;
                    let connection =
                        Connection::new(peer.clone(), description.clone(), Role::Server, stream);
                    match inner.manager.register(connection) {
                        Some(connection) => {
                            debug!(peer = %peer, service = %description, "client connected");
                            server.on_client_connected(connection);
                        }
                        None => {
                            debug!(peer = %peer, service = %description,
                                "inbound connection lost dedup race");
                        }
                    }
                }
                Err(e) => {
                    consecutive_failures += 1;
                    warn!(service = %description, error = %e,
                        failures = consecutive_failures, "accept failed");
                    if consecutive_failures > inner.config.max_acceptor_restarts {
                        break;
                    }
                }
            }
        }
        warn!(service = %description, "accept loop giving up, unadvertising");
        inner.state.lock().unwrap().acceptors.remove(&identifier);
        if let Err(e) = inner.transport.unadvertise(&description).await {
            debug!(service = %description, error = %e, "unadvertise failed");
        }
    }
}

/// Forwards discovery events for one service to its registered client and
/// spawns connector tasks for dial-worthy discoveries.
struct ClientBridge<T: Transport> {
    inner: Weak<EngineInner<T>>,
    service: ServiceId,
}

impl<T: Transport> DiscoveryListener for ClientBridge<T> {
    fn on_peer_discovered(&self, peer: &Peer) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let client = {
            let state = inner.state.lock().unwrap();
            state.clients.get(&self.service).cloned()
        };
        if let Some(client) = client {
            client.on_peer_discovered(peer);
        }
    }

    fn on_service_discovered(&self, peer: &Peer, description: &ServiceDescription) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        let client = {
            let state = inner.state.lock().unwrap();
            if !state.running {
                return;
            }
            state.clients.get(&self.service).cloned()
        };
        let Some(client) = client else {
            return;
        };
        client.on_service_discovered(peer, description);
        // notify-all deliveries for other services are informational only
        if description.identifier() != self.service {
            return;
        }
        if !client.should_connect_to(peer, description) {
            debug!(peer = %peer, service = %description, "client declined connection");
            return;
        }
        if inner
            .manager
            .is_already_connected(peer.address(), description)
        {
            debug!(peer = %peer, service = %description, "already connected, not dialing");
            return;
        }
        inner.spawn_connector(peer.clone(), description.clone(), client);
    }
}
