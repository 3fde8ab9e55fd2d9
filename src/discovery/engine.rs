//! Discovery engine: drives the transport scan cycle and collapses the
//! repeating, unordered radio callbacks into at-most-once discovery events
//! per generation.
//!
//! A generation begins at every scan or refresh start and ends at the
//! next one. Within a generation each (peer, identifier) pair is reported
//! to listeners at most once, in discovery order, no matter how often the
//! transport re-delivers it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::peer::Peer;
use crate::service::{ServiceDescription, ServiceId};
use crate::transport::{AdvertisedService, ScanEvent, Transport};

use super::strategy::DiscoveryStrategy;

/// Callbacks for discovery events.
///
/// Invoked from the engine's driver task, never while an engine lock is
/// held, so implementations may call back into the engine.
pub trait DiscoveryListener: Send + Sync + 'static {
    /// A peer came into radio range.
    fn on_peer_discovered(&self, peer: &Peer);

    /// A registered service (or, with notify-all enabled, any service) was
    /// resolved on a peer.
    fn on_service_discovered(&self, peer: &Peer, description: &ServiceDescription);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Scanning,
    Querying,
    Refreshing,
}

struct Registration {
    description: ServiceDescription,
    listener: Arc<dyn DiscoveryListener>,
}

struct State {
    running: bool,
    phase: Phase,
    /// Registration order matters: identifier matching ties are broken by
    /// whoever registered first.
    registrations: Vec<Registration>,
    peers: Vec<Peer>,
    /// Identifiers most recently resolved per peer address this
    /// generation; replayed to late registrations.
    peer_services: HashMap<String, Vec<ServiceId>>,
    /// (peer address, canonical identifier) pairs already reported this
    /// generation.
    reported: HashSet<(String, ServiceId)>,
    /// Peers already queried this generation (incremental strategy).
    queried: HashSet<String>,
    refresh_deadline: Option<Instant>,
    notify_all: bool,
    check_reversed: bool,
}

impl State {
    fn refresh_active(&self) -> bool {
        self.refresh_deadline
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }
}

struct Inner<T: Transport> {
    transport: Arc<T>,
    strategy: Box<dyn DiscoveryStrategy>,
    refresh_budget: std::time::Duration,
    state: Mutex<State>,
}

/// Tracks the services being searched for, drives the transport's
/// scan/refresh cycle, and emits deduplicated discovery events.
///
/// Engines are plain caller-owned values; several isolated instances can
/// coexist (one per transport, or several in tests).
pub struct DiscoveryEngine<T: Transport> {
    inner: Arc<Inner<T>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<ScanEvent>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> DiscoveryEngine<T> {
    /// Create an engine over `transport`, consuming scan events from
    /// `events` (the matching sender belongs to the transport).
    pub fn new(
        transport: Arc<T>,
        events: mpsc::UnboundedReceiver<ScanEvent>,
        strategy: impl DiscoveryStrategy,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                strategy: Box::new(strategy),
                refresh_budget: config.refresh_budget,
                state: Mutex::new(State {
                    running: false,
                    phase: Phase::Idle,
                    registrations: Vec::new(),
                    peers: Vec::new(),
                    peer_services: HashMap::new(),
                    reported: HashSet::new(),
                    queried: HashSet::new(),
                    refresh_deadline: None,
                    notify_all: config.notify_about_all_services,
                    check_reversed: config.check_little_endian_identifiers,
                }),
            }),
            events: Mutex::new(Some(events)),
            driver: Mutex::new(None),
        }
    }

    /// Start the engine. Fails without side effects when the radio is
    /// unavailable; every operation is then a logged no-op until a
    /// successful restart. Must be called within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        if !self.inner.transport.is_available() {
            warn!("radio unavailable, discovery engine stays inert");
            return Err(Error::unavailable("no radio adapter"));
        }
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.running {
                debug!("discovery engine already running");
                return Ok(());
            }
            state.running = true;
        }
        if let Some(rx) = self.events.lock().unwrap().take() {
            let inner = Arc::clone(&self.inner);
            let handle = tokio::spawn(async move {
                Inner::drive(inner, rx).await;
            });
            *self.driver.lock().unwrap() = Some(handle);
        }
        debug!(strategy = self.inner.strategy.name(), "discovery engine started");
        Ok(())
    }

    /// Whether the engine has been started and not stopped since.
    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }

    /// Stop the engine: clears all registrations and caches and stops the
    /// underlying scan. The engine can be started again afterwards.
    pub async fn stop(&self) {
        let was_running = {
            let mut state = self.inner.state.lock().unwrap();
            let was_running = state.running;
            state.running = false;
            state.phase = Phase::Idle;
            state.registrations.clear();
            state.peers.clear();
            state.peer_services.clear();
            state.reported.clear();
            state.queried.clear();
            state.refresh_deadline = None;
            was_running
        };
        if was_running {
            if let Err(e) = self.inner.transport.stop_scan().await {
                debug!(error = %e, "stop_scan during engine stop failed");
            }
        }
    }

    /// Register a service to be searched for.
    ///
    /// Idempotent while a registration for the same description is active.
    /// If the service was already resolved on a peer earlier in the
    /// current generation, that discovery is replayed to `listener`
    /// immediately, so a late registration does not wait for the next
    /// scan pass.
    pub fn start_discovery_for_service(
        &self,
        description: ServiceDescription,
        listener: Arc<dyn DiscoveryListener>,
    ) -> Result<()> {
        let replay: Vec<Peer> = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!(service = %description, "engine not running, discovery not registered");
                return Err(Error::NotRunning);
            }
            if state
                .registrations
                .iter()
                .any(|r| r.description == description)
            {
                debug!(service = %description, "service already registered, ignoring");
                return Ok(());
            }
            debug!(service = %description, "registering service for discovery");
            state.registrations.push(Registration {
                description: description.clone(),
                listener: Arc::clone(&listener),
            });

            let check_reversed = state.check_reversed;
            let mut replay = Vec::new();
            for (address, identifiers) in &state.peer_services {
                let hit = identifiers
                    .iter()
                    .any(|id| description.identifier().matches(id, check_reversed));
                if !hit {
                    continue;
                }
                let key = (address.clone(), description.identifier());
                if state.reported.contains(&key) {
                    continue;
                }
                if let Some(peer) = state.peers.iter().find(|p| p.address() == *address) {
                    replay.push((peer.clone(), key));
                }
            }
            let mut peers = Vec::with_capacity(replay.len());
            for (peer, key) in replay {
                state.reported.insert(key);
                peers.push(peer);
            }
            peers
        };
        for peer in replay {
            debug!(peer = %peer, service = %description, "replaying cached discovery");
            listener.on_service_discovered(&peer, &description);
        }
        Ok(())
    }

    /// Remove the registration for a service.
    ///
    /// When the last registration goes away the underlying scan is stopped
    /// to spare the radio, unless notify-all keeps it useful.
    pub async fn stop_discovery_for_service(&self, description: &ServiceDescription) {
        let stop_scan = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!(service = %description, "engine not running, nothing to stop");
                return;
            }
            state.registrations.retain(|r| r.description != *description);
            let stop = state.registrations.is_empty()
                && !state.notify_all
                && state.phase != Phase::Idle;
            if stop {
                state.phase = Phase::Idle;
            }
            stop
        };
        debug!(service = %description, "service removed from discovery");
        if stop_scan {
            debug!("last registration removed, stopping peer scan");
            if let Err(e) = self.inner.transport.stop_scan().await {
                debug!(error = %e, "stop_scan failed");
            }
        }
    }

    /// Start (or restart) the peer scan.
    ///
    /// A restart begins a new generation: the seen-peer and dedup caches
    /// are invalidated, so every peer in range is re-evaluated, including
    /// ones that silently dropped a service since they were last queried.
    pub async fn start_peer_scan(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!("engine not running, peer scan not started");
                return Err(Error::NotRunning);
            }
            state.peers.clear();
            state.peer_services.clear();
            state.reported.clear();
            state.queried.clear();
            state.refresh_deadline = None;
            state.phase = Phase::Scanning;
        }
        debug!("starting peer scan");
        self.inner.transport.start_scan().await
    }

    /// Stop the peer scan without touching registrations.
    pub async fn stop_peer_scan(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!("engine not running, peer scan not stopped");
                return Err(Error::NotRunning);
            }
            state.phase = Phase::Idle;
        }
        self.inner.transport.stop_scan().await
    }

    /// Re-query every known peer for services without a full peer scan.
    ///
    /// Cheaper than a scan when a peer is suspected to have started
    /// advertising after it was first seen. Refresh and peer scan are
    /// mutually exclusive: starting a refresh cancels the scan, and the
    /// engine returns to idle once the refresh budget elapses.
    pub async fn refresh(&self) -> Result<()> {
        let peers: Vec<Peer> = {
            let mut state = self.inner.state.lock().unwrap();
            if !state.running {
                warn!("engine not running, refresh skipped");
                return Err(Error::NotRunning);
            }
            // a refresh begins a new generation
            state.reported.clear();
            state.queried.clear();
            state.phase = Phase::Refreshing;
            state.refresh_deadline = Some(Instant::now() + self.inner.refresh_budget);
            state.peers.clone()
        };
        debug!(peers = peers.len(), "refreshing nearby services");
        if let Err(e) = self.inner.transport.stop_scan().await {
            debug!(error = %e, "stop_scan before refresh failed");
        }
        for peer in &peers {
            self.inner.query_peer(peer).await;
        }
        // return to idle once the budget elapses
        let inner = Arc::clone(&self.inner);
        let budget = self.inner.refresh_budget;
        tokio::spawn(async move {
            tokio::time::sleep(budget).await;
            let mut state = inner.state.lock().unwrap();
            if state.phase == Phase::Refreshing && !state.refresh_active() {
                state.phase = Phase::Idle;
                state.refresh_deadline = None;
            }
        });
        Ok(())
    }

    /// Toggle reporting of every discovered service instead of only the
    /// registered ones. Unregistered services are delivered with an
    /// identifier-only description.
    pub fn notify_about_all_services(&self, all: bool) {
        debug!(all, "notify about all services");
        self.inner.state.lock().unwrap().notify_all = all;
    }

    /// Toggle the little-endian identifier workaround at runtime.
    pub fn set_check_little_endian_identifiers(&self, check: bool) {
        self.inner.state.lock().unwrap().check_reversed = check;
    }
}

impl<T: Transport> Drop for DiscoveryEngine<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.lock().unwrap().take() {
            handle.abort();
        }
    }
}

impl<T: Transport> Inner<T> {
    async fn drive(inner: Arc<Self>, events: mpsc::UnboundedReceiver<ScanEvent>) {
        let mut events = UnboundedReceiverStream::new(events);
        while let Some(event) = events.next().await {
            match event {
                ScanEvent::PeerDiscovered(peer) => inner.handle_peer(peer).await,
                ScanEvent::ScanFinished => inner.handle_scan_finished().await,
            }
        }
        debug!("scan event channel closed, discovery driver ending");
    }

    async fn handle_peer(self: &Arc<Self>, peer: Peer) {
        let (listeners, should_query) = {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return;
            }
            let is_new = !state.peers.iter().any(|p| p.address() == peer.address());
            if is_new {
                debug!(peer = %peer, "peer discovered");
                state.peers.push(peer.clone());
            }
            let listeners: Vec<Arc<dyn DiscoveryListener>> = if is_new {
                state
                    .registrations
                    .iter()
                    .map(|r| Arc::clone(&r.listener))
                    .collect()
            } else {
                Vec::new()
            };
            let should_query = self.strategy.query_on_sight()
                && state.phase != Phase::Refreshing
                && !state.queried.contains(peer.address());
            if should_query {
                state.queried.insert(peer.address().to_string());
                state.phase = Phase::Querying;
            }
            (listeners, should_query)
        };

        for listener in listeners {
            listener.on_peer_discovered(&peer);
        }

        if should_query {
            // pause the scan while this peer is queried
            if let Err(e) = self.transport.stop_scan().await {
                debug!(error = %e, "could not pause scan for query");
            }
            self.query_peer(&peer).await;
            self.resume_after_query().await;
        }
    }

    async fn handle_scan_finished(self: &Arc<Self>) {
        let to_query: Vec<Peer> = {
            let mut state = self.state.lock().unwrap();
            if !state.running || state.phase != Phase::Scanning {
                return;
            }
            state.phase = Phase::Querying;
            let pending: Vec<Peer> = state
                .peers
                .iter()
                .filter(|p| !state.queried.contains(p.address()))
                .cloned()
                .collect();
            for peer in &pending {
                state.queried.insert(peer.address().to_string());
            }
            pending
        };
        debug!(peers = to_query.len(), "scan finished, querying services");
        for peer in &to_query {
            self.query_peer(peer).await;
        }
        self.resume_after_query().await;
    }

    async fn query_peer(self: &Arc<Self>, peer: &Peer) {
        match self.transport.query_services(peer).await {
            Ok(services) => self.process_query_result(peer, services),
            Err(e) => warn!(peer = %peer, error = %e, "service query failed"),
        }
    }

    /// Match resolved identifiers against the registrations and collect
    /// the not-yet-reported ones. Listener callbacks fire after the lock
    /// is released.
    fn process_query_result(&self, peer: &Peer, services: Vec<AdvertisedService>) {
        let mut notifications: Vec<(Arc<dyn DiscoveryListener>, ServiceDescription)> = Vec::new();
        {
            let mut state = self.state.lock().unwrap();
            if !state.running {
                return;
            }
            let identifiers: Vec<ServiceId> = services.iter().map(|s| s.identifier).collect();
            state
                .peer_services
                .insert(peer.address().to_string(), identifiers);

            let State {
                registrations,
                reported,
                notify_all,
                check_reversed,
                ..
            } = &mut *state;

            for service in &services {
                // first matching registration wins, in registration order
                let hit = registrations.iter().find(|reg| {
                    reg.description
                        .identifier()
                        .matches(&service.identifier, *check_reversed)
                });
                match hit {
                    Some(reg) => {
                        let key = (peer.address().to_string(), reg.description.identifier());
                        if reported.insert(key) {
                            notifications
                                .push((Arc::clone(&reg.listener), reg.description.clone()));
                        }
                    }
                    None if *notify_all => {
                        let key = (peer.address().to_string(), service.identifier);
                        if reported.insert(key) {
                            let placeholder =
                                ServiceDescription::from_identifier(service.identifier);
                            for reg in registrations.iter() {
                                notifications
                                    .push((Arc::clone(&reg.listener), placeholder.clone()));
                            }
                        }
                    }
                    None => {}
                }
            }
        }
        for (listener, description) in notifications {
            debug!(peer = %peer, service = %description, "service discovered");
            listener.on_service_discovered(peer, &description);
        }
    }

    async fn resume_after_query(self: &Arc<Self>) {
        let resume = {
            let mut state = self.state.lock().unwrap();
            if !state.running || state.phase != Phase::Querying || state.refresh_active() {
                return;
            }
            state.phase = Phase::Scanning;
            self.strategy.resume_scan_after_query()
        };
        if resume {
            if let Err(e) = self.transport.start_scan().await {
                warn!(error = %e, "could not resume scan after query");
            }
        }
    }
}
