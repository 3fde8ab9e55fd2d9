//! Scriptable in-memory transport for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use nearlink::{
    AdvertisedService, ByteStream, Error, Peer, Result, ScanEvent, ServiceDescription, ServiceId,
    Transport,
};

/// Shared view into a [`MockStream`]'s state.
#[derive(Clone)]
pub struct StreamProbe {
    open: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl StreamProbe {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Simulate the remote end dying.
    pub fn kill(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

pub struct MockStream {
    open: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

impl MockStream {
    pub fn new() -> (Box<dyn ByteStream>, StreamProbe) {
        let open = Arc::new(AtomicBool::new(true));
        let closes = Arc::new(AtomicUsize::new(0));
        let probe = StreamProbe {
            open: Arc::clone(&open),
            closes: Arc::clone(&closes),
        };
        (Box::new(Self { open, closes }), probe)
    }
}

#[async_trait]
impl ByteStream for MockStream {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn send(&self, _data: &[u8]) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::transport("stream closed"))
        }
    }

    async fn recv(&self, _buf: &mut [u8]) -> Result<usize> {
        Ok(0)
    }
}

type AcceptItem = Result<(Peer, Box<dyn ByteStream>)>;

struct AcceptQueue {
    tx: mpsc::UnboundedSender<AcceptItem>,
    // shared so a cancelled accept call does not swallow the receiver
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<AcceptItem>>>,
}

impl AcceptQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Arc::new(tokio::sync::Mutex::new(rx)),
        }
    }
}

/// A transport whose radio the test scripts: peers are "discovered" by
/// [`emit_peer`], advertised services per peer are set up front, outbound
/// connects can be delayed or made to fail, and inbound connections are
/// pushed into per-service accept queues.
///
/// [`emit_peer`]: MockTransport::emit_peer
pub struct MockTransport {
    available: AtomicBool,
    scan_tx: mpsc::UnboundedSender<ScanEvent>,
    pub scanning: AtomicBool,
    pub scan_starts: AtomicUsize,
    pub connects: AtomicUsize,
    services: Mutex<HashMap<String, Vec<AdvertisedService>>>,
    query_counts: Mutex<HashMap<String, usize>>,
    connect_delay: Mutex<Duration>,
    advertise_delay: Mutex<Duration>,
    failing_advertises: AtomicBool,
    failing_connects: Mutex<Vec<String>>,
    client_streams: Mutex<Vec<StreamProbe>>,
    accept_queues: Mutex<HashMap<ServiceId, AcceptQueue>>,
    pub advertised: Mutex<Vec<ServiceId>>,
    pub unadvertised: Mutex<Vec<ServiceId>>,
}

impl MockTransport {
    /// Build a transport plus the scan-event receiver its discovery
    /// engine consumes.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ScanEvent>) {
        let (scan_tx, scan_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            available: AtomicBool::new(true),
            scan_tx,
            scanning: AtomicBool::new(false),
            scan_starts: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            services: Mutex::new(HashMap::new()),
            query_counts: Mutex::new(HashMap::new()),
            connect_delay: Mutex::new(Duration::ZERO),
            advertise_delay: Mutex::new(Duration::ZERO),
            failing_advertises: AtomicBool::new(false),
            failing_connects: Mutex::new(Vec::new()),
            client_streams: Mutex::new(Vec::new()),
            accept_queues: Mutex::new(HashMap::new()),
            advertised: Mutex::new(Vec::new()),
            unadvertised: Mutex::new(Vec::new()),
        });
        (transport, scan_rx)
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Script the identifiers a peer answers service queries with.
    pub fn set_services(&self, address: &str, identifiers: Vec<ServiceId>) {
        self.services.lock().unwrap().insert(
            address.to_string(),
            identifiers
                .into_iter()
                .map(AdvertisedService::from_identifier)
                .collect(),
        );
    }

    pub fn emit_peer(&self, peer: Peer) {
        let _ = self.scan_tx.send(ScanEvent::PeerDiscovered(peer));
    }

    pub fn emit_scan_finished(&self) {
        let _ = self.scan_tx.send(ScanEvent::ScanFinished);
    }

    pub fn query_count(&self, address: &str) -> usize {
        self.query_counts
            .lock()
            .unwrap()
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    pub fn set_advertise_delay(&self, delay: Duration) {
        *self.advertise_delay.lock().unwrap() = delay;
    }

    pub fn fail_advertises(&self, fail: bool) {
        self.failing_advertises.store(fail, Ordering::SeqCst);
    }

    pub fn fail_connects_to(&self, address: &str) {
        self.failing_connects
            .lock()
            .unwrap()
            .push(address.to_string());
    }

    /// Probes for every stream handed out by [`Transport::connect`], in
    /// order.
    pub fn client_streams(&self) -> Vec<StreamProbe> {
        self.client_streams.lock().unwrap().clone()
    }

    /// Queue one inbound connection (or accept failure) for a service.
    pub fn push_inbound(&self, identifier: ServiceId, item: AcceptItem) {
        let mut queues = self.accept_queues.lock().unwrap();
        let queue = queues.entry(identifier).or_insert_with(AcceptQueue::new);
        let _ = queue.tx.send(item);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn start_scan(&self) -> Result<()> {
        self.scanning.store(true, Ordering::SeqCst);
        self.scan_starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<()> {
        self.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn query_services(&self, peer: &Peer) -> Result<Vec<AdvertisedService>> {
        *self
            .query_counts
            .lock()
            .unwrap()
            .entry(peer.address().to_string())
            .or_insert(0) += 1;
        Ok(self
            .services
            .lock()
            .unwrap()
            .get(peer.address())
            .cloned()
            .unwrap_or_default())
    }

    async fn advertise(
        &self,
        description: &ServiceDescription,
        _discoverable_for: Duration,
    ) -> Result<()> {
        let delay = *self.advertise_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_advertises.load(Ordering::SeqCst) {
            return Err(Error::transport("advertisement rejected"));
        }
        self.advertised.lock().unwrap().push(description.identifier());
        Ok(())
    }

    async fn unadvertise(&self, description: &ServiceDescription) -> Result<()> {
        self.unadvertised
            .lock()
            .unwrap()
            .push(description.identifier());
        Ok(())
    }

    async fn connect(&self, peer: &Peer, _identifier: ServiceId) -> Result<Box<dyn ByteStream>> {
        let delay = *self.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_connects
            .lock()
            .unwrap()
            .contains(&peer.address().to_string());
        if failing {
            return Err(Error::connect(format!("{} refused", peer.address())));
        }
        let (stream, probe) = MockStream::new();
        self.client_streams.lock().unwrap().push(probe);
        Ok(stream)
    }

    async fn accept(&self, identifier: ServiceId) -> Result<(Peer, Box<dyn ByteStream>)> {
        let rx = {
            let mut queues = self.accept_queues.lock().unwrap();
            let queue = queues.entry(identifier).or_insert_with(AcceptQueue::new);
            Arc::clone(&queue.rx)
        };
        let mut rx = rx.lock().await;
        match rx.recv().await {
            Some(item) => item,
            None => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

/// Let spawned engine tasks run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
