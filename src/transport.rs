//! The transport seam: radio scanning, advertisement, and socket setup.
//!
//! One implementation exists per radio technology (Bluetooth SDP and
//! Wi-Fi Direct DNS-SD being the expected two); the engines never learn
//! which one they drive. Transport-internal details such as group-owner
//! election or TCP channel setup stay behind [`Transport::connect`] and
//! [`Transport::accept`].
//!
//! Scan progress is pushed into the engine over a plain [`tokio::sync::mpsc`]
//! channel of [`ScanEvent`]s created by the caller: the sender goes to the
//! transport, the receiver to the discovery engine.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::peer::Peer;
use crate::service::{ServiceDescription, ServiceId};
use crate::Result;

/// Event pushed by a transport while a peer scan is running.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A peer came into radio range. Transports may deliver this
    /// repeatedly for the same peer; the discovery engine deduplicates.
    PeerDiscovered(Peer),
    /// The current scan pass completed, for transports that scan in
    /// bounded passes.
    ScanFinished,
}

/// A service as advertised by a remote peer: the resolved identifier plus
/// whatever raw attribute records the radio protocol exchanged (empty when
/// the protocol only carries identifiers).
#[derive(Debug, Clone)]
pub struct AdvertisedService {
    /// The identifier as received, possibly byte-reversed by the stack.
    pub identifier: ServiceId,
    /// Raw TXT-record-style attributes, when available.
    pub attributes: BTreeMap<String, String>,
}

impl AdvertisedService {
    /// An advertised service known only by its identifier.
    pub fn from_identifier(identifier: ServiceId) -> Self {
        Self {
            identifier,
            attributes: BTreeMap::new(),
        }
    }
}

/// Bidirectional byte stream between two peers.
///
/// Framing is the caller's concern; the engines only need liveness and
/// close. `is_open` and `close` must not block: they are called while
/// registry locks are held. Implementations should close the underlying
/// socket when the stream is dropped, so that a cancelled connect attempt
/// cannot leak a half-open socket.
#[async_trait]
pub trait ByteStream: Send + Sync + 'static {
    /// Liveness probe; false once the underlying socket died.
    fn is_open(&self) -> bool;

    /// Close the underlying socket. Idempotent.
    fn close(&self);

    /// Write the whole buffer.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Read into `buf`, returning the number of bytes read (0 at EOF).
    async fn recv(&self, buf: &mut [u8]) -> Result<usize>;
}

/// Radio transport collaborator.
///
/// All methods that touch the radio may block (in the async sense) and
/// must be cancel-safe: dropping the returned future aborts the operation
/// and closes any partially-open socket.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Whether the radio is present and enabled. Engines refuse to start
    /// when this is false.
    fn is_available(&self) -> bool;

    /// (Re)start the peer scan. Discovered peers arrive as
    /// [`ScanEvent::PeerDiscovered`] on the scan-event channel.
    async fn start_scan(&self) -> Result<()>;

    /// Stop the peer scan.
    async fn stop_scan(&self) -> Result<()>;

    /// Query the services a peer currently advertises.
    async fn query_services(&self, peer: &Peer) -> Result<Vec<AdvertisedService>>;

    /// Begin advertising a service, staying discoverable for roughly
    /// `discoverable_for`.
    async fn advertise(
        &self,
        description: &ServiceDescription,
        discoverable_for: Duration,
    ) -> Result<()>;

    /// Withdraw a service advertisement.
    async fn unadvertise(&self, description: &ServiceDescription) -> Result<()>;

    /// Open an outbound byte stream to `peer` for the service with
    /// `identifier`.
    async fn connect(&self, peer: &Peer, identifier: ServiceId) -> Result<Box<dyn ByteStream>>;

    /// Wait for one inbound connection to the advertised service with
    /// `identifier`.
    async fn accept(&self, identifier: ServiceId) -> Result<(Peer, Box<dyn ByteStream>)>;
}
