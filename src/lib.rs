//! Transport-agnostic service discovery and de-duplicated connection
//! establishment for short-range radio links.
//!
//! A [`Transport`] implementation wraps one radio technology (Bluetooth
//! SDP, Wi-Fi Direct DNS-SD). On top of it, a [`DiscoveryEngine`] drives
//! the scan cycle and collapses the radio's repeating callbacks into
//! at-most-once discovery events per scan generation, and a
//! [`ConnectionEngine`] turns those events into at most one live
//! connection per (peer, service) pair, whichever side dialed.
//!
//! Services are identified by a [`ServiceId`] derived deterministically
//! from the service description, so two devices that never exchanged
//! state agree on what they are looking for.

#![deny(missing_docs)]

pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod peer;
pub mod service;
pub mod transport;

pub use config::EngineConfig;
pub use connection::{Connection, ConnectionEngine, ConnectionManager, Role, ServiceClient, ServiceServer};
pub use discovery::{
    BatchQueryStrategy, DiscoveryEngine, DiscoveryListener, DiscoveryStrategy,
    IncrementalQueryStrategy,
};
pub use error::{Error, Result};
pub use peer::Peer;
pub use service::{ServiceDescription, ServiceId};
pub use transport::{AdvertisedService, ByteStream, ScanEvent, Transport};
