//! Connection establishment: per-peer dedup, connector and acceptor
//! tasks, and the live-connection registry.

mod engine;
mod manager;
mod stream;

pub use engine::{ConnectionEngine, ServiceClient, ServiceServer};
pub use manager::ConnectionManager;
pub use stream::{Connection, Role};
