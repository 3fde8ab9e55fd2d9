//! Peers: remote devices reachable over the radio transport.

use std::fmt;

/// A remote device discovered over the radio.
///
/// Peers are produced by transport implementations as they scan; the
/// engines never construct one themselves. Identity is the radio-level
/// address; the display name is informational and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Peer {
    address: String,
    name: String,
}

impl Peer {
    /// Create a peer handle. Intended for transport implementations.
    pub fn new(address: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            name: name.into(),
        }
    }

    /// Radio-level address (MAC or equivalent), the stable identity.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Human-readable display name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.address)
        } else {
            write!(f, "{} ({})", self.name, self.address)
        }
    }
}
