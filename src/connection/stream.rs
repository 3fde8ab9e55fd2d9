//! An established connection and the side it was opened from.

use std::fmt;

use crate::error::Result;
use crate::peer::Peer;
use crate::service::ServiceDescription;
use crate::transport::ByteStream;

/// Which side of the link this end played during setup.
///
/// Purely informational after establishment; both ends read and write the
/// same way. Connection identity deliberately ignores the role, so one
/// client link and one server link to the same peer for the same service
/// still count as duplicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// This end dialed.
    Client,
    /// This end accepted.
    Server,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

/// An established byte stream to a remote peer for one service.
pub struct Connection {
    peer: Peer,
    description: ServiceDescription,
    role: Role,
    stream: Box<dyn ByteStream>,
}

impl Connection {
    /// Wrap a transport stream with its identifying metadata.
    pub fn new(
        peer: Peer,
        description: ServiceDescription,
        role: Role,
        stream: Box<dyn ByteStream>,
    ) -> Self {
        Self {
            peer,
            description,
            role,
            stream,
        }
    }

    /// The remote peer.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The service this connection belongs to.
    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    /// Which side this end played during setup.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Whether the underlying stream is still usable.
    pub fn is_open(&self) -> bool {
        self.stream.is_open()
    }

    /// Close the underlying stream. Idempotent.
    pub fn close(&self) {
        self.stream.close();
    }

    /// Write the whole buffer to the peer.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.stream.send(data).await
    }

    /// Read from the peer, returning the number of bytes read (0 at EOF).
    pub async fn recv(&self, buf: &mut [u8]) -> Result<usize> {
        self.stream.recv(buf).await
    }

    /// Whether this connection links to `address` for `description`.
    /// Role is not part of connection identity.
    pub fn is_to(&self, address: &str, description: &ServiceDescription) -> bool {
        self.peer.address() == address && self.description == *description
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("service", &self.description.identifier())
            .field("role", &self.role)
            .field("open", &self.is_open())
            .finish()
    }
}
