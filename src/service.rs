//! Service identity: descriptions and their derived identifiers.
//!
//! A [`ServiceDescription`] names a service and carries its attribute
//! records; the 128-bit [`ServiceId`] derived from them is what actually
//! travels over the radio and what both sides compare. Deriving the
//! identifier from the attributes means two peers that declare the same
//! logical service independently compute the same identifier, without any
//! prior coordination.

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

/// 128-bit service identifier.
///
/// Derived deterministically from a [`ServiceDescription`]'s declared
/// attributes unless one is supplied explicitly. Some radio stacks report
/// identifiers byte-reversed (a known little-endian quirk); [`reversed`]
/// yields that form so matching can accept either.
///
/// [`reversed`]: ServiceId::reversed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Wrap raw identifier bytes.
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Derive an identifier from a service type and its attribute pairs.
    ///
    /// The hash input is the service type followed by every key/value pair
    /// in key order, so the result is stable across processes and
    /// independent of insertion order.
    pub fn derive(service_type: &str, attributes: &BTreeMap<String, String>) -> Self {
        let mut name = String::from(service_type);
        for (key, value) in attributes {
            name.push_str(key);
            name.push_str(value);
        }
        Self(Uuid::new_v3(&Uuid::NAMESPACE_OID, name.as_bytes()))
    }

    /// Raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }

    /// The bytewise-reversed form of this identifier.
    ///
    /// Workaround for radio stacks that deliver 128-bit identifiers in
    /// little-endian order. The problem cannot be detected up front, so
    /// matching checks both forms when the workaround is enabled.
    pub fn reversed(&self) -> Self {
        let mut bytes = *self.0.as_bytes();
        bytes.reverse();
        Self(Uuid::from_bytes(bytes))
    }

    /// Check a received identifier against this one, optionally accepting
    /// its byte-reversed form as equivalent.
    pub fn matches(&self, received: &ServiceId, check_reversed: bool) -> bool {
        self == received || (check_reversed && self.reversed() == *received)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Named, attributed service identity with a derived stable identifier.
///
/// Immutable once built. Two descriptions are equal iff their identifiers
/// are equal; name and attributes do not participate in equality.
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    name: String,
    service_type: String,
    attributes: BTreeMap<String, String>,
    identifier: ServiceId,
}

impl ServiceDescription {
    /// Build a description, deriving the identifier from the service type
    /// and attributes.
    pub fn new(
        name: impl Into<String>,
        service_type: impl Into<String>,
        attributes: BTreeMap<String, String>,
    ) -> Self {
        let service_type = service_type.into();
        let identifier = ServiceId::derive(&service_type, &attributes);
        Self {
            name: name.into(),
            service_type,
            attributes,
            identifier,
        }
    }

    /// Build a description with an explicitly supplied identifier,
    /// decoupling it from the attributes. Needed to interoperate with
    /// services whose identifiers were not derived by this crate.
    pub fn with_identifier(
        name: impl Into<String>,
        service_type: impl Into<String>,
        attributes: BTreeMap<String, String>,
        identifier: ServiceId,
    ) -> Self {
        Self {
            name: name.into(),
            service_type: service_type.into(),
            attributes,
            identifier,
        }
    }

    /// Placeholder description for a service that was discovered but never
    /// registered: only the resolved identifier is known.
    pub fn from_identifier(identifier: ServiceId) -> Self {
        Self {
            name: String::new(),
            service_type: String::new(),
            attributes: BTreeMap::new(),
            identifier,
        }
    }

    /// The service name. Not part of the identity; instances of the same
    /// service may carry different names.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The service type / protocol domain.
    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// The attribute records declared for this service.
    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    /// The stable service identifier.
    pub fn identifier(&self) -> ServiceId {
        self.identifier
    }
}

impl PartialEq for ServiceDescription {
    fn eq(&self, other: &Self) -> bool {
        self.identifier == other.identifier
    }
}

impl Eq for ServiceDescription {}

impl std::hash::Hash for ServiceDescription {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identifier.hash(state);
    }
}

impl fmt::Display for ServiceDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.identifier)
    }
}
