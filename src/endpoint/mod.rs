//! Service endpoints and content references.
//!
//! An [`Endpoint`] names a service instance by transport kind and network
//! address; a [`Reference`] is an opaque, content-addressed block name
//! inside a store; a [`Location`] pairs the two.

use std::fmt;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Kind, Result};

const OP_PARSE: &str = "endpoint.parse";

/// Transport kinds over which a service can be reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum Transport {
    /// No transport assigned; the zero value of stripped locations.
    Unassigned = 0,
    /// A service instance inside this process.
    InProcess = 1,
    /// A service reached over the network.
    Remote = 2,
}

impl Transport {
    fn as_str(&self) -> &'static str {
        match self {
            Transport::Unassigned => "unassigned",
            Transport::InProcess => "inprocess",
            Transport::Remote => "remote",
        }
    }
}

/// A (transport kind, network address) pair identifying a service
/// instance. In-process and unassigned endpoints carry no address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    #[serde(with = "crate::entry::tag")]
    pub transport: Transport,
    pub net_addr: String,
}

impl Endpoint {
    /// The endpoint of stripped or absent locations.
    pub fn unassigned() -> Self {
        Self { transport: Transport::Unassigned, net_addr: String::new() }
    }

    /// An endpoint naming the in-process service registry.
    pub fn in_process() -> Self {
        Self { transport: Transport::InProcess, net_addr: String::new() }
    }

    /// An endpoint naming a networked service.
    pub fn remote(net_addr: impl Into<String>) -> Self {
        Self { transport: Transport::Remote, net_addr: net_addr.into() }
    }

    /// Parses the textual form emitted by `Display`: `inprocess`,
    /// `unassigned`, or `remote,host:port`.
    pub fn parse(s: &str) -> Result<Self> {
        let (kind, addr) = match s.split_once(',') {
            Some((kind, addr)) => (kind, addr),
            None => (s, ""),
        };
        match kind {
            "unassigned" if addr.is_empty() => Ok(Self::unassigned()),
            "inprocess" if addr.is_empty() => Ok(Self::in_process()),
            "remote" if !addr.is_empty() => Ok(Self::remote(addr)),
            _ => Err(Error::new(OP_PARSE, Kind::Invalid).detail(format!("bad endpoint {s:?}"))),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.net_addr.is_empty() {
            f.write_str(self.transport.as_str())
        } else {
            write!(f, "{},{}", self.transport.as_str(), self.net_addr)
        }
    }
}

/// An opaque byte string naming a block of content in a store.
/// Equality-comparable; no structural interpretation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reference(String);

impl Reference {
    pub fn new(r: impl Into<String>) -> Self {
        Self(r.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a block lives: which service instance, under which reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub endpoint: Endpoint,
    pub reference: Reference,
}

impl Location {
    pub fn new(endpoint: Endpoint, reference: Reference) -> Self {
        Self { endpoint, reference }
    }

    /// The location of stripped blocks.
    pub fn unassigned() -> Self {
        Self { endpoint: Endpoint::unassigned(), reference: Reference::new("") }
    }
}
