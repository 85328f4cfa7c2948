pub mod resolver;
#[allow(clippy::module_inception)]
mod tracker;

pub use tracker::{FlowTracker, TrackerHandles};

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde_derive::{Deserialize, Serialize};

use nettrack_common::{CONN_TYPE_IPV4, CONN_TYPE_IPV6};

use crate::codec;

/// Sentinel recorded when reverse resolution fails; never retried within an
/// entry's lifetime.
pub const UNKNOWN_HOST: &str = "unknown";

/// Broadcast to every background task. `Fatal` makes the process exit
/// non-zero after the loops drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Graceful,
    Fatal,
}

/// Typed identity of a connection, decoded from the kernel key bytes.
/// Immutable once observed; the mirror's lookup identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKey {
    V4 { saddr: u32, daddr: u32 },
    V6 { saddr: [u8; 16], daddr: [u8; 16] },
}

impl FlowKey {
    pub fn source(&self) -> IpAddr {
        match self {
            FlowKey::V4 { saddr, .. } => IpAddr::V4(Ipv4Addr::from(*saddr)),
            FlowKey::V6 { saddr, .. } => IpAddr::V6(Ipv6Addr::from(*saddr)),
        }
    }

    pub fn destination(&self) -> IpAddr {
        match self {
            FlowKey::V4 { daddr, .. } => IpAddr::V4(Ipv4Addr::from(*daddr)),
            FlowKey::V6 { daddr, .. } => IpAddr::V6(Ipv6Addr::from(*daddr)),
        }
    }

    pub fn source_string(&self) -> String {
        match self {
            FlowKey::V4 { saddr, .. } => codec::ipv4_to_string(*saddr),
            FlowKey::V6 { saddr, .. } => Ipv6Addr::from(*saddr).to_string(),
        }
    }

    pub fn destination_string(&self) -> String {
        match self {
            FlowKey::V4 { daddr, .. } => codec::ipv4_to_string(*daddr),
            FlowKey::V6 { daddr, .. } => Ipv6Addr::from(*daddr).to_string(),
        }
    }

    pub fn conn_type(&self) -> u8 {
        match self {
            FlowKey::V4 { .. } => CONN_TYPE_IPV4,
            FlowKey::V6 { .. } => CONN_TYPE_IPV6,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source_string(), self.destination_string())
    }
}

/// One row of a tracker snapshot, shaped for the query interface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub saddr: String,
    pub daddr: String,
    pub shost: Vec<String>,
    pub dhost: Vec<String>,
    pub packets: u64,
    pub bytes: u64,
    #[serde(rename = "type")]
    pub conn_type: u8,
}
