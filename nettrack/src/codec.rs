//! Conversions between raw kernel map records and typed values.
//!
//! Keys cross the boundary in network byte order, stats values in the
//! host's native order. All functions here are pure; length checks happen
//! up front and a short record fails with `MalformedRecord`.

use std::net::Ipv4Addr;

use nettrack_common::{FlowStats, EVENT_PID_LEN, FLOW_STATS_LEN, IPV4_KEY_LEN, IPV6_KEY_LEN};

use crate::errors::TrackError;
use crate::tracker::FlowKey;

pub fn decode_ipv4_key(bytes: &[u8]) -> Result<FlowKey, TrackError> {
    if bytes.len() < IPV4_KEY_LEN {
        return Err(TrackError::MalformedRecord {
            expected: IPV4_KEY_LEN,
            got: bytes.len(),
        });
    }
    Ok(FlowKey::V4 {
        saddr: read_u32_be(&bytes[0..4]),
        daddr: read_u32_be(&bytes[4..8]),
    })
}

pub fn decode_ipv6_key(bytes: &[u8]) -> Result<FlowKey, TrackError> {
    if bytes.len() < IPV6_KEY_LEN {
        return Err(TrackError::MalformedRecord {
            expected: IPV6_KEY_LEN,
            got: bytes.len(),
        });
    }
    let mut saddr = [0u8; 16];
    let mut daddr = [0u8; 16];
    saddr.copy_from_slice(&bytes[0..16]);
    daddr.copy_from_slice(&bytes[16..32]);
    Ok(FlowKey::V6 { saddr, daddr })
}

pub fn decode_stats(bytes: &[u8]) -> Result<FlowStats, TrackError> {
    if bytes.len() < FLOW_STATS_LEN {
        return Err(TrackError::MalformedRecord {
            expected: FLOW_STATS_LEN,
            got: bytes.len(),
        });
    }
    Ok(FlowStats {
        packets: read_u64_ne(&bytes[0..8]),
        bytes: read_u64_ne(&bytes[8..16]),
    })
}

/// Inverse of `decode_stats`, used for write-back into the kernel map.
pub fn encode_stats(stats: &FlowStats) -> [u8; FLOW_STATS_LEN] {
    let mut out = [0u8; FLOW_STATS_LEN];
    out[0..8].copy_from_slice(&stats.packets.to_ne_bytes());
    out[8..16].copy_from_slice(&stats.bytes.to_ne_bytes());
    out
}

/// Kernel byte encoding of a typed flow key, the inverse of the decoders.
/// Only used when seeding entries that were not observed through a poll
/// pass; polled entries keep the original kernel bytes instead.
pub fn encode_key(key: &FlowKey) -> Vec<u8> {
    match key {
        FlowKey::V4 { saddr, daddr } => {
            let mut out = Vec::with_capacity(IPV4_KEY_LEN);
            out.extend_from_slice(&saddr.to_be_bytes());
            out.extend_from_slice(&daddr.to_be_bytes());
            out
        }
        FlowKey::V6 { saddr, daddr } => {
            let mut out = Vec::with_capacity(IPV6_KEY_LEN);
            out.extend_from_slice(saddr);
            out.extend_from_slice(daddr);
            out
        }
    }
}

/// Leading pid field of a ring buffer event record.
pub fn decode_event_pid(bytes: &[u8]) -> Result<i32, TrackError> {
    if bytes.len() < EVENT_PID_LEN {
        return Err(TrackError::MalformedRecord {
            expected: EVENT_PID_LEN,
            got: bytes.len(),
        });
    }
    Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Dotted-quad form of an address already decoded from network order.
pub fn ipv4_to_string(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

fn read_u32_be(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn read_u64_ne(b: &[u8]) -> u64 {
    u64::from_ne_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}
