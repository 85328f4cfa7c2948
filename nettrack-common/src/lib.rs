//! Wire contract shared with the kernel probes.
//!
//! Field widths and byte orders here must match the map and ring buffer
//! definitions in the compiled probe object exactly.

#![cfg_attr(not(test), no_std)]

pub mod models;

pub use models::FlowStats;

/// IPv4 flow key: 4-byte source address + 4-byte destination address,
/// both big-endian (network order).
pub const IPV4_KEY_LEN: usize = 8;

/// IPv6 flow key: 16-byte source address + 16-byte destination address.
pub const IPV6_KEY_LEN: usize = 32;

/// Flow stats value: 8-byte packet count + 8-byte byte count, host-native
/// byte order (producer and consumer run on the same machine).
pub const FLOW_STATS_LEN: usize = 16;

/// Leading pid field of a ring buffer event record, little-endian.
pub const EVENT_PID_LEN: usize = 4;

pub const CONN_TYPE_IPV4: u8 = 4;
pub const CONN_TYPE_IPV6: u8 = 6;
