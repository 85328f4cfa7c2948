//! Byte-level handles over kernel-resident flow maps.
//!
//! The tracker works against the `FlowMap` trait so that the cache and
//! eviction logic can be exercised without a live kernel. `KernelFlowMap`
//! is the real implementation over an aya hash map typed with raw byte
//! arrays, preserving the exact kernel key encoding for write-back and
//! deletion.

use aya::maps::{HashMap as BpfHashMap, Map, MapData, MapError};
use parking_lot::Mutex;
use serde_derive::Deserialize;
use tracing::warn;

use nettrack_common::{FLOW_STATS_LEN, IPV4_KEY_LEN, IPV6_KEY_LEN};

use crate::errors::TrackError;

/// One full pass over current map contents per call; restartable. A pass is
/// weakly consistent: entries mutated by the kernel mid-pass may show a mix
/// of old and new values.
pub trait FlowMap: Send + Sync {
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TrackError>;
    fn get_value(&self, key: &[u8]) -> Result<Vec<u8>, TrackError>;
    fn update(&self, key: &[u8], value: &[u8]) -> Result<(), TrackError>;
    /// Fails with `KeyNotFound` when the key is already absent; callers
    /// treat that as success.
    fn delete_key(&self, key: &[u8]) -> Result<(), TrackError>;
}

/// Raw key encoding used by the kernel map.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyLayout {
    #[default]
    Ipv4,
    Ipv6,
}

enum Inner {
    V4(BpfHashMap<MapData, [u8; IPV4_KEY_LEN], [u8; FLOW_STATS_LEN]>),
    V6(BpfHashMap<MapData, [u8; IPV6_KEY_LEN], [u8; FLOW_STATS_LEN]>),
}

pub struct KernelFlowMap {
    name: String,
    // aya's map ops take &mut self; the tracker shares the handle between
    // its poll and eviction tasks.
    inner: Mutex<Inner>,
}

impl KernelFlowMap {
    pub fn new(name: &str, map: Map, layout: KeyLayout) -> Result<KernelFlowMap, TrackError> {
        let inner = match layout {
            KeyLayout::Ipv4 => Inner::V4(
                BpfHashMap::try_from(map)
                    .map_err(|e| TrackError::MapNotFound(format!("{name}: {e}")))?,
            ),
            KeyLayout::Ipv6 => Inner::V6(
                BpfHashMap::try_from(map)
                    .map_err(|e| TrackError::MapNotFound(format!("{name}: {e}")))?,
            ),
        };
        Ok(KernelFlowMap {
            name: name.to_string(),
            inner: Mutex::new(inner),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FlowMap for KernelFlowMap {
    fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TrackError> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        match &*inner {
            Inner::V4(m) => {
                for r in m.iter() {
                    match r {
                        Ok((k, v)) => out.push((k.to_vec(), v.to_vec())),
                        // Entries deleted by the kernel mid-pass surface as
                        // per-item errors; skip and keep the pass going.
                        Err(e) => warn!("skipping unreadable entry in {}: {}", self.name, e),
                    }
                }
            }
            Inner::V6(m) => {
                for r in m.iter() {
                    match r {
                        Ok((k, v)) => out.push((k.to_vec(), v.to_vec())),
                        Err(e) => warn!("skipping unreadable entry in {}: {}", self.name, e),
                    }
                }
            }
        }
        Ok(out)
    }

    fn get_value(&self, key: &[u8]) -> Result<Vec<u8>, TrackError> {
        let inner = self.inner.lock();
        match &*inner {
            Inner::V4(m) => {
                let k = fixed_bytes::<IPV4_KEY_LEN>(key)?;
                Ok(m.get(&k, 0).map_err(map_err)?.to_vec())
            }
            Inner::V6(m) => {
                let k = fixed_bytes::<IPV6_KEY_LEN>(key)?;
                Ok(m.get(&k, 0).map_err(map_err)?.to_vec())
            }
        }
    }

    fn update(&self, key: &[u8], value: &[u8]) -> Result<(), TrackError> {
        let mut inner = self.inner.lock();
        let v = fixed_bytes::<FLOW_STATS_LEN>(value)?;
        match &mut *inner {
            Inner::V4(m) => {
                let k = fixed_bytes::<IPV4_KEY_LEN>(key)?;
                m.insert(k, v, 0)
                    .map_err(|e| TrackError::UpdateFailure(e.to_string()))
            }
            Inner::V6(m) => {
                let k = fixed_bytes::<IPV6_KEY_LEN>(key)?;
                m.insert(k, v, 0)
                    .map_err(|e| TrackError::UpdateFailure(e.to_string()))
            }
        }
    }

    fn delete_key(&self, key: &[u8]) -> Result<(), TrackError> {
        let mut inner = self.inner.lock();
        match &mut *inner {
            Inner::V4(m) => {
                let k = fixed_bytes::<IPV4_KEY_LEN>(key)?;
                m.remove(&k).map_err(map_err)
            }
            Inner::V6(m) => {
                let k = fixed_bytes::<IPV6_KEY_LEN>(key)?;
                m.remove(&k).map_err(map_err)
            }
        }
    }
}

fn fixed_bytes<const N: usize>(bytes: &[u8]) -> Result<[u8; N], TrackError> {
    bytes
        .try_into()
        .map_err(|_| TrackError::MalformedRecord {
            expected: N,
            got: bytes.len(),
        })
}

fn map_err(e: MapError) -> TrackError {
    match e {
        MapError::KeyNotFound => TrackError::KeyNotFound,
        MapError::SyscallError(ref s) if s.io_error.raw_os_error() == Some(libc::ENOENT) => {
            TrackError::KeyNotFound
        }
        other => TrackError::UpdateFailure(other.to_string()),
    }
}
