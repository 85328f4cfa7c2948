use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use nettrack_common::FlowStats;

use crate::codec;
use crate::errors::TrackError;
use crate::maps::{FlowMap, KeyLayout};
use crate::tracker::resolver::HostResolver;
use crate::tracker::{Connection, FlowKey, ShutdownSignal, UNKNOWN_HOST};

/// Userspace mirror entry for one kernel-observed flow.
///
/// `kernel_key` is an owned copy of the exact byte encoding the kernel map
/// uses; deletion requires the original layout, not a re-derived one.
struct FlowEntry {
    kernel_key: Vec<u8>,
    stats: FlowStats,
    shost: Vec<String>,
    dhost: Vec<String>,
    last_updated: Instant,
}

impl FlowEntry {
    fn to_connection(&self, key: &FlowKey) -> Connection {
        Connection {
            saddr: key.source_string(),
            daddr: key.destination_string(),
            shost: self.shost.clone(),
            dhost: self.dhost.clone(),
            packets: self.stats.packets,
            bytes: self.stats.bytes,
            conn_type: key.conn_type(),
        }
    }
}

/// The concurrent cache and reconciliation engine.
///
/// Owns the mirror of kernel-observed flows and two independent timer
/// loops: a poll loop that refreshes the mirror from the kernel map and an
/// eviction loop that expires stale entries from both sides. The kernel
/// map is the backing store but not authoritative between polls; the
/// mirror's view of freshness is only as good as its last successful pass,
/// so the TTL must be chosen well above the poll interval.
pub struct FlowTracker {
    mirror: DashMap<FlowKey, FlowEntry>,
    kernel_map: Arc<dyn FlowMap>,
    resolver: Arc<dyn HostResolver>,
    key_layout: KeyLayout,
    poll_interval: Duration,
    eviction_interval: Duration,
    ttl: Duration,
    shutdown: broadcast::Sender<ShutdownSignal>,
}

/// Join handles for the tracker's background loops, awaited at shutdown
/// before the probe runner is released.
pub struct TrackerHandles {
    poll: JoinHandle<()>,
    eviction: JoinHandle<()>,
}

impl TrackerHandles {
    pub async fn join(self) {
        if let Err(e) = self.poll.await {
            error!(target: "error", "Poll loop ended abnormally: {}", e);
        }
        if let Err(e) = self.eviction.await {
            error!(target: "error", "Eviction loop ended abnormally: {}", e);
        }
    }
}

impl FlowTracker {
    /// Build the tracker and start both loops immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kernel_map: Arc<dyn FlowMap>,
        resolver: Arc<dyn HostResolver>,
        key_layout: KeyLayout,
        poll_interval: Duration,
        eviction_interval: Duration,
        ttl: Duration,
        shutdown: broadcast::Sender<ShutdownSignal>,
    ) -> (Arc<FlowTracker>, TrackerHandles) {
        let tracker = FlowTracker::build(
            kernel_map,
            resolver,
            key_layout,
            poll_interval,
            eviction_interval,
            ttl,
            shutdown,
        );

        let poll = tokio::spawn(tracker.clone().poll_loop());
        let eviction = tokio::spawn(tracker.clone().eviction_loop());

        (tracker, TrackerHandles { poll, eviction })
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        kernel_map: Arc<dyn FlowMap>,
        resolver: Arc<dyn HostResolver>,
        key_layout: KeyLayout,
        poll_interval: Duration,
        eviction_interval: Duration,
        ttl: Duration,
        shutdown: broadcast::Sender<ShutdownSignal>,
    ) -> Arc<FlowTracker> {
        if ttl <= poll_interval {
            warn!(
                "Staleness TTL ({:?}) should be well above the poll interval ({:?}), \
                 live flows may be evicted between polls",
                ttl, poll_interval
            );
        }

        Arc::new(FlowTracker {
            mirror: DashMap::new(),
            kernel_map,
            resolver,
            key_layout,
            poll_interval,
            eviction_interval,
            ttl,
            shutdown,
        })
    }

    /// The only path that creates or refreshes a mirror entry.
    ///
    /// A re-observed key gets its stats and timestamp refreshed in place;
    /// hostnames are preserved unconditionally. A first observation
    /// resolves both directions once, best-effort, then inserts.
    pub async fn store_or_update(&self, kernel_key: &[u8], key: FlowKey, stats: FlowStats) {
        if let Some(mut entry) = self.mirror.get_mut(&key) {
            entry.stats = stats;
            entry.last_updated = Instant::now();
            return;
        }

        let resolver = self.resolver.clone();
        let (src, dst) = (key.source(), key.destination());
        let resolved = tokio::task::spawn_blocking(move || {
            (resolver.resolve(src), resolver.resolve(dst))
        })
        .await;

        let (shost, dhost) = match resolved {
            Ok(r) => r,
            Err(e) => {
                warn!("Hostname resolution task failed: {}", e);
                (None, None)
            }
        };

        self.mirror.insert(
            key,
            FlowEntry {
                kernel_key: kernel_key.to_vec(),
                stats,
                shost: shost.unwrap_or_else(|| vec![UNKNOWN_HOST.to_string()]),
                dhost: dhost.unwrap_or_else(|| vec![UNKNOWN_HOST.to_string()]),
                last_updated: Instant::now(),
            },
        );
    }

    /// Point lookup; no side effects.
    pub fn load(&self, key: &FlowKey) -> Option<Connection> {
        self.mirror.get(key).map(|e| e.value().to_connection(key))
    }

    /// Weakly consistent enumeration of current mirror entries. Entries
    /// added or evicted mid-enumeration may or may not be reflected, but no
    /// entry is returned twice and no torn entry is ever returned.
    pub fn snapshot(&self) -> Vec<Connection> {
        self.mirror
            .iter()
            .map(|e| e.value().to_connection(e.key()))
            .collect()
    }

    /// Seed the mirror from a previously serialized snapshot and push the
    /// counters back into the kernel map. Hostnames from the snapshot are
    /// kept as-is, never re-resolved. Keys already present are skipped.
    pub fn restore(&self, data: &[u8]) -> Result<usize, anyhow::Error> {
        let connections: Vec<Connection> = serde_json::from_slice(data)?;

        let mut seeded = 0;
        for conn in connections {
            let key = match conn.flow_key() {
                Some(k) => k,
                None => {
                    warn!(
                        target: "error",
                        "Skipping snapshot row with unusable addresses: {} -> {}",
                        conn.saddr, conn.daddr
                    );
                    continue;
                }
            };
            if self.load(&key).is_some() {
                continue;
            }
            self.mirror.insert(
                key,
                FlowEntry {
                    kernel_key: codec::encode_key(&key),
                    stats: FlowStats {
                        packets: conn.packets,
                        bytes: conn.bytes,
                    },
                    shost: conn.shost,
                    dhost: conn.dhost,
                    last_updated: Instant::now(),
                },
            );
            seeded += 1;
        }

        self.write_back();
        Ok(seeded)
    }

    /// Push every mirror entry's counters into the kernel map. Per-entry
    /// failures are logged and skipped.
    fn write_back(&self) -> usize {
        let mut written = 0;
        for entry in self.mirror.iter() {
            let bytes = codec::encode_stats(&entry.value().stats);
            match self.kernel_map.update(&entry.value().kernel_key, &bytes) {
                Ok(()) => written += 1,
                Err(e) => {
                    warn!(target: "error", "Write-back for {} failed: {}", entry.key(), e)
                }
            }
        }
        written
    }

    /// One full reconciliation pass over the kernel map. Records that fail
    /// to decode are skipped; the pass never aborts on a bad record.
    async fn poll_once(&self) {
        let entries = match self.kernel_map.entries() {
            Ok(entries) => entries,
            Err(e) => {
                warn!(target: "error", "Kernel map pass failed: {}", e);
                return;
            }
        };

        for (key_bytes, value_bytes) in entries {
            let key = match self.decode_key(&key_bytes) {
                Ok(k) => k,
                Err(e) => {
                    warn!(target: "error", "Skipping record with bad key: {}", e);
                    continue;
                }
            };
            let stats = match codec::decode_stats(&value_bytes) {
                Ok(s) => s,
                Err(e) => {
                    warn!(target: "error", "Skipping record with bad stats for {}: {}", key, e);
                    continue;
                }
            };
            self.store_or_update(&key_bytes, key, stats).await;
        }
    }

    fn decode_key(&self, bytes: &[u8]) -> Result<FlowKey, TrackError> {
        match self.key_layout {
            KeyLayout::Ipv4 => codec::decode_ipv4_key(bytes),
            KeyLayout::Ipv6 => codec::decode_ipv6_key(bytes),
        }
    }

    /// Remove every entry whose last refresh is at least one TTL old, from
    /// the mirror first and then from the kernel map using the kernel-key
    /// bytes captured at insert time. A key the kernel already dropped is
    /// fine; any other deletion failure bubbles up and stops the process,
    /// since an undeletable stale key threatens unbounded kernel map
    /// growth.
    fn evict_expired(&self) -> Result<usize, TrackError> {
        let now = Instant::now();
        let expired: Vec<(FlowKey, Vec<u8>)> = self
            .mirror
            .iter()
            .filter(|e| e.value().last_updated + self.ttl <= now)
            .map(|e| (*e.key(), e.value().kernel_key.clone()))
            .collect();

        let mut evicted = 0;
        for (key, kernel_key) in expired {
            // The poll loop may have refreshed the entry since it was
            // collected above; skip it in that case.
            if self
                .mirror
                .remove_if(&key, |_, v| v.last_updated + self.ttl <= now)
                .is_none()
            {
                continue;
            }
            match self.kernel_map.delete_key(&kernel_key) {
                Ok(()) => debug!("Evicted stale flow {}", key),
                Err(TrackError::KeyNotFound) => {
                    debug!("Stale flow {} already gone from kernel map", key)
                }
                Err(e) => return Err(e),
            }
            evicted += 1;
        }
        Ok(evicted)
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown_rx.recv() => {
                    info!("Poll loop stopping");
                    break;
                }
            }
        }
    }

    async fn eviction_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown.subscribe();
        let mut ticker = time::interval(self.eviction_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.evict_expired() {
                        error!(target: "error", "Kernel map delete failed, stopping: {}", e);
                        let _ = self.shutdown.send(ShutdownSignal::Fatal);
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Eviction loop stopping");
                    break;
                }
            }
        }
    }
}

impl Connection {
    /// Typed key for a deserialized snapshot row; `None` when the addresses
    /// do not parse or mix families.
    fn flow_key(&self) -> Option<FlowKey> {
        use std::net::IpAddr;

        let saddr = self.saddr.parse::<IpAddr>().ok()?;
        let daddr = self.daddr.parse::<IpAddr>().ok()?;
        match (saddr, daddr) {
            (IpAddr::V4(s), IpAddr::V4(d)) => Some(FlowKey::V4 {
                saddr: u32::from(s),
                daddr: u32::from(d),
            }),
            (IpAddr::V6(s), IpAddr::V6(d)) => Some(FlowKey::V6 {
                saddr: s.octets(),
                daddr: d.octets(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockFlowMap {
        entries: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        updated: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        deleted: Mutex<Vec<Vec<u8>>>,
        delete_result: Mutex<Option<TrackError>>,
    }

    impl MockFlowMap {
        fn new() -> Arc<MockFlowMap> {
            Arc::new(MockFlowMap {
                entries: Mutex::new(Vec::new()),
                updated: Mutex::new(Vec::new()),
                deleted: Mutex::new(Vec::new()),
                delete_result: Mutex::new(None),
            })
        }
    }

    impl FlowMap for MockFlowMap {
        fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TrackError> {
            Ok(self.entries.lock().clone())
        }

        fn get_value(&self, key: &[u8]) -> Result<Vec<u8>, TrackError> {
            self.entries
                .lock()
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .ok_or(TrackError::KeyNotFound)
        }

        fn update(&self, key: &[u8], value: &[u8]) -> Result<(), TrackError> {
            self.updated.lock().push((key.to_vec(), value.to_vec()));
            Ok(())
        }

        fn delete_key(&self, key: &[u8]) -> Result<(), TrackError> {
            self.deleted.lock().push(key.to_vec());
            match self.delete_result.lock().take() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }

    struct CountingResolver {
        calls: AtomicUsize,
        known: bool,
    }

    impl HostResolver for Arc<CountingResolver> {
        fn resolve(&self, addr: IpAddr) -> Option<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.known {
                Some(vec![format!("host-{}", addr)])
            } else {
                None
            }
        }
    }

    fn resolver(known: bool) -> Arc<CountingResolver> {
        Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
            known,
        })
    }

    fn tracker_with(
        map: Arc<MockFlowMap>,
        res: Arc<CountingResolver>,
        ttl: Duration,
    ) -> Arc<FlowTracker> {
        let (shutdown, _) = broadcast::channel(4);
        FlowTracker::build(
            map,
            Arc::new(res),
            KeyLayout::Ipv4,
            Duration::from_secs(1),
            Duration::from_secs(1),
            ttl,
            shutdown,
        )
    }

    fn v4_key_bytes(saddr: [u8; 4], daddr: [u8; 4]) -> Vec<u8> {
        let mut k = Vec::with_capacity(8);
        k.extend_from_slice(&saddr);
        k.extend_from_slice(&daddr);
        k
    }

    fn stats_bytes(packets: u64, bytes: u64) -> Vec<u8> {
        codec::encode_stats(&FlowStats { packets, bytes }).to_vec()
    }

    #[tokio::test]
    async fn update_preserves_hostnames_and_keeps_one_entry() {
        let map = MockFlowMap::new();
        let res = resolver(true);
        let tracker = tracker_with(map, res.clone(), Duration::from_secs(60));

        let kb = v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();

        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 100 })
            .await;
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 5, bytes: 500 })
            .await;

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.len(), 1);
        let conn = &snapshot[0];
        assert_eq!(conn.packets, 5);
        assert_eq!(conn.bytes, 500);
        assert_eq!(conn.saddr, "10.0.0.1");
        assert_eq!(conn.daddr, "8.8.8.8");
        assert_eq!(conn.conn_type, 4);
        assert_eq!(conn.shost, vec!["host-10.0.0.1".to_string()]);
        // One resolution per direction, on first insertion only.
        assert_eq!(res.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_resolution_records_unknown_and_is_not_retried() {
        let map = MockFlowMap::new();
        let res = resolver(false);
        let tracker = tracker_with(map, res.clone(), Duration::from_secs(60));

        let kb = v4_key_bytes([192, 168, 1, 2], [1, 1, 1, 1]);
        let key = codec::decode_ipv4_key(&kb).unwrap();

        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 60 })
            .await;
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 2, bytes: 120 })
            .await;

        let conn = tracker.load(&key).unwrap();
        assert_eq!(conn.shost, vec![UNKNOWN_HOST.to_string()]);
        assert_eq!(conn.dhost, vec![UNKNOWN_HOST.to_string()]);
        assert_eq!(res.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn malformed_records_are_skipped_not_fatal() {
        let map = MockFlowMap::new();
        {
            let mut entries = map.entries.lock();
            entries.push((v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]), stats_bytes(1, 100)));
            entries.push((vec![0xAA, 0xBB], stats_bytes(9, 900))); // short key
            entries.push((v4_key_bytes([10, 0, 0, 2], [8, 8, 4, 4]), stats_bytes(2, 200)));
            entries.push((v4_key_bytes([10, 0, 0, 3], [9, 9, 9, 9]), vec![0x01])); // short value
            entries.push((v4_key_bytes([10, 0, 0, 4], [7, 7, 7, 7]), stats_bytes(4, 400)));
        }
        let tracker = tracker_with(map, resolver(true), Duration::from_secs(60));

        tracker.poll_once().await;

        assert_eq!(tracker.snapshot().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_eviction_removes_mirror_and_kernel_entry() {
        let map = MockFlowMap::new();
        let tracker = tracker_with(map.clone(), resolver(true), Duration::from_secs(5));

        let kb = v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 100 })
            .await;

        time::advance(Duration::from_millis(4900)).await;
        assert_eq!(tracker.evict_expired().unwrap(), 0);
        assert!(tracker.load(&key).is_some());

        time::advance(Duration::from_millis(200)).await;
        assert_eq!(tracker.evict_expired().unwrap(), 1);
        assert!(tracker.load(&key).is_none());

        let deleted = map.deleted.lock();
        assert_eq!(*deleted, vec![kb]);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_resets_eviction_clock() {
        let map = MockFlowMap::new();
        let tracker = tracker_with(map.clone(), resolver(true), Duration::from_secs(5));

        let kb = v4_key_bytes([10, 0, 0, 9], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 100 })
            .await;

        time::advance(Duration::from_secs(4)).await;
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 2, bytes: 200 })
            .await;

        time::advance(Duration::from_secs(4)).await;
        assert_eq!(tracker.evict_expired().unwrap(), 0);
        assert!(tracker.load(&key).is_some());
        assert!(map.deleted.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_kernel_key_during_eviction_is_success() {
        let map = MockFlowMap::new();
        *map.delete_result.lock() = Some(TrackError::KeyNotFound);
        let tracker = tracker_with(map.clone(), resolver(true), Duration::from_secs(1));

        let kb = v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 100 })
            .await;

        time::advance(Duration::from_secs(2)).await;
        assert_eq!(tracker.evict_expired().unwrap(), 1);
        assert!(tracker.load(&key).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn other_delete_failures_are_fatal() {
        let map = MockFlowMap::new();
        *map.delete_result.lock() = Some(TrackError::UpdateFailure("EPERM".to_string()));
        let tracker = tracker_with(map.clone(), resolver(true), Duration::from_secs(1));

        let kb = v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 1, bytes: 100 })
            .await;

        time::advance(Duration::from_secs(2)).await;
        assert!(tracker.evict_expired().is_err());
    }

    #[tokio::test]
    async fn restore_seeds_mirror_and_writes_back() {
        let map = MockFlowMap::new();
        let res = resolver(true);
        let tracker = tracker_with(map.clone(), res.clone(), Duration::from_secs(60));

        let data = serde_json::json!([
            {
                "saddr": "10.0.0.1",
                "daddr": "8.8.8.8",
                "shost": ["laptop.lan"],
                "dhost": ["dns.google"],
                "packets": 42,
                "bytes": 6000,
                "type": 4
            }
        ]);
        let seeded = tracker.restore(data.to_string().as_bytes()).unwrap();
        assert_eq!(seeded, 1);

        let key = FlowKey::V4 {
            saddr: u32::from_be_bytes([10, 0, 0, 1]),
            daddr: u32::from_be_bytes([8, 8, 8, 8]),
        };
        let conn = tracker.load(&key).unwrap();
        // Hostnames come from the snapshot, not the resolver.
        assert_eq!(conn.shost, vec!["laptop.lan".to_string()]);
        assert_eq!(res.calls.load(Ordering::SeqCst), 0);

        let updated = map.updated.lock();
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].0, v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]));
        assert_eq!(updated[0].1, stats_bytes(42, 6000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn snapshot_is_consistent_under_concurrent_updates() {
        let map = MockFlowMap::new();
        let tracker = tracker_with(map, resolver(true), Duration::from_secs(60));

        let kb = v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]);
        let key = codec::decode_ipv4_key(&kb).unwrap();
        tracker
            .store_or_update(&kb, key, FlowStats { packets: 0, bytes: 0 })
            .await;

        let writer = {
            let tracker = tracker.clone();
            let kb = kb.clone();
            tokio::spawn(async move {
                for i in 1..=1000u64 {
                    tracker
                        .store_or_update(
                            &kb,
                            key,
                            FlowStats {
                                packets: i,
                                bytes: i * 100,
                            },
                        )
                        .await;
                }
            })
        };

        let reader = {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let snapshot = tracker.snapshot();
                    assert_eq!(snapshot.len(), 1);
                    let conn = &snapshot[0];
                    // A torn entry would break the packets/bytes pairing.
                    assert_eq!(conn.bytes, conn.packets * 100);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loops_poll_evict_and_stop_on_shutdown() {
        let map = MockFlowMap::new();
        map.entries.lock().push((
            v4_key_bytes([10, 0, 0, 1], [8, 8, 8, 8]),
            stats_bytes(3, 300),
        ));

        let (shutdown, _) = broadcast::channel(4);
        let (tracker, handles) = FlowTracker::new(
            map.clone(),
            Arc::new(resolver(true)),
            KeyLayout::Ipv4,
            Duration::from_millis(100),
            Duration::from_millis(100),
            Duration::from_secs(2),
            shutdown.clone(),
        );

        // Wait for the poll loop to pick the entry up.
        let mut present = false;
        for _ in 0..50 {
            time::sleep(Duration::from_millis(50)).await;
            if !tracker.snapshot().is_empty() {
                present = true;
                break;
            }
        }
        assert!(present);

        // Stop refreshing and let the TTL run out.
        map.entries.lock().clear();
        time::sleep(Duration::from_secs(5)).await;
        assert!(tracker.snapshot().is_empty());
        assert_eq!(map.deleted.lock().len(), 1);

        shutdown.send(ShutdownSignal::Graceful).unwrap();
        handles.join().await;
    }
}
