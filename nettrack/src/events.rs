//! Consumer for the discrete-event ring buffer.
//!
//! The file-deletion kprobe pushes one record per intercepted syscall; the
//! record's leading 4 bytes are the calling pid. Records are drained on a
//! short timer and logged to the `event` target; a malformed record is
//! skipped, never fatal.

use std::time::Duration;

use aya::maps::{MapData, RingBuf};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{info, warn};

use crate::codec;
use crate::tracker::ShutdownSignal;

const DRAIN_INTERVAL: Duration = Duration::from_millis(100);
const MAX_BATCH: usize = 1024;

pub(crate) fn run_event_loop(
    mut ring: RingBuf<MapData>,
    shutdown: broadcast::Sender<ShutdownSignal>,
) -> JoinHandle<()> {
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Event loop stopping");
                    break;
                }
                _ = time::sleep(DRAIN_INTERVAL) => {
                    let mut drained = 0;
                    while let Some(record) = ring.next() {
                        match codec::decode_event_pid(&record) {
                            Ok(pid) => {
                                info!(target: "event", kind = "unlink", pid = pid);
                            }
                            Err(e) => {
                                warn!(target: "error", "Skipping ring buffer record: {}", e);
                            }
                        }
                        drained += 1;
                        if drained >= MAX_BATCH {
                            break;
                        }
                    }
                }
            }
        }
    })
}
