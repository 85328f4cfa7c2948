mod codec;
mod config;
mod errors;
mod events;
mod logs;
mod maps;
mod runner;
mod server;
mod tracker;

use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::logs::TrackLogs;
use crate::runner::ProbeRunner;
use crate::tracker::resolver::SystemResolver;
use crate::tracker::{FlowTracker, ShutdownSignal};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = config::load_config()?;

    let _logs = TrackLogs::new(&config)?;

    // Bump the memlock rlimit. This is needed for older kernels that don't use the
    // new memcg based accounting, see https://lwn.net/Articles/837122/
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {}", ret);
    }

    let mut probe_runner = ProbeRunner::open(&config.probe.object_path)
        .with_context(|| format!("opening probe object {}", config.probe.object_path))?;
    probe_runner.init_logger();

    for prog in &config.probe.programs {
        probe_runner
            .load_program(&prog.name, prog.kind)
            .with_context(|| format!("loading program {}", prog.name))?;
        probe_runner
            .attach(&prog.name, &prog.attach)
            .with_context(|| format!("attaching program {} to {}", prog.name, prog.attach))?;
    }

    let flow_map = probe_runner
        .flow_map(&config.probe.flow_map, config.probe.key_layout)
        .with_context(|| format!("opening kernel map {}", config.probe.flow_map))?;
    info!("Tracking flows from kernel map {}", flow_map.name());

    let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<ShutdownSignal>(8);

    let (flow_tracker, tracker_handles) = FlowTracker::new(
        Arc::new(flow_map),
        Arc::new(SystemResolver),
        config.probe.key_layout,
        config.tracker.poll_interval(),
        config.tracker.eviction_interval(),
        config.tracker.ttl(),
        shutdown_tx.clone(),
    );

    if let Some(ref path) = config.tracker.restore_path {
        match fs::read(path) {
            Ok(data) => {
                let seeded = flow_tracker
                    .restore(&data)
                    .with_context(|| format!("restoring snapshot from {}", path))?;
                info!("Seeded {} flows from {}", seeded, path);
            }
            Err(e) => warn!("Skipping snapshot restore from {}: {}", path, e),
        }
    }

    let mut task_handles = Vec::new();

    if let Some(ref rb_name) = config.probe.ring_buffer {
        let ring = probe_runner
            .ring_buffer(rb_name)
            .with_context(|| format!("opening ring buffer {}", rb_name))?;
        task_handles.push(events::run_event_loop(ring, shutdown_tx.clone()));
    }

    let addr: SocketAddr = format!("{}:{}", config.server.addr, config.server.port)
        .parse()
        .context("invalid server address")?;
    task_handles.push(server::serve(addr, flow_tracker.clone(), shutdown_tx.clone()).await?);

    info!("Waiting for Ctrl-C...");
    let reason = tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Exiting...");
            let _ = shutdown_tx.send(ShutdownSignal::Graceful);
            ShutdownSignal::Graceful
        }
        sig = shutdown_rx.recv() => sig.unwrap_or(ShutdownSignal::Fatal),
    };

    tracker_handles.join().await;
    for handle in task_handles {
        if let Err(e) = handle.await {
            error!(target: "error", "Task ended abnormally: {}", e);
        }
    }

    // Only now is it safe to detach: nothing issues kernel map operations
    // anymore.
    probe_runner.close();

    if reason == ShutdownSignal::Fatal {
        anyhow::bail!("stopping after fatal tracking error");
    }
    Ok(())
}
