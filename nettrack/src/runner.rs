//! Lifecycle of a compiled probe object and the programs inside it.
//!
//! A runner goes one way: open the object, load named programs, attach
//! each to its kernel entry point, then hand out map and ring buffer
//! handles. Attach links are owned by the underlying aya object and are
//! detached when the runner is dropped, so attachments are released on
//! every exit path, error paths during startup included.

use std::collections::HashMap;
use std::path::Path;

use aya::maps::{MapData, RingBuf};
use aya::programs::{KProbe, ProgramError, Xdp, XdpFlags};
use aya::Ebpf;
use aya_log::EbpfLogger;
use serde_derive::Deserialize;
use tracing::{info, warn};

use crate::errors::TrackError;
use crate::maps::{KernelFlowMap, KeyLayout};

/// Kernel entry point a program attaches to: a function-entry probe on a
/// kernel symbol, or a packet hook on a network interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ProbeKind {
    #[serde(rename = "kprobe")]
    KernelProbe,
    #[serde(rename = "xdp")]
    PacketHook,
}

pub struct ProbeRunner {
    bpf: Ebpf,
    loaded: HashMap<String, ProbeKind>,
}

impl ProbeRunner {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<ProbeRunner, TrackError> {
        let bpf =
            Ebpf::load_file(path.as_ref()).map_err(|e| TrackError::LoadFailure(e.to_string()))?;
        Ok(ProbeRunner {
            bpf,
            loaded: HashMap::new(),
        })
    }

    /// Forward log lines emitted by the probe programs, when the object was
    /// built against aya-log. Absence is not an error.
    pub fn init_logger(&mut self) {
        if let Err(e) = EbpfLogger::init(&mut self.bpf) {
            warn!("Probe object logging unavailable: {}", e);
        }
    }

    /// Resolve a named program inside the object and load it into the
    /// kernel. The kind decides the program type the verifier expects.
    pub fn load_program(&mut self, name: &str, kind: ProbeKind) -> Result<(), TrackError> {
        let program = self
            .bpf
            .program_mut(name)
            .ok_or_else(|| TrackError::ProgramNotFound(name.to_string()))?;

        match kind {
            ProbeKind::KernelProbe => {
                let p: &mut KProbe = program
                    .try_into()
                    .map_err(|e: ProgramError| TrackError::LoadFailure(format!("{name}: {e}")))?;
                p.load()
                    .map_err(|e| TrackError::LoadFailure(format!("{name}: {e}")))?;
            }
            ProbeKind::PacketHook => {
                let p: &mut Xdp = program
                    .try_into()
                    .map_err(|e: ProgramError| TrackError::LoadFailure(format!("{name}: {e}")))?;
                p.load()
                    .map_err(|e| TrackError::LoadFailure(format!("{name}: {e}")))?;
            }
        }

        self.loaded.insert(name.to_string(), kind);
        Ok(())
    }

    /// Attach a loaded program to a live kernel entry point: a symbol name
    /// for kernel probes, an interface name for packet hooks.
    pub fn attach(&mut self, name: &str, target: &str) -> Result<(), TrackError> {
        let kind = *self
            .loaded
            .get(name)
            .ok_or_else(|| TrackError::ProgramNotFound(name.to_string()))?;

        let program = self
            .bpf
            .program_mut(name)
            .ok_or_else(|| TrackError::ProgramNotFound(name.to_string()))?;

        match kind {
            ProbeKind::KernelProbe => {
                let p: &mut KProbe = program.try_into().map_err(|e: ProgramError| {
                    attach_failure(name, target, &e.to_string())
                })?;
                p.attach(target, 0)
                    .map_err(|e| attach_failure(name, target, &e.to_string()))?;
            }
            ProbeKind::PacketHook => {
                let p: &mut Xdp = program.try_into().map_err(|e: ProgramError| {
                    attach_failure(name, target, &e.to_string())
                })?;
                p.attach(target, XdpFlags::default())
                    .map_err(|e| attach_failure(name, target, &e.to_string()))?;
            }
        }

        info!("Attached {} to {}", name, target);
        Ok(())
    }

    /// Take ownership of a named kernel map as a byte-level flow map handle.
    pub fn flow_map(&mut self, name: &str, layout: KeyLayout) -> Result<KernelFlowMap, TrackError> {
        let map = self
            .bpf
            .take_map(name)
            .ok_or_else(|| TrackError::MapNotFound(name.to_string()))?;
        KernelFlowMap::new(name, map, layout)
    }

    /// Take ownership of a named ring buffer delivering discrete event
    /// records as the kernel produces them.
    pub fn ring_buffer(&mut self, name: &str) -> Result<RingBuf<MapData>, TrackError> {
        let map = self
            .bpf
            .take_map(name)
            .ok_or_else(|| TrackError::RingBufferInitFailure {
                name: name.to_string(),
                reason: "map not found".to_string(),
            })?;
        RingBuf::try_from(map).map_err(|e| TrackError::RingBufferInitFailure {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Detach every attachment and release the probe object. Must run only
    /// after the tracker loops have stopped issuing kernel map operations.
    pub fn close(self) {
        info!("Detaching probes");
        drop(self.bpf);
    }
}

fn attach_failure(program: &str, target: &str, reason: &str) -> TrackError {
    TrackError::AttachFailure {
        program: program.to_string(),
        target: target.to_string(),
        reason: reason.to_string(),
    }
}
