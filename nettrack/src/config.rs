use std::env;
use std::time::Duration;

use config::{Config, File, FileFormat};

use crate::maps::KeyLayout;
use crate::runner::ProbeKind;

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct ProgramConfig {
    pub name: String,
    /// Kernel symbol for a kprobe, interface name for a packet hook.
    pub attach: String,
    pub kind: ProbeKind,
}

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct ProbeConfig {
    pub object_path: String,
    pub programs: Vec<ProgramConfig>,
    pub flow_map: String,
    #[serde(default)]
    pub key_layout: KeyLayout,
    pub ring_buffer: Option<String>,
}

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct TrackerConfig {
    pub poll_interval_ms: u64,
    pub eviction_interval_ms: u64,
    pub ttl_ms: u64,
    /// Optional snapshot JSON to seed the mirror from at startup.
    pub restore_path: Option<String>,
}

impl TrackerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct ServerConfig {
    pub addr: String,
    pub port: u16,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct TrackLogEntry {
    pub enable: bool,
    pub target: String,
    pub directory: Option<String>,
    pub prefix: Option<String>,
    pub rotation: Option<String>,
    pub max_files: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Default, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct TrackLogsConfig {
    pub default: TrackLogEntry,
    pub errors: Option<TrackLogEntry>,
    pub events: Option<TrackLogEntry>,
}

#[derive(Debug, serde_derive::Deserialize, PartialEq, Eq)]
pub(crate) struct TrackConfig {
    pub probe: ProbeConfig,
    pub tracker: TrackerConfig,
    pub server: ServerConfig,
    pub logs: TrackLogsConfig,
}

pub(crate) fn load_config() -> Result<TrackConfig, anyhow::Error> {
    let mut config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| "config/".into());
    if !config_dir.ends_with('/') {
        config_dir.push('/');
    }

    let config = Config::builder()
        .add_source(File::new(
            &format!("{}config.json5", config_dir),
            FileFormat::Json5,
        ))
        .build()?;

    let conf: TrackConfig = config.try_deserialize()?;

    Ok(conf)
}
