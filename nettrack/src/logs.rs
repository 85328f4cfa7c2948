use anyhow::anyhow;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::fmt::{format, layer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{filter, EnvFilter, Layer};

use crate::config::{TrackConfig, TrackLogEntry};

macro_rules! parse_filter {
    ($layers:expr, $layer:expr, $filter:expr) => {{
        if let Some(f) = $filter {
            $layers.push($layer.with_filter(f).boxed());
        } else {
            $layers.push($layer.boxed());
        }
    }};
}

macro_rules! parse_layer {
    ($layers:expr, $writer:expr, $format:expr, $filter:expr) => {{
        let s_format = match $format {
            Some(f) => f.as_str(),
            None => "full",
        };

        match s_format.trim().to_ascii_lowercase().as_str() {
            "compact" => {
                let layer = layer()
                    .with_writer($writer)
                    .event_format(format().with_target(true).compact());
                parse_filter!($layers, layer, $filter);
            }
            "json" => {
                let layer = layer()
                    .with_writer($writer)
                    .event_format(format().with_target(true).json().flatten_event(true));
                parse_filter!($layers, layer, $filter);
            }
            _ => {
                let layer = layer()
                    .with_writer($writer)
                    .event_format(format().with_target(true));
                parse_filter!($layers, layer, $filter);
            }
        }
    }};
}

/// Target-routed log sinks. Records tagged `error` or `event` can be split
/// off to their own writers; everything else goes to the default sink.
pub struct TrackLogs {
    _guards: Vec<WorkerGuard>,
}

impl TrackLogs {
    fn parse_log_entry(entry: &TrackLogEntry) -> Result<(NonBlocking, WorkerGuard), anyhow::Error> {
        match entry.target.as_str() {
            "stderr" => Ok(tracing_appender::non_blocking(std::io::stderr())),
            "stdout" => Ok(tracing_appender::non_blocking(std::io::stdout())),
            "file" => {
                let directory = entry
                    .directory
                    .as_deref()
                    .ok_or_else(|| anyhow!("Missing log attribute: directory"))?;
                let prefix = entry
                    .prefix
                    .as_deref()
                    .ok_or_else(|| anyhow!("Missing log attribute: prefix"))?;

                let s_rotation = entry.rotation.as_deref().unwrap_or("daily");
                let rotation = match s_rotation.trim().to_ascii_lowercase().as_str() {
                    "hourly" => rolling::Rotation::HOURLY,
                    "daily" => rolling::Rotation::DAILY,
                    "never" => rolling::Rotation::NEVER,
                    _ => return Err(anyhow!("Invalid log rotation: {}", s_rotation)),
                };

                let appender = rolling::RollingFileAppender::builder()
                    .rotation(rotation)
                    .filename_prefix(prefix)
                    .max_log_files(entry.max_files.unwrap_or(5))
                    .build(directory)?;
                Ok(tracing_appender::non_blocking(appender))
            }
            other => Err(anyhow!("Invalid log target: {}", other)),
        }
    }

    pub fn new(config: &TrackConfig) -> Result<TrackLogs, anyhow::Error> {
        let logs_conf = &config.logs;

        let mut layers = Vec::new();
        let mut guards = Vec::new();

        if logs_conf.default.enable {
            let (w, guard) = TrackLogs::parse_log_entry(&logs_conf.default)?;
            guards.push(guard);

            let mut routed = Vec::new();
            if logs_conf.errors.is_some() {
                routed.push("error");
            }
            if logs_conf.events.is_some() {
                routed.push("event");
            }

            let f = filter::filter_fn(move |metadata| !routed.contains(&metadata.target()));
            parse_layer!(layers, w, &logs_conf.default.format, Some(f));
        }

        if let Some(ref e) = logs_conf.errors {
            if e.enable {
                let (w, guard) = TrackLogs::parse_log_entry(e)?;
                guards.push(guard);

                let f = filter::filter_fn(|metadata| metadata.target() == "error");
                parse_layer!(layers, w, &e.format, Some(f));
            }
        }

        if let Some(ref e) = logs_conf.events {
            if e.enable {
                let (w, guard) = TrackLogs::parse_log_entry(e)?;
                guards.push(guard);

                let f = filter::filter_fn(|metadata| metadata.target() == "event");
                parse_layer!(layers, w, &e.format, Some(f));
            }
        }

        tracing_subscriber::registry()
            .with(layers)
            .with(EnvFilter::from_default_env())
            .init();

        Ok(TrackLogs { _guards: guards })
    }
}
