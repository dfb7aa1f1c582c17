//! Configuration module.
//!
//! Server settings come from environment variables with sensible defaults.
//! The monitored targets and probe tuning come from a JSON file that is
//! validated once at startup.

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::model::Target;
use crate::probe::ProbeSettings;
use crate::scheduler::SchedulerSettings;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("target #{index}: {reason}")]
    InvalidTarget { index: usize, reason: String },
    #[error("duplicate target name: {0}")]
    DuplicateTarget(String),
    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the JSON API (default: 3000)
    pub http_port: u16,
    /// Path to the targets file (default: "config.json")
    pub config_path: PathBuf,
    /// Overrides the refresh interval from the targets file
    pub refresh_secs: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 3000,
            config_path: PathBuf::from("config.json"),
            refresh_secs: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `SERVER_STATUS_HTTP_PORT`: HTTP port (default: 3000)
    /// - `SERVER_STATUS_CONFIG`: targets file path (default: "config.json")
    /// - `SERVER_STATUS_REFRESH_SECS`: refresh interval override
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = env::var("SERVER_STATUS_HTTP_PORT").ok().and_then(|v| v.parse().ok()) {
            cfg.http_port = port;
        }

        if let Ok(path) = env::var("SERVER_STATUS_CONFIG") {
            cfg.config_path = PathBuf::from(path);
        }

        cfg.refresh_secs = env::var("SERVER_STATUS_REFRESH_SECS").ok().and_then(|v| v.parse().ok());

        cfg
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    name: Option<String>,
    service: Option<String>,
    #[serde(alias = "ip")]
    address: String,
    port: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawProbe {
    concurrency: Option<usize>,
    tcp_timeout_ms: Option<u64>,
    icmp_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawMonitorFile {
    refresh_interval_secs: Option<u64>,
    collect_timeout_ms: Option<u64>,
    cycle_timeout_ms: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    probe: RawProbe,
    servers: Vec<RawTarget>,
}

/// Validated monitor configuration: what to probe and how often.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MonitorConfig {
    pub targets: Vec<Target>,
    pub settings: SchedulerSettings,
}

impl MonitorConfig {
    /// Read and validate the targets file at `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Like [`MonitorConfig::from_file`], but a missing file yields an empty
    /// target list so host metrics still run.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        match Self::from_file(path) {
            Err(ConfigError::Io { source, .. })
                if source.kind() == std::io::ErrorKind::NotFound =>
            {
                tracing::warn!(
                    "No config at {}, monitoring host metrics only",
                    path.display()
                );
                Ok(Self::default())
            }
            other => other,
        }
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: RawMonitorFile = serde_json::from_str(text)?;
        let defaults = SchedulerSettings::default();

        let probe = ProbeSettings {
            concurrency: positive("probe.concurrency", raw.probe.concurrency)?
                .unwrap_or(defaults.probe.concurrency),
            tcp_timeout: millis("probe.tcp_timeout_ms", raw.probe.tcp_timeout_ms)?
                .unwrap_or(defaults.probe.tcp_timeout),
            icmp_timeout: millis("probe.icmp_timeout_ms", raw.probe.icmp_timeout_ms)?
                .unwrap_or(defaults.probe.icmp_timeout),
        };

        let interval = match raw.refresh_interval_secs {
            Some(0) => {
                return Err(ConfigError::InvalidSetting {
                    name: "refresh_interval_secs",
                    reason: "must be greater than zero".to_string(),
                })
            }
            Some(secs) => Duration::from_secs(secs),
            None => defaults.interval,
        };

        let settings = SchedulerSettings {
            interval,
            collect_timeout: millis("collect_timeout_ms", raw.collect_timeout_ms)?
                .unwrap_or(defaults.collect_timeout),
            cycle_timeout: millis("cycle_timeout_ms", raw.cycle_timeout_ms)?,
            shutdown_grace: raw
                .shutdown_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
            probe,
        };

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(raw.servers.len());
        for (index, entry) in raw.servers.into_iter().enumerate() {
            let target = validate_target(index, entry)?;
            if !seen.insert(target.name.clone()) {
                return Err(ConfigError::DuplicateTarget(target.name));
            }
            targets.push(target);
        }

        Ok(Self { targets, settings })
    }

    /// Apply overrides from the environment.
    pub fn with_server_overrides(mut self, server: &ServerConfig) -> Self {
        if let Some(secs) = server.refresh_secs.filter(|s| *s > 0) {
            self.settings.interval = Duration::from_secs(secs);
        }
        self
    }
}

fn positive(name: &'static str, value: Option<usize>) -> Result<Option<usize>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidSetting {
            name,
            reason: "must be at least 1".to_string(),
        }),
        other => Ok(other),
    }
}

fn millis(name: &'static str, value: Option<u64>) -> Result<Option<Duration>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidSetting {
            name,
            reason: "timeout must be greater than zero".to_string(),
        }),
        other => Ok(other.map(Duration::from_millis)),
    }
}

fn validate_target(index: usize, raw: RawTarget) -> Result<Target, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        index,
        reason: reason.to_string(),
    };

    let name = raw
        .name
        .or_else(|| raw.service.clone())
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid("missing name"))?;

    let address = raw.address.trim().to_string();
    if address.is_empty() {
        return Err(invalid("missing address"));
    }

    // -1 is the legacy marker for "ICMP only".
    let port = match raw.port {
        None | Some(-1) => None,
        Some(p) => Some(
            u16::try_from(p)
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid(&format!("port {} out of range", p)))?,
        ),
    };

    Ok(Target {
        name,
        address,
        port,
        service: raw.service,
    })
}
