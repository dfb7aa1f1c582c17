//! Shared data model types for targets, probe results and host metrics.

use serde::Serialize;

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Icmp,
    Tcp,
}

/// A monitored endpoint. Immutable once loaded from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub name: String,
    pub address: String,
    pub port: Option<u16>,
    pub service: Option<String>,
}

impl Target {
    pub fn icmp(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            address: address.to_string(),
            port: None,
            service: None,
        }
    }

    pub fn tcp(name: &str, address: &str, port: u16) -> Self {
        Self {
            port: Some(port),
            ..Self::icmp(name, address)
        }
    }

    /// TCP iff a port is configured.
    pub fn protocol(&self) -> Protocol {
        if self.port.is_some() {
            Protocol::Tcp
        } else {
            Protocol::Icmp
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProbeStatus {
    Online,
    Offline,
}

/// Outcome of probing one target during one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub target_name: String,
    pub address: String,
    pub port: Option<u16>,
    pub protocol: Protocol,
    pub status: ProbeStatus,
    /// Round trip in milliseconds, or -1 when offline.
    pub latency_ms: i64,
}

impl ProbeResult {
    pub const OFFLINE_LATENCY: i64 = -1;

    pub fn online(target: &Target, latency_ms: i64) -> Self {
        Self {
            target_name: target.name.clone(),
            address: target.address.clone(),
            port: target.port,
            protocol: target.protocol(),
            status: ProbeStatus::Online,
            latency_ms: latency_ms.max(0),
        }
    }

    pub fn offline(target: &Target) -> Self {
        Self {
            target_name: target.name.clone(),
            address: target.address.clone(),
            port: target.port,
            protocol: target.protocol(),
            status: ProbeStatus::Offline,
            latency_ms: Self::OFFLINE_LATENCY,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == ProbeStatus::Online
    }
}

/// Host platform family. All platform quirks branch on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformFamily {
    MacOs,
    Windows,
    Unix,
}

impl PlatformFamily {
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "macos" => PlatformFamily::MacOs,
            "windows" => PlatformFamily::Windows,
            _ => PlatformFamily::Unix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CpuInfo {
    pub vendor: String,
    pub brand: String,
    pub cores: usize,
}

/// Facts that never change for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticFacts {
    pub hostname: String,
    pub platform: PlatformFamily,
    pub arch: String,
    pub cpu: CpuInfo,
    pub gpu: String,
}

impl StaticFacts {
    pub const UNKNOWN: &'static str = "Unknown";

    pub fn unknown() -> Self {
        Self {
            hostname: Self::UNKNOWN.to_string(),
            platform: PlatformFamily::detect(),
            arch: std::env::consts::ARCH.to_string(),
            cpu: CpuInfo {
                vendor: Self::UNKNOWN.to_string(),
                brand: Self::UNKNOWN.to_string(),
                cores: 0,
            },
            gpu: Self::UNKNOWN.to_string(),
        }
    }
}

/// OS release as reported by the host, before display formatting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Raw load sample. Both fields are always gathered; the normalizer picks one.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadSample {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
    pub cpu_usage_percent: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskVolume {
    pub mount: String,
    pub filesystem_type: String,
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

impl DiskVolume {
    pub fn use_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        self.used_bytes as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Per-cycle facts, exactly as the collector gathered them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicFacts {
    pub os: OsRelease,
    pub memory: MemoryUsage,
    pub volumes: Vec<DiskVolume>,
    pub load: LoadSample,
    pub uptime_seconds: u64,
}

/// Load averages keyed by window label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadAverage {
    #[serde(rename = "1m")]
    pub one: String,
    #[serde(rename = "5m")]
    pub five: String,
    #[serde(rename = "15m")]
    pub fifteen: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskSummary {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub volumes: Vec<DiskVolume>,
}

/// Normalized host metrics as served to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub hostname: String,
    pub os_name: String,
    pub arch: String,
    pub cpu: CpuInfo,
    pub gpu: String,
    pub load_average: LoadAverage,
    pub uptime_seconds: u64,
    pub uptime_text: String,
    pub disk: DiskSummary,
    pub memory: MemoryUsage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_derived_from_port() {
        assert_eq!(Target::icmp("gw", "10.0.0.1").protocol(), Protocol::Icmp);
        assert_eq!(Target::tcp("web", "10.0.0.2", 443).protocol(), Protocol::Tcp);
    }

    #[test]
    fn test_offline_uses_sentinel_latency() {
        let result = ProbeResult::offline(&Target::icmp("gw", "10.0.0.1"));
        assert_eq!(result.status, ProbeStatus::Offline);
        assert_eq!(result.latency_ms, -1);
    }

    #[test]
    fn test_online_latency_never_negative() {
        let result = ProbeResult::online(&Target::tcp("web", "10.0.0.2", 80), -3);
        assert!(result.is_online());
        assert_eq!(result.latency_ms, 0);
    }

    #[test]
    fn test_use_percent_empty_volume() {
        let volume = DiskVolume {
            mount: "/".to_string(),
            filesystem_type: "ext4".to_string(),
            total_bytes: 0,
            used_bytes: 0,
            available_bytes: 0,
        };
        assert_eq!(volume.use_percent(), 0.0);
    }

    #[test]
    fn test_load_average_serializes_window_labels() {
        let load = LoadAverage {
            one: "0.10".to_string(),
            five: "0.20".to_string(),
            fifteen: "0.30".to_string(),
        };
        let json = serde_json::to_value(&load).unwrap();
        assert_eq!(json["1m"], "0.10");
        assert_eq!(json["15m"], "0.30");
    }
}
