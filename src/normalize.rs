//! Platform-specific corrections applied to raw collector and prober output.
//!
//! Every per-platform quirk lives here, keyed on [`PlatformFamily`].

use crate::metrics::format_uptime;
use crate::model::{
    DiskSummary, DiskVolume, DynamicFacts, LoadAverage, LoadSample, MetricsSnapshot, OsRelease,
    PlatformFamily, ProbeResult, StaticFacts,
};

/// The APFS mount that carries user data on macOS.
const MACOS_DATA_VOLUME: &str = "/System/Volumes/Data";

/// APFS system and snapshot mounts that share storage with the data volume.
const MACOS_IGNORED_MOUNTS: [&str; 7] = [
    "/",
    "/System/Volumes/VM",
    "/System/Volumes/Preboot",
    "/System/Volumes/Update",
    "/System/Volumes/xarts",
    "/System/Volumes/iSCPreboot",
    "/System/Volumes/Hardware",
];

const MACOS_CODENAMES: [(&str, &str); 22] = [
    ("10.0", "Cheetah"),
    ("10.1", "Puma"),
    ("10.2", "Jaguar"),
    ("10.3", "Panther"),
    ("10.4", "Tiger"),
    ("10.5", "Leopard"),
    ("10.6", "Snow Leopard"),
    ("10.7", "Lion"),
    ("10.8", "Mountain Lion"),
    ("10.9", "Mavericks"),
    ("10.10", "Yosemite"),
    ("10.11", "El Capitan"),
    ("10.12", "Sierra"),
    ("10.13", "High Sierra"),
    ("10.14", "Mojave"),
    ("10.15", "Catalina"),
    ("11", "Big Sur"),
    ("12", "Monterey"),
    ("13", "Ventura"),
    ("14", "Sonoma"),
    ("15", "Sequoia"),
    ("26", "Tahoe"),
];

/// Measured extra round trip of the Apple Silicon LAN chip.
const APPLE_SILICON_LATENCY_OFFSET_MS: i64 = 1;

/// Look up the marketing name for a macOS version.
///
/// 10.x releases are keyed by major.minor, later ones by major only.
pub fn macos_codename(version: &str) -> Option<&'static str> {
    let mut parts = version.split('.');
    let major = parts.next()?;
    let key = if major == "10" {
        format!("10.{}", parts.next()?)
    } else {
        major.to_string()
    };

    MACOS_CODENAMES
        .iter()
        .find(|(release, _)| *release == key)
        .map(|(_, name)| *name)
}

/// Applies the quirks of one host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalizer {
    platform: PlatformFamily,
    arch: String,
}

impl Normalizer {
    pub fn new(platform: PlatformFamily, arch: &str) -> Self {
        Self {
            platform,
            arch: arch.to_string(),
        }
    }

    pub fn for_host(facts: &StaticFacts) -> Self {
        Self::new(facts.platform, &facts.arch)
    }

    pub fn platform(&self) -> PlatformFamily {
        self.platform
    }

    /// Fixed transport bias to remove from measured latencies.
    pub fn latency_offset_ms(&self) -> i64 {
        match self.platform {
            PlatformFamily::MacOs if self.arch == "aarch64" => APPLE_SILICON_LATENCY_OFFSET_MS,
            _ => 0,
        }
    }

    pub fn adjust_latency(&self, raw_ms: i64) -> i64 {
        (raw_ms - self.latency_offset_ms()).max(0)
    }

    /// Remove the latency bias from online results. Offline results keep -1.
    pub fn normalize_results(&self, results: Vec<ProbeResult>) -> Vec<ProbeResult> {
        results
            .into_iter()
            .map(|mut result| {
                if result.is_online() {
                    result.latency_ms = self.adjust_latency(result.latency_ms);
                }
                result
            })
            .collect()
    }

    /// Deduplicate and order volumes. Applying it twice changes nothing.
    pub fn normalize_volumes(&self, volumes: Vec<DiskVolume>) -> Vec<DiskVolume> {
        let mut volumes = match self.platform {
            PlatformFamily::MacOs => volumes
                .into_iter()
                .filter(|v| {
                    !MACOS_IGNORED_MOUNTS.contains(&v.mount.as_str())
                        && !v.mount.starts_with("/private/")
                })
                .collect(),
            _ => volumes,
        };

        let mut seen = std::collections::HashSet::new();
        volumes.retain(|v| seen.insert(v.mount.clone()));

        volumes.sort_by(|a, b| {
            let a_data = a.mount == MACOS_DATA_VOLUME;
            let b_data = b.mount == MACOS_DATA_VOLUME;
            b_data.cmp(&a_data).then_with(|| a.mount.cmp(&b.mount))
        });
        volumes
    }

    pub fn load_average(&self, load: &LoadSample) -> LoadAverage {
        match self.platform {
            // No load average on Windows; report instantaneous CPU usage instead.
            PlatformFamily::Windows => {
                let usage = format!("{:.2}", load.cpu_usage_percent);
                LoadAverage {
                    one: usage.clone(),
                    five: usage.clone(),
                    fifteen: usage,
                }
            }
            _ => LoadAverage {
                one: format!("{:.2}", load.one),
                five: format!("{:.2}", load.five),
                fifteen: format!("{:.2}", load.fifteen),
            },
        }
    }

    pub fn os_name(&self, os: &OsRelease) -> String {
        match self.platform {
            PlatformFamily::MacOs => {
                let version = os.version.as_deref().unwrap_or(StaticFacts::UNKNOWN);
                match macos_codename(version) {
                    Some(codename) => format!("macOS {} {}", codename, version),
                    None => format!("macOS {}", version),
                }
            }
            _ => os.name.clone().unwrap_or_else(|| StaticFacts::UNKNOWN.to_string()),
        }
    }

    /// Combine static and dynamic facts into the snapshot served to readers.
    pub fn snapshot(&self, facts: &StaticFacts, dynamic: DynamicFacts) -> MetricsSnapshot {
        let volumes = self.normalize_volumes(dynamic.volumes);
        let disk = DiskSummary {
            total_bytes: volumes.iter().map(|v| v.total_bytes).sum(),
            used_bytes: volumes.iter().map(|v| v.used_bytes).sum(),
            volumes,
        };

        MetricsSnapshot {
            hostname: facts.hostname.clone(),
            os_name: self.os_name(&dynamic.os),
            arch: facts.arch.clone(),
            cpu: facts.cpu.clone(),
            gpu: facts.gpu.clone(),
            load_average: self.load_average(&dynamic.load),
            uptime_seconds: dynamic.uptime_seconds,
            uptime_text: format_uptime(dynamic.uptime_seconds),
            disk,
            memory: dynamic.memory,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Target;

    fn volume(mount: &str, total: u64, used: u64) -> DiskVolume {
        DiskVolume {
            mount: mount.to_string(),
            filesystem_type: "apfs".to_string(),
            total_bytes: total,
            used_bytes: used,
            available_bytes: total - used,
        }
    }

    fn macos_volumes() -> Vec<DiskVolume> {
        vec![
            volume("/", 500, 10),
            volume("/System/Volumes/VM", 500, 2),
            volume("/Volumes/Backup", 1000, 400),
            volume("/System/Volumes/Preboot", 500, 1),
            volume("/private/var/vm", 500, 2),
            volume("/System/Volumes/Data", 500, 200),
            volume("/Volumes/Archive", 2000, 100),
        ]
    }

    #[test]
    fn test_latency_offset_apple_silicon() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        assert_eq!(n.adjust_latency(5), 4);
        assert_eq!(n.adjust_latency(0), 0);
    }

    #[test]
    fn test_no_latency_offset_elsewhere() {
        assert_eq!(Normalizer::new(PlatformFamily::MacOs, "x86_64").adjust_latency(5), 5);
        assert_eq!(Normalizer::new(PlatformFamily::Unix, "aarch64").adjust_latency(5), 5);
    }

    #[test]
    fn test_normalize_results_skips_offline() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        let results = vec![
            ProbeResult::online(&Target::icmp("a", "10.0.0.1"), 5),
            ProbeResult::offline(&Target::icmp("b", "10.0.0.2")),
        ];

        let normalized = n.normalize_results(results);
        assert_eq!(normalized[0].latency_ms, 4);
        assert_eq!(normalized[1].latency_ms, -1);
    }

    #[test]
    fn test_macos_volume_dedup() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        let mounts: Vec<_> = n
            .normalize_volumes(macos_volumes())
            .into_iter()
            .map(|v| v.mount)
            .collect();
        assert_eq!(mounts, vec!["/System/Volumes/Data", "/Volumes/Archive", "/Volumes/Backup"]);
    }

    #[test]
    fn test_volume_dedup_is_idempotent() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        let once = n.normalize_volumes(macos_volumes());
        let twice = n.normalize_volumes(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_unix_volumes_kept_and_sorted() {
        let n = Normalizer::new(PlatformFamily::Unix, "x86_64");
        let input = vec![volume("/home", 10, 1), volume("/", 10, 1), volume("/home", 10, 1)];
        let mounts: Vec<_> = n
            .normalize_volumes(input)
            .into_iter()
            .map(|v| v.mount)
            .collect();
        assert_eq!(mounts, vec!["/", "/home"]);
    }

    #[test]
    fn test_snapshot_aggregates_deduplicated_disks() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        let dynamic = DynamicFacts {
            volumes: macos_volumes(),
            uptime_seconds: 90061,
            ..DynamicFacts::default()
        };

        let snapshot = n.snapshot(&StaticFacts::unknown(), dynamic);
        assert_eq!(snapshot.disk.total_bytes, 3500);
        assert_eq!(snapshot.disk.used_bytes, 700);
        assert_eq!(snapshot.uptime_text, "1 day, 1 hour, 1 minute, 1 second");
    }

    #[test]
    fn test_load_average_unix() {
        let n = Normalizer::new(PlatformFamily::Unix, "x86_64");
        let load = LoadSample {
            one: 0.5,
            five: 1.234,
            fifteen: 2.0,
            cpu_usage_percent: 80.0,
        };
        let avg = n.load_average(&load);
        assert_eq!(avg.one, "0.50");
        assert_eq!(avg.five, "1.23");
        assert_eq!(avg.fifteen, "2.00");
    }

    #[test]
    fn test_load_average_windows_uses_cpu_usage() {
        let n = Normalizer::new(PlatformFamily::Windows, "x86_64");
        let load = LoadSample {
            cpu_usage_percent: 37.5,
            ..LoadSample::default()
        };
        let avg = n.load_average(&load);
        assert_eq!(avg.one, "37.50");
        assert_eq!(avg.five, "37.50");
        assert_eq!(avg.fifteen, "37.50");
    }

    #[test]
    fn test_macos_os_name() {
        let n = Normalizer::new(PlatformFamily::MacOs, "aarch64");
        let os = |v: &str| OsRelease {
            name: Some("Darwin".to_string()),
            version: Some(v.to_string()),
        };
        assert_eq!(n.os_name(&os("15.1.1")), "macOS Sequoia 15.1.1");
        assert_eq!(n.os_name(&os("10.15.7")), "macOS Catalina 10.15.7");
        assert_eq!(n.os_name(&os("99.0")), "macOS 99.0");
    }

    #[test]
    fn test_other_os_name_uses_distribution() {
        let n = Normalizer::new(PlatformFamily::Unix, "x86_64");
        let os = OsRelease {
            name: Some("Ubuntu".to_string()),
            version: Some("22.04".to_string()),
        };
        assert_eq!(n.os_name(&os), "Ubuntu");
        assert_eq!(n.os_name(&OsRelease::default()), "Unknown");
    }
}
