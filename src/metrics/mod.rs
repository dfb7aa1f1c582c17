//! Host metrics collection.
//!
//! Static facts (CPU, GPU, hostname) are gathered once. Dynamic facts
//! (memory, disks, load, uptime) are gathered every refresh cycle.

mod gpu;
mod uptime;

pub use gpu::*;
pub use uptime::*;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{CpuRefreshKind, Disks, MemoryRefreshKind, RefreshKind, System};
use thiserror::Error;

use crate::model::{
    CpuInfo, DiskVolume, DynamicFacts, LoadSample, MemoryUsage, OsRelease, PlatformFamily,
    StaticFacts,
};

/// Collector error types.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("collection timed out after {0:?}")]
    Timeout(Duration),
    #[error("metrics source unavailable: {0}")]
    Source(String),
    #[error("collector task failed: {0}")]
    Task(String),
}

/// Source of host facts.
#[async_trait]
pub trait MetricsCollector: Send + Sync + 'static {
    async fn collect_static(&self) -> Result<StaticFacts, CollectorError>;
    async fn collect_dynamic(&self) -> Result<DynamicFacts, CollectorError>;
}

/// Display names for CPUID vendor strings.
pub fn format_vendor(vendor_id: &str) -> String {
    match vendor_id {
        "AuthenticAMD" => "AMD".to_string(),
        "GenuineIntel" => "Intel".to_string(),
        other => other.to_string(),
    }
}

/// Collector for the machine this process runs on.
pub struct HostCollector {
    sys: Arc<Mutex<System>>,
    gpu_timeout: Duration,
}

impl HostCollector {
    pub fn new() -> Self {
        let mut sys = System::new_with_specifics(
            RefreshKind::new()
                .with_cpu(CpuRefreshKind::everything())
                .with_memory(MemoryRefreshKind::everything()),
        );
        // Baseline so the first usage sample is a real delta.
        sys.refresh_cpu_usage();

        Self {
            sys: Arc::new(Mutex::new(sys)),
            gpu_timeout: Duration::from_secs(5),
        }
    }

    async fn with_system<T, F>(&self, f: F) -> Result<T, CollectorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut System) -> T + Send + 'static,
    {
        let sys = self.sys.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = sys
                .lock()
                .map_err(|_| CollectorError::Source("system handle poisoned".to_string()))?;
            Ok(f(&mut *guard))
        })
        .await
        .map_err(|e| CollectorError::Task(e.to_string()))?
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MetricsCollector for HostCollector {
    async fn collect_static(&self) -> Result<StaticFacts, CollectorError> {
        let platform = PlatformFamily::detect();

        let cpu = self
            .with_system(|sys| {
                let cpus = sys.cpus();
                cpus.first().map(|first| CpuInfo {
                    vendor: format_vendor(first.vendor_id()),
                    brand: first.brand().trim().to_string(),
                    cores: cpus.len(),
                })
            })
            .await?
            .ok_or_else(|| CollectorError::Source("no CPUs reported".to_string()))?;

        let gpu = match detect_gpu(platform, self.gpu_timeout).await {
            Ok(Some(models)) => models,
            Ok(None) => StaticFacts::UNKNOWN.to_string(),
            Err(e) => {
                tracing::warn!("GPU detection failed: {}", e);
                StaticFacts::UNKNOWN.to_string()
            }
        };

        Ok(StaticFacts {
            hostname: System::host_name().unwrap_or_else(|| StaticFacts::UNKNOWN.to_string()),
            platform,
            arch: std::env::consts::ARCH.to_string(),
            cpu,
            gpu,
        })
    }

    async fn collect_dynamic(&self) -> Result<DynamicFacts, CollectorError> {
        let (memory, cpu_usage_percent) = self
            .with_system(|sys| {
                sys.refresh_memory();
                sys.refresh_cpu_usage();
                let memory = MemoryUsage {
                    total_bytes: sys.total_memory(),
                    used_bytes: sys.used_memory(),
                    available_bytes: sys.available_memory(),
                    swap_total_bytes: sys.total_swap(),
                    swap_used_bytes: sys.used_swap(),
                };
                (memory, sys.global_cpu_usage())
            })
            .await?;

        if memory.total_bytes == 0 {
            return Err(CollectorError::Source("memory totals unavailable".to_string()));
        }

        let volumes = tokio::task::spawn_blocking(|| {
            let disks = Disks::new_with_refreshed_list();
            disks
                .list()
                .iter()
                .map(|disk| {
                    let total = disk.total_space();
                    let available = disk.available_space();
                    DiskVolume {
                        mount: disk.mount_point().to_string_lossy().into_owned(),
                        filesystem_type: disk.file_system().to_string_lossy().into_owned(),
                        total_bytes: total,
                        used_bytes: total.saturating_sub(available),
                        available_bytes: available,
                    }
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| CollectorError::Task(e.to_string()))?;

        let load = System::load_average();

        Ok(DynamicFacts {
            os: OsRelease {
                name: System::name(),
                version: System::os_version(),
            },
            memory,
            volumes,
            load: LoadSample {
                one: load.one,
                five: load.five,
                fifteen: load.fifteen,
                cpu_usage_percent,
            },
            uptime_seconds: System::uptime(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_vendor() {
        assert_eq!(format_vendor("AuthenticAMD"), "AMD");
        assert_eq!(format_vendor("GenuineIntel"), "Intel");
        assert_eq!(format_vendor("Apple"), "Apple");
    }

    #[tokio::test]
    async fn test_host_collector_dynamic_facts() {
        let collector = HostCollector::new();
        let facts = collector.collect_dynamic().await.unwrap();

        assert!(facts.memory.total_bytes > 0);
        assert!(facts.memory.used_bytes <= facts.memory.total_bytes);
        assert!(facts.load.cpu_usage_percent.is_finite());
        for volume in &facts.volumes {
            assert!(volume.used_bytes <= volume.total_bytes);
        }
    }

    #[tokio::test]
    async fn test_host_collector_static_facts() {
        let collector = HostCollector::new();
        let facts = collector.collect_static().await.unwrap();

        assert!(facts.cpu.cores > 0);
        assert!(!facts.gpu.is_empty());
        assert_eq!(facts.platform, PlatformFamily::detect());
    }
}
