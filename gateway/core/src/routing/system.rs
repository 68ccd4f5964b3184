//! System metrics sources
//!
//! [`HostMetrics`] samples the local host: CPU utilisation from `/proc/stat`
//! deltas, available memory from `/proc/meminfo`, and the one-minute load
//! average from `sysinfo(2)`. [`StaticMetrics`] reports fixed values and is
//! used when routing should ignore host load.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

/// One sample of host conditions
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSnapshot {
    /// CPU utilisation in percent (0-100)
    pub cpu_percent: f64,
    /// Available memory in megabytes
    pub memory_available_mb: u64,
    /// One-minute load average
    pub load_average: f64,
}

/// Source of host conditions
#[async_trait]
pub trait SystemMetricsSource: Send + Sync {
    async fn cpu_percent(&self) -> f64;

    async fn memory_available_mb(&self) -> u64;

    async fn load_average(&self) -> f64;

    /// All three readings
    async fn sample(&self) -> SystemSnapshot {
        SystemSnapshot {
            cpu_percent: self.cpu_percent().await,
            memory_available_mb: self.memory_available_mb().await,
            load_average: self.load_average().await,
        }
    }
}

// ============================================================================
// Host Metrics
// ============================================================================

#[derive(Clone, Copy, Debug)]
struct CpuTimes {
    idle: u64,
    total: u64,
}

/// Parse the aggregate `cpu` line of `/proc/stat`
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .filter_map(|f| f.parse().ok())
        .collect();
    if fields.len() < 4 {
        return None;
    }
    // idle + iowait
    let idle = fields[3] + fields.get(4).copied().unwrap_or(0);
    Some(CpuTimes {
        idle,
        total: fields.iter().sum(),
    })
}

/// `MemAvailable` from `/proc/meminfo`, in megabytes
fn parse_mem_available_mb(meminfo: &str) -> Option<u64> {
    let line = meminfo.lines().find(|l| l.starts_with("MemAvailable:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / 1024)
}

#[cfg(target_os = "linux")]
fn sysinfo() -> Option<libc::sysinfo> {
    // SAFETY: sysinfo only writes into the zeroed struct we pass
    unsafe {
        let mut info: libc::sysinfo = std::mem::zeroed();
        (libc::sysinfo(&mut info) == 0).then_some(info)
    }
}

#[cfg(target_os = "linux")]
fn sysinfo_load_average() -> Option<f64> {
    const SI_LOAD_SHIFT: u32 = 16;
    sysinfo().map(|info| info.loads[0] as f64 / f64::from(1_u32 << SI_LOAD_SHIFT))
}

#[cfg(target_os = "linux")]
fn sysinfo_free_mb() -> Option<u64> {
    sysinfo().map(|info| {
        let unit = u64::from(info.mem_unit.max(1));
        (info.freeram as u64 + info.bufferram as u64) * unit / (1024 * 1024)
    })
}

#[cfg(not(target_os = "linux"))]
fn sysinfo_load_average() -> Option<f64> {
    None
}

#[cfg(not(target_os = "linux"))]
fn sysinfo_free_mb() -> Option<u64> {
    None
}

/// Samples the local host
#[derive(Debug, Default)]
pub struct HostMetrics {
    previous: Mutex<Option<CpuTimes>>,
}

impl HostMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load-based estimate used until two `/proc/stat` samples exist
    async fn estimate_from_load(&self) -> f64 {
        let cpus = num_cpus::get().max(1) as f64;
        (self.load_average().await / cpus * 100.0).clamp(0.0, 100.0)
    }
}

#[async_trait]
impl SystemMetricsSource for HostMetrics {
    async fn cpu_percent(&self) -> f64 {
        let current = match tokio::fs::read_to_string("/proc/stat").await {
            Ok(stat) => parse_cpu_times(&stat),
            Err(_) => None,
        };
        let Some(current) = current else {
            return self.estimate_from_load().await;
        };

        let previous = self.previous.lock().replace(current);
        match previous {
            Some(prev) if current.total > prev.total => {
                let total = (current.total - prev.total) as f64;
                let idle = current.idle.saturating_sub(prev.idle) as f64;
                ((total - idle) / total * 100.0).clamp(0.0, 100.0)
            }
            _ => self.estimate_from_load().await,
        }
    }

    async fn memory_available_mb(&self) -> u64 {
        if let Ok(meminfo) = tokio::fs::read_to_string("/proc/meminfo").await {
            if let Some(mb) = parse_mem_available_mb(&meminfo) {
                return mb;
            }
        }
        sysinfo_free_mb().unwrap_or(0)
    }

    async fn load_average(&self) -> f64 {
        sysinfo_load_average().unwrap_or(0.0)
    }
}

// ============================================================================
// Static Metrics
// ============================================================================

/// Fixed readings, adjustable at runtime
#[derive(Debug, Clone)]
pub struct StaticMetrics {
    snapshot: Arc<RwLock<SystemSnapshot>>,
}

impl StaticMetrics {
    pub fn new(cpu_percent: f64, memory_available_mb: u64, load_average: f64) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(SystemSnapshot {
                cpu_percent,
                memory_available_mb,
                load_average,
            })),
        }
    }

    /// Idle host with the given memory
    pub fn idle(memory_available_mb: u64) -> Self {
        Self::new(5.0, memory_available_mb, 0.1)
    }

    pub fn set_cpu_percent(&self, cpu_percent: f64) {
        self.snapshot.write().cpu_percent = cpu_percent;
    }

    pub fn set_memory_available_mb(&self, mb: u64) {
        self.snapshot.write().memory_available_mb = mb;
    }
}

#[async_trait]
impl SystemMetricsSource for StaticMetrics {
    async fn cpu_percent(&self) -> f64 {
        self.snapshot.read().cpu_percent
    }

    async fn memory_available_mb(&self) -> u64 {
        self.snapshot.read().memory_available_mb
    }

    async fn load_average(&self) -> f64 {
        self.snapshot.read().load_average
    }

    async fn sample(&self) -> SystemSnapshot {
        *self.snapshot.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cpu_times() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        let times = parse_cpu_times(stat).unwrap();
        assert_eq!(times.idle, 850);
        assert_eq!(times.total, 1000);
        assert!(parse_cpu_times("intr 1 2 3").is_none());
    }

    #[test]
    fn test_parse_meminfo() {
        let meminfo = "MemTotal:       16384000 kB\nMemFree:         1024000 kB\nMemAvailable:    8192000 kB\n";
        assert_eq!(parse_mem_available_mb(meminfo), Some(8000));
        assert_eq!(parse_mem_available_mb("MemTotal: 1 kB"), None);
    }

    #[tokio::test]
    async fn test_static_metrics_adjustable() {
        let metrics = StaticMetrics::idle(1000);
        metrics.set_cpu_percent(97.0);
        let s = metrics.sample().await;
        assert_eq!(s.memory_available_mb, 1000);
        assert!((s.cpu_percent - 97.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_host_metrics_in_range() {
        let host = HostMetrics::new();
        let cpu = host.cpu_percent().await;
        assert!((0.0..=100.0).contains(&cpu));
        assert!(host.load_average().await >= 0.0);
    }
}
