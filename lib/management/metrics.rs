//! Resource usage computations for sandboxes and the host.

use serde::{Deserialize, Serialize};
use sysinfo::{Disks, System, MINIMUM_CPU_UPDATE_INTERVAL};

use crate::{LabdockResult, RuntimeCounters};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MIB: f64 = 1024.0 * 1024.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A point-in-time usage snapshot for one sandbox.
///
/// Every field is always present; counters the runtime could not report show
/// up as zero, never as a missing value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SandboxStats {
    /// CPU usage as a percentage of one core times the online CPU count.
    pub cpu_percent: f64,

    /// Memory usage in MiB.
    pub memory_usage_mib: f64,

    /// Memory usage as a percentage of the limit. Zero when unlimited.
    pub memory_percent: f64,

    /// Bytes received over the sandbox's networks, in MiB.
    pub network_rx_mib: f64,

    /// Bytes transmitted over the sandbox's networks, in MiB.
    pub network_tx_mib: f64,

    /// GPU utilization percent of the device the sandbox runs on. Zero when
    /// no GPU is present.
    pub gpu_percent: f64,

    /// GPU memory held by the sandbox's processes, in MiB. Zero when no GPU
    /// is present.
    pub gpu_memory_mib: f64,
}

/// A host-wide hardware snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    /// Host CPU usage percentage across all cores.
    pub cpu_percent: f64,

    /// Number of logical CPUs.
    pub cpu_count: usize,

    /// Total physical memory in bytes.
    pub memory_total: u64,

    /// Used physical memory in bytes.
    pub memory_used: u64,

    /// Available physical memory in bytes.
    pub memory_available: u64,

    /// Total disk capacity across mounted disks, in bytes.
    pub disk_total: u64,

    /// Available disk space across mounted disks, in bytes.
    pub disk_available: u64,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes CPU usage percent from two consecutive counter samples.
///
/// Returns zero when the system delta is non-positive, which also covers a
/// runtime that reported no system counters at all.
pub fn cpu_percent(counters: &RuntimeCounters) -> f64 {
    let container_delta =
        counters.cpu_total_usage.saturating_sub(counters.precpu_total_usage) as f64;
    let system_delta =
        counters.system_cpu_usage.saturating_sub(counters.presystem_cpu_usage) as f64;

    if system_delta <= 0.0 {
        return 0.0;
    }

    (container_delta / system_delta) * counters.online_cpus as f64 * 100.0
}

/// Computes memory usage percent, zero when the limit is zero.
pub fn memory_percent(counters: &RuntimeCounters) -> f64 {
    if counters.memory_limit == 0 {
        return 0.0;
    }

    counters.memory_usage as f64 / counters.memory_limit as f64 * 100.0
}

/// Reduces raw runtime counters to a sandbox usage snapshot.
pub fn sandbox_stats(counters: &RuntimeCounters) -> SandboxStats {
    SandboxStats {
        cpu_percent: cpu_percent(counters),
        memory_usage_mib: counters.memory_usage as f64 / MIB,
        memory_percent: memory_percent(counters),
        network_rx_mib: counters.rx_bytes as f64 / MIB,
        network_tx_mib: counters.tx_bytes as f64 / MIB,
        gpu_percent: counters.gpu_utilization as f64,
        gpu_memory_mib: counters.gpu_memory_bytes as f64 / MIB,
    }
}

/// Collects a host-wide hardware snapshot.
///
/// CPU usage needs two samples a short interval apart, so the collection
/// runs on the blocking pool.
pub async fn system_stats() -> LabdockResult<SystemStats> {
    let stats = tokio::task::spawn_blocking(|| {
        let mut sys = System::new_all();
        std::thread::sleep(MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_cpu_usage();

        let disks = Disks::new_with_refreshed_list();
        let (disk_total, disk_available) = disks
            .iter()
            .fold((0, 0), |(total, avail), disk| {
                (total + disk.total_space(), avail + disk.available_space())
            });

        SystemStats {
            cpu_percent: sys.global_cpu_usage() as f64,
            cpu_count: sys.cpus().len(),
            memory_total: sys.total_memory(),
            memory_used: sys.used_memory(),
            memory_available: sys.available_memory(),
            disk_total,
            disk_available,
        }
    })
    .await?;

    Ok(stats)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_percent_four_cores() {
        let counters = RuntimeCounters {
            cpu_total_usage: 300,
            precpu_total_usage: 100,
            system_cpu_usage: 2000,
            presystem_cpu_usage: 1000,
            online_cpus: 4,
            ..Default::default()
        };

        // (200 / 1000) * 4 * 100
        assert_eq!(cpu_percent(&counters), 80.0);
    }

    #[test]
    fn test_cpu_percent_zero_system_delta() {
        let counters = RuntimeCounters {
            cpu_total_usage: 300,
            precpu_total_usage: 100,
            system_cpu_usage: 1000,
            presystem_cpu_usage: 1000,
            online_cpus: 4,
            ..Default::default()
        };

        assert_eq!(cpu_percent(&counters), 0.0);
    }

    #[test]
    fn test_memory_percent_zero_limit() {
        let counters = RuntimeCounters {
            memory_usage: 512,
            memory_limit: 0,
            ..Default::default()
        };

        assert_eq!(memory_percent(&counters), 0.0);
    }

    #[test]
    fn test_sandbox_stats_all_fields_present() {
        let counters = RuntimeCounters {
            cpu_total_usage: 150,
            precpu_total_usage: 100,
            system_cpu_usage: 1100,
            presystem_cpu_usage: 1000,
            online_cpus: 2,
            memory_usage: 256 * 1024 * 1024,
            memory_limit: 1024 * 1024 * 1024,
            rx_bytes: 1024 * 1024,
            tx_bytes: 2 * 1024 * 1024,
            gpu_utilization: 30,
            gpu_memory_bytes: 512 * 1024 * 1024,
        };

        let stats = sandbox_stats(&counters);
        assert_eq!(stats.cpu_percent, 100.0);
        assert_eq!(stats.memory_usage_mib, 256.0);
        assert_eq!(stats.memory_percent, 25.0);
        assert_eq!(stats.network_rx_mib, 1.0);
        assert_eq!(stats.network_tx_mib, 2.0);
        assert_eq!(stats.gpu_percent, 30.0);
        assert_eq!(stats.gpu_memory_mib, 512.0);
    }

    #[test]
    fn test_gpu_fields_zero_without_device() {
        let stats = sandbox_stats(&RuntimeCounters::default());
        assert_eq!(stats.gpu_percent, 0.0);
        assert_eq!(stats.gpu_memory_mib, 0.0);
    }
}
