//! GPU usage attribution via NVML.
//!
//! Device utilization is read from the first GPU; memory is attributed to a
//! container by intersecting the device's compute processes with the
//! container's process tree. Every failure path reduces to zeros so stats
//! stay total on hosts without a GPU or driver.

use std::collections::{HashMap, HashSet};

use nvml_wrapper::{enums::device::UsedGpuMemory, Nvml};
use sysinfo::{ProcessesToUpdate, System};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Samples GPU utilization percent and the GPU memory in bytes held by the
/// process tree rooted at `root_pid`.
///
/// Blocking; callers run this on the blocking pool.
pub(crate) fn sample(root_pid: u32) -> (u32, u64) {
    let nvml = match Nvml::init() {
        Ok(nvml) => nvml,
        Err(err) => {
            tracing::debug!(error = %err, "nvml unavailable, reporting zero gpu usage");
            return (0, 0);
        }
    };

    let device = match nvml.device_by_index(0) {
        Ok(device) => device,
        Err(err) => {
            tracing::debug!(error = %err, "no gpu device, reporting zero gpu usage");
            return (0, 0);
        }
    };

    let utilization = device
        .utilization_rates()
        .map(|rates| rates.gpu)
        .unwrap_or(0);

    let pids = descendant_pids(root_pid);
    let memory_bytes = device
        .running_compute_processes()
        .map(|processes| {
            processes
                .iter()
                .filter(|process| pids.contains(&process.pid))
                .map(|process| match process.used_gpu_memory {
                    UsedGpuMemory::Used(bytes) => bytes,
                    UsedGpuMemory::Unavailable => 0,
                })
                .sum()
        })
        .unwrap_or(0);

    (utilization, memory_bytes)
}

/// The pid of `root` plus every process transitively parented by it.
pub(crate) fn descendant_pids(root: u32) -> HashSet<u32> {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in sys.processes() {
        if let Some(parent) = process.parent() {
            children
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut pids = HashSet::from([root]);
    let mut queue = vec![root];
    while let Some(pid) = queue.pop() {
        if let Some(kids) = children.get(&pid) {
            for &kid in kids {
                if pids.insert(kid) {
                    queue.push(kid);
                }
            }
        }
    }

    pids
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descendant_pids_includes_root() {
        let root = std::process::id();
        let pids = descendant_pids(root);
        assert!(pids.contains(&root));
    }

    #[test]
    fn test_descendant_pids_unknown_root_is_just_root() {
        // Pids are allocated well below this on any realistic host.
        let pids = descendant_pids(u32::MAX - 1);
        assert_eq!(pids.len(), 1);
    }
}
