//! Structured resource profiles for sandboxes.
//!
//! A profile is captured from the owning user at provisioning time and
//! validated against the configured caps before any runtime call is made.

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{management::User, LabdockError, LabdockResult};

use super::ResourceCaps;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MIB: u64 = 1024 * 1024;

/// Docker weighs CPU time in shares of 1024 per core.
const CPU_SHARES_PER_CORE: f64 = 1024.0;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The resource limits applied to a single sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ResourceProfile {
    /// The number of CPU cores. Fractional values are allowed.
    pub(super) cpus: f64,

    /// The memory limit in MiB.
    pub(super) ram_mib: u64,

    /// The memory plus swap limit in MiB. Must be at least `ram_mib`.
    pub(super) memswap_mib: u64,

    /// Whether the sandbox gets GPU passthrough.
    #[builder(default)]
    pub(super) gpu: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ResourceProfile {
    /// Captures a profile from a user's current resource fields.
    pub fn from_user(user: &User) -> Self {
        Self {
            cpus: user.cpus,
            ram_mib: user.ram_mib as u64,
            memswap_mib: user.memswap_mib as u64,
            gpu: user.gpu_access,
        }
    }

    /// Validates the profile against the configured caps.
    ///
    /// Returns a [`LabdockError::ResourceLimitExceeded`] describing the first
    /// violation found. Called before any container runtime call.
    pub fn validate(&self, caps: &ResourceCaps) -> LabdockResult<()> {
        if self.cpus <= 0.0 {
            return Err(LabdockError::ResourceLimitExceeded(
                "cpu share must be positive".into(),
            ));
        }

        if self.ram_mib == 0 {
            return Err(LabdockError::ResourceLimitExceeded(
                "memory limit must be positive".into(),
            ));
        }

        if self.memswap_mib < self.ram_mib {
            return Err(LabdockError::ResourceLimitExceeded(format!(
                "memory+swap limit ({} MiB) is below the memory limit ({} MiB)",
                self.memswap_mib, self.ram_mib
            )));
        }

        if self.cpus > *caps.get_max_cpus() {
            return Err(LabdockError::ResourceLimitExceeded(format!(
                "requested {} cpus, cap is {}",
                self.cpus,
                caps.get_max_cpus()
            )));
        }

        if self.ram_mib > *caps.get_max_ram_mib() {
            return Err(LabdockError::ResourceLimitExceeded(format!(
                "requested {} MiB memory, cap is {} MiB",
                self.ram_mib,
                caps.get_max_ram_mib()
            )));
        }

        if self.memswap_mib > *caps.get_max_memswap_mib() {
            return Err(LabdockError::ResourceLimitExceeded(format!(
                "requested {} MiB memory+swap, cap is {} MiB",
                self.memswap_mib,
                caps.get_max_memswap_mib()
            )));
        }

        Ok(())
    }

    /// The CPU weight to pass to the container runtime.
    pub fn cpu_shares(&self) -> i64 {
        (self.cpus * CPU_SHARES_PER_CORE) as i64
    }

    /// The memory limit in bytes.
    pub fn memory_bytes(&self) -> i64 {
        (self.ram_mib * MIB) as i64
    }

    /// The memory plus swap limit in bytes.
    pub fn memswap_bytes(&self) -> i64 {
        (self.memswap_mib * MIB) as i64
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn caps() -> ResourceCaps {
        ResourceCaps::builder()
            .max_cpus(8.0)
            .max_ram_mib(16_384)
            .max_memswap_mib(32_768)
            .build()
    }

    #[test]
    fn test_profile_within_caps_is_valid() {
        let profile = ResourceProfile::builder()
            .cpus(2.5)
            .ram_mib(4096)
            .memswap_mib(8192)
            .gpu(true)
            .build();

        assert!(profile.validate(&caps()).is_ok());
        assert_eq!(profile.cpu_shares(), 2560);
        assert_eq!(profile.memory_bytes(), 4096 * 1024 * 1024);
    }

    #[test]
    fn test_swap_below_memory_is_rejected() {
        let profile = ResourceProfile::builder()
            .cpus(1.0)
            .ram_mib(4096)
            .memswap_mib(2048)
            .build();

        assert!(matches!(
            profile.validate(&caps()),
            Err(LabdockError::ResourceLimitExceeded(_))
        ));
    }

    #[test]
    fn test_over_cap_is_rejected() {
        let profile = ResourceProfile::builder()
            .cpus(32.0)
            .ram_mib(1024)
            .memswap_mib(1024)
            .build();

        assert!(matches!(
            profile.validate(&caps()),
            Err(LabdockError::ResourceLimitExceeded(_))
        ));
    }

    #[test]
    fn test_zero_cpu_is_rejected() {
        let profile = ResourceProfile::builder()
            .cpus(0.0)
            .ram_mib(1024)
            .memswap_mib(1024)
            .build();

        assert!(profile.validate(&caps()).is_err());
    }
}
