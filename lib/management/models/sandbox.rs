use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::LabdockError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A sandbox is one user's provisioned compute environment backed by a
/// single runtime container.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct Sandbox {
    /// The sandbox's id.
    pub id: i64,

    /// The id of the owning user. Exactly one sandbox per user.
    pub user_id: i64,

    /// The runtime container identifier. Empty until the first successful
    /// create.
    pub container_id: String,

    /// The sandbox kind. Part of the container naming convention.
    pub kind: String,

    /// The image the container was created from.
    pub image: String,

    /// The lifecycle status.
    #[sqlx(try_from = "String")]
    pub status: SandboxStatus,

    /// The access token embedded in the access URL. Survives restarts.
    pub token: String,

    /// The host port the sandbox is published on.
    pub port: i64,

    /// Snapshot of the CPU share at creation time.
    pub cpus: f64,

    /// Snapshot of the memory limit in MiB at creation time.
    pub ram_mib: i64,

    /// Snapshot of the memory plus swap limit in MiB at creation time.
    pub memswap_mib: i64,

    /// Snapshot of the GPU passthrough flag at creation time.
    pub gpu: bool,

    /// Whether the owner may start this sandbox themselves. An
    /// admin-initiated stop clears this.
    pub can_be_started_by_owner: bool,

    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

/// The lifecycle status of a sandbox.
///
/// `Paused` is only entered and exited by the exclusivity protocol; it is the
/// marker that distinguishes sandboxes suspended by a privileged reservation
/// from sandboxes an owner or admin stopped on purpose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStatus {
    /// Being provisioned; no usable container yet.
    Building,
    /// The container is running.
    Running,
    /// The container is stopped.
    Stopped,
    /// Frozen by the exclusivity protocol.
    Paused,
    /// Provisioning or a transition failed.
    Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxStatus {
    /// The string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            SandboxStatus::Building => "building",
            SandboxStatus::Running => "running",
            SandboxStatus::Stopped => "stopped",
            SandboxStatus::Paused => "paused",
            SandboxStatus::Error => "error",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl TryFrom<String> for SandboxStatus {
    type Error = LabdockError;

    fn try_from(value: String) -> Result<Self, LabdockError> {
        match value.as_str() {
            "building" => Ok(SandboxStatus::Building),
            "running" => Ok(SandboxStatus::Running),
            "stopped" => Ok(SandboxStatus::Stopped),
            "paused" => Ok(SandboxStatus::Paused),
            "error" => Ok(SandboxStatus::Error),
            _ => Err(LabdockError::UnknownSandboxStatus(value)),
        }
    }
}

impl Display for SandboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
