use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::LabdockError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A user account with its resource profile and accessibility state.
///
/// Accounts are created by external provisioning; the core only mutates the
/// resource fields and the `accessible` flag.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow, Serialize, Deserialize)]
pub struct User {
    /// The user's id.
    pub id: i64,

    /// The user's login name. Part of the container naming convention.
    pub username: String,

    /// The CPU share in cores. Fractional values are allowed.
    pub cpus: f64,

    /// The memory limit in MiB.
    pub ram_mib: i64,

    /// The memory plus swap limit in MiB.
    pub memswap_mib: i64,

    /// Whether the user's sandbox gets GPU passthrough.
    pub gpu_access: bool,

    /// Whether the user may currently use any sandbox. Toggled by the
    /// exclusivity protocol.
    pub accessible: bool,

    /// The user's privilege tier.
    #[sqlx(try_from = "String")]
    pub role: UserRole,
}

/// A user's privilege tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// A regular account, subject to the exclusivity protocol.
    Ordinary,
    /// An account whose reservations suspend everyone else's sandboxes.
    Privileged,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UserRole {
    /// The string form stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Ordinary => "ordinary",
            UserRole::Privileged => "privileged",
        }
    }

    /// Whether this tier carries exclusivity semantics.
    pub fn is_privileged(&self) -> bool {
        matches!(self, UserRole::Privileged)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl TryFrom<String> for UserRole {
    type Error = LabdockError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ordinary" => Ok(UserRole::Ordinary),
            "privileged" => Ok(UserRole::Privileged),
            _ => Err(LabdockError::UnknownUserRole(value)),
        }
    }
}

impl Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
