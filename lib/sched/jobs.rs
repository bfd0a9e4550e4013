//! The jobs the reservation scheduler fires.
//!
//! Each reservation window contributes a begin and an end job; a window owned
//! by a privileged user additionally contributes the exclusivity acquire and
//! release jobs. Jobs never touch the container runtime themselves, they go
//! through the [`SandboxManager`].

use std::fmt::{self, Display};

use chrono::{DateTime, SecondsFormat, Utc};

use crate::{
    management::{SandboxManager, Store},
    LabdockResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The kinds of scheduled work a reservation window can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Start the reserved sandbox at window open.
    Begin,
    /// Stop the reserved sandbox at window close.
    End,
    /// Acquire host exclusivity for the window's owner at window open.
    Acquire,
    /// Release host exclusivity at window close.
    Release,
}

/// One unit of scheduled work, resolved at fire time against current state.
#[derive(Debug, Clone, Copy)]
pub struct ScheduledJob {
    /// What to do when the trigger fires.
    pub kind: JobKind,

    /// The sandbox the reservation is bound to.
    pub sandbox_id: i64,

    /// The reservation owner. Only consulted by the exclusivity jobs.
    pub owner_user_id: i64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl JobKind {
    /// The string form used in job ids and the run history.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Begin => "begin",
            JobKind::End => "end",
            JobKind::Acquire => "acquire",
            JobKind::Release => "release",
        }
    }
}

impl ScheduledJob {
    /// Executes the job against current state.
    pub async fn run(&self, store: &Store, manager: &SandboxManager) -> LabdockResult<()> {
        match self.kind {
            JobKind::Begin => {
                let started = manager.start_if_stopped(self.sandbox_id).await?;
                tracing::info!(sandbox_id = self.sandbox_id, started, "reservation window opened");
            }
            JobKind::End => {
                let stopped = manager.stop_if_running(self.sandbox_id).await?;
                tracing::info!(sandbox_id = self.sandbox_id, stopped, "reservation window closed");
            }
            JobKind::Acquire => {
                acquire_exclusivity(store, manager, self.owner_user_id).await?;
            }
            JobKind::Release => {
                release_exclusivity(store, manager).await?;
            }
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The deterministic id for a job.
///
/// Built from the kind, the sandbox and the trigger instant only, so two
/// reloads over the same reservations produce the same ids and a resubmitted
/// job replaces its previous incarnation instead of piling up next to it.
pub fn job_id(kind: JobKind, sandbox_id: i64, trigger: DateTime<Utc>) -> String {
    format!(
        "{}_{}_{}",
        kind.as_str(),
        sandbox_id,
        trigger.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Grants one user exclusive use of the host.
///
/// Every other user's accessibility flag is cleared, the owner's is set, and
/// every other user's running sandbox is paused. Paused, not stopped: kernel
/// state survives the window and is thawed again on release.
pub async fn acquire_exclusivity(
    store: &Store,
    manager: &SandboxManager,
    owner_user_id: i64,
) -> LabdockResult<usize> {
    store.set_accessible_except(owner_user_id, false).await?;
    store.set_user_accessible(owner_user_id, true).await?;

    let paused = manager.suspend_all_except(owner_user_id).await?;
    tracing::info!(owner_user_id, paused, "exclusivity acquired");

    Ok(paused)
}

/// Returns the host to shared use.
///
/// Every user becomes accessible again and every sandbox the acquire side
/// paused is thawed. Sandboxes that were already stopped when the window
/// opened stay stopped.
pub async fn release_exclusivity(
    store: &Store,
    manager: &SandboxManager,
) -> LabdockResult<usize> {
    store.set_all_accessible(true).await?;

    let resumed = manager.resume_paused().await?;
    tracing::info!(resumed, "exclusivity released");

    Ok(resumed)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
