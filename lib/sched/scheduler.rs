//! The reservation scheduler.
//!
//! Turns the active reservation windows in the store into timed jobs. The
//! scheduler holds no window state of its own: the store is the single source
//! of truth and [`ReservationScheduler::reload`] rebuilds the whole job set
//! from it, at boot and after every reservation mutation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::{
    management::{SandboxManager, Store},
    LabdockError, LabdockResult,
};

use super::{job_id, JobKind, ScheduledJob};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Schedules reservation windows as timed jobs against the sandbox manager.
pub struct ReservationScheduler {
    /// The durable reservation state.
    store: Store,

    /// The lifecycle manager every job goes through.
    manager: Arc<SandboxManager>,

    /// Pending jobs by deterministic id. Submitting an id that is already
    /// pending replaces the previous job.
    jobs: Mutex<HashMap<String, JoinHandle<()>>>,

    /// Serializes job bodies so no two jobs mutate sandbox state at once.
    exec_lock: Arc<tokio::sync::Mutex<()>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ReservationScheduler {
    /// Creates a scheduler. No jobs are pending until [`Self::start`] or
    /// [`Self::reload`] runs.
    pub fn new(store: Store, manager: Arc<SandboxManager>) -> Self {
        Self {
            store,
            manager,
            jobs: Mutex::new(HashMap::new()),
            exec_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Boots the scheduler by loading every active reservation.
    pub async fn start(&self) -> LabdockResult<usize> {
        self.reload().await
    }

    /// Rebuilds the entire job set from the store.
    ///
    /// Every pending job is dropped, the run history is cleared and each
    /// active reservation whose window has not opened yet is resubmitted.
    /// Windows whose start is already past are skipped, including windows
    /// still in progress; they are picked up again only if their rows still
    /// exist at the next reload before their start.
    ///
    /// Returns the number of jobs submitted.
    pub async fn reload(&self) -> LabdockResult<usize> {
        self.shutdown();
        self.store.clear_job_runs().await?;

        let now = Utc::now();
        let mut exclusive_windows: Vec<(DateTime<Utc>, DateTime<Utc>)> = Vec::new();
        let mut submitted = 0;

        // Ordered by starts_at, so the earliest privileged window in any
        // overlapping cluster claims exclusivity first.
        for reservation in self.store.list_active_reservations().await? {
            if reservation.starts_at <= now {
                tracing::debug!(
                    reservation_id = reservation.id,
                    starts_at = %reservation.starts_at,
                    "window start already past, skipping"
                );
                continue;
            }

            let Some(sandbox) = self.store.get_sandbox(reservation.sandbox_id).await? else {
                tracing::warn!(
                    reservation_id = reservation.id,
                    sandbox_id = reservation.sandbox_id,
                    "reservation points at a missing sandbox, skipping"
                );
                continue;
            };

            let owner = self.store.require_user(sandbox.user_id).await?;
            let mut exclusive = owner.role.is_privileged();

            if exclusive {
                let claimed = exclusive_windows
                    .iter()
                    .any(|&(s, e)| reservation.starts_at < e && s < reservation.ends_at);

                if claimed {
                    tracing::warn!(
                        reservation_id = reservation.id,
                        owner_user_id = owner.id,
                        "window overlaps an earlier exclusive window, scheduling without exclusivity"
                    );
                    exclusive = false;
                } else {
                    exclusive_windows.push((reservation.starts_at, reservation.ends_at));
                }
            }

            let job = ScheduledJob {
                kind: JobKind::Begin,
                sandbox_id: sandbox.id,
                owner_user_id: owner.id,
            };

            if exclusive {
                self.submit(
                    ScheduledJob { kind: JobKind::Acquire, ..job },
                    reservation.starts_at,
                );
                self.submit(
                    ScheduledJob { kind: JobKind::Release, ..job },
                    reservation.ends_at,
                );
                submitted += 2;
            }

            self.submit(job, reservation.starts_at);
            self.submit(ScheduledJob { kind: JobKind::End, ..job }, reservation.ends_at);
            submitted += 2;
        }

        tracing::info!(submitted, "reservation schedule rebuilt");

        Ok(submitted)
    }

    /// Validates and persists a reservation, then rebuilds the schedule.
    ///
    /// A window owned by a privileged user is rejected when it overlaps
    /// another privileged user's active window, so exclusivity conflicts are
    /// refused at admission instead of silently downgraded later.
    pub async fn create_reservation(
        &self,
        sandbox_id: i64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
    ) -> LabdockResult<i64> {
        let Some(sandbox) = self.store.get_sandbox(sandbox_id).await? else {
            return Err(LabdockError::SandboxNotFound(sandbox_id.to_string()));
        };
        let owner = self.store.require_user(sandbox.user_id).await?;

        if owner.role.is_privileged() {
            for other in self.store.list_active_reservations().await? {
                if other.sandbox_id == sandbox_id || !other.overlaps(starts_at, ends_at) {
                    continue;
                }

                let Some(other_sandbox) = self.store.get_sandbox(other.sandbox_id).await? else {
                    continue;
                };
                let other_owner = self.store.require_user(other_sandbox.user_id).await?;

                if other_owner.role.is_privileged() {
                    return Err(LabdockError::InvalidReservation(format!(
                        "window [{starts_at}, {ends_at}) overlaps exclusive reservation {}",
                        other.id
                    )));
                }
            }
        }

        let id = self
            .store
            .create_reservation(sandbox_id, starts_at, ends_at, true)
            .await?;
        self.reload().await?;

        Ok(id)
    }

    /// Removes a reservation and rebuilds the schedule.
    pub async fn delete_reservation(&self, reservation_id: i64) -> LabdockResult<()> {
        self.store.delete_reservation(reservation_id).await?;
        self.reload().await?;

        Ok(())
    }

    /// Drops every pending job without touching the store.
    pub fn shutdown(&self) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        for (_, handle) in jobs.drain() {
            handle.abort();
        }
    }

    /// The ids of all pending jobs, sorted.
    pub fn job_ids(&self) -> Vec<String> {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The number of pending jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Submits one job to fire at an absolute instant, replacing any pending
    /// job with the same id.
    fn submit(&self, job: ScheduledJob, trigger: DateTime<Utc>) {
        let id = job_id(job.kind, job.sandbox_id, trigger);

        let store = self.store.clone();
        let manager = self.manager.clone();
        let exec_lock = self.exec_lock.clone();
        let task_id = id.clone();

        let handle = tokio::spawn(async move {
            let delay = (trigger - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;

            let _guard = exec_lock.lock().await;

            let outcome = match job.run(&store, &manager).await {
                Ok(()) => "ok",
                Err(err) => {
                    tracing::error!(job_id = %task_id, error = %err, "scheduled job failed");
                    "error"
                }
            };

            if let Err(err) = store.record_job_run(&task_id, job.kind.as_str(), outcome).await {
                tracing::error!(job_id = %task_id, error = %err, "failed to record job run");
            }
        });

        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = jobs.insert(id, handle) {
            previous.abort();
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Drop for ReservationScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        config::{LabdockConfig, ResourceCaps},
        management::db::{init_db, CORE_DB_MIGRATOR},
        management::{ControlAction, SandboxStatus, UserRole},
        runtime::mock::MockRuntime,
        ContainerRuntime,
    };

    const KIND: &str = "notebook";
    const IMAGE: &str = "jupyter/tensorflow-notebook:latest";

    struct Harness {
        _tmp: tempfile::TempDir,
        runtime: Arc<MockRuntime>,
        store: Store,
        manager: Arc<SandboxManager>,
        scheduler: ReservationScheduler,
    }

    async fn setup() -> Harness {
        let tmp = tempdir().unwrap();
        let pool = init_db(tmp.path().join("labdock.db"), &CORE_DB_MIGRATOR)
            .await
            .unwrap();
        let store = Store::new(pool);
        let runtime = Arc::new(MockRuntime::new());

        let config = LabdockConfig::builder()
            .data_dir(tmp.path().to_path_buf())
            .caps(ResourceCaps::builder().max_cpus(8.0).build())
            .build();

        let manager = Arc::new(SandboxManager::new(
            Some(runtime.clone() as Arc<dyn ContainerRuntime>),
            store.clone(),
            config,
        ));

        let scheduler = ReservationScheduler::new(store.clone(), manager.clone());

        Harness {
            _tmp: tmp,
            runtime,
            store,
            manager,
            scheduler,
        }
    }

    async fn provisioned_user(h: &Harness, username: &str, role: UserRole) -> (i64, i64) {
        let user_id = h
            .store
            .create_user(username, 2.0, 4096, 4096, false, role)
            .await
            .unwrap();
        let user = h.store.require_user(user_id).await.unwrap();
        h.manager.provision(&user, IMAGE, KIND).await.unwrap();
        let sandbox = h.store.get_sandbox_for_user(user_id).await.unwrap().unwrap();
        (user_id, sandbox.id)
    }

    fn minutes(n: i64) -> TimeDelta {
        TimeDelta::minutes(n)
    }

    #[test_log::test(tokio::test)]
    async fn test_reload_is_idempotent() {
        let h = setup().await;
        let (_, sandbox_id) = provisioned_user(&h, "ada", UserRole::Ordinary).await;

        let now = Utc::now();
        h.store
            .create_reservation(sandbox_id, now + minutes(10), now + minutes(20), true)
            .await
            .unwrap();

        assert_eq!(h.scheduler.reload().await.unwrap(), 2);
        let first = h.scheduler.job_ids();

        assert_eq!(h.scheduler.reload().await.unwrap(), 2);
        let second = h.scheduler.job_ids();

        assert_eq!(first, second);
        assert_eq!(h.scheduler.job_count(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn test_reload_skips_past_and_in_progress_windows() {
        let h = setup().await;
        let (_, sandbox_id) = provisioned_user(&h, "ada", UserRole::Ordinary).await;

        let now = Utc::now();
        // Fully past, still in progress, and inactive: all skipped.
        h.store
            .create_reservation(sandbox_id, now - minutes(60), now - minutes(30), true)
            .await
            .unwrap();
        h.store
            .create_reservation(sandbox_id, now - minutes(10), now + minutes(30), true)
            .await
            .unwrap();
        h.store
            .create_reservation(sandbox_id, now + minutes(10), now + minutes(20), false)
            .await
            .unwrap();

        assert_eq!(h.scheduler.reload().await.unwrap(), 0);
        assert_eq!(h.scheduler.job_count(), 0);
    }

    #[test_log::test(tokio::test)]
    async fn test_overlapping_exclusive_windows_earliest_wins() {
        let h = setup().await;
        let (_, first_box) = provisioned_user(&h, "vip1", UserRole::Privileged).await;
        let (_, second_box) = provisioned_user(&h, "vip2", UserRole::Privileged).await;

        let now = Utc::now();
        h.store
            .create_reservation(first_box, now + minutes(10), now + minutes(40), true)
            .await
            .unwrap();
        h.store
            .create_reservation(second_box, now + minutes(20), now + minutes(50), true)
            .await
            .unwrap();

        // Winner gets begin/end/acquire/release, the loser only begin/end.
        assert_eq!(h.scheduler.reload().await.unwrap(), 6);

        let ids = h.scheduler.job_ids();
        assert!(ids.iter().any(|id| id.starts_with(&format!("acquire_{first_box}_"))));
        assert!(!ids.iter().any(|id| id.starts_with(&format!("acquire_{second_box}_"))));
        assert!(ids.iter().any(|id| id.starts_with(&format!("begin_{second_box}_"))));
    }

    #[test_log::test(tokio::test)]
    async fn test_admission_rejects_conflicting_exclusive_window() {
        let h = setup().await;
        let (_, first_box) = provisioned_user(&h, "vip1", UserRole::Privileged).await;
        let (_, second_box) = provisioned_user(&h, "vip2", UserRole::Privileged).await;
        let (_, plain_box) = provisioned_user(&h, "ada", UserRole::Ordinary).await;

        let now = Utc::now();
        h.scheduler
            .create_reservation(first_box, now + minutes(10), now + minutes(40))
            .await
            .unwrap();

        let conflict = h
            .scheduler
            .create_reservation(second_box, now + minutes(30), now + minutes(60))
            .await;
        assert!(matches!(conflict, Err(LabdockError::InvalidReservation(_))));

        // Adjacent windows do not overlap; an ordinary user's overlap is fine.
        h.scheduler
            .create_reservation(second_box, now + minutes(40), now + minutes(60))
            .await
            .unwrap();
        h.scheduler
            .create_reservation(plain_box, now + minutes(15), now + minutes(25))
            .await
            .unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_window_starts_and_stops_sandbox() {
        let h = setup().await;
        let user_id = h
            .store
            .create_user("ada", 2.0, 4096, 4096, false, UserRole::Ordinary)
            .await
            .unwrap();
        let user = h.store.require_user(user_id).await.unwrap();
        h.manager.provision(&user, IMAGE, KIND).await.unwrap();
        h.manager
            .control(&user, ControlAction::Stop, KIND, false)
            .await
            .unwrap();
        let sandbox = h.store.get_sandbox_for_user(user_id).await.unwrap().unwrap();
        assert_eq!(sandbox.status, SandboxStatus::Stopped);

        let now = Utc::now();
        h.store
            .create_reservation(
                sandbox.id,
                now + TimeDelta::milliseconds(250),
                now + TimeDelta::milliseconds(500),
                true,
            )
            .await
            .unwrap();
        assert_eq!(h.scheduler.reload().await.unwrap(), 2);

        tokio::time::sleep(Duration::from_millis(350)).await;
        let sandbox = h.store.get_sandbox_for_user(user_id).await.unwrap().unwrap();
        assert_eq!(sandbox.status, SandboxStatus::Running);
        assert!(h
            .runtime
            .status_of(&sandbox.container_id)
            .unwrap()
            .is_running());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let sandbox = h.store.get_sandbox_for_user(user_id).await.unwrap().unwrap();
        assert_eq!(sandbox.status, SandboxStatus::Stopped);
        assert_eq!(h.store.count_job_runs().await.unwrap(), 2);
    }
}
