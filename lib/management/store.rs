//! Repository over the labdock state database.
//!
//! All reads and writes of users, sandboxes, reservations and job run
//! history go through here. Updates are partial: each method touches only
//! the columns it names.

use chrono::{DateTime, Utc};
use sqlx::{Pool, Row, Sqlite};

use crate::{LabdockError, LabdockResult};

use super::models::{Reservation, Sandbox, SandboxStatus, User, UserRole};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The durable record of users, sandboxes and reservations.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

/// The fields persisted when a sandbox is (re)provisioned.
#[derive(Debug, Clone)]
pub struct NewSandbox<'a> {
    /// The owning user.
    pub user_id: i64,
    /// The runtime container identifier, empty while still building.
    pub container_id: &'a str,
    /// The sandbox kind.
    pub kind: &'a str,
    /// The image the container was created from.
    pub image: &'a str,
    /// The lifecycle status to record.
    pub status: SandboxStatus,
    /// The access token.
    pub token: &'a str,
    /// The published host port.
    pub port: u16,
    /// CPU share snapshot.
    pub cpus: f64,
    /// Memory limit snapshot in MiB.
    pub ram_mib: i64,
    /// Memory plus swap limit snapshot in MiB.
    pub memswap_mib: i64,
    /// GPU passthrough snapshot.
    pub gpu: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Store {
    /// Wraps an open connection pool.
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// The underlying pool, for callers that need raw queries.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

impl Store {
    //----------------------------------------------------------------------------------------------
    // Users
    //----------------------------------------------------------------------------------------------

    /// Inserts a user account and returns its id. Account provisioning is
    /// external; this is its write path into the core's state.
    pub async fn create_user(
        &self,
        username: &str,
        cpus: f64,
        ram_mib: i64,
        memswap_mib: i64,
        gpu_access: bool,
        role: UserRole,
    ) -> LabdockResult<i64> {
        let record = sqlx::query(
            r#"
            INSERT INTO users (username, cpus, ram_mib, memswap_mib, gpu_access, role)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(username)
        .bind(cpus)
        .bind(ram_mib)
        .bind(memswap_mib)
        .bind(gpu_access)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.get::<i64, _>("id"))
    }

    /// Fetches a user by id.
    pub async fn get_user(&self, id: i64) -> LabdockResult<Option<User>> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    /// Fetches a user by id, failing if it does not exist.
    pub async fn require_user(&self, id: i64) -> LabdockResult<User> {
        self.get_user(id)
            .await?
            .ok_or(LabdockError::UserNotFound(id))
    }

    /// Lists all users.
    pub async fn list_users(&self) -> LabdockResult<Vec<User>> {
        let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(users)
    }

    /// Sets one user's accessibility flag.
    pub async fn set_user_accessible(&self, id: i64, accessible: bool) -> LabdockResult<()> {
        sqlx::query("UPDATE users SET accessible = ? WHERE id = ?")
            .bind(accessible)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Sets the accessibility flag for every user.
    pub async fn set_all_accessible(&self, accessible: bool) -> LabdockResult<()> {
        sqlx::query("UPDATE users SET accessible = ?")
            .bind(accessible)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Sets the accessibility flag for every user except one.
    pub async fn set_accessible_except(
        &self,
        excluded_user_id: i64,
        accessible: bool,
    ) -> LabdockResult<()> {
        sqlx::query("UPDATE users SET accessible = ? WHERE id != ?")
            .bind(accessible)
            .bind(excluded_user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Updates a user's resource profile fields.
    pub async fn update_user_limits(
        &self,
        id: i64,
        cpus: f64,
        ram_mib: i64,
        memswap_mib: i64,
        gpu_access: bool,
    ) -> LabdockResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET cpus = ?, ram_mib = ?, memswap_mib = ?, gpu_access = ?
            WHERE id = ?
            "#,
        )
        .bind(cpus)
        .bind(ram_mib)
        .bind(memswap_mib)
        .bind(gpu_access)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Sandboxes
    //----------------------------------------------------------------------------------------------

    /// Inserts or replaces the sandbox record for a user and returns its id.
    ///
    /// The UNIQUE constraint on `user_id` keeps this at one record per user.
    pub async fn upsert_sandbox(&self, sandbox: NewSandbox<'_>) -> LabdockResult<i64> {
        let record = sqlx::query(
            r#"
            INSERT INTO sandboxes (
                user_id, container_id, kind, image, status, token, port,
                cpus, ram_mib, memswap_mib, gpu, can_be_started_by_owner, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                container_id = excluded.container_id,
                kind = excluded.kind,
                image = excluded.image,
                status = excluded.status,
                token = excluded.token,
                port = excluded.port,
                cpus = excluded.cpus,
                ram_mib = excluded.ram_mib,
                memswap_mib = excluded.memswap_mib,
                gpu = excluded.gpu
            RETURNING id
            "#,
        )
        .bind(sandbox.user_id)
        .bind(sandbox.container_id)
        .bind(sandbox.kind)
        .bind(sandbox.image)
        .bind(sandbox.status.as_str())
        .bind(sandbox.token)
        .bind(sandbox.port as i64)
        .bind(sandbox.cpus)
        .bind(sandbox.ram_mib)
        .bind(sandbox.memswap_mib)
        .bind(sandbox.gpu)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(record.get::<i64, _>("id"))
    }

    /// Fetches a sandbox by id.
    pub async fn get_sandbox(&self, id: i64) -> LabdockResult<Option<Sandbox>> {
        let sandbox = sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sandbox)
    }

    /// Fetches the sandbox owned by a user, if any.
    pub async fn get_sandbox_for_user(&self, user_id: i64) -> LabdockResult<Option<Sandbox>> {
        let sandbox = sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sandbox)
    }

    /// Lists every sandbox.
    pub async fn list_sandboxes(&self) -> LabdockResult<Vec<Sandbox>> {
        let sandboxes = sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        Ok(sandboxes)
    }

    /// Lists every sandbox not owned by the given user.
    pub async fn list_sandboxes_except_user(&self, user_id: i64) -> LabdockResult<Vec<Sandbox>> {
        let sandboxes =
            sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes WHERE user_id != ? ORDER BY id")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(sandboxes)
    }

    /// Lists every sandbox with the given persisted status.
    pub async fn list_sandboxes_with_status(
        &self,
        status: SandboxStatus,
    ) -> LabdockResult<Vec<Sandbox>> {
        let sandboxes =
            sqlx::query_as::<_, Sandbox>("SELECT * FROM sandboxes WHERE status = ? ORDER BY id")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        Ok(sandboxes)
    }

    /// Updates only a sandbox's status.
    pub async fn update_sandbox_status(
        &self,
        id: i64,
        status: SandboxStatus,
    ) -> LabdockResult<()> {
        sqlx::query("UPDATE sandboxes SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Updates only a sandbox's owner-restart flag.
    pub async fn set_can_be_started_by_owner(
        &self,
        id: i64,
        can_be_started: bool,
    ) -> LabdockResult<()> {
        sqlx::query("UPDATE sandboxes SET can_be_started_by_owner = ? WHERE id = ?")
            .bind(can_be_started)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes a sandbox record by id.
    pub async fn delete_sandbox(&self, id: i64) -> LabdockResult<()> {
        sqlx::query("DELETE FROM sandboxes WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes the sandbox record owned by a user, if any.
    pub async fn delete_sandbox_for_user(&self, user_id: i64) -> LabdockResult<()> {
        sqlx::query("DELETE FROM sandboxes WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Reservations
    //----------------------------------------------------------------------------------------------

    /// Inserts a reservation and returns its id. The `starts_at < ends_at`
    /// invariant is enforced here before the row is written.
    pub async fn create_reservation(
        &self,
        sandbox_id: i64,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        active: bool,
    ) -> LabdockResult<i64> {
        if starts_at >= ends_at {
            return Err(LabdockError::InvalidReservation(format!(
                "window start {starts_at} is not before end {ends_at}"
            )));
        }

        let record = sqlx::query(
            r#"
            INSERT INTO reservations (sandbox_id, starts_at, ends_at, active)
            VALUES (?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(sandbox_id)
        .bind(starts_at)
        .bind(ends_at)
        .bind(active)
        .fetch_one(&self.pool)
        .await?;

        Ok(record.get::<i64, _>("id"))
    }

    /// Lists all active reservations ordered by window start.
    pub async fn list_active_reservations(&self) -> LabdockResult<Vec<Reservation>> {
        let reservations = sqlx::query_as::<_, Reservation>(
            "SELECT * FROM reservations WHERE active = 1 ORDER BY starts_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(reservations)
    }

    /// Soft-enables or soft-disables a reservation.
    pub async fn set_reservation_active(&self, id: i64, active: bool) -> LabdockResult<()> {
        sqlx::query("UPDATE reservations SET active = ? WHERE id = ?")
            .bind(active)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Deletes a reservation.
    pub async fn delete_reservation(&self, id: i64) -> LabdockResult<()> {
        sqlx::query("DELETE FROM reservations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    //----------------------------------------------------------------------------------------------
    // Job run history
    //----------------------------------------------------------------------------------------------

    /// Records one fired scheduler job.
    pub async fn record_job_run(
        &self,
        job_id: &str,
        kind: &str,
        outcome: &str,
    ) -> LabdockResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_runs (job_id, kind, ran_at, outcome)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(job_id)
        .bind(kind)
        .bind(Utc::now())
        .bind(outcome)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Clears the job run history. Called by the scheduler on reload.
    pub async fn clear_job_runs(&self) -> LabdockResult<()> {
        sqlx::query("DELETE FROM job_runs")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Counts the recorded job runs.
    pub async fn count_job_runs(&self) -> LabdockResult<i64> {
        let record = sqlx::query("SELECT COUNT(*) AS n FROM job_runs")
            .fetch_one(&self.pool)
            .await?;

        Ok(record.get::<i64, _>("n"))
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management::db::{init_db, CORE_DB_MIGRATOR};
    use chrono::Duration;
    use tempfile::tempdir;

    async fn test_store() -> (tempfile::TempDir, Store) {
        let tmp = tempdir().unwrap();
        let pool = init_db(tmp.path().join("labdock.db"), &CORE_DB_MIGRATOR)
            .await
            .unwrap();
        (tmp, Store::new(pool))
    }

    fn new_sandbox(user_id: i64) -> NewSandbox<'static> {
        NewSandbox {
            user_id,
            container_id: "cafebabe",
            kind: "notebook",
            image: "jupyter/tensorflow-notebook:latest",
            status: SandboxStatus::Running,
            token: "tok",
            port: 40001,
            cpus: 2.0,
            ram_mib: 4096,
            memswap_mib: 4096,
            gpu: false,
        }
    }

    #[tokio::test]
    async fn test_user_roundtrip_and_accessibility() {
        let (_tmp, store) = test_store().await;

        let a = store
            .create_user("ada", 2.0, 4096, 4096, false, UserRole::Privileged)
            .await
            .unwrap();
        let b = store
            .create_user("ben", 1.0, 2048, 2048, false, UserRole::Ordinary)
            .await
            .unwrap();

        let ada = store.require_user(a).await.unwrap();
        assert_eq!(ada.username, "ada");
        assert!(ada.role.is_privileged());
        assert!(ada.accessible);

        store.set_accessible_except(a, false).await.unwrap();
        assert!(store.require_user(a).await.unwrap().accessible);
        assert!(!store.require_user(b).await.unwrap().accessible);

        store.set_all_accessible(true).await.unwrap();
        assert!(store.require_user(b).await.unwrap().accessible);
    }

    #[tokio::test]
    async fn test_one_sandbox_per_user() {
        let (_tmp, store) = test_store().await;
        let user_id = store
            .create_user("ada", 2.0, 4096, 4096, false, UserRole::Ordinary)
            .await
            .unwrap();

        let first = store.upsert_sandbox(new_sandbox(user_id)).await.unwrap();

        let mut replacement = new_sandbox(user_id);
        replacement.container_id = "deadbeef";
        replacement.port = 40002;
        let second = store.upsert_sandbox(replacement).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.list_sandboxes().await.unwrap().len(), 1);

        let sandbox = store.get_sandbox_for_user(user_id).await.unwrap().unwrap();
        assert_eq!(sandbox.container_id, "deadbeef");
        assert_eq!(sandbox.port, 40002);
    }

    #[tokio::test]
    async fn test_partial_status_update() {
        let (_tmp, store) = test_store().await;
        let user_id = store
            .create_user("ada", 2.0, 4096, 4096, false, UserRole::Ordinary)
            .await
            .unwrap();
        let id = store.upsert_sandbox(new_sandbox(user_id)).await.unwrap();

        store
            .update_sandbox_status(id, SandboxStatus::Paused)
            .await
            .unwrap();

        let sandbox = store.get_sandbox(id).await.unwrap().unwrap();
        assert_eq!(sandbox.status, SandboxStatus::Paused);
        // Untouched columns survive the partial update.
        assert_eq!(sandbox.token, "tok");
        assert_eq!(sandbox.container_id, "cafebabe");
    }

    #[tokio::test]
    async fn test_reservation_window_invariant() {
        let (_tmp, store) = test_store().await;
        let user_id = store
            .create_user("ada", 2.0, 4096, 4096, false, UserRole::Ordinary)
            .await
            .unwrap();
        let sandbox_id = store.upsert_sandbox(new_sandbox(user_id)).await.unwrap();

        let now = Utc::now();
        let err = store
            .create_reservation(sandbox_id, now, now - Duration::minutes(30), true)
            .await;
        assert!(matches!(err, Err(LabdockError::InvalidReservation(_))));

        store
            .create_reservation(sandbox_id, now, now + Duration::minutes(30), true)
            .await
            .unwrap();
        let inactive = store
            .create_reservation(
                sandbox_id,
                now + Duration::hours(1),
                now + Duration::hours(2),
                false,
            )
            .await
            .unwrap();

        let active = store.list_active_reservations().await.unwrap();
        assert_eq!(active.len(), 1);
        assert!(active.iter().all(|r| r.id != inactive));
    }

    #[tokio::test]
    async fn test_job_run_history_clears() {
        let (_tmp, store) = test_store().await;

        store.record_job_run("begin_1_t", "begin", "ok").await.unwrap();
        store.record_job_run("end_1_t", "end", "ok").await.unwrap();
        assert_eq!(store.count_job_runs().await.unwrap(), 2);

        store.clear_job_runs().await.unwrap();
        assert_eq!(store.count_job_runs().await.unwrap(), 0);
    }
}
