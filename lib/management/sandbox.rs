//! Sandbox lifecycle management.
//!
//! The manager owns every sandbox state transition: it is the only component
//! that talks to the container runtime and the only one allowed to mutate a
//! sandbox's runtime-facing fields. The reservation scheduler drives it
//! through [`SandboxManager::start_if_stopped`], [`SandboxManager::stop_if_running`]
//! and the exclusivity operations; the presentation layer drives it through
//! [`SandboxManager::provision`], [`SandboxManager::start_or_resume`],
//! [`SandboxManager::control`] and [`SandboxManager::stats`].

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{
    config::{LabdockConfig, ResourceProfile, ACCESS_TOKEN_LENGTH, NOTEBOOK_CONTAINER_PORT},
    management::{metrics, NewSandbox, Sandbox, SandboxStatus, Store, User},
    utils, ContainerRuntime, ContainerSpec, ImageBuildSpec, LabdockError, LabdockResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Manages the lifecycle of per-user sandboxes against the container runtime.
pub struct SandboxManager {
    /// The runtime boundary. `None` when the runtime was unreachable at
    /// startup; every operation then fails fast with `RuntimeUnavailable`.
    runtime: Option<Arc<dyn ContainerRuntime>>,

    /// The durable user/sandbox/reservation state.
    store: Store,

    /// Host, data directory and resource caps.
    config: LabdockConfig,
}

/// What the owner needs to reach a provisioned sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessInfo {
    /// The full access URL, `http://<host>:<port>/?token=<token>`.
    pub url: String,

    /// The access token embedded in the URL.
    pub token: String,

    /// The published host port.
    pub port: u16,
}

/// An administrative or self-service action on an existing sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    /// Start the container and restore owner self-service restart.
    Start,
    /// Stop the container. An admin-initiated stop also revokes owner
    /// self-service restart.
    Stop,
    /// Remove the container and its record.
    Delete,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl SandboxManager {
    /// Creates a manager.
    ///
    /// Pass `None` for the runtime when it was unreachable at startup to get
    /// a manager in degraded mode.
    pub fn new(
        runtime: Option<Arc<dyn ContainerRuntime>>,
        store: Store,
        config: LabdockConfig,
    ) -> Self {
        if runtime.is_none() {
            tracing::error!("container runtime unavailable, manager starting degraded");
        }

        Self {
            runtime,
            store,
            config,
        }
    }

    /// The store the manager persists into.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The image used when the caller does not pick one.
    pub fn default_image(&self) -> &str {
        self.config.get_default_image()
    }

    /// The container name bound to a (user, kind) pair.
    pub fn container_name(user: &User, kind: &str) -> String {
        format!("{}_{}_{}", kind, user.id, user.username)
    }

    fn runtime(&self) -> LabdockResult<&Arc<dyn ContainerRuntime>> {
        self.runtime
            .as_ref()
            .ok_or(LabdockError::RuntimeUnavailable)
    }

    /// Corrects the persisted sandbox record for a user against runtime
    /// truth before the stored handle is trusted.
    ///
    /// A handle that no longer resolves is authoritative proof the container
    /// was removed out-of-band; the stale record is deleted and `None` is
    /// returned. Every operation that reads a stored handle goes through
    /// here.
    pub async fn reconcile(&self, user_id: i64) -> LabdockResult<Option<Sandbox>> {
        let Some(sandbox) = self.store.get_sandbox_for_user(user_id).await? else {
            return Ok(None);
        };

        if sandbox.container_id.is_empty() {
            tracing::warn!(user_id, "purging sandbox record without a container");
            self.store.delete_sandbox(sandbox.id).await?;
            return Ok(None);
        }

        let runtime = self.runtime()?;
        if runtime.inspect(&sandbox.container_id).await?.is_none() {
            tracing::warn!(
                user_id,
                container_id = %sandbox.container_id,
                "stale sandbox record, container gone; purging"
            );
            self.store.delete_sandbox(sandbox.id).await?;
            return Ok(None);
        }

        Ok(Some(sandbox))
    }

    /// Builds a per-user image from a Dockerfile inside the user's workspace.
    ///
    /// `dockerfile` is the Dockerfile's path relative to the workspace root.
    /// The whole workspace is shipped as the build context and the image is
    /// tagged `user_<id>_<username>:latest`; the returned tag can be passed
    /// straight to [`Self::provision`].
    pub async fn build_image(&self, user: &User, dockerfile: &str) -> LabdockResult<String> {
        let runtime = self.runtime()?;

        utils::ensure_user_dirs(self.config.get_data_dir(), user).await?;
        let workspace = utils::user_workspace_dir(self.config.get_data_dir(), user);
        let context = tokio::task::spawn_blocking(move || utils::tar_dir(&workspace)).await??;

        let tag = format!("user_{}_{}:latest", user.id, user.username);
        let spec = ImageBuildSpec::builder()
            .tag(&tag)
            .dockerfile(dockerfile)
            .context(context)
            .build_args(vec![
                ("USER_ID".to_string(), user.id.to_string()),
                ("USERNAME".to_string(), user.username.clone()),
            ])
            .build();

        runtime.build(&spec).await?;
        tracing::info!(user_id = user.id, tag = %tag, "user image built");

        Ok(tag)
    }

    /// Provisions a fresh sandbox for a user.
    ///
    /// Allocates an ephemeral port, generates a new access token, prepares
    /// the per-user volume directories and creates a container with the
    /// user's current resource profile. On success the record is persisted
    /// with status `running` and the access URL is returned.
    ///
    /// On failure no container stays attached to the user's record: a
    /// container created before the failing step is removed again and the
    /// record is left in status `error`.
    pub async fn provision(
        &self,
        user: &User,
        image: &str,
        kind: &str,
    ) -> LabdockResult<AccessInfo> {
        let runtime = self.runtime()?;

        let profile = ResourceProfile::from_user(user);
        profile.validate(self.config.get_caps())?;

        let port = utils::free_port()?;
        let token = utils::generate_token(ACCESS_TOKEN_LENGTH);
        let dirs = utils::ensure_user_dirs(self.config.get_data_dir(), user).await?;

        let spec = ContainerSpec::builder()
            .name(Self::container_name(user, kind))
            .image(image)
            .envs(vec![
                format!("JUPYTER_TOKEN={}", token),
                "GRANT_SUDO=yes".to_string(),
            ])
            .container_port(NOTEBOOK_CONTAINER_PORT)
            .host_port(port)
            .binds(vec![
                format!("{}:{}", dirs.work.display(), utils::GUEST_WORK_DIR),
                format!("{}:{}:ro", dirs.models.display(), utils::GUEST_MODELS_DIR),
                format!("{}:{}:ro", dirs.data.display(), utils::GUEST_DATA_DIR),
            ])
            .cpu_shares(profile.cpu_shares())
            .memory_bytes(profile.memory_bytes())
            .memswap_bytes(profile.memswap_bytes())
            .gpu(*profile.get_gpu())
            .build();

        let record = NewSandbox {
            user_id: user.id,
            container_id: "",
            kind,
            image,
            status: SandboxStatus::Error,
            token: &token,
            port,
            cpus: *profile.get_cpus(),
            ram_mib: *profile.get_ram_mib() as i64,
            memswap_mib: *profile.get_memswap_mib() as i64,
            gpu: *profile.get_gpu(),
        };

        let container_id = match runtime.create(&spec).await {
            Ok(id) => id,
            Err(err) => {
                tracing::error!(user_id = user.id, error = %err, "container create failed");
                self.store.upsert_sandbox(record).await?;
                return Err(LabdockError::ProvisionFailed(err.to_string()));
            }
        };

        if let Err(err) = runtime.start(&container_id).await {
            tracing::error!(user_id = user.id, error = %err, "container start failed, removing");
            if let Err(cleanup_err) = runtime.remove(&container_id).await {
                tracing::error!(
                    container_id = %container_id,
                    error = %cleanup_err,
                    "cleanup of failed container also failed"
                );
            }
            self.store.upsert_sandbox(record).await?;
            return Err(LabdockError::ProvisionFailed(err.to_string()));
        }

        let persisted = self
            .store
            .upsert_sandbox(NewSandbox {
                container_id: &container_id,
                status: SandboxStatus::Running,
                ..record
            })
            .await;

        if let Err(err) = persisted {
            // The record could not be written, so the container must not
            // outlive this call.
            tracing::error!(user_id = user.id, error = %err, "persist failed, removing container");
            if let Err(cleanup_err) = runtime.remove(&container_id).await {
                tracing::error!(
                    container_id = %container_id,
                    error = %cleanup_err,
                    "cleanup of unpersisted container failed"
                );
            }
            return Err(err);
        }

        tracing::info!(user_id = user.id, container_id = %container_id, port, "sandbox provisioned");

        Ok(AccessInfo {
            url: self.config.access_url(port, &token),
            token,
            port,
        })
    }

    /// Starts an existing sandbox or provisions a new one.
    ///
    /// Idempotent: a sandbox that is already running is left alone and the
    /// stored credentials are returned unchanged, so the access URL survives
    /// restarts. A stale record is purged and provisioning starts over.
    pub async fn start_or_resume(
        &self,
        user: &User,
        image: &str,
        kind: &str,
    ) -> LabdockResult<AccessInfo> {
        let runtime = self.runtime()?;

        if let Some(sandbox) = self.reconcile(user.id).await? {
            let status = runtime.inspect(&sandbox.container_id).await?;

            match status {
                Some(status) if status.is_running() => {
                    tracing::info!(user_id = user.id, "sandbox already running");
                }
                _ => {
                    runtime.start(&sandbox.container_id).await?;
                    self.store
                        .update_sandbox_status(sandbox.id, SandboxStatus::Running)
                        .await?;
                    tracing::info!(user_id = user.id, container_id = %sandbox.container_id, "sandbox resumed");
                }
            }

            return Ok(AccessInfo {
                url: self.config.access_url(sandbox.port as u16, &sandbox.token),
                token: sandbox.token,
                port: sandbox.port as u16,
            });
        }

        self.provision(user, image, kind).await
    }

    /// Applies a control action to the sandbox bound to (user, kind).
    ///
    /// The container is resolved by its naming convention. If it no longer
    /// exists the user's record is purged and the call fails with
    /// `SandboxNotFound` — the runtime is the ground truth.
    pub async fn control(
        &self,
        user: &User,
        action: ControlAction,
        kind: &str,
        acting_as_admin: bool,
    ) -> LabdockResult<()> {
        let runtime = self.runtime()?;
        let name = Self::container_name(user, kind);

        let Some(container_id) = runtime.resolve_name(&name).await? else {
            tracing::warn!(user_id = user.id, container = %name, "container not found, purging record");
            self.store.delete_sandbox_for_user(user.id).await?;
            return Err(LabdockError::SandboxNotFound(name));
        };

        let sandbox = self.store.get_sandbox_for_user(user.id).await?;

        match action {
            ControlAction::Start => {
                runtime.start(&container_id).await?;
                if let Some(sandbox) = sandbox {
                    self.store
                        .update_sandbox_status(sandbox.id, SandboxStatus::Running)
                        .await?;
                    self.store
                        .set_can_be_started_by_owner(sandbox.id, true)
                        .await?;
                }
                tracing::info!(container = %name, "container started");
            }
            ControlAction::Stop => {
                runtime.stop(&container_id).await?;
                if let Some(sandbox) = sandbox {
                    self.store
                        .update_sandbox_status(sandbox.id, SandboxStatus::Stopped)
                        .await?;
                    self.store
                        .set_can_be_started_by_owner(sandbox.id, !acting_as_admin)
                        .await?;
                }
                tracing::info!(container = %name, acting_as_admin, "container stopped");
            }
            ControlAction::Delete => {
                runtime.remove(&container_id).await?;
                self.store.delete_sandbox_for_user(user.id).await?;
                tracing::info!(container = %name, "container and record deleted");
            }
        }

        Ok(())
    }

    /// Reads a usage snapshot for a container.
    ///
    /// Never fails: any read problem is logged and reported as `None`
    /// rather than surfacing partial data.
    pub async fn stats(&self, container_id: &str) -> Option<metrics::SandboxStats> {
        let runtime = match self.runtime() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("stats requested while runtime unavailable");
                return None;
            }
        };

        match runtime.stats(container_id).await {
            Ok(counters) => Some(metrics::sandbox_stats(&counters)),
            Err(err) => {
                tracing::error!(container_id, error = %err, "stats collection failed");
                None
            }
        }
    }

    //----------------------------------------------------------------------------------------------
    // Methods: Scheduler entry points
    //----------------------------------------------------------------------------------------------

    /// Starts a sandbox's container if it is not currently running.
    ///
    /// Returns whether a start was performed. A stale record is purged and
    /// reported as `SandboxNotFound`.
    pub async fn start_if_stopped(&self, sandbox_id: i64) -> LabdockResult<bool> {
        let runtime = self.runtime()?;

        let Some(sandbox) = self.store.get_sandbox(sandbox_id).await? else {
            return Err(LabdockError::SandboxNotFound(sandbox_id.to_string()));
        };

        match runtime.inspect(&sandbox.container_id).await? {
            None => {
                self.store.delete_sandbox(sandbox.id).await?;
                Err(LabdockError::SandboxNotFound(sandbox.container_id))
            }
            Some(status) if status.is_running() => Ok(false),
            Some(_) => {
                runtime.start(&sandbox.container_id).await?;
                self.store
                    .update_sandbox_status(sandbox.id, SandboxStatus::Running)
                    .await?;
                Ok(true)
            }
        }
    }

    /// Stops a sandbox's container if it is currently running.
    ///
    /// Returns whether a stop was performed.
    pub async fn stop_if_running(&self, sandbox_id: i64) -> LabdockResult<bool> {
        let runtime = self.runtime()?;

        let Some(sandbox) = self.store.get_sandbox(sandbox_id).await? else {
            return Err(LabdockError::SandboxNotFound(sandbox_id.to_string()));
        };

        match runtime.inspect(&sandbox.container_id).await? {
            None => {
                self.store.delete_sandbox(sandbox.id).await?;
                Err(LabdockError::SandboxNotFound(sandbox.container_id))
            }
            Some(status) if status.is_running() => {
                runtime.stop(&sandbox.container_id).await?;
                self.store
                    .update_sandbox_status(sandbox.id, SandboxStatus::Stopped)
                    .await?;
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Pauses every running sandbox not owned by the given user and persists
    /// status `paused`.
    ///
    /// The persisted `paused` status is the marker the release side keys on:
    /// sandboxes already stopped are not touched and so will not be resumed.
    /// Best-effort per sandbox; failures are logged and skipped.
    pub async fn suspend_all_except(&self, owner_user_id: i64) -> LabdockResult<usize> {
        let runtime = self.runtime()?;
        let mut paused = 0;

        for sandbox in self.store.list_sandboxes_except_user(owner_user_id).await? {
            if sandbox.container_id.is_empty() {
                continue;
            }

            match runtime.inspect(&sandbox.container_id).await {
                Ok(Some(status)) if status.is_running() => {
                    if let Err(err) = runtime.pause(&sandbox.container_id).await {
                        tracing::error!(
                            sandbox_id = sandbox.id,
                            error = %err,
                            "pause failed during exclusivity acquire"
                        );
                        continue;
                    }
                    self.store
                        .update_sandbox_status(sandbox.id, SandboxStatus::Paused)
                        .await?;
                    paused += 1;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::error!(sandbox_id = sandbox.id, error = %err, "inspect failed during exclusivity acquire");
                }
            }
        }

        Ok(paused)
    }

    /// Unpauses every sandbox whose persisted status is `paused` and
    /// persists status `running`.
    ///
    /// Only sandboxes the acquire side marked are resumed; intentionally
    /// stopped sandboxes stay stopped. Best-effort per sandbox.
    pub async fn resume_paused(&self) -> LabdockResult<usize> {
        let runtime = self.runtime()?;
        let mut resumed = 0;

        for sandbox in self
            .store
            .list_sandboxes_with_status(SandboxStatus::Paused)
            .await?
        {
            if let Err(err) = runtime.unpause(&sandbox.container_id).await {
                tracing::error!(
                    sandbox_id = sandbox.id,
                    error = %err,
                    "unpause failed during exclusivity release"
                );
                continue;
            }

            self.store
                .update_sandbox_status(sandbox.id, SandboxStatus::Running)
                .await?;
            resumed += 1;
        }

        Ok(resumed)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl ControlAction {
    /// The string form used by the presentation layer.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Delete => "delete",
        }
    }
}

impl FromStr for ControlAction {
    type Err = LabdockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Result::Ok(ControlAction::Start),
            "stop" => Result::Ok(ControlAction::Stop),
            "delete" => Result::Ok(ControlAction::Delete),
            _ => Err(LabdockError::custom(anyhow::anyhow!(
                "invalid control action: {s}"
            ))),
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
