use getset::Getters;
use typed_builder::TypedBuilder;

use crate::LabdockResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A request to create one sandbox container.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ContainerSpec {
    /// The container name. Follows the `<kind>_<user_id>_<username>` convention.
    #[builder(setter(transform = |name: impl AsRef<str>| name.as_ref().to_string()))]
    pub(crate) name: String,

    /// The image reference to run.
    #[builder(setter(transform = |image: impl AsRef<str>| image.as_ref().to_string()))]
    pub(crate) image: String,

    /// Environment variables in `KEY=VALUE` form.
    #[builder(default)]
    pub(crate) envs: Vec<String>,

    /// The port the workload listens on inside the container.
    pub(crate) container_port: u16,

    /// The host port the container port is published on.
    pub(crate) host_port: u16,

    /// Volume binds in `host:guest` or `host:guest:ro` form.
    #[builder(default)]
    pub(crate) binds: Vec<String>,

    /// The CPU weight (1024 per core).
    pub(crate) cpu_shares: i64,

    /// The memory limit in bytes.
    pub(crate) memory_bytes: i64,

    /// The memory plus swap limit in bytes.
    pub(crate) memswap_bytes: i64,

    /// Whether to run under the GPU runtime.
    #[builder(default)]
    pub(crate) gpu: bool,
}

/// A request to build one image from a tarred build context.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageBuildSpec {
    /// The tag the built image is stored under.
    #[builder(setter(transform = |tag: impl AsRef<str>| tag.as_ref().to_string()))]
    pub(crate) tag: String,

    /// Path of the Dockerfile relative to the context root.
    #[builder(setter(transform = |path: impl AsRef<str>| path.as_ref().to_string()))]
    pub(crate) dockerfile: String,

    /// The build context as an uncompressed tar archive.
    pub(crate) context: Vec<u8>,

    /// Build arguments in key/value form.
    #[builder(default)]
    pub(crate) build_args: Vec<(String, String)>,
}

/// The observed state of a container, reduced to the transitions the
/// lifecycle manager cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    /// Created but never started.
    Created,
    /// Currently running.
    Running,
    /// Frozen by the exclusivity protocol.
    Paused,
    /// Not running (exited, dead, or being removed).
    Stopped,
}

/// Instantaneous resource counters read from the runtime.
///
/// Every field is always present; a counter the runtime did not report is
/// zero rather than absent, so downstream arithmetic never branches on
/// missing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RuntimeCounters {
    /// Total CPU time consumed by the container, in runtime ticks.
    pub cpu_total_usage: u64,

    /// Total CPU time consumed at the previous sample.
    pub precpu_total_usage: u64,

    /// Total system CPU time at this sample.
    pub system_cpu_usage: u64,

    /// Total system CPU time at the previous sample.
    pub presystem_cpu_usage: u64,

    /// The number of CPUs available to the container.
    pub online_cpus: u32,

    /// Current memory usage in bytes.
    pub memory_usage: u64,

    /// The memory limit in bytes. Zero when unlimited or unreported.
    pub memory_limit: u64,

    /// Bytes received over the container's networks.
    pub rx_bytes: u64,

    /// Bytes transmitted over the container's networks.
    pub tx_bytes: u64,

    /// GPU utilization percent of the device the container runs on. Zero
    /// when no GPU is present or the driver cannot be queried.
    pub gpu_utilization: u32,

    /// GPU memory in bytes held by the container's processes. Zero when no
    /// GPU is present or the driver cannot be queried.
    pub gpu_memory_bytes: u64,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// The boundary to the container runtime.
///
/// The lifecycle manager is the only caller. `inspect` and `resolve_name`
/// returning `None` is authoritative proof that the backing resource is gone
/// and local state referring to it is stale.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Checks that the runtime is reachable.
    async fn ping(&self) -> LabdockResult<()>;

    /// Builds an image from a tarred build context.
    async fn build(&self, spec: &ImageBuildSpec) -> LabdockResult<()>;

    /// Creates a container from the spec and returns its runtime identifier.
    /// The container is created stopped; callers start it separately.
    async fn create(&self, spec: &ContainerSpec) -> LabdockResult<String>;

    /// Starts a container.
    async fn start(&self, handle: &str) -> LabdockResult<()>;

    /// Stops a container.
    async fn stop(&self, handle: &str) -> LabdockResult<()>;

    /// Freezes a running container without discarding process state.
    async fn pause(&self, handle: &str) -> LabdockResult<()>;

    /// Thaws a paused container.
    async fn unpause(&self, handle: &str) -> LabdockResult<()>;

    /// Force-removes a container.
    async fn remove(&self, handle: &str) -> LabdockResult<()>;

    /// Returns the container's status, or `None` if the handle no longer
    /// resolves.
    async fn inspect(&self, handle: &str) -> LabdockResult<Option<ContainerStatus>>;

    /// Resolves a container name to its runtime identifier, or `None` if no
    /// such container exists.
    async fn resolve_name(&self, name: &str) -> LabdockResult<Option<String>>;

    /// Reads instantaneous resource counters for a container.
    async fn stats(&self, handle: &str) -> LabdockResult<RuntimeCounters>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ContainerStatus {
    /// Whether the container is currently running.
    pub fn is_running(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }

    /// Whether the container is frozen.
    pub fn is_paused(&self) -> bool {
        matches!(self, ContainerStatus::Paused)
    }
}
