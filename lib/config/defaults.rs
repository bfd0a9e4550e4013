use std::{path::PathBuf, sync::LazyLock};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default host name used when composing sandbox access URLs.
pub const DEFAULT_SERVER_HOST: &str = "127.0.0.1";

/// The default notebook image used when a user has not picked one.
pub const DEFAULT_NOTEBOOK_IMAGE: &str = "jupyter/tensorflow-notebook:latest";

/// The port the notebook server listens on inside the container.
pub const NOTEBOOK_CONTAINER_PORT: u16 = 8888;

/// The default sandbox kind. Part of the container naming convention.
pub const DEFAULT_SANDBOX_KIND: &str = "notebook";

/// The maximum number of CPU cores a single sandbox may be granted.
pub const DEFAULT_MAX_CPUS: f64 = 16.0;

/// The maximum amount of memory in MiB a single sandbox may be granted.
pub const DEFAULT_MAX_RAM_MIB: u64 = 65_536;

/// The maximum amount of memory plus swap in MiB a single sandbox may be granted.
pub const DEFAULT_MAX_MEMSWAP_MIB: u64 = 131_072;

/// The length of generated sandbox access tokens.
pub const ACCESS_TOKEN_LENGTH: usize = 32;

/// The container runtime name used for GPU passthrough.
pub const GPU_RUNTIME: &str = "nvidia";

/// The filename of the labdock state database.
pub const LABDOCK_DB_FILENAME: &str = "labdock.db";

/// The path where all labdock global data is stored.
pub static DEFAULT_LABDOCK_HOME: LazyLock<PathBuf> =
    LazyLock::new(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".labdock"));
