//! Labdock configuration types and helpers.

use std::path::PathBuf;

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

mod defaults;
mod profile;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The labdock configuration.
///
/// Owned by the process's composition root and handed to the sandbox manager
/// and scheduler at construction time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct LabdockConfig {
    /// The host name or address used when composing sandbox access URLs.
    #[builder(setter(transform = |host: impl AsRef<str>| host.as_ref().to_string()), default = DEFAULT_SERVER_HOST.to_string())]
    pub(crate) server_host: String,

    /// The directory under which per-user workspace directories are created.
    #[builder(default = DEFAULT_LABDOCK_HOME.clone())]
    pub(crate) data_dir: PathBuf,

    /// The notebook image used when a sandbox is provisioned without an
    /// explicit image.
    #[builder(setter(transform = |image: impl AsRef<str>| image.as_ref().to_string()), default = DEFAULT_NOTEBOOK_IMAGE.to_string())]
    pub(crate) default_image: String,

    /// The hard caps a user's resource profile may not exceed.
    #[builder(default)]
    pub(crate) caps: ResourceCaps,
}

/// The hard caps on what any single sandbox may be granted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ResourceCaps {
    /// The maximum number of CPU cores.
    #[builder(default = DEFAULT_MAX_CPUS)]
    pub(crate) max_cpus: f64,

    /// The maximum memory limit in MiB.
    #[builder(default = DEFAULT_MAX_RAM_MIB)]
    pub(crate) max_ram_mib: u64,

    /// The maximum memory plus swap limit in MiB.
    #[builder(default = DEFAULT_MAX_MEMSWAP_MIB)]
    pub(crate) max_memswap_mib: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LabdockConfig {
    /// Composes the access URL handed back to the sandbox owner.
    pub fn access_url(&self, port: u16, token: &str) -> String {
        format!("http://{}:{}/?token={}", self.server_host, port, token)
    }

    /// The path of the sqlite database under the data directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(LABDOCK_DB_FILENAME)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for LabdockConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Default for ResourceCaps {
    fn default() -> Self {
        Self::builder().build()
    }
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use defaults::*;
pub use profile::*;

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
