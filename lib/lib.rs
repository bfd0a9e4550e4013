//! `labdock` provisions and schedules per-user containerized notebook sandboxes on a shared lab host.
//!
//! # Overview
//!
//! labdock gives each user exactly one sandbox, a Docker container running a
//! notebook image with the user's resource limits applied. It handles:
//! - Sandbox lifecycle management
//! - Per-user resource limits and workspace volumes
//! - Timed reservation windows
//! - Host exclusivity for privileged users
//! - Resource usage reporting
//!
//! # Key Features
//!
//! - **One sandbox per user**: A stable container, access URL and token that
//!   survive stops and restarts
//! - **Reservation windows**: Sandboxes start and stop on schedule without
//!   operator involvement
//! - **Exclusivity protocol**: A privileged user's window pauses everyone
//!   else's sandbox and thaws them afterwards
//! - **Self-healing state**: Records pointing at containers removed
//!   out-of-band are detected and purged
//! - **Degraded mode**: The process stays up when the Docker daemon is
//!   unreachable; runtime operations fail fast
//!
//! # Architecture
//!
//! labdock consists of several key components:
//!
//! - **Runtime**: The boundary to the Docker daemon
//! - **Management**: Durable state, the sandbox lifecycle manager and usage
//!   metrics
//! - **Sched**: The reservation scheduler and its jobs
//!
//! # Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use labdock::{
//!     config::LabdockConfig,
//!     management::{db, SandboxManager, Store},
//!     runtime::DockerRuntime,
//!     sched::ReservationScheduler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     labdock::init_logging();
//!
//!     let config = LabdockConfig::default();
//!     let pool = db::init_db(config.db_path(), &db::CORE_DB_MIGRATOR).await?;
//!     let store = Store::new(pool);
//!
//!     let runtime = match DockerRuntime::connect().await {
//!         Ok(runtime) => Some(Arc::new(runtime) as _),
//!         Err(_) => None,
//!     };
//!
//!     let manager = Arc::new(SandboxManager::new(runtime, store.clone(), config));
//!     let scheduler = ReservationScheduler::new(store, manager);
//!     scheduler.start().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`] - Configuration types and resource profiles
//! - [`management`] - Durable state and sandbox lifecycle management
//! - [`runtime`] - Container runtime boundary
//! - [`sched`] - Reservation scheduling
//! - [`utils`] - Common utilities and helpers

#![warn(missing_docs)]

mod error;
mod log;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub mod config;
pub mod management;
pub mod runtime;
pub mod sched;
pub mod utils;

pub use error::*;
pub use log::*;
pub use runtime::{ContainerRuntime, ContainerSpec, ContainerStatus, ImageBuildSpec, RuntimeCounters};
