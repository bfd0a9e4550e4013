//! The boundary to the container runtime.
//!
//! The core never talks to the Docker daemon directly; it goes through the
//! [`ContainerRuntime`] trait so the lifecycle manager can be exercised
//! against an in-memory runtime in tests.

mod docker;
mod gpu;
mod traits;

#[cfg(test)]
pub(crate) mod mock;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use docker::*;
pub use traits::*;
