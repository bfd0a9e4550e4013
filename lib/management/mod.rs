//! Durable state and sandbox lifecycle management.

pub mod db;
pub mod metrics;
mod models;
mod sandbox;
mod store;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use models::*;
pub use sandbox::*;
pub use store::*;
