//! Persisted row types for the labdock state database.

mod reservation;
mod sandbox;
mod user;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use reservation::*;
pub use sandbox::*;
pub use user::*;
