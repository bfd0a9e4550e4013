//! Reservation scheduling.

mod jobs;
mod scheduler;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use jobs::*;
pub use scheduler::*;
