//! Utility functions and types.

mod net;
mod path;
mod token;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use net::*;
pub use path::*;
pub use token::*;
