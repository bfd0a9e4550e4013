use std::net::TcpListener;

use crate::LabdockResult;

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Allocates an available ephemeral TCP port on the host.
///
/// The port is released immediately, so there is a small window in which
/// another process could claim it before the container runtime binds it.
pub fn free_port() -> LabdockResult<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_port_is_nonzero() {
        let port = free_port().unwrap();
        assert!(port > 0);
    }
}
