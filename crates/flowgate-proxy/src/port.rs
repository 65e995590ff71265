//! Ephemeral port discovery.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};

/// Asks the OS for a free TCP port on `0.0.0.0`.
///
/// The port is free when this returns but nothing reserves it; bind the
/// real listener promptly, another process may take it in between.
pub fn free_port() -> io::Result<u16> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SocketAddr::from(([0, 0, 0, 0], 0)).into())?;
    socket.listen(1)?;

    let port = socket
        .local_addr()?
        .as_socket()
        .map(|addr| addr.port())
        .ok_or_else(|| io::Error::other("socket has no inet address"))?;

    tracing::debug!("Allocated free port {}", port);
    Ok(port)
}
