//! Listening socket setup.

use crate::error::{Error, Result};
use mio::net::TcpListener;
use std::net::SocketAddr;

/// Create a non-blocking TCP listener with `SO_REUSEADDR` and the given
/// accept backlog.
pub fn bind(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    create_listener(addr, backlog)
        .map(TcpListener::from_std)
        .map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })
}

fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_ephemeral() {
        let listener = bind("127.0.0.1:0".parse().unwrap(), 5).unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bind_conflict_reports_address() {
        let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = first.local_addr().unwrap();
        match bind(addr, 5) {
            Err(Error::Bind { addr: reported, .. }) => assert_eq!(reported, addr.to_string()),
            other => panic!("expected bind error, got {other:?}"),
        }
    }
}
