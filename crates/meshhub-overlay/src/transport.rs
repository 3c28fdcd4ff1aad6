//! Socket construction for listeners and outbound hub connections.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};

use meshhub_core::Address;

use crate::error::HubError;

#[derive(Debug, Clone)]
pub struct SocketFactory {
    connect_timeout: Duration,
}

impl SocketFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Listening TCP socket with SO_REUSEADDR. Port 0 lets the OS choose.
    pub fn create_server_socket(
        &self,
        bind: IpAddr,
        port: u16,
        backlog: u32,
    ) -> Result<TcpListener, HubError> {
        let addr = SocketAddr::new(bind, port);
        let bind_err = |source| HubError::Bind {
            addr: addr.to_string(),
            source,
        };

        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(bind_err)?;
        socket.set_reuse_address(true).map_err(bind_err)?;
        socket.set_nonblocking(true).map_err(bind_err)?;
        socket.bind(&addr.into()).map_err(bind_err)?;
        socket
            .listen(backlog.min(i32::MAX as u32) as i32)
            .map_err(bind_err)?;

        TcpListener::from_std(socket.into()).map_err(bind_err)
    }

    /// Connect to a hub, giving up after the configured timeout.
    pub async fn create_socket(&self, target: &Address) -> Result<TcpStream, HubError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(target.as_str()))
            .await
            .map_err(|_| HubError::Timeout(self.connect_timeout))??;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

/// Run one handshake step, failing with `HubError::Timeout` past `limit`.
pub(crate) async fn with_timeout<T>(
    limit: Duration,
    step: impl Future<Output = Result<T, HubError>>,
) -> Result<T, HubError> {
    tokio::time::timeout(limit, step)
        .await
        .map_err(|_| HubError::Timeout(limit))?
}

/// Host part to advertise when none is configured.
///
/// A bound unspecified address says nothing to peers, so fall back to the
/// interface the OS would route outward through. No packet is sent.
pub fn detect_host(bind: IpAddr) -> IpAddr {
    if !bind.is_unspecified() {
        return bind;
    }
    let via_udp = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect((Ipv4Addr::new(192, 0, 2, 1), 9))?;
        Ok(socket.local_addr()?.ip())
    };
    match via_udp() {
        Ok(ip) if !ip.is_unspecified() => ip,
        Ok(_) | Err(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
