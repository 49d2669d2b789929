//! Production `AsyncTransport` implementation over `tokio::net::UdpSocket`.

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tokio::net::UdpSocket;

/// UDP-backed transport for talking to a KNXnet/IP gateway over the network.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind to an explicit local port (0 picks any available port).
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port)).await?;
        Ok(Self { socket })
    }

    /// Bind to any available local port.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket cannot be bound.
    pub async fn bind_any() -> Result<Self> {
        Self::bind(0).await
    }

    /// Enable sending to broadcast addresses, needed for `SEARCH_REQUEST`
    /// discovery against a subnet broadcast address.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket option cannot be set.
    pub fn set_broadcast(&self, on: bool) -> Result<()> {
        self.socket.set_broadcast(on).map_err(KnxError::from)
    }
}

impl AsyncTransport for UdpTransport {
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()> {
        self.socket.send_to(data, SocketAddr::V4(addr)).await?;
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)> {
        let (n, from) = self.socket.recv_from(buf).await?;
        match from {
            SocketAddr::V4(v4) => Ok((n, v4)),
            SocketAddr::V6(_) => Err(KnxError::invalid_frame()),
        }
    }

    fn local_addr(&self) -> Option<SocketAddrV4> {
        match self.socket.local_addr().ok()? {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_any_assigns_port() {
        let transport = UdpTransport::bind_any().await.unwrap();
        let addr = transport.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_send_recv_roundtrip() {
        let mut a = UdpTransport::bind_any().await.unwrap();
        let mut b = UdpTransport::bind_any().await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(&[1, 2, 3], b_addr).await.unwrap();

        let mut buf = [0u8; 16];
        let (n, _from) = b.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[1, 2, 3]);
    }
}
