//! Network transport abstraction for KNXnet/IP communication.
//!
//! This module provides the `AsyncTransport` trait that abstracts the underlying
//! network transport mechanism, enabling:
//! - Testability through mock implementations
//! - Flexibility to support different transport types
//! - Dependency Inversion Principle compliance
//!
//! ## Design Pattern
//!
//! This follows the **Dependency Inversion Principle (DIP)**:
//! - High-level modules (`Session`, `Dispatcher`) depend on abstractions (`AsyncTransport`)
//! - Low-level modules (UDP socket implementations) also depend on the same abstraction
//! - Both can vary independently
//!
//! ## Example
//!
//! ```rust,no_run
//! use knxmap_rs::net::transport::AsyncTransport;
//! use knxmap_rs::net::udp_transport::UdpTransport;
//! use knxmap_rs::net::mock_transport::MockTransport;
//!
//! # async fn run() -> knxmap_rs::error::Result<()> {
//! // Production: a real UDP socket
//! let mut transport = UdpTransport::bind_any().await?;
//!
//! // Testing: a mock transport
//! let mut mock = MockTransport::new();
//! mock.queue_response(vec![0x06, 0x10, 0x02, 0x06]);
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use std::net::SocketAddrV4;

/// Asynchronous network transport abstraction.
///
/// This trait defines the interface for any network transport mechanism
/// that can send and receive UDP-like datagrams. Implementations can be
/// real network sockets or mock objects for testing.
#[allow(async_fn_in_trait)]
pub trait AsyncTransport {
    /// Bind the transport to a local port.
    ///
    /// # Arguments
    ///
    /// * `port` - Local port to bind to (0 = any available port)
    ///
    /// # Errors
    ///
    /// Returns error if the port is already in use or binding fails.
    ///
    /// # Default Implementation
    ///
    /// Default implementation does nothing (no-op). Override if your transport
    /// requires explicit binding before sending/receiving.
    fn bind(&mut self, _port: u16) -> Result<()> {
        Ok(())
    }

    /// Send data to a specific network endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Network is unavailable
    /// - Send buffer is full
    /// - Transport is closed
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()>;

    /// Receive data from the network.
    ///
    /// This method blocks until data is available or an error occurs.
    ///
    /// # Returns
    ///
    /// A tuple of the number of bytes received and the source endpoint.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Receive operation fails
    /// - Buffer is too small
    /// - Transport is closed
    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)>;

    /// The local address this transport is bound to, if known.
    fn local_addr(&self) -> Option<SocketAddrV4> {
        None
    }

    /// Check if the transport is currently connected/ready.
    ///
    /// Default implementation returns `true`. Override if your transport
    /// has connection state to track.
    fn is_ready(&self) -> bool {
        true
    }

    /// Close the transport and release resources.
    ///
    /// Default implementation does nothing. Override if your transport
    /// needs cleanup.
    fn close(&mut self) {
        // Default: no-op
    }
}
