//! Mock transport implementation for testing.
//!
//! This module provides a mock implementation of `AsyncTransport` that can be used
//! in unit tests to simulate network behavior without requiring actual network hardware.
//!
//! ## Example
//!
//! ```rust
//! use knxmap_rs::net::mock_transport::MockTransport;
//! use knxmap_rs::net::transport::AsyncTransport;
//! use std::net::SocketAddrV4;
//!
//! # async fn run() {
//! let mut mock = MockTransport::new();
//!
//! // Program expected responses
//! mock.add_response(vec![0x06, 0x10, 0x02, 0x06]); // CONNECT_RESPONSE
//!
//! let mut buf = [0u8; 512];
//! let (n, _from) = mock.recv_from(&mut buf).await.unwrap();
//! assert_eq!(n, 4);
//! # }
//! ```

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddrV4};

/// Mock transport for testing KNX communication without real network.
///
/// This mock transport allows you to:
/// - Pre-program responses that will be returned by `recv_from()`
/// - Inspect packets sent via `send_to()`
/// - Simulate network errors
/// - Test protocol logic in isolation
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Queue of pre-programmed responses to return from `recv_from()`
    responses: VecDeque<(Vec<u8>, SocketAddrV4)>,
    /// Record of all packets sent via `send_to()`
    sent_packets: Vec<(Vec<u8>, SocketAddrV4)>,
    /// Whether the transport is "ready" (simulates binding)
    ready: bool,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            sent_packets: Vec::new(),
            ready: true,
        }
    }

    /// Add a response that will be returned by the next `recv_from()` call.
    ///
    /// Responses are returned in FIFO order. The reported source endpoint
    /// defaults to `192.168.1.10:3671`; use `add_response_from` to control it.
    pub fn add_response(&mut self, data: Vec<u8>) {
        self.add_response_from(data, SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 3671));
    }

    /// Add a response with a specific source endpoint.
    pub fn add_response_from(&mut self, data: Vec<u8>, from: SocketAddrV4) {
        self.responses.push_back((data, from));
    }

    /// Get all packets that were sent via `send_to()`.
    ///
    /// Returns a slice of `(data, destination)` tuples.
    pub fn sent_packets(&self) -> &[(Vec<u8>, SocketAddrV4)] {
        &self.sent_packets
    }

    /// Get the last packet that was sent, if any.
    pub fn last_sent(&self) -> Option<&(Vec<u8>, SocketAddrV4)> {
        self.sent_packets.last()
    }

    /// Clear all sent packets from the history.
    pub fn clear_sent(&mut self) {
        self.sent_packets.clear();
    }

    /// Clear all pending responses.
    pub fn clear_responses(&mut self) {
        self.responses.clear();
    }

    /// Set whether the transport should report as "ready".
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Check if there are pending responses.
    pub fn has_responses(&self) -> bool {
        !self.responses.is_empty()
    }

    /// Get the number of pending responses.
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }
}

impl AsyncTransport for MockTransport {
    async fn send_to(&mut self, data: &[u8], addr: SocketAddrV4) -> Result<()> {
        self.sent_packets.push((data.to_vec(), addr));
        Ok(())
    }

    async fn recv_from(&mut self, buf: &mut [u8]) -> Result<(usize, SocketAddrV4)> {
        if let Some((data, from)) = self.responses.pop_front() {
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok((len, from))
        } else {
            Err(KnxError::connection_timeout())
        }
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn close(&mut self) {
        self.ready = false;
        self.responses.clear();
    }
}
