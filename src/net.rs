//! Network transport layer for KNXnet/IP communication.

pub mod transport;
pub mod udp_transport;

#[cfg(any(test, feature = "test-util"))]
pub mod mock_transport;
