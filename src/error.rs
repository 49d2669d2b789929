//! Error types for KNX operations.
//!
//! This module provides structured error types with backtraces and helper
//! methods for error information, organized by category the way most of
//! this crate's fallible operations naturally group.

use std::backtrace::Backtrace;
use std::fmt;

/// Result type alias for KNX operations.
pub type Result<T> = std::result::Result<T, KnxError>;

// =============================================================================
// Error Kind Enums (Internal)
// =============================================================================

/// Protocol error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProtocolErrorKind {
    InvalidFrame,
    InvalidChecksum,
    UnsupportedVersion,
    UnexpectedServiceType,
    PayloadTooLarge,
    InvalidMessageCode,
    InvalidControlField,
    InvalidCemi,
    InvalidApci,
}

/// Connection error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionErrorKind {
    Rejected(u8),
    Timeout,
    Failed,
    Lost,
    ChannelNotFound,
    NoFreeChannels,
    NotConnected,
    AlreadyConnected,
    HeartbeatTimeout,
}

/// Tunneling error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TunnelingErrorKind {
    SequenceViolation,
    AckTimeout,
    ReplyTimeout,
    SessionClosed,
}

/// Transport error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransportErrorKind {
    SendFailed,
    ReceiveFailed,
    BufferTooSmall,
    NotBound,
    SocketError,
}

/// Addressing error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddressingErrorKind {
    InvalidIndividualAddress,
    InvalidGroupAddress,
    OutOfRange,
    RangeInverted,
    ReservedAllZero,
}

/// Bus-scan error variants (internal)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanErrorKind {
    BusUnreachable,
    Cancelled,
}

// =============================================================================
// Main Error Type
// =============================================================================

/// KNX protocol error types.
///
/// This is the main error type returned by all fallible operations in the
/// crate. Each variant wraps a structured sub-error carrying a captured
/// backtrace, following the same shape for every category so call sites
/// can match uniformly on the outer enum and drill into `.kind()` only
/// when they need to branch on the specific failure.
#[derive(Debug)]
pub enum KnxError {
    /// Protocol-related errors (frame parsing, version, etc.)
    Protocol(ProtocolError),
    /// Connection-related errors (connect, disconnect, etc.)
    Connection(ConnectionError),
    /// Tunneling-related errors (sequence, ACK, etc.)
    Tunneling(TunnelingError),
    /// Transport-related errors (socket, send, receive, etc.)
    Transport(TransportError),
    /// Addressing errors (invalid address format, etc.)
    Addressing(AddressingError),
    /// Bus-scan errors (unreachable target, cancellation).
    Scan(ScanError),
    /// I/O error from the underlying socket.
    Io(std::io::Error),
}

// =============================================================================
// Structured Error Types
// =============================================================================

macro_rules! structured_error {
    ($name:ident, $kind:ty) => {
        #[derive(Debug)]
        pub struct $name {
            kind: $kind,
            backtrace: Backtrace,
        }

        impl $name {
            fn new(kind: $kind) -> Self {
                Self {
                    kind,
                    backtrace: Backtrace::capture(),
                }
            }
        }
    };
}

structured_error!(ProtocolError, ProtocolErrorKind);
structured_error!(ConnectionError, ConnectionErrorKind);
structured_error!(TunnelingError, TunnelingErrorKind);
structured_error!(TransportError, TransportErrorKind);
structured_error!(AddressingError, AddressingErrorKind);
structured_error!(ScanError, ScanErrorKind);

impl ProtocolError {
    /// The captured backtrace at the point this error was raised.
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl ConnectionError {
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// If the connection was rejected by the gateway, the status code it sent.
    pub fn rejected_status(&self) -> Option<u8> {
        match self.kind {
            ConnectionErrorKind::Rejected(status) => Some(status),
            _ => None,
        }
    }
}

impl TunnelingError {
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl TransportError {
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl AddressingError {
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

impl ScanError {
    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

// =============================================================================
// Convenience Constructors for KnxError
// =============================================================================

impl KnxError {
    // Protocol errors
    pub(crate) fn invalid_frame() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidFrame))
    }

    pub(crate) fn invalid_checksum() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidChecksum))
    }

    pub(crate) fn unsupported_version() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnsupportedVersion))
    }

    pub(crate) fn unexpected_service_type() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::UnexpectedServiceType))
    }

    pub(crate) fn payload_too_large() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::PayloadTooLarge))
    }

    pub(crate) fn invalid_message_code() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidMessageCode))
    }

    pub(crate) fn invalid_control_field() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidControlField))
    }

    pub(crate) fn malformed_cemi() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidCemi))
    }

    pub(crate) fn malformed_apci() -> Self {
        Self::Protocol(ProtocolError::new(ProtocolErrorKind::InvalidApci))
    }

    // Connection errors
    pub(crate) fn connect_rejected(status: u8) -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Rejected(status)))
    }

    pub(crate) fn connection_timeout() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Timeout))
    }

    pub(crate) fn connection_failed() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Failed))
    }

    pub(crate) fn connection_lost() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::Lost))
    }

    pub(crate) fn not_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NotConnected))
    }

    pub(crate) fn channel_not_found() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::ChannelNotFound))
    }

    pub(crate) fn no_free_channels() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::NoFreeChannels))
    }

    pub(crate) fn already_connected() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::AlreadyConnected))
    }

    pub(crate) fn heartbeat_timeout() -> Self {
        Self::Connection(ConnectionError::new(ConnectionErrorKind::HeartbeatTimeout))
    }

    // Tunneling errors
    pub(crate) fn sequence_violation() -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::SequenceViolation))
    }

    pub(crate) fn ack_timeout() -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::AckTimeout))
    }

    pub(crate) fn reply_timeout() -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::ReplyTimeout))
    }

    pub(crate) fn session_closed() -> Self {
        Self::Tunneling(TunnelingError::new(TunnelingErrorKind::SessionClosed))
    }

    // Transport errors
    pub(crate) fn buffer_too_small() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::BufferTooSmall))
    }

    pub(crate) fn socket_error() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SocketError))
    }

    pub(crate) fn send_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::SendFailed))
    }

    pub(crate) fn receive_failed() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::ReceiveFailed))
    }

    pub(crate) fn not_bound() -> Self {
        Self::Transport(TransportError::new(TransportErrorKind::NotBound))
    }

    // Addressing errors
    pub(crate) fn invalid_group_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidGroupAddress))
    }

    pub(crate) fn invalid_individual_address() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::InvalidIndividualAddress))
    }

    pub(crate) fn address_out_of_range() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::OutOfRange))
    }

    pub(crate) fn range_inverted() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::RangeInverted))
    }

    pub(crate) fn reserved_all_zero() -> Self {
        Self::Addressing(AddressingError::new(AddressingErrorKind::ReservedAllZero))
    }

    // Scan errors
    pub(crate) fn bus_unreachable() -> Self {
        Self::Scan(ScanError::new(ScanErrorKind::BusUnreachable))
    }

    pub(crate) fn cancelled() -> Self {
        Self::Scan(ScanError::new(ScanErrorKind::Cancelled))
    }

    /// Whether this error represents a timeout of any kind (connect, heartbeat, ack, reply).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Connection(ConnectionError {
                kind: ConnectionErrorKind::Timeout | ConnectionErrorKind::HeartbeatTimeout,
                ..
            }) | Self::Tunneling(TunnelingError {
                kind: TunnelingErrorKind::AckTimeout | TunnelingErrorKind::ReplyTimeout,
                ..
            })
        )
    }

    /// Whether this error means the probe's target never answered `T_Connect`.
    pub fn is_bus_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Scan(ScanError {
                kind: ScanErrorKind::BusUnreachable,
                ..
            })
        )
    }
}

impl From<std::io::Error> for KnxError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<tokio::time::error::Elapsed> for KnxError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::connection_timeout()
    }
}

// =============================================================================
// Display Implementation
// =============================================================================

impl fmt::Display for KnxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KnxError::Protocol(e) => write!(f, "protocol error: {:?}", e.kind),
            KnxError::Connection(e) => write!(f, "connection error: {:?}", e.kind),
            KnxError::Tunneling(e) => write!(f, "tunneling error: {:?}", e.kind),
            KnxError::Transport(e) => write!(f, "transport error: {:?}", e.kind),
            KnxError::Addressing(e) => write!(f, "addressing error: {:?}", e.kind),
            KnxError::Scan(e) => write!(f, "scan error: {:?}", e.kind),
            KnxError::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for KnxError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KnxError::Io(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_rejected_carries_status() {
        let err = KnxError::connect_rejected(0x22);
        match err {
            KnxError::Connection(ref e) => assert_eq!(e.rejected_status(), Some(0x22)),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn timeout_classification() {
        assert!(KnxError::connection_timeout().is_timeout());
        assert!(KnxError::ack_timeout().is_timeout());
        assert!(KnxError::reply_timeout().is_timeout());
        assert!(KnxError::heartbeat_timeout().is_timeout());
        assert!(!KnxError::invalid_frame().is_timeout());
    }

    #[test]
    fn bus_unreachable_classification() {
        assert!(KnxError::bus_unreachable().is_bus_unreachable());
        assert!(!KnxError::cancelled().is_bus_unreachable());
    }

    #[test]
    fn display_is_human_readable() {
        let msg = format!("{}", KnxError::invalid_frame());
        assert!(msg.contains("protocol error"));
    }
}
