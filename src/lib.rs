#![doc = include_str!("../README.md")]

//! # knxmap-rs
//!
//! A scanner and interactive client for KNXnet/IP, the IP-side transport of
//! the KNX building-automation bus. It locates KNXnet/IP gateways on an IP
//! network ([`scan`]), negotiates tunnelling sessions with them
//! ([`session`]/[`dispatcher`]), and, through those sessions, discovers and
//! fingerprints devices living on the KNX bus behind the gateway
//! ([`bus_scan`]).
//!
//! ## Layout
//!
//! - [`protocol`] -- KNXnet/IP frame, cEMI, and APCI codecs.
//! - [`addressing`] -- individual and group address types.
//! - [`net`] -- the [`net::transport::AsyncTransport`] abstraction and its
//!   `tokio`/mock implementations.
//! - [`session`] -- the CONNECT/heartbeat/DISCONNECT state machine.
//! - [`dispatcher`] -- tunnelled cEMI send/receive over a session.
//! - [`scanner`] -- bus-scan device fingerprinting.
//! - [`discovery`] -- gateway discovery (`SEARCH_REQUEST`/`SEARCH_RESPONSE`).
//! - [`config`] -- scan configuration.
//!
//! Target-range expansion (CIDR hosts, individual-address ranges) is a CLI
//! concern, not library surface -- see `targets` in the `knxmap-rs` binary.
//!
//! This crate reports raw property bytes and mask versions, not decoded
//! engineering units -- interpreting datapoint values is out of scope.

use std::time::Duration;

pub mod addressing;
pub mod config;
pub mod dispatcher;
pub mod discovery;
pub mod error;
pub mod net;
pub mod protocol;
pub mod scanner;
pub mod session;

use addressing::GroupAddress;
use protocol::apci::Apci;
use protocol::cemi::LDataFrame;
use protocol::constants::{CEMIMessageCode, MAX_FRAME_SIZE};

// Re-export commonly used types
pub use addressing::IndividualAddress;
pub use config::{BusScanConfig, KnxMedium, ScanConfig};
pub use discovery::{discover, TargetReport};
pub use dispatcher::Dispatcher;
pub use error::{KnxError, Result};
pub use net::transport::AsyncTransport;
pub use scanner::BusReport;
pub use session::Session;

/// Discover KNXnet/IP gateways on `targets`. Thin wrapper over
/// [`discovery::discover`] kept at the crate root to match the CLI's
/// `discover` subcommand and the public interface's naming.
///
/// # Errors
///
/// Returns an error if the transport fails to bind or send.
pub async fn scan(
    targets: impl IntoIterator<Item = std::net::SocketAddrV4>,
    config: ScanConfig,
    transport: &mut impl AsyncTransport,
) -> Result<Vec<TargetReport>> {
    discovery::discover(targets, config, transport).await
}

/// Probe a range of individual addresses through an established tunnel.
/// Thin wrapper over [`scanner::bus_scan`] kept at the crate root to match
/// the public interface's naming.
///
/// # Errors
///
/// Returns an error only if the underlying session fails outright.
pub async fn bus_scan<T: AsyncTransport + Send + 'static>(
    dispatcher: &Dispatcher<T>,
    addresses: impl IntoIterator<Item = IndividualAddress>,
    config: BusScanConfig,
) -> Result<Vec<BusReport>> {
    scanner::bus_scan(dispatcher, addresses, config).await
}

/// Write a value to a group address through an established tunnel,
/// fire-and-forget (no `A_GroupValue_Response` is awaited).
///
/// `inline_value` carries the payload for DPTs that fit in the 6-bit
/// inline field (e.g. DPT 1.xxx); `extra_data` carries wider payloads
/// (DPT 5.xxx and up), appended after the APCI byte.
///
/// # Errors
///
/// Returns an error if the session is not connected or the write is never
/// acknowledged at the KNXnet/IP level.
pub async fn write_group<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    source: IndividualAddress,
    group: GroupAddress,
    inline_value: u8,
    extra_data: &[u8],
) -> Result<()> {
    let mut ldata_buf = [0u8; MAX_FRAME_SIZE];
    let ldata_len = LDataFrame::build_group(
        source,
        group,
        Apci::GroupValueWrite,
        inline_value,
        extra_data,
        &mut ldata_buf,
    )?;

    let mut cemi_buf = [0u8; MAX_FRAME_SIZE];
    let cemi_len = Dispatcher::<T>::wrap_ldata_req(&ldata_buf[..ldata_len], &mut cemi_buf)?;

    dispatcher.send_cemi_no_reply(&cemi_buf[..cemi_len]).await
}

/// Collect unsolicited inbound cEMI frames (busmonitor/group-monitor
/// style) through an established tunnel, for up to `deadline`.
///
/// Each returned element is a raw cEMI frame (message code onward); the
/// caller decodes it with [`protocol::cemi::CEMIFrame::parse`]. Collection
/// stops early if `limit` frames arrive before `deadline` elapses.
///
/// # Errors
///
/// Returns an error if the session closes while monitoring.
pub async fn monitor<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    limit: usize,
    deadline: Duration,
) -> Result<Vec<Vec<u8>>> {
    let deadline_at = tokio::time::Instant::now() + deadline;
    let mut frames = Vec::new();

    while frames.len() < limit {
        let remaining = deadline_at.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }

        match dispatcher.recv_indication(remaining).await {
            Ok(cemi) => frames.push(cemi),
            Err(e) if e.is_timeout() => break,
            Err(e) => return Err(e),
        }
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use net::mock_transport::MockTransport;
    use protocol::services::{ConnectionHeader, TunnelingAck};
    use session::{Session, SessionConfig};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn test_dispatcher() -> Dispatcher<MockTransport> {
        let transport = MockTransport::new();
        let gateway = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 3671);
        let session =
            Session::new_connected_for_test(transport, gateway, SessionConfig::default(), 9);
        Dispatcher::new(session)
    }

    fn tunneling_ack_bytes(seq: u8) -> Vec<u8> {
        let header = ConnectionHeader::new(9, seq);
        let ack = TunnelingAck::new(header, 0);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    #[tokio::test]
    async fn write_group_sends_one_datagram() {
        let dispatcher = test_dispatcher();
        dispatcher
            .session_mut()
            .await
            .transport_mut()
            .add_response(tunneling_ack_bytes(0));

        let source = IndividualAddress::from(0u16);
        let group = GroupAddress::new(1, 2, 3).unwrap();
        write_group(&dispatcher, source, group, 1, &[])
            .await
            .unwrap();

        assert_eq!(
            dispatcher
                .session_mut()
                .await
                .transport_mut()
                .sent_packets()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn monitor_returns_empty_when_nothing_arrives() {
        let dispatcher = test_dispatcher();
        let frames = monitor(&dispatcher, 5, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(frames.is_empty());
    }
}
