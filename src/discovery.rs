//! KNXnet/IP gateway discovery (`SEARCH_REQUEST`/`SEARCH_RESPONSE`).
//!
//! Generalizes the teacher's `knx_discovery` module -- which sent one
//! `SEARCH_REQUEST` to a fixed multicast/broadcast pair over an Embassy
//! socket and returned the first reply -- into a connectionless,
//! timeout-bounded collection loop over an arbitrary target list and an
//! [`AsyncTransport`], yielding every distinct gateway that replies.

use std::collections::HashSet;
use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, trace, warn};

use crate::addressing::IndividualAddress;
use crate::config::ScanConfig;
use crate::error::Result;
use crate::net::transport::AsyncTransport;
use crate::protocol::constants::{ServiceType, MAX_FRAME_SIZE};
use crate::protocol::dib::Dib;
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::services::SearchRequest;

/// One discovered gateway, assembled from a `SEARCH_RESPONSE`'s DIBs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetReport {
    /// Gateway host address.
    pub host: SocketAddrV4,
    /// Gateway MAC address.
    pub mac_address: [u8; 6],
    /// Gateway's own individual address on the KNX bus.
    pub knx_address: IndividualAddress,
    /// Device serial number.
    pub device_serial: [u8; 6],
    /// Friendly device name.
    pub friendly_name: String,
    /// Device status byte.
    pub device_status: u8,
    /// KNX medium code, as reported in the `DEVICE_INFO` DIB.
    pub knx_medium: u8,
    /// Project installation identifier.
    pub project_install_identifier: u16,
    /// `(family_id, version)` pairs from the `SUPP_SVC_FAMILIES` DIB.
    pub supported_services: Vec<(u8, u8)>,
}

impl TargetReport {
    fn from_response(host: SocketAddrV4, dibs: &[Dib]) -> Option<Self> {
        let device_info = dibs.iter().find_map(|dib| match dib {
            Dib::DeviceInfo(info) => Some(info),
            _ => None,
        })?;

        let supported_services = dibs
            .iter()
            .find_map(|dib| match dib {
                Dib::SupportedServiceFamilies(families) => Some(
                    families
                        .iter()
                        .map(|f| (f.family_id, f.version))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default();

        Some(Self {
            host,
            mac_address: device_info.device_mac_address,
            knx_address: device_info.knx_individual_address,
            device_serial: device_info.device_serial,
            friendly_name: device_info.friendly_name_str(),
            device_status: device_info.device_status,
            knx_medium: device_info.knx_medium,
            project_install_identifier: device_info.project_install_identifier,
            supported_services,
        })
    }
}

/// Send `SEARCH_REQUEST` to every address in `targets` and collect
/// `SEARCH_RESPONSE`s until `config.timeout` elapses. Duplicate replies
/// from the same gateway (e.g. both a multicast and a unicast target
/// resolving to it) are folded into one report, keyed by the HPAI the
/// gateway reports as its own control endpoint.
///
/// # Errors
///
/// Returns an error if the transport fails to bind or send.
pub async fn discover(
    targets: impl IntoIterator<Item = SocketAddrV4>,
    config: ScanConfig,
    transport: &mut impl AsyncTransport,
) -> Result<Vec<TargetReport>> {
    transport.bind(config.search_port)?;
    let local = transport.local_addr();
    let discovery_endpoint = local.map_or(Hpai::UNSPECIFIED, |addr| {
        Hpai::new(addr.ip().octets(), addr.port())
    });

    let request = SearchRequest::new(discovery_endpoint);
    let mut tx_buf = [0u8; MAX_FRAME_SIZE];
    let len = request.build(&mut tx_buf)?;

    let mut sent = 0usize;
    for target in targets {
        debug!(%target, "sending SEARCH_REQUEST");
        match transport.send_to(&tx_buf[..len], target).await {
            Ok(()) => sent += 1,
            Err(e) => warn!(%target, error = %e, "failed to send SEARCH_REQUEST"),
        }
    }
    if sent == 0 {
        return Ok(Vec::new());
    }

    let deadline = Instant::now() + config.timeout;
    let mut seen = HashSet::new();
    let mut reports = Vec::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        let mut rx_buf = [0u8; MAX_FRAME_SIZE];
        match timeout(remaining, transport.recv_from(&mut rx_buf)).await {
            Ok(Ok((n, from))) => {
                if let Some(report) = parse_search_response(from, &rx_buf[..n]) {
                    if seen.insert(report.host) {
                        reports.push(report);
                    }
                }
            }
            Ok(Err(e)) if e.is_timeout() => continue,
            Ok(Err(e)) => return Err(e),
            Err(_) => break,
        }
    }

    Ok(reports)
}

fn parse_search_response(from: SocketAddrV4, data: &[u8]) -> Option<TargetReport> {
    let frame = KnxnetIpFrame::parse(data).ok()?;
    if frame.service_type() != ServiceType::SearchResponse {
        trace!(?from, service = ?frame.service_type(), "ignoring non-SEARCH_RESPONSE reply");
        return None;
    }

    let response = crate::protocol::services::SearchResponse::parse(frame.body()).ok()?;
    TargetReport::from_response(from, &response.dibs)
}
