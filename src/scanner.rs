//! Bus scanner: per-address connection-oriented device fingerprinting.
//!
//! Drives the probe protocol from the teacher's synchronous tunnel client
//! generalized to an address range: `T_Connect`, `A_DeviceDescriptor_Read`,
//! optionally `A_Authorize_Request` and a handful of `A_PropertyValue_Read`s,
//! then `T_Disconnect`. Built entirely on [`crate::dispatcher::Dispatcher`].
//!
//! `bus_workers` bounds how many probes may be *outstanding* at once: each
//! probe is its own `tokio::spawn`ed task, admitted through a
//! `tokio::sync::Semaphore` sized to `config.bus_workers`. Only the
//! transmit-then-ack phase of each `TUNNELING_REQUEST` is serialized (the
//! dispatcher's session lock enforces the wire's window-of-1 invariant);
//! the device-reply wait that follows is NOT serialized, so up to
//! `bus_workers` probes can have a reply outstanding at once.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::addressing::IndividualAddress;
use crate::config::{BusScanConfig, KnxMedium};
use crate::dispatcher::{Dispatcher, MatchKey};
use crate::error::Result;
use crate::net::transport::AsyncTransport;
use crate::protocol::apci::Apci;
use crate::protocol::cemi::{CEMIFrame, LDataFrame, TpciControl};
use crate::protocol::constants::MAX_FRAME_SIZE;

/// Object index / property ID pairs read when `read_properties` is set,
/// per the standard KNX Device Object (object 0).
const PROPERTY_SERIAL: (u8, u8) = (0, 11);
const PROPERTY_MANUFACTURER: (u8, u8) = (0, 12);
const PROPERTY_HARDWARE_TYPE: (u8, u8) = (0, 78);
const PROPERTY_PROGRAM_VERSION: (u8, u8) = (0, 13);

/// Properties read from a responsive device's Device Object, raw bytes as
/// returned by `A_PropertyValue_Response` (a lookup table turning these
/// into human-readable manufacturer/hardware names is an external
/// concern, see [`crate::config::KnxMedium`]'s module docs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceProperties {
    /// Device serial number (object 0, property 11).
    pub serial: Option<Vec<u8>>,
    /// Manufacturer ID (object 0, property 12).
    pub manufacturer: Option<Vec<u8>>,
    /// Hardware type (object 0, property 78).
    pub hardware_type: Option<Vec<u8>>,
    /// Program/application version (object 0, property 13).
    pub program_version: Option<Vec<u8>>,
}

/// Result of probing one individual address on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusReport {
    /// The address that was probed.
    pub address: IndividualAddress,
    /// Medium the probe was conducted over (config input, confirmed once
    /// the device responds); `None` if the device never connected.
    pub medium: Option<KnxMedium>,
    /// Raw mask version from `A_DeviceDescriptor_Response`, if received.
    pub mask_version: Option<u16>,
    /// Properties read from the device, if `read_properties` was set and
    /// the device was connected.
    pub properties: Option<DeviceProperties>,
}

impl BusReport {
    fn unresponsive(address: IndividualAddress) -> Self {
        Self {
            address,
            medium: None,
            mask_version: None,
            properties: None,
        }
    }

    /// Whether the device answered `T_Connect`.
    pub const fn is_responsive(&self) -> bool {
        self.medium.is_some()
    }
}

/// Probe every address in `targets` through `dispatcher`, up to
/// `config.bus_workers` at a time.
///
/// Each probe runs in its own task, admitted through a semaphore sized to
/// `bus_workers`; reports are returned in the same order as `targets`
/// regardless of which probe finishes first.
///
/// # Errors
///
/// Returns an error only if the underlying session itself fails (e.g. is
/// closed by a retransmission timeout) or a probe task panics; individual
/// unresponsive or partially-responsive devices are reported as
/// [`BusReport`]s, not errors.
pub async fn bus_scan<T: AsyncTransport + Send + 'static>(
    dispatcher: &Dispatcher<T>,
    targets: impl IntoIterator<Item = IndividualAddress>,
    config: BusScanConfig,
) -> Result<Vec<BusReport>> {
    let targets: Vec<IndividualAddress> = targets.into_iter().collect();
    let semaphore = Arc::new(Semaphore::new(config.bus_workers.max(1)));

    let mut tasks = Vec::with_capacity(targets.len());
    for (index, address) in targets.into_iter().enumerate() {
        let dispatcher = dispatcher.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.push(tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("semaphore is never closed during a scan");
            (index, probe_address(&dispatcher, address, &config).await)
        }));
    }

    let mut reports: Vec<Option<BusReport>> = (0..tasks.len()).map(|_| None).collect();
    for task in tasks {
        let (index, report) = task.await.map_err(|_| crate::error::KnxError::cancelled())?;
        reports[index] = Some(report?);
    }

    Ok(reports
        .into_iter()
        .map(|r| r.expect("every index populated by its probe task above"))
        .collect())
}

/// The scanner's own apparent bus address. Real KNX clients are assigned
/// one by the gateway's tunnelling CRD; lacking that plumbing here, probes
/// are sourced from `0.0.0`, which every cEMI decoder treats as a valid
/// (if unusual) source.
fn scanner_source() -> IndividualAddress {
    IndividualAddress::from(0u16)
}

async fn probe_address<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    address: IndividualAddress,
    config: &BusScanConfig,
) -> Result<BusReport> {
    if !connect(dispatcher, address, config.bus_timeout).await? {
        debug!(%address, "no T_Ack, marking unresponsive");
        return Ok(BusReport::unresponsive(address));
    }

    let mut report = BusReport {
        address,
        medium: Some(config.medium),
        mask_version: None,
        properties: None,
    };
    let mut seq: u8 = 0;

    match send_numbered(
        dispatcher,
        address,
        seq,
        Apci::DeviceDescriptorRead,
        &[],
        config.bus_timeout,
    )
    .await
    {
        Ok(reply) => {
            if reply.len() >= 2 {
                report.mask_version = Some(u16::from_be_bytes([reply[0], reply[1]]));
            }
        }
        Err(e) => warn!(%address, error = %e, "device descriptor read failed"),
    }
    seq = seq.wrapping_add(1);

    if config.read_properties {
        if let Some(key) = config.auth_key {
            seq = authorize(dispatcher, address, seq, key, config.bus_timeout).await;
        }

        let serial = read_property(dispatcher, address, &mut seq, PROPERTY_SERIAL, config.bus_timeout).await;
        let manufacturer =
            read_property(dispatcher, address, &mut seq, PROPERTY_MANUFACTURER, config.bus_timeout).await;
        let hardware_type = read_property(
            dispatcher,
            address,
            &mut seq,
            PROPERTY_HARDWARE_TYPE,
            config.bus_timeout,
        )
        .await;
        let program_version = read_property(
            dispatcher,
            address,
            &mut seq,
            PROPERTY_PROGRAM_VERSION,
            config.bus_timeout,
        )
        .await;
        report.properties = Some(DeviceProperties {
            serial,
            manufacturer,
            hardware_type,
            program_version,
        });
    }

    disconnect(dispatcher, address).await;

    Ok(report)
}

/// Send `T_Connect` and wait for the device's `T_Ack`, up to `timeout`.
/// Returns `Ok(true)` if connected, `Ok(false)` if the device never
/// replied. A non-timeout transport/session error is propagated.
async fn connect<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    address: IndividualAddress,
    timeout: Duration,
) -> Result<bool> {
    let mut ldata_buf = [0u8; 16];
    let ldata_len =
        LDataFrame::build_control(scanner_source(), address, TpciControl::Connect, &mut ldata_buf)?;

    let mut cemi_buf = [0u8; MAX_FRAME_SIZE];
    let cemi_len = Dispatcher::<T>::wrap_ldata_req(&ldata_buf[..ldata_len], &mut cemi_buf)?;

    let match_key = MatchKey::ConnectionOriented {
        remote: address,
        tpci_seq: 0,
    };

    match dispatcher
        .send_cemi(&cemi_buf[..cemi_len], match_key, timeout)
        .await
    {
        Ok(_) => Ok(true),
        Err(e) if e.is_timeout() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Send one connection-oriented numbered-data APDU and wait for its
/// numbered-data reply, returning the reply's application data.
async fn send_numbered<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    address: IndividualAddress,
    seq: u8,
    apci: Apci,
    extra_data: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>> {
    let mut ldata_buf = [0u8; 32];
    let ldata_len = LDataFrame::build_data(
        scanner_source(),
        address,
        seq,
        apci,
        0,
        extra_data,
        &mut ldata_buf,
    )?;

    let mut cemi_buf = [0u8; MAX_FRAME_SIZE];
    let cemi_len = Dispatcher::<T>::wrap_ldata_req(&ldata_buf[..ldata_len], &mut cemi_buf)?;

    let match_key = MatchKey::ConnectionOriented {
        remote: address,
        tpci_seq: seq,
    };

    let reply = dispatcher
        .send_cemi(&cemi_buf[..cemi_len], match_key, timeout)
        .await?;

    let cemi = CEMIFrame::parse(&reply.cemi)?;
    let ldata = cemi.as_ldata()?;
    Ok(ldata.data.to_vec())
}

/// Attempt `A_Authorize_Request`. Returns the next sequence number to use
/// regardless of whether authorization was granted -- a scan continues
/// with unprivileged reads either way.
async fn authorize<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    address: IndividualAddress,
    seq: u8,
    key: u32,
    timeout: Duration,
) -> u8 {
    let extra = key.to_be_bytes();
    if let Err(e) = send_numbered(
        dispatcher,
        address,
        seq,
        Apci::AuthorizeRequest,
        &extra,
        timeout,
    )
    .await
    {
        warn!(%address, error = %e, "authorize request failed");
    }
    seq.wrapping_add(1)
}

/// Read one device-object property. Advances `seq` regardless of outcome.
/// Returns `None` on timeout or a malformed reply rather than failing the
/// whole probe.
async fn read_property<T: AsyncTransport>(
    dispatcher: &Dispatcher<T>,
    address: IndividualAddress,
    seq: &mut u8,
    (object_index, property_id): (u8, u8),
    timeout: Duration,
) -> Option<Vec<u8>> {
    let extra = [object_index, property_id, 0x10, 0x01]; // 1 element, start index 1
    let current_seq = *seq;
    *seq = seq.wrapping_add(1);

    match send_numbered(
        dispatcher,
        address,
        current_seq,
        Apci::PropertyValueRead,
        &extra,
        timeout,
    )
    .await
    {
        Ok(data) if data.len() > 4 => Some(data[4..].to_vec()),
        Ok(_) => None,
        Err(e) => {
            debug!(%address, object_index, property_id, error = %e, "property read failed");
            None
        }
    }
}

/// Send `T_Disconnect`, fire-and-forget. Failures are logged, not
/// propagated: the scan has already collected what it needs from this
/// device, and a lost disconnect only costs the gateway an idle timeout.
async fn disconnect<T: AsyncTransport>(dispatcher: &Dispatcher<T>, address: IndividualAddress) {
    let mut ldata_buf = [0u8; 16];
    let Ok(ldata_len) =
        LDataFrame::build_control(scanner_source(), address, TpciControl::Disconnect, &mut ldata_buf)
    else {
        return;
    };

    let mut cemi_buf = [0u8; MAX_FRAME_SIZE];
    let Ok(cemi_len) = Dispatcher::<T>::wrap_ldata_req(&ldata_buf[..ldata_len], &mut cemi_buf) else {
        return;
    };

    if let Err(e) = dispatcher.send_cemi_no_reply(&cemi_buf[..cemi_len]).await {
        warn!(%address, error = %e, "T_Disconnect failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::mock_transport::MockTransport;
    use crate::protocol::constants::CEMIMessageCode;
    use crate::protocol::services::{ConnectionHeader, TunnelingRequest};
    use crate::session::{Session, SessionConfig};
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn tunneling_request_bytes(seq: u8, cemi: &[u8]) -> Vec<u8> {
        let header = ConnectionHeader::new(7, seq);
        let request = TunnelingRequest::new(header, cemi);
        let mut buf = vec![0u8; 32 + cemi.len()];
        let len = request.build(&mut buf).unwrap();
        buf.truncate(len);
        buf
    }

    fn tunneling_ack_bytes(seq: u8, status: u8) -> Vec<u8> {
        use crate::protocol::services::TunnelingAck;
        let header = ConnectionHeader::new(7, seq);
        let ack = TunnelingAck::new(header, status);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn control_cemi(remote: IndividualAddress, control: TpciControl) -> Vec<u8> {
        let mut ldata = [0u8; 16];
        let n = LDataFrame::build_control(remote, scanner_source(), control, &mut ldata).unwrap();
        let mut cemi = [0u8; 32];
        let len = CEMIFrame::build(CEMIMessageCode::LDataInd, &ldata[..n], &mut cemi).unwrap();
        cemi[..len].to_vec()
    }

    fn descriptor_response_cemi(remote: IndividualAddress, seq: u8, mask: u16) -> Vec<u8> {
        let mut ldata = [0u8; 16];
        let n = LDataFrame::build_data(
            remote,
            scanner_source(),
            seq,
            Apci::DeviceDescriptorResponse,
            0,
            &mask.to_be_bytes(),
            &mut ldata,
        )
        .unwrap();
        let mut cemi = [0u8; 32];
        let len = CEMIFrame::build(CEMIMessageCode::LDataInd, &ldata[..n], &mut cemi).unwrap();
        cemi[..len].to_vec()
    }

    fn test_dispatcher() -> Dispatcher<MockTransport> {
        let transport = MockTransport::new();
        let gateway = SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 3671);
        let session =
            Session::new_connected_for_test(transport, gateway, SessionConfig::default(), 7);
        Dispatcher::new(session)
    }

    #[tokio::test]
    async fn unresponsive_device_reports_no_medium() {
        let dispatcher = test_dispatcher();
        // Ack the TUNNELING_REQUEST carrying T_Connect, but never supply a
        // bus-level T_Ack reply.
        dispatcher
            .session_mut()
            .await
            .transport_mut()
            .add_response(tunneling_ack_bytes(0, 0));

        let address = IndividualAddress::new(1, 1, 2).unwrap();
        let config = BusScanConfig {
            bus_workers: 1,
            bus_timeout: Duration::from_millis(5),
            ..BusScanConfig::default()
        };

        let reports = bus_scan(&dispatcher, [address], config).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].is_responsive());
    }

    #[tokio::test]
    async fn responsive_device_reports_descriptor() {
        let dispatcher = test_dispatcher();
        let address = IndividualAddress::new(1, 1, 1).unwrap();

        {
            let mut session = dispatcher.session_mut().await;
            let transport = session.transport_mut();
            // T_Connect: TUNNELING_ACK, then a T_Ack from the device.
            transport.add_response(tunneling_ack_bytes(0, 0));
            transport.add_response(tunneling_request_bytes(
                0,
                &control_cemi(address, TpciControl::Ack { sequence: 0 }),
            ));

            // Device descriptor read: TUNNELING_ACK, then the response cEMI.
            transport.add_response(tunneling_ack_bytes(1, 0));
            transport.add_response(tunneling_request_bytes(
                1,
                &descriptor_response_cemi(address, 0, 0x07B0),
            ));

            // T_Disconnect (fire-and-forget): just the TUNNELING_ACK.
            transport.add_response(tunneling_ack_bytes(2, 0));
        }

        let config = BusScanConfig {
            bus_workers: 1,
            bus_timeout: Duration::from_millis(50),
            ..BusScanConfig::default()
        };

        let reports = bus_scan(&dispatcher, [address], config).await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_responsive());
        assert_eq!(reports[0].mask_version, Some(0x07B0));
        assert!(reports[0].properties.is_none());
    }

    #[tokio::test]
    async fn bus_scan_respects_worker_limit_and_preserves_order() {
        let dispatcher = test_dispatcher();
        let addr_a = IndividualAddress::new(1, 1, 1).unwrap();
        let addr_b = IndividualAddress::new(1, 1, 2).unwrap();
        let addr_c = IndividualAddress::new(1, 1, 3).unwrap();

        {
            // Every probe times out waiting for a T_Ack; only the
            // TUNNELING_ACK for each T_Connect is ever supplied.
            let mut session = dispatcher.session_mut().await;
            let transport = session.transport_mut();
            for seq in 0..3u8 {
                transport.add_response(tunneling_ack_bytes(seq, 0));
            }
        }

        let config = BusScanConfig {
            bus_workers: 2,
            bus_timeout: Duration::from_millis(20),
            ..BusScanConfig::default()
        };

        let reports = bus_scan(&dispatcher, [addr_a, addr_b, addr_c], config)
            .await
            .unwrap();
        assert_eq!(
            reports.iter().map(|r| r.address).collect::<Vec<_>>(),
            vec![addr_a, addr_b, addr_c]
        );
        assert!(reports.iter().all(|r| !r.is_responsive()));
    }
}
