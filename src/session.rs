//! Tunnelling-connection state machine.
//!
//! A [`Session`] owns one KNXnet/IP tunnel to a gateway: the CONNECT
//! handshake, CONNECTIONSTATE heartbeat, and DISCONNECT teardown, built on
//! the request/response shapes in [`crate::protocol::services`] over an
//! [`AsyncTransport`]. Every round trip borrows `&mut self` for its
//! duration, so at most one request is ever outstanding -- the borrow
//! checker enforces that invariant rather than an explicit lock.
//!
//! [`crate::dispatcher`] drives the actual tunnelled cEMI traffic and reuses
//! the sequence counters and connection state tracked here.

use std::net::SocketAddrV4;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::protocol::constants::{MAX_FRAME_SIZE, ServiceType};
use crate::protocol::frame::{Hpai, KnxnetIpFrame};
use crate::protocol::services::{
    ConnectRequest, ConnectResponse, ConnectionStateRequest, ConnectionStateResponse,
    DisconnectRequest, DisconnectResponse,
};

/// Lifecycle state of a tunnelling connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never connected, or torn down cleanly and ready to reconnect.
    Idle,
    /// CONNECT_REQUEST sent, awaiting CONNECT_RESPONSE.
    Connecting,
    /// Channel assigned, tunnelling traffic may flow.
    Connected,
    /// DISCONNECT_REQUEST sent or received, awaiting teardown to finish.
    Disconnecting,
    /// Torn down; terminal.
    Closed,
    /// Connect handshake exhausted its retries or was rejected; terminal.
    Failed,
}

impl SessionState {
    /// Whether the session can still carry tunnelling traffic.
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the session has reached a terminal state.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Timing knobs for the connect/heartbeat/disconnect handshakes.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// How long to wait for a CONNECT_RESPONSE before retrying.
    pub connect_timeout: Duration,
    /// Number of CONNECT_REQUEST attempts before giving up.
    pub connect_attempts: u8,
    /// Interval between CONNECTIONSTATE heartbeats.
    pub heartbeat_interval: Duration,
    /// How long to wait for a CONNECTIONSTATE_RESPONSE.
    pub heartbeat_timeout: Duration,
    /// Consecutive heartbeat failures that close the session.
    pub heartbeat_max_failures: u8,
    /// How long to wait for a DISCONNECT_RESPONSE before closing anyway.
    pub disconnect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            connect_attempts: 3,
            heartbeat_interval: Duration::from_secs(60),
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_max_failures: 3,
            disconnect_timeout: Duration::from_secs(10),
        }
    }
}

/// A tunnelling connection to a single KNXnet/IP gateway.
///
/// `tx_seq`/`rx_seq` are the 8-bit wrapping tunnelling sequence counters;
/// they live here because the session, not the dispatcher, owns the
/// channel's identity, but it is [`crate::dispatcher::Dispatcher`] that
/// advances them as TUNNELLING_REQUESTs are sent and acknowledged.
#[derive(Debug)]
pub struct Session<T: AsyncTransport> {
    transport: T,
    gateway: SocketAddrV4,
    local_control: Hpai,
    local_data: Hpai,
    channel_id: u8,
    tx_seq: u8,
    rx_seq: u8,
    state: SessionState,
    heartbeat_failures: u8,
    config: SessionConfig,
}

impl<T: AsyncTransport> Session<T> {
    /// Create a new, unconnected session against `gateway`.
    ///
    /// Both local endpoints are reported as `HPAI::UNSPECIFIED`, which
    /// tells the gateway to use NAT mode and reply to the address the
    /// request actually arrived from.
    pub fn new(transport: T, gateway: SocketAddrV4, config: SessionConfig) -> Self {
        Self {
            transport,
            gateway,
            local_control: Hpai::UNSPECIFIED,
            local_data: Hpai::UNSPECIFIED,
            channel_id: 0,
            tx_seq: 0,
            rx_seq: 0,
            state: SessionState::Idle,
            heartbeat_failures: 0,
            config,
        }
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Channel ID assigned by the gateway, valid once connected.
    pub const fn channel_id(&self) -> u8 {
        self.channel_id
    }

    /// Whether tunnelling traffic can currently flow.
    pub const fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// The gateway's control endpoint.
    pub const fn gateway(&self) -> SocketAddrV4 {
        self.gateway
    }

    /// Current send sequence counter.
    pub const fn tx_seq(&self) -> u8 {
        self.tx_seq
    }

    /// Current expected receive sequence counter.
    pub const fn rx_seq(&self) -> u8 {
        self.rx_seq
    }

    pub(crate) const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Consume the current send sequence number and advance it, wrapping
    /// at 256. Used by the dispatcher when building a TUNNELLING_REQUEST.
    pub(crate) fn next_tx_seq(&mut self) -> u8 {
        let seq = self.tx_seq;
        self.tx_seq = self.tx_seq.wrapping_add(1);
        seq
    }

    /// Advance the expected receive sequence, wrapping at 256. Used by the
    /// dispatcher after accepting an inbound TUNNELLING_REQUEST.
    pub(crate) fn bump_rx_seq(&mut self) {
        self.rx_seq = self.rx_seq.wrapping_add(1);
    }

    pub(crate) fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Force the session closed outright, bypassing the disconnect
    /// handshake. Used when a `TUNNELING_REQUEST` goes unacknowledged
    /// after retransmission, since the gateway's sequence state is then
    /// unknown and the tunnel can no longer be trusted.
    pub(crate) fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    #[cfg(test)]
    pub(crate) fn new_connected_for_test(
        transport: T,
        gateway: SocketAddrV4,
        config: SessionConfig,
        channel_id: u8,
    ) -> Self {
        let mut session = Self::new(transport, gateway, config);
        session.channel_id = channel_id;
        session.state = SessionState::Connected;
        session
    }

    /// Establish the tunnel.
    ///
    /// Sends CONNECT_REQUEST, retrying up to `config.connect_attempts`
    /// times on timeout. A non-zero status from the gateway fails
    /// immediately rather than retrying, since retrying would just get
    /// rejected again.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Err(KnxError::already_connected());
        }
        self.state = SessionState::Connecting;

        let request = ConnectRequest::new(self.local_control, self.local_data);
        let mut tx_buf = [0u8; MAX_FRAME_SIZE];
        let len = request.build(&mut tx_buf)?;

        for attempt in 1..=self.config.connect_attempts {
            debug!(attempt, gateway = %self.gateway, "sending CONNECT_REQUEST");
            self.transport.send_to(&tx_buf[..len], self.gateway).await?;

            let mut rx_buf = [0u8; MAX_FRAME_SIZE];
            let received = timeout(
                self.config.connect_timeout,
                self.transport.recv_from(&mut rx_buf),
            )
            .await;

            let (n, _from) = match received {
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) if e.is_timeout() => {
                    warn!(attempt, "CONNECT_REQUEST timed out");
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(attempt, "CONNECT_REQUEST timed out");
                    continue;
                }
            };

            let frame = KnxnetIpFrame::parse(&rx_buf[..n])?;
            if frame.service_type() != ServiceType::ConnectResponse {
                continue;
            }

            let response = ConnectResponse::parse(frame.body())?;
            if !response.is_ok() {
                self.state = SessionState::Failed;
                return Err(KnxError::connect_rejected(response.status));
            }

            self.channel_id = response.channel_id;
            self.tx_seq = 0;
            self.rx_seq = 0;
            self.heartbeat_failures = 0;
            self.state = SessionState::Connected;
            info!(channel_id = self.channel_id, "tunnel connected");
            return Ok(());
        }

        self.state = SessionState::Failed;
        Err(KnxError::connection_timeout())
    }

    /// Run a single CONNECTIONSTATE heartbeat round trip.
    ///
    /// A healthy response resets the failure counter. A timeout or
    /// non-zero status bumps it and, once `heartbeat_max_failures` is
    /// reached, closes the session.
    pub async fn heartbeat(&mut self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(KnxError::not_connected());
        }

        let request = ConnectionStateRequest::new(self.channel_id, self.local_control);
        let mut tx_buf = [0u8; MAX_FRAME_SIZE];
        let len = request.build(&mut tx_buf)?;
        self.transport.send_to(&tx_buf[..len], self.gateway).await?;

        let mut rx_buf = [0u8; MAX_FRAME_SIZE];
        let received = timeout(
            self.config.heartbeat_timeout,
            self.transport.recv_from(&mut rx_buf),
        )
        .await;

        let healthy = match received {
            Ok(Ok((n, _from))) => KnxnetIpFrame::parse(&rx_buf[..n])
                .ok()
                .filter(|frame| frame.service_type() == ServiceType::ConnectionstateResponse)
                .and_then(|frame| ConnectionStateResponse::parse(frame.body()).ok())
                .is_some_and(|response| response.is_ok()),
            _ => false,
        };

        if healthy {
            self.heartbeat_failures = 0;
            return Ok(());
        }

        self.heartbeat_failures += 1;
        warn!(failures = self.heartbeat_failures, "heartbeat failed");
        if self.heartbeat_failures >= self.config.heartbeat_max_failures {
            self.state = SessionState::Closed;
            Err(KnxError::heartbeat_timeout())
        } else {
            Err(KnxError::connection_timeout())
        }
    }

    /// Tear down the tunnel from our side.
    ///
    /// Sends DISCONNECT_REQUEST and waits up to `config.disconnect_timeout`
    /// for the response, but closes unconditionally once that wait is
    /// over -- the gateway may simply never answer.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Disconnecting;

        let request = DisconnectRequest::new(self.channel_id, self.local_control);
        let mut tx_buf = [0u8; MAX_FRAME_SIZE];
        let len = request.build(&mut tx_buf)?;
        self.transport.send_to(&tx_buf[..len], self.gateway).await?;

        let mut rx_buf = [0u8; MAX_FRAME_SIZE];
        let _ = timeout(
            self.config.disconnect_timeout,
            self.transport.recv_from(&mut rx_buf),
        )
        .await;

        self.state = SessionState::Closed;
        info!(channel_id = self.channel_id, "tunnel disconnected");
        Ok(())
    }

    /// Answer a gateway-initiated DISCONNECT_REQUEST and close.
    ///
    /// Called by the dispatcher's receive loop when it demultiplexes an
    /// inbound `DISCONNECT_REQUEST` rather than a `TUNNELING_REQUEST`.
    pub async fn handle_remote_disconnect(&mut self) -> Result<()> {
        let response = DisconnectResponse::new(self.channel_id, 0);
        let mut buf = [0u8; 8];
        let len = response.build(&mut buf)?;
        self.transport.send_to(&buf[..len], self.gateway).await?;
        self.state = SessionState::Closed;
        info!(channel_id = self.channel_id, "tunnel disconnected by gateway");
        Ok(())
    }
}
