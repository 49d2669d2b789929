//! Tunnelling dispatcher: cEMI send/receive over an established session.
//!
//! Wraps a [`Session`] and drives the actual tunnelled bus traffic: builds
//! `TUNNELING_REQUEST`s, retransmits on ack timeout, and demultiplexes
//! inbound requests into acks, duplicate-drops, and the specific reply a
//! caller is waiting for. Generalizes the ack-then-forward inbound pattern
//! of the teacher's synchronous tunnel client into an async, deadline-aware
//! request/reply call.
//!
//! A [`Dispatcher`] is a cheap, `Clone`-able handle onto shared state: the
//! session itself is serialized behind a `tokio::sync::Mutex` (only one
//! `TUNNELING_REQUEST` may be unacknowledged at a time, per the wire
//! protocol), but that lock is held only for the build/transmit/ack phase
//! of [`Dispatcher::send_cemi`]. Once a request is ack'd, the caller
//! registers a waiter in a `MatchKey -> oneshot` table and releases the
//! session, so multiple callers (the bus scanner's concurrent probes) can
//! have a device reply outstanding at once instead of blocking each other
//! for the full round trip.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as SyncMutex};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::addressing::IndividualAddress;
use crate::error::{KnxError, Result};
use crate::net::transport::AsyncTransport;
use crate::protocol::apci::Apci;
use crate::protocol::cemi::{CEMIFrame, LDataFrame, Tpci, TpciControl};
use crate::protocol::constants::{CEMIMessageCode, MAX_FRAME_SIZE, ServiceType};
use crate::protocol::frame::KnxnetIpFrame;
use crate::protocol::services::{
    ConnectionHeader, DisconnectRequest, TunnelingAck, TunnelingRequest,
};
use crate::session::{Session, SessionState};

/// How long to wait for a `TUNNELING_ACK` before retransmitting.
const ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Longest slice of time a single caller spends pumping the socket on
/// behalf of every waiter before re-checking whether its own reply has
/// arrived. Bounds how long one probe can "hog" the transport read side.
const PUMP_SLICE: Duration = Duration::from_millis(100);

/// How long to wait on our own reply channel between pump attempts when
/// some other caller currently holds the session lock.
const YIELD_SLICE: Duration = Duration::from_millis(20);

/// Identifies which reply a caller of [`Dispatcher::send_cemi`] is waiting
/// for, since the tunnel carries replies for other in-flight probes too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchKey {
    /// Connection-oriented bus traffic (after `T_Connect`): matched by
    /// source device and the TPCI sequence number of the expected
    /// acknowledgement or numbered-data reply.
    ConnectionOriented {
        remote: IndividualAddress,
        tpci_seq: u8,
    },
    /// Connectionless group reads: matched by source device and the
    /// expected reply APCI.
    Connectionless {
        remote: IndividualAddress,
        expected_apci: Apci,
    },
}

impl MatchKey {
    fn matches(self, frame: &LDataFrame<'_>) -> bool {
        match self {
            Self::ConnectionOriented { remote, tpci_seq } => {
                if frame.source != remote {
                    return false;
                }
                match frame.as_control() {
                    Some(TpciControl::Ack { sequence }) => sequence == tpci_seq,
                    _ => matches!(frame.tpci, Tpci::NumberedData { sequence } if sequence == tpci_seq),
                }
            }
            Self::Connectionless {
                remote,
                expected_apci,
            } => frame.source == remote && frame.apci == expected_apci,
        }
    }
}

/// The matched reply's cEMI payload, owned so it outlives the buffer it
/// was received into.
#[derive(Debug, Clone)]
pub struct ReplyCemi {
    /// Raw cEMI frame bytes (message code onward).
    pub cemi: Vec<u8>,
}

#[derive(Debug)]
struct Inner<T: AsyncTransport> {
    session: AsyncMutex<Session<T>>,
    /// Callers awaiting a specific device reply, registered before their
    /// request is sent so a fast reply can never race ahead of them.
    waiters: SyncMutex<HashMap<MatchKey, oneshot::Sender<ReplyCemi>>>,
    /// Inbound cEMI payloads ack'd and sequence-accepted but not claimed
    /// by any registered waiter; drained by [`Dispatcher::recv_indication`].
    pending: SyncMutex<VecDeque<Vec<u8>>>,
}

/// Drives tunnelled cEMI traffic over an established [`Session`].
///
/// Cloning a `Dispatcher` shares the same underlying session and waiter
/// table (it is a thin handle around an `Arc`); this is how the bus
/// scanner fans a single tunnel out to several concurrently outstanding
/// probes.
#[derive(Debug)]
pub struct Dispatcher<T: AsyncTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: AsyncTransport> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: AsyncTransport> Dispatcher<T> {
    /// Wrap a connected session.
    pub fn new(session: Session<T>) -> Self {
        Self {
            inner: Arc::new(Inner {
                session: AsyncMutex::new(session),
                waiters: SyncMutex::new(HashMap::new()),
                pending: SyncMutex::new(VecDeque::new()),
            }),
        }
    }

    /// Borrow the underlying session, exclusively.
    pub async fn session(&self) -> MutexGuard<'_, Session<T>> {
        self.inner.session.lock().await
    }

    /// Borrow the underlying session mutably. Identical to [`Self::session`];
    /// kept as a separate name to match call sites that mutate through it.
    pub async fn session_mut(&self) -> MutexGuard<'_, Session<T>> {
        self.inner.session.lock().await
    }

    /// Unwrap back into the bare session. Fails if other clones of this
    /// `Dispatcher` are still alive.
    ///
    /// # Errors
    ///
    /// Returns [`KnxError::session_closed`] if this isn't the last handle.
    pub fn into_session(self) -> Result<Session<T>> {
        Arc::try_unwrap(self.inner)
            .map(|inner| inner.session.into_inner())
            .map_err(|_| KnxError::session_closed())
    }

    /// Send one tunnelled cEMI frame and wait for the reply identified by
    /// `match_key`, within `deadline`.
    ///
    /// The `TUNNELING_REQUEST` itself is retransmitted once on a 1s ack
    /// timeout; a second timeout gives up with [`KnxError::ack_timeout`]
    /// and closes the session outright, since an unacknowledged request
    /// leaves the sequence counters in an unknown state for the gateway.
    /// The session is only locked for the transmit-then-ack phase: once
    /// ack'd, this releases it so other concurrently outstanding probes
    /// can send their own requests while this one still awaits its reply.
    pub async fn send_cemi(
        &self,
        cemi_data: &[u8],
        match_key: MatchKey,
        deadline: Duration,
    ) -> Result<ReplyCemi> {
        let (tx, rx) = oneshot::channel();
        if self.register_waiter(match_key, tx) {
            // Already resolved from an unclaimed frame sitting in `pending`.
            return rx.await.map_err(|_| KnxError::reply_timeout());
        }

        let sent = {
            let mut session = self.inner.session.lock().await;
            if !session.is_connected() {
                self.remove_waiter(match_key);
                return Err(KnxError::session_closed());
            }
            self.send_with_retransmit(&mut session, cemi_data).await
        };
        if let Err(e) = sent {
            self.remove_waiter(match_key);
            return Err(e);
        }

        self.wait_for_reply(match_key, rx, deadline).await
    }

    /// Register `tx` for `key`, first checking whether a matching frame
    /// already sits unclaimed in `pending`. Returns `true` if it did (in
    /// which case `tx` has already been consumed and the caller should
    /// simply await its paired receiver).
    fn register_waiter(&self, key: MatchKey, tx: oneshot::Sender<ReplyCemi>) -> bool {
        let mut pending = self.inner.pending.lock().expect("pending mutex poisoned");
        let already_matched = pending.iter().position(|cemi| {
            CEMIFrame::parse(cemi)
                .ok()
                .and_then(|frame| frame.as_ldata().ok())
                .is_some_and(|ldata| key.matches(&ldata))
        });

        if let Some(index) = already_matched {
            let cemi = pending.remove(index).expect("index just found by position");
            drop(pending);
            let _ = tx.send(ReplyCemi { cemi });
            return true;
        }
        drop(pending);

        self.inner
            .waiters
            .lock()
            .expect("waiters mutex poisoned")
            .insert(key, tx);
        false
    }

    fn remove_waiter(&self, key: MatchKey) {
        self.inner
            .waiters
            .lock()
            .expect("waiters mutex poisoned")
            .remove(&key);
    }

    /// Route a just-accepted forwarded cEMI frame to its registered
    /// waiter, or queue it as unclaimed if none matches (yet).
    fn route_forwarded(&self, cemi: Vec<u8>) {
        let matched_key = CEMIFrame::parse(&cemi).ok().and_then(|frame| frame.as_ldata().ok()).and_then(
            |ldata| {
                self.inner
                    .waiters
                    .lock()
                    .expect("waiters mutex poisoned")
                    .keys()
                    .find(|key| key.matches(&ldata))
                    .copied()
            },
        );

        if let Some(key) = matched_key {
            let tx = self
                .inner
                .waiters
                .lock()
                .expect("waiters mutex poisoned")
                .remove(&key);
            if let Some(tx) = tx {
                // Receiver may already have timed out and dropped; that's fine.
                let _ = tx.send(ReplyCemi { cemi });
                return;
            }
        }

        self.inner
            .pending
            .lock()
            .expect("pending mutex poisoned")
            .push_back(cemi);
    }

    /// Wait for `rx` to resolve, taking a turn driving the socket read
    /// loop (in short slices) whenever nobody else currently holds the
    /// session lock, so progress doesn't depend on a single dedicated
    /// reader task.
    async fn wait_for_reply(
        &self,
        match_key: MatchKey,
        mut rx: oneshot::Receiver<ReplyCemi>,
        deadline: Duration,
    ) -> Result<ReplyCemi> {
        let deadline_at = Instant::now() + deadline;
        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.remove_waiter(match_key);
                return Err(KnxError::reply_timeout());
            }

            if let Ok(mut session) = self.inner.session.try_lock() {
                let step = remaining.min(PUMP_SLICE);
                match timeout(step, self.recv_one(&mut session)).await {
                    Ok(Ok(Inbound::RemoteDisconnect)) => {
                        drop(session);
                        self.remove_waiter(match_key);
                        return Err(KnxError::session_closed());
                    }
                    Ok(Ok(_)) | Ok(Err(_)) | Err(_) => {}
                }
            }

            let remaining = deadline_at.saturating_duration_since(Instant::now());
            match timeout(remaining.min(YIELD_SLICE), &mut rx).await {
                Ok(Ok(reply)) => return Ok(reply),
                Ok(Err(_)) => return Err(KnxError::reply_timeout()),
                Err(_) => {}
            }
        }
    }

    async fn send_with_retransmit(&self, session: &mut Session<T>, cemi_data: &[u8]) -> Result<()> {
        let seq = session.next_tx_seq();
        let header = ConnectionHeader::new(session.channel_id(), seq);
        let request = TunnelingRequest::new(header, cemi_data);

        let mut tx_buf = [0u8; MAX_FRAME_SIZE];
        let len = request.build(&mut tx_buf)?;

        for attempt in 0u8..2 {
            let gateway = session.gateway();
            session.transport_mut().send_to(&tx_buf[..len], gateway).await?;

            match timeout(ACK_TIMEOUT, self.wait_for_ack(session, seq)).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) if e.is_timeout() => {
                    warn!(attempt, seq, "TUNNELING_REQUEST ack timed out");
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    warn!(attempt, seq, "TUNNELING_REQUEST ack timed out");
                }
            }
        }

        // Leaves the gateway's sequence state ambiguous; don't keep using it.
        session.close();
        Err(KnxError::ack_timeout())
    }

    /// Receive datagrams until the `TUNNELING_ACK` for `seq` arrives,
    /// processing any other inbound traffic (forwards, duplicates,
    /// remote disconnects) along the way.
    async fn wait_for_ack(&self, session: &mut Session<T>, seq: u8) -> Result<()> {
        loop {
            match self.recv_one(session).await? {
                Inbound::Ack(acked) if acked == seq => return Ok(()),
                Inbound::RemoteDisconnect => return Err(KnxError::session_closed()),
                _ => {}
            }
        }
    }

    /// Receive and classify a single inbound datagram.
    async fn recv_one(&self, session: &mut Session<T>) -> Result<Inbound> {
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let (n, _from) = session.transport_mut().recv_from(&mut buf).await?;
        let frame = KnxnetIpFrame::parse(&buf[..n])?;

        match frame.service_type() {
            ServiceType::TunnellingAck => {
                let ack = TunnelingAck::parse(frame.body())?;
                Ok(Inbound::Ack(ack.connection_header.sequence_counter))
            }
            ServiceType::TunnellingRequest => self.handle_inbound_request(session, frame.body()).await,
            ServiceType::DisconnectRequest => {
                let _ = DisconnectRequest::parse(frame.body())?;
                session.handle_remote_disconnect().await?;
                Ok(Inbound::RemoteDisconnect)
            }
            other => {
                trace!(?other, "ignoring unrelated inbound service");
                Ok(Inbound::Ignored)
            }
        }
    }

    async fn handle_inbound_request(&self, session: &mut Session<T>, body: &[u8]) -> Result<Inbound> {
        let request = TunnelingRequest::parse(body)?;
        let seq = request.connection_header.sequence_counter;
        let rx_seq = session.rx_seq();

        self.send_ack(session, seq).await?;

        if seq == rx_seq {
            session.bump_rx_seq();
            self.route_forwarded(request.cemi_data.to_vec());
            Ok(Inbound::Forwarded)
        } else if seq == rx_seq.wrapping_sub(1) {
            debug!(seq, rx_seq, "dropping duplicate TUNNELING_REQUEST");
            Ok(Inbound::Duplicate)
        } else {
            warn!(seq, rx_seq, "out-of-order TUNNELING_REQUEST ignored");
            Ok(Inbound::OutOfOrder)
        }
    }

    async fn send_ack(&self, session: &mut Session<T>, seq: u8) -> Result<()> {
        let header = ConnectionHeader::new(session.channel_id(), seq);
        let ack = TunnelingAck::new(header, 0);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf)?;
        let gateway = session.gateway();
        session.transport_mut().send_to(&buf[..len], gateway).await
    }

    /// Build and send one tunnelled cEMI frame without waiting for a
    /// reply beyond the ack, for fire-and-forget writes (e.g. the bus
    /// scanner's `T_Disconnect`).
    pub async fn send_cemi_no_reply(&self, cemi_data: &[u8]) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        if !session.is_connected() {
            return Err(KnxError::session_closed());
        }
        self.send_with_retransmit(&mut session, cemi_data).await
    }

    /// Build a complete `L_Data.req` cEMI frame from a pre-built `L_Data`
    /// payload, suitable for [`Dispatcher::send_cemi`]/[`Dispatcher::send_cemi_no_reply`].
    pub fn wrap_ldata_req(ldata: &[u8], buf: &mut [u8]) -> Result<usize> {
        CEMIFrame::build(CEMIMessageCode::LDataReq, ldata, buf)
    }

    /// Wait for the next unsolicited inbound cEMI frame (an `L_Data.ind`
    /// not claimed by any outstanding [`Dispatcher::send_cemi`] call), up
    /// to `deadline`. Used by busmonitor-style group monitoring, where
    /// every inbound frame is of interest rather than a specific reply.
    pub async fn recv_indication(&self, deadline: Duration) -> Result<Vec<u8>> {
        if let Some(cemi) = self.inner.pending.lock().expect("pending mutex poisoned").pop_front() {
            return Ok(cemi);
        }

        let deadline_at = Instant::now() + deadline;
        loop {
            let remaining = deadline_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(KnxError::reply_timeout());
            }

            let mut session = self.inner.session.lock().await;
            match timeout(remaining, self.recv_one(&mut session)).await {
                Ok(Ok(Inbound::RemoteDisconnect)) => return Err(KnxError::session_closed()),
                Ok(Ok(Inbound::Forwarded)) => {
                    drop(session);
                    if let Some(cemi) = self.inner.pending.lock().expect("pending mutex poisoned").pop_front() {
                        return Ok(cemi);
                    }
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) if e.is_timeout() => continue,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(KnxError::reply_timeout()),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Inbound {
    Ack(u8),
    Forwarded,
    Duplicate,
    OutOfOrder,
    RemoteDisconnect,
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addressing::{GroupAddress, IndividualAddress};
    use crate::net::mock_transport::MockTransport;
    use crate::protocol::cemi::LDataFrame;
    use crate::session::SessionConfig;
    use std::net::{Ipv4Addr, SocketAddrV4};

    fn gateway() -> SocketAddrV4 {
        SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 10), 3671)
    }

    fn connected_session(channel_id: u8) -> Session<MockTransport> {
        let transport = MockTransport::new();
        Session::new_connected_for_test(transport, gateway(), SessionConfig::default(), channel_id)
    }

    fn tunneling_ack_bytes(channel_id: u8, seq: u8) -> Vec<u8> {
        let header = ConnectionHeader::new(channel_id, seq);
        let ack = TunnelingAck::new(header, 0);
        let mut buf = [0u8; 16];
        let len = ack.build(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn tunneling_request_bytes(channel_id: u8, seq: u8, cemi: &[u8]) -> Vec<u8> {
        let header = ConnectionHeader::new(channel_id, seq);
        let request = TunnelingRequest::new(header, cemi);
        let mut buf = [0u8; MAX_FRAME_SIZE];
        let len = request.build(&mut buf).unwrap();
        buf[..len].to_vec()
    }

    fn group_response_cemi(source: IndividualAddress, dest: GroupAddress, value: u8) -> Vec<u8> {
        let mut ldata_buf = [0u8; 16];
        let ldata_len = LDataFrame::build_group(
            source,
            dest,
            Apci::GroupValueResponse,
            value,
            &[],
            &mut ldata_buf,
        )
        .unwrap();
        let mut cemi_buf = [0u8; 32];
        let cemi_len =
            Dispatcher::<MockTransport>::wrap_ldata_req(&ldata_buf[..ldata_len], &mut cemi_buf)
                .unwrap();
        cemi_buf[..cemi_len].to_vec()
    }

    #[tokio::test]
    async fn send_cemi_matches_connectionless_reply() {
        let session = connected_session(1);
        let remote = IndividualAddress::new(1, 1, 5).unwrap();
        let group = GroupAddress::new(1, 2, 3).unwrap();

        let dispatcher = Dispatcher::new(session);
        {
            let mut session = dispatcher.session_mut().await;
            session.transport_mut().add_response(tunneling_ack_bytes(1, 0));
            session.transport_mut().add_response(tunneling_request_bytes(
                1,
                0,
                &group_response_cemi(remote, group, 1),
            ));
        }

        let mut req_buf = [0u8; 16];
        let req_len = LDataFrame::build_group(
            IndividualAddress::from(0u16),
            group,
            Apci::GroupValueRead,
            0,
            &[],
            &mut req_buf,
        )
        .unwrap();
        let mut cemi_buf = [0u8; 32];
        let cemi_len = Dispatcher::<MockTransport>::wrap_ldata_req(&req_buf[..req_len], &mut cemi_buf).unwrap();

        let reply = dispatcher
            .send_cemi(
                &cemi_buf[..cemi_len],
                MatchKey::Connectionless {
                    remote,
                    expected_apci: Apci::GroupValueResponse,
                },
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        let frame = CEMIFrame::parse(&reply.cemi).unwrap().as_ldata().unwrap();
        assert_eq!(frame.source, remote);
        assert!(frame.is_group_response());
    }

    #[tokio::test]
    async fn send_cemi_no_reply_acks_on_first_attempt() {
        let session = connected_session(2);
        let dispatcher = Dispatcher::new(session);
        dispatcher
            .session_mut()
            .await
            .transport_mut()
            .add_response(tunneling_ack_bytes(2, 0));

        let remote = IndividualAddress::new(1, 1, 1).unwrap();
        let mut ctrl_buf = [0u8; 8];
        let len = LDataFrame::build_control(
            IndividualAddress::from(0u16),
            remote,
            TpciControl::Connect,
            &mut ctrl_buf,
        )
        .unwrap();
        let mut cemi_buf = [0u8; 16];
        let cemi_len = Dispatcher::<MockTransport>::wrap_ldata_req(&ctrl_buf[..len], &mut cemi_buf).unwrap();

        dispatcher
            .send_cemi_no_reply(&cemi_buf[..cemi_len])
            .await
            .unwrap();

        assert_eq!(dispatcher.session_mut().await.transport_mut().sent_packets().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retransmission_closes_session() {
        let session = connected_session(3);
        let dispatcher = Dispatcher::new(session);

        let mut ctrl_buf = [0u8; 8];
        let remote = IndividualAddress::new(1, 1, 1).unwrap();
        let len = LDataFrame::build_control(
            IndividualAddress::from(0u16),
            remote,
            TpciControl::Disconnect,
            &mut ctrl_buf,
        )
        .unwrap();
        let mut cemi_buf = [0u8; 16];
        let cemi_len = Dispatcher::<MockTransport>::wrap_ldata_req(&ctrl_buf[..len], &mut cemi_buf).unwrap();

        let err = dispatcher
            .send_cemi_no_reply(&cemi_buf[..cemi_len])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), KnxError::ack_timeout().to_string());
        assert_eq!(dispatcher.session().await.state(), SessionState::Closed);
        assert_eq!(dispatcher.session_mut().await.transport_mut().sent_packets().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_send_cemi_calls_do_not_deadlock() {
        let session = connected_session(4);
        let dispatcher = Dispatcher::new(session);
        let remote_a = IndividualAddress::new(1, 1, 1).unwrap();
        let remote_b = IndividualAddress::new(1, 1, 2).unwrap();

        {
            let mut session = dispatcher.session_mut().await;
            session.transport_mut().add_response(tunneling_ack_bytes(4, 0));
            session.transport_mut().add_response(tunneling_request_bytes(
                4,
                0,
                &{
                    let mut ldata = [0u8; 16];
                    let n =
                        LDataFrame::build_control(remote_a, IndividualAddress::from(0u16), TpciControl::Ack { sequence: 0 }, &mut ldata)
                            .unwrap();
                    let mut cemi = [0u8; 32];
                    let len = CEMIFrame::build(CEMIMessageCode::LDataInd, &ldata[..n], &mut cemi).unwrap();
                    cemi[..len].to_vec()
                },
            ));
            session.transport_mut().add_response(tunneling_ack_bytes(4, 1));
            session.transport_mut().add_response(tunneling_request_bytes(
                4,
                1,
                &{
                    let mut ldata = [0u8; 16];
                    let n =
                        LDataFrame::build_control(remote_b, IndividualAddress::from(0u16), TpciControl::Ack { sequence: 0 }, &mut ldata)
                            .unwrap();
                    let mut cemi = [0u8; 32];
                    let len = CEMIFrame::build(CEMIMessageCode::LDataInd, &ldata[..n], &mut cemi).unwrap();
                    cemi[..len].to_vec()
                },
            ));
        }

        let mut buf_a = [0u8; 16];
        let len_a =
            LDataFrame::build_control(IndividualAddress::from(0u16), remote_a, TpciControl::Connect, &mut buf_a).unwrap();
        let mut cemi_a = [0u8; 32];
        let cemi_len_a = Dispatcher::<MockTransport>::wrap_ldata_req(&buf_a[..len_a], &mut cemi_a).unwrap();

        let mut buf_b = [0u8; 16];
        let len_b =
            LDataFrame::build_control(IndividualAddress::from(0u16), remote_b, TpciControl::Connect, &mut buf_b).unwrap();
        let mut cemi_b = [0u8; 32];
        let cemi_len_b = Dispatcher::<MockTransport>::wrap_ldata_req(&buf_b[..len_b], &mut cemi_b).unwrap();

        let dispatcher_b = dispatcher.clone();
        let (a, b) = tokio::join!(
            dispatcher.send_cemi(
                &cemi_a[..cemi_len_a],
                MatchKey::ConnectionOriented { remote: remote_a, tpci_seq: 0 },
                Duration::from_millis(500),
            ),
            dispatcher_b.send_cemi(
                &cemi_b[..cemi_len_b],
                MatchKey::ConnectionOriented { remote: remote_b, tpci_seq: 0 },
                Duration::from_millis(500),
            ),
        );

        assert!(a.is_ok());
        assert!(b.is_ok());
    }
}
