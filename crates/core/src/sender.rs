//! The sender state machine.
//!
//! [`Sender`] owns every piece of mutable state: the session table, the
//! packetizer, the pacing clock and the retransmission history. It never
//! blocks and never spawns; work that has to happen later is posted to a
//! [`Scheduler`] and comes back through [`Sender::handle_event`], together
//! with everything the network layer reports. Running it on one task (see
//! [`SenderHandle`](crate::SenderHandle)) serializes all mutation.
//!
//! ## Lifecycle
//!
//! ```text
//! init ──> finish_init ──> InitDone            (UDP, interleaved)
//! init ──> finish_init ──> Connected(s) ──> InitDone   (TCP)
//!
//! queue_packets ──> SendBatch (paced) ──> RTP packets
//! InitDone ──> SendSenderReport every interval while an RTCP path exists
//! transport error ──> SessionDead
//! ```

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::config::SenderConfig;
use crate::error::{Result, SenderError};
use crate::event::{Scheduler, SenderEvent, SenderNotification, TsBatch};
use crate::media::{PacingClock, RtpStats, TS_PACKET_SIZE, TsPacketizer};
use crate::retransmission::{PacketHistory, Retransmitter};
use crate::rtcp::{Nack, PacketType, RtcpWalker, build_compound_report};
use crate::session::{SessionDescriptor, SessionRole, SessionState, SessionTable, TransportMode};
use crate::transport::{NetEvent, NetworkSession, SessionId};

/// Batches dispatched later than this are reported.
const LATE_BATCH_THRESHOLD_US: i64 = 2_000;

/// RTCP sub-packets received, by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RtcpCounters {
    pub sender_reports: u64,
    pub receiver_reports: u64,
    pub source_descriptions: u64,
    pub goodbyes: u64,
    pub application_defined: u64,
    pub transport_feedback: u64,
    pub payload_feedback: u64,
    pub unknown: u64,
}

impl RtcpCounters {
    fn record(&mut self, packet_type: PacketType) {
        let counter = match packet_type {
            PacketType::SenderReport => &mut self.sender_reports,
            PacketType::ReceiverReport => &mut self.receiver_reports,
            PacketType::SourceDescription => &mut self.source_descriptions,
            PacketType::Goodbye => &mut self.goodbyes,
            PacketType::ApplicationDefined => &mut self.application_defined,
            PacketType::TransportFeedback => &mut self.transport_feedback,
            PacketType::PayloadFeedback => &mut self.payload_feedback,
            PacketType::Unknown(_) => &mut self.unknown,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        self.sender_reports
            + self.receiver_reports
            + self.source_descriptions
            + self.goodbyes
            + self.application_defined
            + self.transport_feedback
            + self.payload_feedback
            + self.unknown
    }
}

/// Snapshot of the sender's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Counters reported in sender reports.
    pub rtp: RtpStats,
    pub batches_sent: u64,
    pub sender_reports_sent: u64,
    pub rtcp_received: RtcpCounters,
    /// Generic NACKs addressed to our SSRC.
    pub nacks_received: u64,
    pub packets_retransmitted: u64,
    /// Requested packets that had already left the history.
    pub retransmissions_unavailable: u64,
}

/// One session to open: which role, from where, to where.
#[derive(Debug, Clone, Copy)]
struct Endpoint {
    role: SessionRole,
    local_port: u16,
    remote: SocketAddr,
}

/// MPEG-TS over RTP sender with RTCP reporting and optional NACK-driven
/// retransmission.
pub struct Sender {
    config: SenderConfig,
    network: Box<dyn NetworkSession>,
    scheduler: Box<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    notify: mpsc::UnboundedSender<SenderNotification>,
    descriptor: Option<SessionDescriptor>,
    sessions: SessionTable,
    packetizer: TsPacketizer,
    pacing: PacingClock,
    retransmitter: Option<Retransmitter>,
    sr_pending: bool,
    init_done_sent: bool,
    counters: SenderStats,
}

impl Sender {
    pub fn new(
        config: SenderConfig,
        network: Box<dyn NetworkSession>,
        scheduler: Box<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        notify: mpsc::UnboundedSender<SenderNotification>,
    ) -> Result<Self> {
        config.validate()?;

        let retransmitter = config.retransmission.as_ref().map(Retransmitter::new);
        tracing::debug!(
            ssrc = format_args!("{:#010X}", config.ssrc),
            retransmission = retransmitter.is_some(),
            "sender created"
        );

        Ok(Self {
            packetizer: TsPacketizer::new(config.ssrc),
            config,
            network,
            scheduler,
            clock,
            notify,
            descriptor: None,
            sessions: SessionTable::new(),
            pacing: PacingClock::new(),
            retransmitter,
            sr_pending: false,
            init_done_sent: false,
            counters: SenderStats::default(),
        })
    }

    /// Set up the transport towards the client.
    ///
    /// - UDP binds right away, scanning local port pairs upward from
    ///   [`SenderConfig::base_rtp_port`].
    /// - TCP only records the parameters; the connections are opened by
    ///   [`finish_init`](Self::finish_init).
    /// - Interleaved treats the client ports as channel numbers.
    pub fn init(
        &mut self,
        client_ip: IpAddr,
        client_rtp_port: u16,
        client_rtcp_port: Option<u16>,
        mode: TransportMode,
    ) -> Result<()> {
        if self.descriptor.is_some() {
            return Err(SenderError::AlreadyInitialized);
        }

        let mut descriptor =
            SessionDescriptor::new(mode, client_ip, client_rtp_port, client_rtcp_port);

        match mode {
            TransportMode::TcpInterleaved => {
                descriptor.rtp_channel = Some(channel(client_rtp_port)?);
                descriptor.rtcp_channel = client_rtcp_port.map(channel).transpose()?;
            }
            TransportMode::Tcp => {
                descriptor.local_rtp_port = self.config.tcp_rtp_port;
            }
            TransportMode::Udp => {
                if self.retransmitter.is_some() && client_rtcp_port.is_none() {
                    return Err(SenderError::RtcpRequired);
                }
                descriptor.local_rtp_port = self.bind_udp(&descriptor)?;
            }
        }

        tracing::info!(
            %mode,
            %client_ip,
            client_rtp_port,
            ?client_rtcp_port,
            local_rtp_port = descriptor.local_rtp_port,
            "sender initialized"
        );
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Complete initialization. Non-TCP transports are ready immediately;
    /// TCP opens its connections here and reports
    /// [`SenderNotification::InitDone`] once they are up.
    pub fn finish_init(&mut self) -> Result<()> {
        let descriptor = self
            .descriptor
            .clone()
            .ok_or(SenderError::NotInitialized)?;

        if descriptor.mode != TransportMode::Tcp {
            self.init_done();
            return Ok(());
        }

        if self.sessions.state(SessionRole::Rtp) != SessionState::Unbound {
            return Err(SenderError::AlreadyInitialized);
        }

        let local = descriptor.local_rtp_port;
        let mut plan = vec![Endpoint {
            role: SessionRole::Rtp,
            local_port: local,
            remote: SocketAddr::new(descriptor.client_ip, descriptor.client_rtp_port),
        }];
        if let Some(rtcp_port) = descriptor.client_rtcp_port {
            plan.push(Endpoint {
                role: SessionRole::Rtcp,
                local_port: local
                    .checked_add(1)
                    .ok_or(SenderError::NoPortAvailable { base: local })?,
                remote: SocketAddr::new(descriptor.client_ip, rtcp_port),
            });
        }

        let ids = self.open_all(TransportMode::Tcp, &plan)?;
        for (endpoint, id) in plan.iter().zip(ids) {
            self.sessions.bind(endpoint.role, id);
            self.sessions.connecting(endpoint.role);
        }
        tracing::info!(local_rtp_port = local, "TCP sessions connecting");
        Ok(())
    }

    /// Local RTP port, or 0 when none is bound (interleaved, or before
    /// [`init`](Self::init)).
    pub fn rtp_port(&self) -> u16 {
        self.descriptor
            .as_ref()
            .map(|d| d.local_rtp_port)
            .unwrap_or(0)
    }

    pub fn descriptor(&self) -> Option<&SessionDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn session_state(&self, role: SessionRole) -> SessionState {
        self.sessions.state(role)
    }

    /// The retransmission history, when retransmission is enabled.
    pub fn history(&self) -> Option<&PacketHistory> {
        self.retransmitter.as_ref().map(Retransmitter::history)
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            rtp: self.packetizer.stats(),
            ..self.counters
        }
    }

    /// Queue a batch of whole TS packets for paced sending.
    ///
    /// The batch is due at its presentation-time offset from the first
    /// batch, measured from when the first batch was queued. Late batches
    /// go out immediately.
    pub fn queue_packets(
        &mut self,
        presentation_time_us: i64,
        data: Vec<u8>,
        is_video: bool,
    ) -> Result<()> {
        if self.descriptor.is_none() {
            return Err(SenderError::NotInitialized);
        }
        if data.len() % TS_PACKET_SIZE != 0 {
            return Err(SenderError::InvalidBatch { len: data.len() });
        }
        if data.is_empty() {
            tracing::trace!(presentation_time_us, "empty batch skipped");
            return Ok(());
        }

        let delivery = self
            .pacing
            .schedule(presentation_time_us, self.clock.now_us());

        tracing::trace!(
            presentation_time_us,
            when_us = delivery.when_us,
            delay_us = delivery.delay_us,
            len = data.len(),
            "batch queued"
        );

        self.scheduler.post(
            SenderEvent::SendBatch(TsBatch {
                presentation_time_us,
                data,
                is_video,
                when_us: delivery.when_us,
                delay_us: delivery.delay_us,
            }),
            delivery.delay,
        );
        Ok(())
    }

    /// Arm the sender report timer unless it is already armed or there is
    /// nowhere to send reports.
    pub fn schedule_sender_report(&mut self) {
        if self.sr_pending || !self.has_rtcp_path() {
            return;
        }
        self.sr_pending = true;
        self.scheduler.post(
            SenderEvent::SendSenderReport,
            self.config.sender_report_interval,
        );
    }

    /// Process one event. Events must be delivered in arrival order.
    pub fn handle_event(&mut self, event: SenderEvent) {
        match event {
            SenderEvent::Net(event) => self.on_net_event(event),
            SenderEvent::SendBatch(batch) => self.on_send_batch(batch),
            SenderEvent::SendSenderReport => self.on_send_sender_report(),
        }
    }

    /// Walk a compound RTCP packet and act on each sub-packet.
    ///
    /// A malformed sub-packet ends the walk; the ones before it have
    /// already been handled. Sub-packets with an unsupported version are
    /// skipped and the first such error is returned once the walk is done.
    /// Problems inside a NACK are logged and do not stop the walk.
    pub fn parse_rtcp(&mut self, buffer: &[u8]) -> Result<()> {
        let mut unsupported = None;

        for sub_packet in RtcpWalker::new(buffer) {
            let sub_packet = match sub_packet {
                Ok(sub_packet) => sub_packet,
                Err(err) if err.is_unsupported() => {
                    tracing::debug!(error = %err, "RTCP packet skipped");
                    if unsupported.is_none() {
                        unsupported = Some(err);
                    }
                    continue;
                }
                Err(err) => return Err(err),
            };
            self.counters.rtcp_received.record(sub_packet.packet_type);

            match sub_packet.packet_type {
                PacketType::SenderReport
                | PacketType::ReceiverReport
                | PacketType::SourceDescription
                | PacketType::Goodbye
                | PacketType::ApplicationDefined => {
                    tracing::trace!(
                        packet_type = %sub_packet.packet_type,
                        len = sub_packet.data.len(),
                        "RTCP packet ignored"
                    );
                }
                PacketType::TransportFeedback => {
                    if self.retransmitter.is_none() {
                        tracing::debug!("transport feedback ignored, retransmission disabled");
                    } else if let Err(err) = self.handle_nack(sub_packet.data) {
                        tracing::warn!(error = %err, "NACK not handled");
                    }
                }
                PacketType::PayloadFeedback => {
                    tracing::trace!(
                        fmt = sub_packet.count,
                        data = %hex::encode(sub_packet.data),
                        "payload-specific feedback"
                    );
                }
                PacketType::Unknown(packet_type) => {
                    tracing::warn!(
                        packet_type,
                        len = sub_packet.data.len(),
                        "unknown RTCP packet type"
                    );
                }
            }
        }

        unsupported.map_or(Ok(()), Err)
    }

    /// Destroy every open network session. Timers already posted still
    /// fire but find nothing to send on.
    pub fn shutdown(&mut self) {
        let ids = self.sessions.drain();
        if ids.is_empty() {
            return;
        }
        for id in ids.iter().rev() {
            self.network.destroy_session(*id);
        }
        tracing::info!(sessions = ids.len(), "sender shut down");
    }

    fn bind_udp(&mut self, descriptor: &SessionDescriptor) -> Result<u16> {
        let base = self.config.base_rtp_port;
        let mut local = base;

        loop {
            let plan = self
                .udp_plan(descriptor, local)
                .ok_or(SenderError::NoPortAvailable { base })?;

            match self.open_all(TransportMode::Udp, &plan) {
                Ok(ids) => {
                    for (endpoint, id) in plan.iter().zip(ids) {
                        self.sessions.bind(endpoint.role, id);
                    }
                    return Ok(local);
                }
                Err(err) => {
                    tracing::debug!(port = local, error = %err, "local port set unavailable");
                }
            }

            local = local
                .checked_add(2)
                .ok_or(SenderError::NoPortAvailable { base })?;
        }
    }

    /// Endpoints for the UDP set at local port `local`, or `None` when a
    /// port would fall outside the u16 range.
    ///
    /// The RTCP retransmission session targets client `rtp + 1 + offset`,
    /// not `rtcp + offset`; receivers expect exactly that.
    fn udp_plan(&self, descriptor: &SessionDescriptor, local: u16) -> Option<Vec<Endpoint>> {
        let ip = descriptor.client_ip;
        let client_rtp = descriptor.client_rtp_port;

        let mut plan = vec![Endpoint {
            role: SessionRole::Rtp,
            local_port: local,
            remote: SocketAddr::new(ip, client_rtp),
        }];

        if let Some(client_rtcp) = descriptor.client_rtcp_port {
            plan.push(Endpoint {
                role: SessionRole::Rtcp,
                local_port: local.checked_add(1)?,
                remote: SocketAddr::new(ip, client_rtcp),
            });
        }

        if let Some(rtx) = &self.config.retransmission {
            let offset = rtx.port_offset;
            plan.push(Endpoint {
                role: SessionRole::RtpRetransmission,
                local_port: local.checked_add(offset)?,
                remote: SocketAddr::new(ip, client_rtp.checked_add(offset)?),
            });
            plan.push(Endpoint {
                role: SessionRole::RtcpRetransmission,
                local_port: local.checked_add(1)?.checked_add(offset)?,
                remote: SocketAddr::new(ip, client_rtp.checked_add(1)?.checked_add(offset)?),
            });
        }

        Some(plan)
    }

    /// Open every endpoint in order. On failure, the sessions opened so far
    /// are destroyed again, newest first.
    fn open_all(&mut self, mode: TransportMode, plan: &[Endpoint]) -> Result<Vec<SessionId>> {
        let mut opened = Vec::with_capacity(plan.len());

        for endpoint in plan {
            let result = match mode {
                TransportMode::Tcp => self
                    .network
                    .create_tcp_datagram_session(endpoint.local_port, endpoint.remote),
                _ => self
                    .network
                    .create_udp_session(endpoint.local_port, endpoint.remote),
            };

            match result {
                Ok(id) => opened.push(id),
                Err(err) => {
                    tracing::debug!(
                        role = %endpoint.role,
                        local_port = endpoint.local_port,
                        error = %err,
                        "failed to create session"
                    );
                    for id in opened.into_iter().rev() {
                        self.network.destroy_session(id);
                    }
                    return Err(err);
                }
            }
        }

        Ok(opened)
    }

    fn init_done(&mut self) {
        if self.init_done_sent {
            return;
        }
        self.init_done_sent = true;
        tracing::info!(local_rtp_port = self.rtp_port(), "transport ready");
        self.emit(SenderNotification::InitDone);
        self.schedule_sender_report();
    }

    fn emit(&self, notification: SenderNotification) {
        if self.notify.send(notification).is_err() {
            tracing::trace!("notification receiver dropped");
        }
    }

    fn interleaved_channel(&self, role: SessionRole) -> Option<u8> {
        let descriptor = self.descriptor.as_ref().filter(|d| d.is_interleaved())?;
        match role {
            SessionRole::Rtp => descriptor.rtp_channel,
            SessionRole::Rtcp => descriptor.rtcp_channel,
            _ => None,
        }
    }

    fn has_rtcp_path(&self) -> bool {
        self.sessions.id(SessionRole::Rtcp).is_some()
            || self.interleaved_channel(SessionRole::Rtcp).is_some()
    }

    /// Hand `packet` to the transport for `role`.
    fn transmit(&mut self, role: SessionRole, packet: &[u8]) {
        if let Some(channel) = self.interleaved_channel(role) {
            self.emit(SenderNotification::BinaryData {
                channel,
                data: packet.to_vec(),
            });
            return;
        }

        let Some(id) = self.sessions.id(role) else {
            tracing::trace!(%role, "no session, packet dropped");
            return;
        };
        if let Err(err) = self.network.send_request(id, packet) {
            tracing::warn!(%role, session = %id, error = %err, "send failed");
        }
    }

    fn on_net_event(&mut self, event: NetEvent) {
        match event {
            NetEvent::Datagram { session, data } => match self.sessions.role_of(session) {
                Some(role) if role.carries_rtcp() => {
                    match self.parse_rtcp(&data) {
                        Ok(()) => {}
                        Err(err) if err.is_unsupported() => {
                            tracing::debug!(%role, error = %err, "RTCP sub-packet skipped");
                        }
                        Err(err) => {
                            tracing::warn!(%role, error = %err, "dropping rest of RTCP packet");
                        }
                    }
                }
                Some(role) => {
                    tracing::trace!(%role, len = data.len(), "datagram on RTP session ignored");
                }
                None => {
                    tracing::trace!(session = %session, "datagram for unknown session");
                }
            },
            NetEvent::Connected { session } => self.on_connected(session),
            NetEvent::Error {
                session,
                during_send,
                detail,
            } => self.on_session_error(session, during_send, &detail),
        }
    }

    fn on_connected(&mut self, session: SessionId) {
        let Some(descriptor) = &self.descriptor else {
            tracing::debug!(session = %session, "connect before init ignored");
            return;
        };
        if descriptor.mode != TransportMode::Tcp {
            tracing::warn!(
                session = %session,
                mode = %descriptor.mode,
                "unexpected connect notification"
            );
            return;
        }

        let Some(role) = self.sessions.connected(session) else {
            tracing::debug!(session = %session, "connect for unknown session ignored");
            return;
        };
        tracing::info!(%role, "session connected");

        let rtcp_ready = descriptor.client_rtcp_port.is_none()
            || self.sessions.is_connected(SessionRole::Rtcp);
        if self.sessions.is_connected(SessionRole::Rtp) && rtcp_ready {
            self.init_done();
        }
    }

    fn on_session_error(&mut self, session: SessionId, during_send: bool, detail: &str) {
        let Some(role) = self.sessions.role_of(session) else {
            tracing::debug!(session = %session, detail, "error on stale session ignored");
            return;
        };

        if role.carries_rtp() && !during_send {
            tracing::debug!(%role, detail, "receive error on RTP session suppressed");
            return;
        }

        tracing::error!(%role, session = %session, during_send, detail, "network session failed");
        self.network.destroy_session(session);
        self.sessions.kill(session);
        self.emit(SenderNotification::SessionDead);
    }

    fn on_send_batch(&mut self, batch: TsBatch) {
        let now_us = self.clock.now_us();
        let late_us = now_us - batch.when_us;

        tracing::trace!(
            presentation_time_us = batch.presentation_time_us,
            is_video = batch.is_video,
            when_us = batch.when_us,
            delay_us = batch.delay_us,
            late_us,
            "dispatching batch"
        );
        if late_us > LATE_BATCH_THRESHOLD_US {
            tracing::warn!(
                late_ms = late_us as f64 / 1000.0,
                is_video = batch.is_video,
                "batch sent late"
            );
        }

        let count = batch.data.len() / TS_PACKET_SIZE;
        for (i, ts_packet) in batch.data.chunks_exact(TS_PACKET_SIZE).enumerate() {
            let flush = i + 1 == count;
            let now_us = self.clock.now_us();
            if let Some(sequence) = self.packetizer.append_ts_data(ts_packet, true, flush, now_us)
            {
                self.send_rtp_packet(sequence);
            }
        }

        self.counters.batches_sent += 1;
    }

    /// Send the packet the packetizer just flushed, file it in the history
    /// and give the packetizer its next buffer.
    fn send_rtp_packet(&mut self, sequence: u16) {
        let packet = self.packetizer.take_packet();
        self.transmit(SessionRole::Rtp, &packet);

        let recycled = match self.retransmitter.as_mut() {
            Some(retransmitter) => retransmitter.record(sequence, packet),
            None => Some(packet),
        };
        self.packetizer.install(recycled);
    }

    fn on_send_sender_report(&mut self) {
        self.sr_pending = false;

        if !self.has_rtcp_path() {
            tracing::debug!("sender report timer fired without RTCP path");
            return;
        }

        let report = build_compound_report(
            self.config.ssrc,
            &self.packetizer.stats(),
            &self.config.cname,
            &self.config.note,
        );
        tracing::trace!(len = report.len(), "sending sender report");
        self.transmit(SessionRole::Rtcp, &report);
        self.counters.sender_reports_sent += 1;

        self.schedule_sender_report();
    }

    fn handle_nack(&mut self, data: &[u8]) -> Result<()> {
        let nack = Nack::parse(data)?;
        nack.check_media_ssrc(self.config.ssrc)?;
        self.counters.nacks_received += 1;

        let Some(retransmitter) = self.retransmitter.as_mut() else {
            return Ok(());
        };
        let rtx_session = self.sessions.id(SessionRole::RtpRetransmission);

        for entry in &nack.entries {
            let answer = retransmitter.answer(entry);

            for sequence in &answer.missing {
                tracing::warn!(seq = sequence, "packet no longer available for retransmission");
            }
            self.counters.retransmissions_unavailable += answer.missing.len() as u64;

            for packet in &answer.packets {
                let Some(id) = rtx_session else {
                    tracing::debug!("no retransmission session, resend dropped");
                    continue;
                };
                match self.network.send_request(id, packet) {
                    Ok(()) => self.counters.packets_retransmitted += 1,
                    Err(err) => tracing::warn!(error = %err, "retransmission send failed"),
                }
            }
        }
        Ok(())
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn channel(port: u16) -> Result<u8> {
    u8::try_from(port).map_err(|_| SenderError::InvalidChannel(port))
}
