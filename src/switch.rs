//! The connection to one switch: handshake state machine, lifecycle and the
//! dispatch of messages read off the secure channel.

use std::io;
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::cookie_table::CookieTable;
use crate::error::{Error, Result};
use crate::message_queue::MessageQueue;
use crate::messenger::{Envelope, MessageTag, Messenger};
use crate::ofp_header::{OfpHeader, OFP_HEADER_LEN};
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::{
    ErrorMsg, FlowMod, FlowRemoved, MessageType, MsgCode, PacketIn, Pattern, SwitchConfig,
    SwitchFeatures, OFP_VERSION,
};
use crate::packet::{format_mac, Packet};
use crate::secure_channel::Channel;
use crate::service::ServiceRouter;
use crate::timer::{TimerKind, TimerSet};
use crate::xid_table::{XidEntry, XidTable};

/// Stats reply flag: more replies with the same xid follow.
const OFPSF_REPLY_MORE: u16 = 1;

/// Handshake progress of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Disconnected,
    WaitHello,
    WaitFeaturesReply,
    Completed,
}

/// Owns the secure channel to one switch and everything correlated with it.
pub struct SwitchConnection<C: Channel, M: Messenger> {
    pub(crate) channel: Option<C>,
    channel_id: String,
    pub(crate) state: SwitchState,
    datapath_id: Option<u64>,
    config_flags: u16,
    miss_send_len: u16,
    pub(crate) send_queue: Option<MessageQueue>,
    pub(crate) recv_queue: Option<MessageQueue>,
    pub(crate) fragment_buf: Option<BytesMut>,
    router: ServiceRouter,
    service_name: String,
    messenger: M,
    xid_table: XidTable,
    cookie_table: CookieTable,
    timers: TimerSet,
    cookie_aging: bool,
    running: bool,
    config: Config,
}

impl<C: Channel, M: Messenger> SwitchConnection<C, M> {
    pub fn new(channel: C, messenger: M, config: Config) -> Self {
        let channel_id = channel.peer();
        SwitchConnection {
            channel: Some(channel),
            channel_id,
            state: SwitchState::Disconnected,
            datapath_id: None,
            config_flags: config.switch.config_flags,
            miss_send_len: config.switch.miss_send_len,
            send_queue: Some(MessageQueue::new()),
            recv_queue: Some(MessageQueue::new()),
            fragment_buf: None,
            router: ServiceRouter::new(config.destinations.clone()),
            service_name: config.service_name.clone(),
            messenger,
            xid_table: XidTable::new(),
            cookie_table: CookieTable::new(),
            timers: TimerSet::new(),
            cookie_aging: false,
            running: true,
            config,
        }
    }

    pub fn state(&self) -> SwitchState {
        self.state
    }

    /// The switch's datapath id, once the handshake has completed.
    pub fn datapath_id(&self) -> Option<u64> {
        match self.state {
            SwitchState::Completed => self.datapath_id,
            _ => None,
        }
    }

    /// Current service identity; datapath-specific once the handshake completes.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Identity of the secure channel, kept for diagnostics after it is closed.
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Whether the connection's event loop should keep running.
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn channel(&self) -> Option<&C> {
        self.channel.as_ref()
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    #[cfg(test)]
    pub(crate) fn messenger_mut(&mut self) -> &mut M {
        &mut self.messenger
    }

    pub fn xid_table(&self) -> &XidTable {
        &self.xid_table
    }

    pub fn cookie_table(&self) -> &CookieTable {
        &self.cookie_table
    }

    pub fn timers(&self) -> &TimerSet {
        &self.timers
    }

    pub fn send_queue(&self) -> Option<&MessageQueue> {
        self.send_queue.as_ref()
    }

    pub fn recv_queue(&self) -> Option<&MessageQueue> {
        self.recv_queue.as_ref()
    }

    /// Bytes of an incomplete frame waiting for the rest of it.
    pub fn fragment_len(&self) -> usize {
        self.fragment_buf.as_ref().map_or(0, BytesMut::len)
    }

    pub fn cookie_aging_enabled(&self) -> bool {
        self.cookie_aging
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Start the handshake: announce the connection, send HELLO and wait for
    /// the switch's HELLO.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != SwitchState::Disconnected {
            return Err(Error::UnexpectedMessage {
                state: self.state,
                message: "connect",
            });
        }
        self.datapath_id = None;
        self.router
            .notify_state(&mut self.messenger, MessageTag::Connected, None);
        debug!(channel = %self.channel_id, "Sent connected state");

        self.send_message(Message::Hello)?;
        self.state = SwitchState::WaitHello;
        let now = Instant::now();
        self.timers
            .arm(TimerKind::Hello, self.config.handshake.hello_timeout, now);
        if self.config.cookie_aging.enabled && !self.cookie_aging {
            self.timers.arm_periodic(
                TimerKind::CookieAging,
                self.config.cookie_aging.interval,
                now,
            );
            self.cookie_aging = true;
        }
        Ok(())
    }

    /// The switch's HELLO arrived. Outside `WaitHello` this does nothing.
    pub fn on_hello_received(&mut self) -> Result<()> {
        if self.state != SwitchState::WaitHello {
            debug!(state = ?self.state, "Ignoring HELLO");
            return Ok(());
        }
        self.timers.cancel(TimerKind::Hello);
        self.send_message(Message::FeaturesReq)?;
        self.state = SwitchState::WaitFeaturesReply;
        self.timers.arm(
            TimerKind::FeaturesReply,
            self.config.handshake.features_reply_timeout,
            Instant::now(),
        );
        Ok(())
    }

    /// The switch identified itself. Completes the handshake from
    /// `WaitFeaturesReply`; a no-op once completed; rejected otherwise.
    pub fn on_features_reply_received(&mut self, datapath_id: u64) -> Result<()> {
        match self.state {
            SwitchState::WaitFeaturesReply => (),
            SwitchState::Completed => return Ok(()),
            state => {
                warn!(?state, channel = %self.channel_id, "Invalid event 'features reply' from a switch");
                return Err(Error::UnexpectedMessage {
                    state,
                    message: "FEATURES_REPLY",
                });
            }
        }

        self.datapath_id = Some(datapath_id);
        self.state = SwitchState::Completed;
        self.timers.cancel(TimerKind::FeaturesReply);

        let new_name = Config::switch_service_name(datapath_id);
        if let Err(e) = self
            .messenger
            .rename_endpoint(&self.service_name, &new_name)
        {
            warn!(from = %self.service_name, to = %new_name, error = %e, "Failed to rename service");
        }
        let old_management = Config::management_service_name(&self.service_name);
        let new_management = Config::management_service_name(&new_name);
        if let Err(e) = self
            .messenger
            .rename_endpoint(&old_management, &new_management)
        {
            debug!(from = %old_management, error = %e, "Management endpoint not renamed");
        }
        debug!(from = %self.service_name, to = %new_name, "Renamed service");
        self.service_name = new_name;

        if self.messenger.dump_enabled() {
            self.messenger.stop_dump();
            self.messenger
                .start_dump(&self.service_name, &self.config.dump_service_name);
        }

        self.router.notify_state(
            &mut self.messenger,
            MessageTag::Ready,
            Some(datapath_id),
        );
        info!(
            dpid = format_args!("{:#x}", datapath_id),
            channel = %self.channel_id,
            "Switch ready"
        );

        self.send_message(Message::SetConfig(SwitchConfig {
            flags: self.config_flags,
            miss_send_len: self.miss_send_len,
        }))?;
        self.send_message(Message::FlowMod(FlowMod::delete_all()))?;
        Ok(())
    }

    /// A timer armed by this connection fired.
    ///
    /// Handshake timers are ignored unless the connection is still in the
    /// state they were armed for; otherwise the connection is torn down.
    pub fn on_timeout(&mut self, kind: TimerKind) -> Result<()> {
        let armed_for = match kind {
            TimerKind::Hello => SwitchState::WaitHello,
            TimerKind::FeaturesReply => SwitchState::WaitFeaturesReply,
            TimerKind::CookieAging => {
                self.age_cookie_table();
                return Ok(());
            }
        };
        if self.state != armed_for {
            return Ok(());
        }
        self.timers.cancel(kind);
        error!(
            timer = ?kind,
            state = ?self.state,
            dpid = ?self.datapath_id,
            channel = %self.channel_id,
            "Handshake timeout"
        );
        let state = self.state;
        self.disconnect();
        Err(Error::HandshakeTimeout { state })
    }

    /// Fire every timer due at `now`.
    pub fn poll_timers(&mut self, now: Instant) {
        for kind in self.timers.expired(now) {
            // Timeouts have already torn the connection down and logged.
            let _ = self.on_timeout(kind);
        }
    }

    fn age_cookie_table(&mut self) {
        if !self.cookie_aging {
            self.timers.cancel(TimerKind::CookieAging);
            return;
        }
        let removed = self
            .cookie_table
            .age_sweep(Instant::now(), self.config.cookie_aging.max_age);
        debug!(removed, remaining = self.cookie_table.len(), "Cookie table aged");
    }

    /// Tear the connection down. Safe to call repeatedly; only the first call
    /// releases anything or notifies services.
    pub fn disconnect(&mut self) {
        let was = self.state;
        self.state = SwitchState::Disconnected;
        if !self.running {
            return;
        }

        self.fragment_buf = None;
        self.send_queue = None;
        self.recv_queue = None;
        if let Some(mut channel) = self.channel.take() {
            channel.close();
        }
        self.timers.cancel_all();
        self.cookie_aging = false;

        self.router.notify_state(
            &mut self.messenger,
            MessageTag::Disconnected,
            self.datapath_id,
        );
        self.messenger.flush();
        info!(
            state = ?was,
            dpid = ?self.datapath_id,
            channel = %self.channel_id,
            "Switch disconnected"
        );
        self.running = false;
    }

    /// An application asked for `frame` to be sent to switch `datapath_id`.
    pub fn on_application_message(
        &mut self,
        datapath_id: u64,
        service: &str,
        frame: Bytes,
    ) -> Result<()> {
        if self.state != SwitchState::Completed {
            warn!(service, state = ?self.state, "Dropping message for a switch that is not ready");
            return Err(Error::NotConnected);
        }
        let expected = self.datapath_id.unwrap_or_default();
        if datapath_id != expected {
            error!(
                dpid = format_args!("{:#x}", datapath_id),
                service,
                "Invalid datapath id"
            );
            return Err(Error::DatapathMismatch {
                expected,
                actual: datapath_id,
            });
        }
        let send_queue = self.send_queue.as_mut().ok_or(Error::NotConnected)?;
        self.router.route_outbound(
            &mut self.xid_table,
            &mut self.cookie_table,
            send_queue,
            service,
            frame,
            Instant::now(),
        )
    }

    /// A message arrived on this connection's service endpoint.
    pub fn on_service_message(&mut self, envelope: Envelope) {
        match envelope.tag {
            MessageTag::OpenflowMessage => {
                let service = envelope.service.unwrap_or_default();
                let Some(datapath_id) = envelope.datapath_id else {
                    warn!(service = %service, "OpenFlow message without datapath id");
                    return;
                };
                if let Err(e) = self.on_application_message(datapath_id, &service, envelope.payload)
                {
                    warn!(service = %service, error = %e, "Application message dropped");
                }
            }
            tag => warn!(tag = %tag, "Unexpected message on service endpoint"),
        }
    }

    /// A diagnostics command arrived on the management endpoint.
    pub fn on_management(&mut self, tag: MessageTag) {
        match tag {
            MessageTag::DumpXidTable => self.xid_table.dump(),
            MessageTag::DumpCookieTable => self.cookie_table.dump(),
            MessageTag::ToggleCookieAging => {
                if self.cookie_aging {
                    self.timers.cancel(TimerKind::CookieAging);
                    self.cookie_aging = false;
                } else {
                    self.timers.arm_periodic(
                        TimerKind::CookieAging,
                        self.config.cookie_aging.interval,
                        Instant::now(),
                    );
                    self.cookie_aging = true;
                }
                info!(enabled = self.cookie_aging, "Cookie aging toggled");
            }
            tag => error!(tag = %tag, "Undefined management message tag"),
        }
    }

    /// Queue a message the manager itself originates, under a fresh xid.
    /// Requests that expect a reply are recorded in the xid table.
    pub(crate) fn send_message(&mut self, msg: Message) -> Result<u32> {
        let code = Message::msg_code_of_message(&msg);
        let xid = self.xid_table.next_xid();
        let frame = Message::marshal(xid, msg);
        self.enqueue(frame.into())?;
        if code.expects_reply() {
            self.xid_table.insert(
                xid,
                XidEntry {
                    service: None,
                    original_xid: xid,
                    kind: code,
                    issued_at: Instant::now(),
                },
            )?;
        }
        debug!(message = %code, xid, "Queued message for switch");
        Ok(xid)
    }

    fn enqueue(&mut self, frame: Bytes) -> Result<()> {
        match self.send_queue.as_mut() {
            Some(queue) => {
                queue.enqueue(frame);
                Ok(())
            }
            None => Err(Error::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "send queue released",
            ))),
        }
    }

    /// Dispatch every frame waiting in the receive queue. A fatal error tears
    /// the connection down and is returned.
    pub fn handle_messages_from_secure_channel(&mut self) -> Result<()> {
        while let Some(frame) = self.recv_queue.as_mut().and_then(MessageQueue::dequeue) {
            if let Err(e) = self.handle_frame(frame) {
                if e.is_fatal() {
                    error!(error = %e, channel = %self.channel_id, "Closing secure channel");
                    self.disconnect();
                    return Err(e);
                }
                warn!(error = %e, "Message dropped");
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Bytes) -> Result<()> {
        let header = OfpHeader::parse(&frame)?;
        let Some(code) = header.type_code() else {
            warn!(typ = header.type_byte(), xid = header.xid(), "Unknown message type");
            return Ok(());
        };
        // Version negotiation: a newer HELLO is answered by speaking 1.0.
        if header.version() != OFP_VERSION
            && !(code == MsgCode::Hello && header.version() > OFP_VERSION)
        {
            return Err(Error::UnsupportedVersion(header.version()));
        }
        let body = &frame[OFP_HEADER_LEN..];
        let xid = header.xid();

        match code {
            MsgCode::Hello => self.on_hello_received(),
            MsgCode::EchoReq => {
                let reply = Message::marshal(xid, Message::EchoReply(body.to_vec()));
                self.enqueue(reply.into())
            }
            MsgCode::EchoResp => {
                match self.xid_table.lookup_and_remove(xid) {
                    Some(XidEntry {
                        service: Some(service),
                        original_xid,
                        ..
                    }) => self.forward_to_service(&service, original_xid, frame),
                    Some(_) => (),
                    None => debug!(xid, "Echo reply without request"),
                }
                Ok(())
            }
            MsgCode::FeaturesResp => self.handle_features_reply(xid, frame),
            MsgCode::Error => self.handle_error(xid, frame),
            MsgCode::Vendor | MsgCode::PacketIn | MsgCode::PortStatus => {
                let Some(datapath_id) = self.completed_datapath(code) else {
                    return Ok(());
                };
                if code == MsgCode::PacketIn {
                    trace_packet_in(body);
                }
                self.router
                    .route_inbound(&mut self.messenger, code, datapath_id, &frame);
                Ok(())
            }
            MsgCode::FlowRemoved => self.handle_flow_removed(frame),
            MsgCode::GetConfigResp
            | MsgCode::StatsResp
            | MsgCode::BarrierResp
            | MsgCode::QueueGetConfigResp => self.handle_reply(code, xid, frame),
            code => {
                warn!(message = %code, xid, "Unhandled message from switch");
                Ok(())
            }
        }
    }

    fn completed_datapath(&self, code: MsgCode) -> Option<u64> {
        if self.state != SwitchState::Completed {
            warn!(message = %code, state = ?self.state, "Dropping message received before handshake completed");
            return None;
        }
        self.datapath_id
    }

    fn handle_features_reply(&mut self, xid: u32, frame: Bytes) -> Result<()> {
        match self.xid_table.lookup_and_remove(xid) {
            Some(XidEntry {
                service: Some(service),
                original_xid,
                ..
            }) if self.state == SwitchState::Completed => {
                self.forward_to_service(&service, original_xid, frame);
                return Ok(());
            }
            Some(_) => (),
            None => debug!(xid, "Features reply without matching request"),
        }
        let body = &frame[OFP_HEADER_LEN..];
        let features = SwitchFeatures::parse(body)?;
        debug!(
            dpid = format_args!("{:#x}", features.datapath_id),
            buffers = features.num_buffers,
            tables = features.num_tables,
            ports = features.ports.len(),
            "Features reply"
        );
        self.on_features_reply_received(features.datapath_id)
            .map_err(|_| Error::HandshakeFailed("features reply in invalid state"))
    }

    fn handle_error(&mut self, xid: u32, frame: Bytes) -> Result<()> {
        let err = ErrorMsg::parse(&frame[OFP_HEADER_LEN..])?;
        match self.xid_table.lookup_and_remove(xid) {
            Some(XidEntry {
                service: Some(service),
                original_xid,
                kind,
                ..
            }) => {
                debug!(service = %service, request = %kind, typ = err.typ, code = err.code, "Returning error to service");
                self.forward_to_service(&service, original_xid, frame);
                Ok(())
            }
            entry => {
                error!(
                    xid,
                    typ = err.typ,
                    code = err.code,
                    request = ?entry.map(|e| e.kind),
                    state = ?self.state,
                    "Error from switch"
                );
                if self.state == SwitchState::Completed {
                    Ok(())
                } else {
                    Err(Error::HandshakeFailed("switch reported an error during handshake"))
                }
            }
        }
    }

    fn handle_flow_removed(&mut self, frame: Bytes) -> Result<()> {
        if self.completed_datapath(MsgCode::FlowRemoved).is_none() {
            return Ok(());
        }
        let removed = FlowRemoved::parse(&frame[OFP_HEADER_LEN..])?;
        match self.cookie_table.remove(removed.cookie) {
            Some(entry) => {
                let xid = OfpHeader::parse(&frame)?.xid();
                self.forward_to_service(&entry.service, xid, frame);
            }
            None => debug!(
                cookie = format_args!("{:#x}", removed.cookie),
                "Flow removed for unknown cookie"
            ),
        }
        Ok(())
    }

    fn handle_reply(&mut self, code: MsgCode, xid: u32, frame: Bytes) -> Result<()> {
        if self.completed_datapath(code).is_none() {
            return Ok(());
        }
        let more = code == MsgCode::StatsResp
            && frame.len() >= OFP_HEADER_LEN + 4
            && u16::from_be_bytes([frame[OFP_HEADER_LEN + 2], frame[OFP_HEADER_LEN + 3]])
                & OFPSF_REPLY_MORE
                != 0;
        let entry = if more {
            self.xid_table.lookup(xid).cloned()
        } else {
            self.xid_table.lookup_and_remove(xid)
        };
        match entry {
            Some(XidEntry {
                service: Some(service),
                original_xid,
                ..
            }) => self.forward_to_service(&service, original_xid, frame),
            Some(_) => debug!(message = %code, xid, "Reply to controller request consumed"),
            None => warn!(message = %code, xid, "Reply without matching request"),
        }
        Ok(())
    }

    /// Hand a switch frame to one service, restoring the xid the service used.
    fn forward_to_service(&mut self, service: &str, xid: u32, frame: Bytes) {
        let mut buf = BytesMut::from(&frame[..]);
        OfpHeader::rewrite_xid(&mut buf, xid);
        let envelope = Envelope {
            tag: MessageTag::OpenflowMessage,
            datapath_id: self.datapath_id,
            service: Some(self.service_name.clone()),
            payload: buf.freeze(),
        };
        if let Err(e) = self.messenger.send(service, envelope) {
            warn!(service, error = %e, "Failed to deliver to service");
        }
    }
}

/// Log the match a packet-in would produce, for diagnostics.
fn trace_packet_in(body: &[u8]) {
    let Ok(packet_in) = PacketIn::parse(body) else {
        return;
    };
    match Packet::parse(&packet_in.data) {
        Some(pkt) => {
            let pattern = Pattern::from_packet(packet_in.port, &pkt);
            debug!(
                in_port = packet_in.port,
                dl_src = %format_mac(&pkt.dl_src),
                dl_dst = %format_mac(&pkt.dl_dst),
                dl_type = format_args!("{:#06x}", pkt.dl_type),
                ?pattern,
                "Packet in"
            );
        }
        None => debug!(in_port = packet_in.port, len = packet_in.data.len(), "Packet in (undecodable payload)"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messenger::{BusMessenger, LocalBus, DEFAULT_DUMP_SERVICE_NAME};
    use crate::openflow0x01::{Capabilities, FlowModCmd, OFPP_NONE};
    use crate::secure_channel::mock::MockChannel;
    use crate::service::DestinationLists;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        conn: SwitchConnection<MockChannel, BusMessenger>,
        channel: MockChannel,
        bus: LocalBus,
        notify: UnboundedReceiver<Envelope>,
        app: UnboundedReceiver<Envelope>,
        _own: UnboundedReceiver<Envelope>,
    }

    impl Harness {
        fn new() -> Harness {
            let bus = LocalBus::new();
            let notify = bus.register("topology");
            let app = bus.register("app");
            let own = bus.register("switch_manager");
            let mut config = Config::default();
            config.destinations =
                DestinationLists::from_rules(&["state_notify::topology", "packet_in::app"]);
            let channel = MockChannel::default();
            let conn = SwitchConnection::new(channel.clone(), BusMessenger::new(bus.clone()), config);
            Harness {
                conn,
                channel,
                bus,
                notify,
                app,
                _own: own,
            }
        }

        fn feed(&mut self, frame: Vec<u8>) -> Result<()> {
            self.channel.push_inbound(&frame);
            self.conn.process_io(true, true)
        }

        /// Frames written to the switch since the last call, as (type, xid, frame).
        fn written(&mut self) -> Vec<(MsgCode, u32, Vec<u8>)> {
            let written = self.channel.take_written();
            let mut bytes = &written[..];
            let mut frames = Vec::new();
            while !bytes.is_empty() {
                let header = OfpHeader::parse(bytes).unwrap();
                let (frame, rest) = bytes.split_at(header.length());
                frames.push((header.type_code().unwrap(), header.xid(), frame.to_vec()));
                bytes = rest;
            }
            frames
        }

        fn written_codes(&mut self) -> Vec<MsgCode> {
            self.written().into_iter().map(|(code, _, _)| code).collect()
        }

        fn notified(&mut self) -> Vec<(MessageTag, Option<u64>)> {
            std::iter::from_fn(|| self.notify.try_recv().ok())
                .map(|env| (env.tag, env.datapath_id))
                .collect()
        }

        fn handshake(&mut self, datapath_id: u64) {
            self.conn.connect().unwrap();
            self.feed(Message::marshal(1, Message::Hello)).unwrap();
            let (_, request_xid, _) = self
                .written()
                .into_iter()
                .find(|(code, _, _)| *code == MsgCode::FeaturesReq)
                .unwrap();
            self.feed(features_reply(request_xid, datapath_id)).unwrap();
            assert_eq!(self.conn.state(), SwitchState::Completed);
        }
    }

    fn features_reply(xid: u32, datapath_id: u64) -> Vec<u8> {
        Message::marshal(
            xid,
            Message::FeaturesReply(SwitchFeatures {
                datapath_id,
                num_buffers: 256,
                num_tables: 1,
                supported_capabilities: Capabilities::default(),
                supported_actions: 0,
                ports: vec![1, 2],
            }),
        )
    }

    #[test]
    fn connect_sends_hello_and_announces() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        assert_eq!(h.conn.state(), SwitchState::WaitHello);
        assert!(h.conn.timers().is_armed(TimerKind::Hello));
        assert_eq!(h.notified(), vec![(MessageTag::Connected, None)]);

        h.conn.process_io(false, true).unwrap();
        assert_eq!(h.written_codes(), vec![MsgCode::Hello]);
        assert!(matches!(
            h.conn.connect(),
            Err(Error::UnexpectedMessage { .. })
        ));
    }

    #[test]
    fn hello_requests_features() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        h.feed(Message::marshal(1, Message::Hello)).unwrap();

        assert_eq!(h.conn.state(), SwitchState::WaitFeaturesReply);
        assert!(!h.conn.timers().is_armed(TimerKind::Hello));
        assert!(h.conn.timers().is_armed(TimerKind::FeaturesReply));
        let written = h.written();
        assert_eq!(written[1].0, MsgCode::FeaturesReq);
        assert!(h.conn.xid_table().contains(written[1].1));
    }

    #[test]
    fn hello_outside_wait_hello_changes_nothing() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        h.feed(Message::marshal(1, Message::Hello)).unwrap();
        h.written();
        let deadline = h.conn.next_deadline();
        let armed = h.conn.timers().armed_count();

        h.feed(Message::marshal(2, Message::Hello)).unwrap();
        assert_eq!(h.conn.state(), SwitchState::WaitFeaturesReply);
        assert!(h.written().is_empty());
        assert_eq!(h.conn.next_deadline(), deadline);
        assert_eq!(h.conn.timers().armed_count(), armed);
    }

    #[test]
    fn features_reply_completes_handshake() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        h.feed(Message::marshal(1, Message::Hello)).unwrap();
        assert_eq!(h.conn.datapath_id(), None);
        let xid = h.written()[1].1;

        h.feed(features_reply(xid, 1)).unwrap();
        assert_eq!(h.conn.state(), SwitchState::Completed);
        assert_eq!(h.conn.datapath_id(), Some(1));
        assert_eq!(h.conn.service_name(), "switch.1");
        assert!(h.bus.is_registered("switch.1"));
        assert!(!h.bus.is_registered("switch_manager"));
        assert!(!h.conn.timers().is_armed(TimerKind::FeaturesReply));
        assert!(h.conn.xid_table().is_empty());
        assert_eq!(
            h.notified(),
            vec![(MessageTag::Connected, None), (MessageTag::Ready, Some(1))]
        );

        let written = h.written();
        let codes: Vec<MsgCode> = written.iter().map(|(code, _, _)| *code).collect();
        assert_eq!(codes, vec![MsgCode::SetConfig, MsgCode::FlowMod]);
        assert_eq!(&written[0].2[8..], &[0x00, 0x00, 0xff, 0xff]);
        let flow_mod = FlowMod::parse(&written[1].2[8..]).unwrap();
        assert_eq!(flow_mod.command, FlowModCmd::DeleteFlow);
        assert_eq!(flow_mod.pattern, Pattern::match_all());
        assert_eq!(flow_mod.out_port, None);
        assert_eq!(&written[1].2[8 + 40 + 20..8 + 40 + 22], &OFPP_NONE.to_be_bytes());
    }

    #[test]
    fn datapath_id_is_fixed_once_completed() {
        let mut h = Harness::new();
        h.handshake(1);
        h.feed(features_reply(77, 2)).unwrap();
        assert_eq!(h.conn.datapath_id(), Some(1));
        assert_eq!(h.conn.service_name(), "switch.1");
    }

    #[test]
    fn features_reply_before_hello_is_fatal() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        assert!(matches!(
            h.feed(features_reply(5, 1)),
            Err(Error::HandshakeFailed(_))
        ));
        assert_eq!(h.conn.state(), SwitchState::Disconnected);
        assert!(h.channel.is_closed());
    }

    #[test]
    fn features_reply_timeout_after_completion_is_ignored() {
        let mut h = Harness::new();
        h.handshake(1);
        h.conn.on_timeout(TimerKind::FeaturesReply).unwrap();
        assert_eq!(h.conn.state(), SwitchState::Completed);
        assert!(h.conn.is_running());
    }

    #[test]
    fn hello_timeout_disconnects() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        assert!(matches!(
            h.conn.on_timeout(TimerKind::Hello),
            Err(Error::HandshakeTimeout {
                state: SwitchState::WaitHello
            })
        ));
        assert_eq!(h.conn.state(), SwitchState::Disconnected);
        assert!(!h.conn.is_running());
        assert_eq!(h.conn.timers().armed_count(), 0);
    }

    #[test]
    fn disconnect_twice_releases_once() {
        let mut h = Harness::new();
        h.handshake(1);
        h.notified();

        h.conn.disconnect();
        assert_eq!(h.notified(), vec![(MessageTag::Disconnected, Some(1))]);
        assert!(h.conn.send_queue().is_none());
        assert!(h.conn.recv_queue().is_none());
        assert_eq!(h.conn.fragment_len(), 0);
        assert!(h.conn.channel().is_none());

        h.conn.disconnect();
        assert_eq!(h.conn.state(), SwitchState::Disconnected);
        assert!(h.notified().is_empty());
    }

    #[test]
    fn data_before_handshake_is_dropped() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        let packet_in = Message::PacketIn(PacketIn {
            buffer_id: None,
            total_len: 0,
            port: 1,
            reason: crate::openflow0x01::PacketInReason::NoMatch,
            data: Vec::new(),
        });
        h.feed(Message::marshal(3, packet_in)).unwrap();
        assert!(h.app.try_recv().is_err());
        assert_eq!(h.conn.state(), SwitchState::WaitHello);
    }

    #[test]
    fn packet_in_fans_out_with_datapath() {
        let mut h = Harness::new();
        h.handshake(0xab);
        let frame = Message::marshal(
            0,
            Message::PacketIn(PacketIn {
                buffer_id: Some(7),
                total_len: 64,
                port: 3,
                reason: crate::openflow0x01::PacketInReason::NoMatch,
                data: crate::packet::tests::udp_frame(None),
            }),
        );
        h.feed(frame.clone()).unwrap();
        let env = h.app.try_recv().unwrap();
        assert_eq!(env.tag, MessageTag::PacketIn);
        assert_eq!(env.datapath_id, Some(0xab));
        assert_eq!(&env.payload[..], &frame[..]);
    }

    #[test]
    fn application_message_requires_ready_switch() {
        let mut h = Harness::new();
        let frame = Bytes::from(Message::marshal(9, Message::Hello));
        assert!(matches!(
            h.conn.on_application_message(1, "app", frame.clone()),
            Err(Error::NotConnected)
        ));
        h.handshake(1);
        assert!(matches!(
            h.conn.on_application_message(2, "app", frame),
            Err(Error::DatapathMismatch {
                expected: 1,
                actual: 2
            })
        ));
    }

    #[test]
    fn multipart_stats_reply_keeps_record_until_last_part() {
        let mut h = Harness::new();
        h.handshake(1);
        h.written();

        let request = Message::marshal(0x55, Message::Other(MsgCode::StatsReq, vec![0, 1, 0, 0]));
        h.conn
            .on_application_message(1, "app", request.into())
            .unwrap();
        h.conn.process_io(false, true).unwrap();
        let (code, switch_xid, _) = h.written().remove(0);
        assert_eq!(code, MsgCode::StatsReq);

        let part = Message::marshal(switch_xid, Message::Other(MsgCode::StatsResp, vec![0, 1, 0, 1]));
        h.feed(part).unwrap();
        assert!(h.conn.xid_table().contains(switch_xid));
        let last = Message::marshal(switch_xid, Message::Other(MsgCode::StatsResp, vec![0, 1, 0, 0]));
        h.feed(last).unwrap();
        assert!(!h.conn.xid_table().contains(switch_xid));

        for _ in 0..2 {
            let env = h.app.try_recv().unwrap();
            assert_eq!(env.tag, MessageTag::OpenflowMessage);
            assert_eq!(OfpHeader::parse(&env.payload).unwrap().xid(), 0x55);
        }
    }

    #[test]
    fn flow_removed_returns_to_cookie_owner() {
        let mut h = Harness::new();
        h.handshake(1);
        let flow_mod = FlowMod {
            command: FlowModCmd::AddFlow,
            cookie: 0x77,
            notify_when_removed: true,
            ..FlowMod::delete_all()
        };
        h.conn
            .on_application_message(1, "app", Message::marshal(4, Message::FlowMod(flow_mod)).into())
            .unwrap();
        assert!(h.conn.cookie_table().lookup(0x77).is_some());

        let removed = FlowRemoved {
            cookie: 0x77,
            priority: 0,
            reason: 0,
        };
        h.feed(Message::marshal(0, Message::FlowRemoved(removed))).unwrap();
        let env = h.app.try_recv().unwrap();
        assert_eq!(env.tag, MessageTag::OpenflowMessage);
        assert_eq!(OfpHeader::parse(&env.payload).unwrap().type_code(), Some(MsgCode::FlowRemoved));
        assert!(h.conn.cookie_table().is_empty());
    }

    #[test]
    fn error_for_application_request_is_forwarded() {
        let mut h = Harness::new();
        h.handshake(1);
        h.written();
        let request = Message::marshal(0x66, Message::Other(MsgCode::BarrierReq, Vec::new()));
        h.conn.on_application_message(1, "app", request.into()).unwrap();
        h.conn.process_io(false, true).unwrap();
        let (_, switch_xid, _) = h.written().remove(0);

        let err = Message::Error(ErrorMsg {
            typ: 1,
            code: 2,
            data: Vec::new(),
        });
        h.feed(Message::marshal(switch_xid, err)).unwrap();
        let env = h.app.try_recv().unwrap();
        assert_eq!(OfpHeader::parse(&env.payload).unwrap().xid(), 0x66);
        assert!(h.conn.is_running());
    }

    #[test]
    fn flow_mod_error_returns_to_sender() {
        let mut h = Harness::new();
        h.handshake(1);
        h.written();
        let flow_mod = FlowMod {
            command: FlowModCmd::AddFlow,
            cookie: 0x21,
            ..FlowMod::delete_all()
        };
        h.conn
            .on_application_message(1, "app", Message::marshal(0x42, Message::FlowMod(flow_mod)).into())
            .unwrap();
        h.conn.process_io(false, true).unwrap();
        let (code, switch_xid, _) = h.written().remove(0);
        assert_eq!(code, MsgCode::FlowMod);

        let err = Message::Error(ErrorMsg {
            typ: 3,
            code: 0,
            data: Vec::new(),
        });
        h.feed(Message::marshal(switch_xid, err)).unwrap();
        let env = h.app.try_recv().unwrap();
        let header = OfpHeader::parse(&env.payload).unwrap();
        assert_eq!(header.type_code(), Some(MsgCode::Error));
        assert_eq!(header.xid(), 0x42);
        assert!(!h.conn.xid_table().contains(switch_xid));
    }

    #[test]
    fn application_xid_equal_to_pending_request_does_not_collide() {
        let mut h = Harness::new();
        let mut monitor = h.bus.register("monitor");
        h.handshake(1);
        h.written();

        let request = Message::marshal(0x55, Message::Other(MsgCode::StatsReq, vec![0, 1, 0, 0]));
        h.conn.on_application_message(1, "app", request.into()).unwrap();
        h.conn.process_io(false, true).unwrap();
        let (_, stats_xid, _) = h.written().remove(0);

        // Another service happens to pick the switch xid of the pending request.
        let flow_mod = FlowMod {
            command: FlowModCmd::AddFlow,
            ..FlowMod::delete_all()
        };
        h.conn
            .on_application_message(
                1,
                "monitor",
                Message::marshal(stats_xid, Message::FlowMod(flow_mod)).into(),
            )
            .unwrap();
        h.conn.process_io(false, true).unwrap();
        let (_, flow_mod_xid, _) = h.written().remove(0);
        assert_ne!(flow_mod_xid, stats_xid);

        let err = Message::Error(ErrorMsg {
            typ: 3,
            code: 0,
            data: Vec::new(),
        });
        h.feed(Message::marshal(flow_mod_xid, err)).unwrap();
        let env = monitor.try_recv().unwrap();
        let header = OfpHeader::parse(&env.payload).unwrap();
        assert_eq!(header.type_code(), Some(MsgCode::Error));
        assert_eq!(header.xid(), stats_xid);
        assert!(h.app.try_recv().is_err());
        assert!(h.conn.xid_table().contains(stats_xid));

        let reply = Message::marshal(stats_xid, Message::Other(MsgCode::StatsResp, vec![0, 1, 0, 0]));
        h.feed(reply).unwrap();
        let env = h.app.try_recv().unwrap();
        assert_eq!(OfpHeader::parse(&env.payload).unwrap().xid(), 0x55);
        assert!(monitor.try_recv().is_err());
    }

    #[test]
    fn dump_follows_the_service_rename() {
        let mut h = Harness::new();
        let mut dump = h.bus.register(DEFAULT_DUMP_SERVICE_NAME);
        h.conn
            .messenger_mut()
            .start_dump("switch_manager", DEFAULT_DUMP_SERVICE_NAME);
        h.handshake(1);
        while dump.try_recv().is_ok() {}

        let name = Config::switch_service_name(1);
        assert_eq!(h.conn.service_name(), name);
        assert!(h.conn.messenger().dump_enabled());
        h.bus
            .deliver(&name, Envelope::control(MessageTag::DumpXidTable))
            .unwrap();
        assert_eq!(dump.try_recv().unwrap().tag, MessageTag::DumpXidTable);

        // Nothing is left mirrored under the old name.
        assert!(h
            .bus
            .deliver("switch_manager", Envelope::control(MessageTag::DumpXidTable))
            .is_err());
        assert!(dump.try_recv().is_err());
    }

    #[test]
    fn peer_close_after_handshake_releases_everything() {
        let mut h = Harness::new();
        h.handshake(1);
        h.notified();

        let echo = Message::marshal(7, Message::EchoRequest(b"unfinished".to_vec()));
        h.channel.push_inbound(&echo[..10]);
        h.channel.push_eof();
        assert!(matches!(
            h.conn.process_io(true, false),
            Err(Error::ConnectionClosed)
        ));

        assert_eq!(h.conn.state(), SwitchState::Disconnected);
        assert!(!h.conn.is_running());
        assert_eq!(h.notified(), vec![(MessageTag::Disconnected, Some(1))]);
        assert_eq!(h.conn.fragment_len(), 0);
        assert!(h.conn.send_queue().is_none());
        assert!(h.conn.recv_queue().is_none());
        assert!(h.channel.is_closed());
    }

    #[test]
    fn error_during_handshake_is_fatal() {
        let mut h = Harness::new();
        h.conn.connect().unwrap();
        let err = Message::Error(ErrorMsg {
            typ: 0,
            code: 0,
            data: Vec::new(),
        });
        assert!(h.feed(Message::marshal(1, err)).is_err());
        assert_eq!(h.conn.state(), SwitchState::Disconnected);
    }

    #[test]
    fn toggle_cookie_aging_arms_and_cancels_timer() {
        let mut h = Harness::new();
        h.handshake(1);
        assert!(!h.conn.cookie_aging_enabled());
        h.conn.on_management(MessageTag::ToggleCookieAging);
        assert!(h.conn.timers().is_armed(TimerKind::CookieAging));
        h.conn.on_management(MessageTag::ToggleCookieAging);
        assert!(!h.conn.timers().is_armed(TimerKind::CookieAging));
        h.conn.on_management(MessageTag::PacketIn);
        h.conn.on_management(MessageTag::DumpXidTable);
        assert!(h.conn.is_running());
    }
}
