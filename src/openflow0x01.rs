use std::fmt;
use std::io::{BufRead, Cursor};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::packet::{Nw, Packet, Tp};

/// Protocol version byte of OpenFlow 1.0.
pub const OFP_VERSION: u8 = 0x01;

/// Default switch configuration flag: no special handling of IP fragments.
pub const OFPC_FRAG_NORMAL: u16 = 0;
/// Drop IP fragments.
pub const OFPC_FRAG_DROP: u16 = 1;
/// Reassemble IP fragments (only if the switch advertises `ip_reasm`).
pub const OFPC_FRAG_REASM: u16 = 2;

/// "No port" sentinel used by flow deletion.
pub const OFPP_NONE: u16 = 0xffff;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl MsgCode {
    /// Map a raw header type byte onto a message code.
    pub fn from_u8(typ: u8) -> Option<MsgCode> {
        use self::MsgCode::*;
        let code = match typ {
            0 => Hello,
            1 => Error,
            2 => EchoReq,
            3 => EchoResp,
            4 => Vendor,
            5 => FeaturesReq,
            6 => FeaturesResp,
            7 => GetConfigReq,
            8 => GetConfigResp,
            9 => SetConfig,
            10 => PacketIn,
            11 => FlowRemoved,
            12 => PortStatus,
            13 => PacketOut,
            14 => FlowMod,
            15 => PortMod,
            16 => StatsReq,
            17 => StatsResp,
            18 => BarrierReq,
            19 => BarrierResp,
            20 => QueueGetConfigReq,
            21 => QueueGetConfigResp,
            _ => return None,
        };
        Some(code)
    }

    /// Requests for which the switch sends a reply carrying the same xid.
    pub fn expects_reply(self) -> bool {
        matches!(
            self,
            MsgCode::EchoReq
                | MsgCode::FeaturesReq
                | MsgCode::GetConfigReq
                | MsgCode::StatsReq
                | MsgCode::BarrierReq
                | MsgCode::QueueGetConfigReq
        )
    }
}

impl fmt::Display for MsgCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            MsgCode::Hello => "HELLO",
            MsgCode::Error => "ERROR",
            MsgCode::EchoReq => "ECHO_REQUEST",
            MsgCode::EchoResp => "ECHO_REPLY",
            MsgCode::Vendor => "VENDOR",
            MsgCode::FeaturesReq => "FEATURES_REQUEST",
            MsgCode::FeaturesResp => "FEATURES_REPLY",
            MsgCode::GetConfigReq => "GET_CONFIG_REQUEST",
            MsgCode::GetConfigResp => "GET_CONFIG_REPLY",
            MsgCode::SetConfig => "SET_CONFIG",
            MsgCode::PacketIn => "PACKET_IN",
            MsgCode::FlowRemoved => "FLOW_REMOVED",
            MsgCode::PortStatus => "PORT_STATUS",
            MsgCode::PacketOut => "PACKET_OUT",
            MsgCode::FlowMod => "FLOW_MOD",
            MsgCode::PortMod => "PORT_MOD",
            MsgCode::StatsReq => "STATS_REQUEST",
            MsgCode::StatsResp => "STATS_REPLY",
            MsgCode::BarrierReq => "BARRIER_REQUEST",
            MsgCode::BarrierResp => "BARRIER_REPLY",
            MsgCode::QueueGetConfigReq => "QUEUE_GET_CONFIG_REQUEST",
            MsgCode::QueueGetConfigResp => "QUEUE_GET_CONFIG_REPLY",
        };
        f.write_str(name)
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(&self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(self, bytes: &mut Vec<u8>);
}

/// Test whether bit `bit` of `x` is set.
fn test_bit(bit: u64, x: u64) -> bool {
    (x >> bit) & 1 == 1
}

fn short(what: &'static str) -> Error {
    Error::InvalidFrame(what)
}

/// Wildcard bits of an `ofp_match`.
mod wildcards {
    pub const IN_PORT: u32 = 1 << 0;
    pub const DL_VLAN: u32 = 1 << 1;
    pub const DL_SRC: u32 = 1 << 2;
    pub const DL_DST: u32 = 1 << 3;
    pub const DL_TYPE: u32 = 1 << 4;
    pub const NW_PROTO: u32 = 1 << 5;
    pub const TP_SRC: u32 = 1 << 6;
    pub const TP_DST: u32 = 1 << 7;
    /// Whole 6-bit prefix-length fields, so a wildcard-all match is exactly `ALL`.
    pub const NW_SRC_ALL: u32 = 0x3f << 8;
    pub const NW_DST_ALL: u32 = 0x3f << 14;
    pub const DL_VLAN_PCP: u32 = 1 << 20;
    pub const NW_TOS: u32 = 1 << 21;
    pub const ALL: u32 = (1 << 22) - 1;
}

/// Size of an `ofp_match` on the wire.
pub const OFP_MATCH_LEN: usize = 40;

/// Fields to match against flows. `None` fields are wildcarded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<[u8; 6]>,
    pub dl_dst: Option<[u8; 6]>,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<u32>,
    pub nw_dst: Option<u32>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    /// A pattern matching every packet.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Build the exact match for a packet received on `in_port`.
    pub fn from_packet(in_port: u16, pkt: &Packet) -> Pattern {
        let vlan = pkt.outer_vlan();
        let mut pattern = Pattern {
            in_port: Some(in_port),
            dl_src: Some(pkt.dl_src),
            dl_dst: Some(pkt.dl_dst),
            // 0xffff is the OpenFlow 1.0 encoding of "untagged".
            dl_vlan: Some(vlan.map_or(0xffff, |t| t.vid)),
            dl_vlan_pcp: Some(vlan.map_or(0, |t| t.pcp)),
            dl_typ: Some(pkt.dl_type),
            ..Pattern::default()
        };
        match pkt.nw {
            Nw::Ip(ip) => {
                pattern.nw_tos = Some(ip.tos);
                pattern.nw_proto = Some(ip.proto);
                pattern.nw_src = Some(ip.src);
                pattern.nw_dst = Some(ip.dst);
                let (src, dst) = match ip.tp {
                    Tp::Tcp { src, dst } | Tp::Udp { src, dst } => (Some(src), Some(dst)),
                    Tp::Icmp { typ, code } => (Some(typ as u16), Some(code as u16)),
                    Tp::Unparsable(_) => (None, None),
                };
                pattern.tp_src = src;
                pattern.tp_dst = dst;
            }
            Nw::Arp { oper, spa, tpa } => {
                pattern.nw_proto = Some((oper & 0xff) as u8);
                pattern.nw_src = Some(spa);
                pattern.nw_dst = Some(tpa);
            }
            Nw::Unparsable(_) => (),
        }
        pattern
    }

    fn wildcards(&self) -> u32 {
        let mut w = 0;
        let mut set = |absent: bool, bit: u32| {
            if absent {
                w |= bit;
            }
        };
        set(self.in_port.is_none(), wildcards::IN_PORT);
        set(self.dl_vlan.is_none(), wildcards::DL_VLAN);
        set(self.dl_src.is_none(), wildcards::DL_SRC);
        set(self.dl_dst.is_none(), wildcards::DL_DST);
        set(self.dl_typ.is_none(), wildcards::DL_TYPE);
        set(self.nw_proto.is_none(), wildcards::NW_PROTO);
        set(self.tp_src.is_none(), wildcards::TP_SRC);
        set(self.tp_dst.is_none(), wildcards::TP_DST);
        set(self.nw_src.is_none(), wildcards::NW_SRC_ALL);
        set(self.nw_dst.is_none(), wildcards::NW_DST_ALL);
        set(self.dl_vlan_pcp.is_none(), wildcards::DL_VLAN_PCP);
        set(self.nw_tos.is_none(), wildcards::NW_TOS);
        w & wildcards::ALL
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u32::<BigEndian>(self.wildcards());
        let _ = bytes.write_u16::<BigEndian>(self.in_port.unwrap_or(0));
        bytes.extend_from_slice(&self.dl_src.unwrap_or([0; 6]));
        bytes.extend_from_slice(&self.dl_dst.unwrap_or([0; 6]));
        let _ = bytes.write_u16::<BigEndian>(self.dl_vlan.unwrap_or(0));
        let _ = bytes.write_u8(self.dl_vlan_pcp.unwrap_or(0));
        bytes.push(0);
        let _ = bytes.write_u16::<BigEndian>(self.dl_typ.unwrap_or(0));
        let _ = bytes.write_u8(self.nw_tos.unwrap_or(0));
        let _ = bytes.write_u8(self.nw_proto.unwrap_or(0));
        bytes.extend_from_slice(&[0; 2]);
        let _ = bytes.write_u32::<BigEndian>(self.nw_src.unwrap_or(0));
        let _ = bytes.write_u32::<BigEndian>(self.nw_dst.unwrap_or(0));
        let _ = bytes.write_u16::<BigEndian>(self.tp_src.unwrap_or(0));
        let _ = bytes.write_u16::<BigEndian>(self.tp_dst.unwrap_or(0));
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn to_int(self) -> u16 {
        match self {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(0, d as u64),
            table_stats: test_bit(1, d as u64),
            port_stats: test_bit(2, d as u64),
            stp: test_bit(3, d as u64),
            ip_reasm: test_bit(5, d as u64),
            queue_stats: test_bit(6, d as u64),
            arp_match_ip: test_bit(7, d as u64),
        }
    }
}

/// Size of an `ofp_phy_port` on the wire.
const OFP_PHY_PORT_LEN: usize = 48;
const OFP_SWITCH_FEATURES_LEN: usize = 24;

/// Switch features, as announced in a FEATURES_REPLY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: u32,
    /// Port numbers of the physical ports, in announcement order.
    pub ports: Vec<u16>,
}

impl MessageType for SwitchFeatures {
    fn size_of(&self) -> usize {
        OFP_SWITCH_FEATURES_LEN + self.ports.len() * OFP_PHY_PORT_LEN
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures> {
        if buf.len() < OFP_SWITCH_FEATURES_LEN {
            return Err(short("truncated features reply"));
        }
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let supported_actions = bytes.read_u32::<BigEndian>()?;
        let ports = buf[OFP_SWITCH_FEATURES_LEN..]
            .chunks_exact(OFP_PHY_PORT_LEN)
            .map(|port| u16::from_be_bytes([port[0], port[1]]))
            .collect();
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions,
            ports,
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        let caps = self.supported_capabilities;
        let cap_bits = [
            (caps.flow_stats, 0),
            (caps.table_stats, 1),
            (caps.port_stats, 2),
            (caps.stp, 3),
            (caps.ip_reasm, 5),
            (caps.queue_stats, 6),
            (caps.arp_match_ip, 7),
        ]
        .iter()
        .fold(0u32, |acc, &(on, bit)| if on { acc | (1 << bit) } else { acc });
        let _ = bytes.write_u64::<BigEndian>(self.datapath_id);
        let _ = bytes.write_u32::<BigEndian>(self.num_buffers);
        let _ = bytes.write_u8(self.num_tables);
        bytes.extend_from_slice(&[0; 3]);
        let _ = bytes.write_u32::<BigEndian>(cap_bits);
        let _ = bytes.write_u32::<BigEndian>(self.supported_actions);
        for port in self.ports {
            let mut desc = [0u8; OFP_PHY_PORT_LEN];
            desc[..2].copy_from_slice(&port.to_be_bytes());
            bytes.extend_from_slice(&desc);
        }
    }
}

/// Switch configuration sent with SET_CONFIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwitchConfig {
    /// IP fragment handling, one of the `OFPC_FRAG_*` values.
    pub flags: u16,
    /// Bytes of a table-miss packet forwarded to the controller.
    pub miss_send_len: u16,
}

impl MessageType for SwitchConfig {
    fn size_of(&self) -> usize {
        4
    }

    fn parse(buf: &[u8]) -> Result<SwitchConfig> {
        let mut bytes = Cursor::new(buf);
        Ok(SwitchConfig {
            flags: bytes.read_u16::<BigEndian>()?,
            miss_send_len: bytes.read_u16::<BigEndian>()?,
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(self.flags);
        let _ = bytes.write_u16::<BigEndian>(self.miss_send_len);
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    pub fn from_u16(cmd: u16) -> Option<FlowModCmd> {
        match cmd {
            0 => Some(FlowModCmd::AddFlow),
            1 => Some(FlowModCmd::ModFlow),
            2 => Some(FlowModCmd::ModStrictFlow),
            3 => Some(FlowModCmd::DeleteFlow),
            4 => Some(FlowModCmd::DeleteStrictFlow),
            _ => None,
        }
    }

    /// Whether the command installs or rewrites a flow entry.
    pub fn installs_flow(self) -> bool {
        matches!(
            self,
            FlowModCmd::AddFlow | FlowModCmd::ModFlow | FlowModCmd::ModStrictFlow
        )
    }
}

/// Flow table modification without actions; the manager only issues deletions
/// itself and inspects application flow mods without rebuilding them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<u16>,
    pub check_overlap: bool,
}

const OFP_FLOW_MOD_BODY_LEN: usize = 24;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    /// Delete every flow entry in every table.
    pub fn delete_all() -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteFlow,
            pattern: Pattern::match_all(),
            priority: 0,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: None,
            out_port: None,
            check_overlap: false,
        }
    }

    /// Read cookie and command out of a complete FLOW_MOD frame (header included)
    /// without decoding the rest.
    pub fn peek_cookie_and_command(frame: &[u8]) -> Option<(u64, FlowModCmd)> {
        let at = crate::ofp_header::OFP_HEADER_LEN + OFP_MATCH_LEN;
        if frame.len() < at + 10 {
            return None;
        }
        let mut bytes = Cursor::new(&frame[at..]);
        let cookie = bytes.read_u64::<BigEndian>().ok()?;
        let command = FlowModCmd::from_u16(bytes.read_u16::<BigEndian>().ok()?)?;
        Some((cookie, command))
    }
}

impl MessageType for FlowMod {
    fn size_of(&self) -> usize {
        OFP_MATCH_LEN + OFP_FLOW_MOD_BODY_LEN
    }

    fn parse(buf: &[u8]) -> Result<FlowMod> {
        if buf.len() < OFP_MATCH_LEN + OFP_FLOW_MOD_BODY_LEN {
            return Err(short("truncated flow mod"));
        }
        let mut bytes = Cursor::new(&buf[OFP_MATCH_LEN..]);
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::from_u16(bytes.read_u16::<BigEndian>()?)
            .ok_or(short("unknown flow mod command"))?;
        let idle = bytes.read_u16::<BigEndian>()?;
        let hard = bytes.read_u16::<BigEndian>()?;
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = bytes.read_u16::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let timeout = |t| if t == 0 { Timeout::Permanent } else { Timeout::ExpiresAfter(t) };
        Ok(FlowMod {
            command,
            // Match fields are not decoded back.
            pattern: Pattern::match_all(),
            priority,
            cookie,
            idle_timeout: timeout(idle),
            hard_timeout: timeout(hard),
            notify_when_removed: flags & 1 != 0,
            apply_to_packet: if buffer_id == u32::MAX { None } else { Some(buffer_id) },
            out_port: if out_port == OFPP_NONE { None } else { Some(out_port) },
            check_overlap: flags & 2 != 0,
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        self.pattern.marshal(bytes);
        let _ = bytes.write_u64::<BigEndian>(self.cookie);
        let _ = bytes.write_u16::<BigEndian>(self.command as u16);
        let _ = bytes.write_u16::<BigEndian>(self.idle_timeout.to_int());
        let _ = bytes.write_u16::<BigEndian>(self.hard_timeout.to_int());
        let _ = bytes.write_u16::<BigEndian>(self.priority);
        let _ = bytes.write_u32::<BigEndian>(self.apply_to_packet.unwrap_or(u32::MAX));
        let _ = bytes.write_u16::<BigEndian>(self.out_port.unwrap_or(OFPP_NONE));
        let _ = bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            self.check_overlap,
            self.notify_when_removed,
        ));
    }
}

/// The reason a packet arrives at the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub buffer_id: Option<u32>,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
    pub data: Vec<u8>,
}

const OFP_PACKET_IN_LEN: usize = 10;

impl MessageType for PacketIn {
    fn size_of(&self) -> usize {
        OFP_PACKET_IN_LEN + self.data.len()
    }

    fn parse(buf: &[u8]) -> Result<PacketIn> {
        if buf.len() < OFP_PACKET_IN_LEN {
            return Err(short("truncated packet in"));
        }
        let mut bytes = Cursor::new(buf);
        let buffer_id = match bytes.read_u32::<BigEndian>()? {
            u32::MAX => None,
            n => Some(n),
        };
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            _ => PacketInReason::ExplicitSend,
        };
        Ok(PacketIn {
            buffer_id,
            total_len,
            port,
            reason,
            data: buf[OFP_PACKET_IN_LEN..].to_vec(),
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u32::<BigEndian>(self.buffer_id.unwrap_or(u32::MAX));
        let _ = bytes.write_u16::<BigEndian>(self.total_len);
        let _ = bytes.write_u16::<BigEndian>(self.port);
        let _ = bytes.write_u8(self.reason as u8);
        bytes.push(0);
        bytes.extend_from_slice(&self.data);
    }
}

/// A flow entry expired or was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRemoved {
    pub cookie: u64,
    pub priority: u16,
    pub reason: u8,
}

impl MessageType for FlowRemoved {
    fn size_of(&self) -> usize {
        OFP_MATCH_LEN + 40
    }

    fn parse(buf: &[u8]) -> Result<FlowRemoved> {
        if buf.len() < OFP_MATCH_LEN + 11 {
            return Err(short("truncated flow removed"));
        }
        let mut bytes = Cursor::new(&buf[OFP_MATCH_LEN..]);
        Ok(FlowRemoved {
            cookie: bytes.read_u64::<BigEndian>()?,
            priority: bytes.read_u16::<BigEndian>()?,
            reason: bytes.read_u8()?,
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        Pattern::match_all().marshal(bytes);
        let _ = bytes.write_u64::<BigEndian>(self.cookie);
        let _ = bytes.write_u16::<BigEndian>(self.priority);
        let _ = bytes.write_u8(self.reason);
        bytes.extend_from_slice(&[0; 29]);
    }
}

/// An error reported by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(&self) -> usize {
        4 + self.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            typ,
            code,
            data: buf[4..].to_vec(),
        })
    }

    fn marshal(self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(self.typ);
        let _ = bytes.write_u16::<BigEndian>(self.code);
        bytes.extend_from_slice(&self.data);
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    ///
    /// Messages the manager neither emits nor inspects are carried as `Other`
    /// with their raw body.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        SetConfig(SwitchConfig),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        FlowRemoved(FlowRemoved),
        Other(MsgCode, Vec<u8>),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::SetConfig(_) => MsgCode::SetConfig,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::FlowRemoved(_) => MsgCode::FlowRemoved,
                Message::Other(code, _) => code,
            }
        }

        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) {
            match msg {
                Message::Hello | Message::FeaturesReq => (),
                Message::Error(err) => err.marshal(bytes),
                Message::EchoRequest(buf) | Message::EchoReply(buf) | Message::Other(_, buf) => {
                    bytes.extend_from_slice(&buf)
                }
                Message::FeaturesReply(feats) => feats.marshal(bytes),
                Message::SetConfig(cfg) => cfg.marshal(bytes),
                Message::FlowMod(flow_mod) => flow_mod.marshal(bytes),
                Message::PacketIn(packet_in) => packet_in.marshal(bytes),
                Message::FlowRemoved(removed) => removed.marshal(bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello | Message::FeaturesReq => 0,
                Message::Error(ref err) => err.size_of(),
                Message::EchoRequest(ref buf)
                | Message::EchoReply(ref buf)
                | Message::Other(_, ref buf) => buf.len(),
                Message::FeaturesReply(ref feats) => feats.size_of(),
                Message::SetConfig(ref cfg) => cfg.size_of(),
                Message::FlowMod(ref flow_mod) => flow_mod.size_of(),
                Message::PacketIn(ref packet_in) => packet_in.size_of(),
                Message::FlowRemoved(ref removed) => removed.size_of(),
            };
            OfpHeader::size() + body
        }

        fn header_of(xid: u32, msg: &Message) -> OfpHeader {
            OfpHeader::new(
                OFP_VERSION,
                Self::msg_code_of_message(msg) as u8,
                Self::size_of(msg) as u16,
                xid,
            )
        }

        fn marshal(xid: u32, msg: Message) -> Vec<u8> {
            let hdr = Self::header_of(xid, &msg);
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr);
            Message::marshal_body(msg, &mut bytes);
            bytes
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message)> {
            if header.version() != OFP_VERSION {
                return Err(Error::UnsupportedVersion(header.version()));
            }
            let typ = header
                .type_code()
                .ok_or(Error::InvalidFrame("unknown message type"))?;
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::SetConfig => Message::SetConfig(SwitchConfig::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::FlowRemoved => Message::FlowRemoved(FlowRemoved::parse(buf)?),
                code => Message::Other(code, buf.to_vec()),
            };
            Ok((header.xid(), msg))
        }
    }
}
