//! Header decoding for the payload of a packet-in.
//!
//! Only the fields an OpenFlow 1.0 match can express are kept: Ethernet
//! addresses, the outermost VLAN tag, ethertype, the IPv4 addresses, TOS and
//! protocol, and the transport ports (ICMP type and code for ICMP).

use std::io::{BufRead, Cursor};

use byteorder::{BigEndian, ReadBytesExt};

/// Ethernet header length without VLAN tags.
const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;
const IPV4_MIN_LEN: usize = 20;

#[repr(u16)]
enum EthTyp {
    EthTypIP = 0x0800,
    EthTypARP = 0x0806,
    EthTypVLAN = 0x8100,
}

#[repr(u8)]
enum IpProto {
    IpICMP = 0x01,
    IpTCP = 0x06,
    IpUDP = 0x11,
}

/// Format a hardware address as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(addr: &[u8; 6]) -> String {
    addr.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

/// An 802.1Q tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub vid: u16,
    pub pcp: u8,
    pub dei: bool,
}

impl VlanTag {
    fn of_tci(tci: u16) -> VlanTag {
        VlanTag {
            vid: tci & 0x0fff,
            dei: tci & 0x1000 != 0,
            pcp: (tci >> 13) as u8,
        }
    }
}

/// Transport header fields relevant to flow matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tp {
    Tcp { src: u16, dst: u16 },
    Udp { src: u16, dst: u16 },
    Icmp { typ: u8, code: u8 },
    Unparsable(u8),
}

/// IPv4 header fields relevant to flow matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub proto: u8,
    pub src: u32,
    pub dst: u32,
    pub tp: Tp,
}

/// Represents a packet at the network protocol level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp { oper: u16, spa: u32, tpa: u32 },
    Unparsable(u16),
}

/// Represents a packet at the ethernet protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: [u8; 6],
    pub dl_dst: [u8; 6],
    /// Every 802.1Q tag, outermost first.
    pub vlan_tags: Vec<VlanTag>,
    pub dl_type: u16,
    pub nw: Nw,
}

impl Packet {
    /// Decode the headers of an Ethernet frame.
    ///
    /// Returns `None` when the frame is shorter than its headers claim or the
    /// source address is multicast/broadcast.
    pub fn parse(buf: &[u8]) -> Option<Packet> {
        if buf.len() < ETH_HEADER_LEN {
            return None;
        }
        let mut bytes = Cursor::new(buf);
        let mut dl_dst = [0u8; 6];
        let mut dl_src = [0u8; 6];
        dl_dst.copy_from_slice(&buf[0..6]);
        dl_src.copy_from_slice(&buf[6..12]);
        if dl_src[0] & 0x01 != 0 {
            return None;
        }
        bytes.consume(12);

        let mut dl_type = bytes.read_u16::<BigEndian>().ok()?;
        let mut vlan_tags = vec![];
        while dl_type == EthTyp::EthTypVLAN as u16 {
            if remaining(&bytes) < VLAN_TAG_LEN {
                return None;
            }
            let tci = bytes.read_u16::<BigEndian>().ok()?;
            vlan_tags.push(VlanTag::of_tci(tci));
            dl_type = bytes.read_u16::<BigEndian>().ok()?;
        }

        let nw = match dl_type {
            t if t == EthTyp::EthTypIP as u16 => match Ip::parse(&mut bytes) {
                Some(ip) => Nw::Ip(ip),
                None => Nw::Unparsable(dl_type),
            },
            t if t == EthTyp::EthTypARP as u16 => parse_arp(&mut bytes).unwrap_or(Nw::Unparsable(dl_type)),
            _ => Nw::Unparsable(dl_type),
        };
        Some(Packet {
            dl_src,
            dl_dst,
            vlan_tags,
            dl_type,
            nw,
        })
    }

    /// The outermost VLAN tag, the one an OpenFlow 1.0 match sees.
    pub fn outer_vlan(&self) -> Option<VlanTag> {
        self.vlan_tags.first().copied()
    }
}

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

impl Ip {
    fn parse(bytes: &mut Cursor<&[u8]>) -> Option<Ip> {
        if remaining(bytes) < IPV4_MIN_LEN {
            return None;
        }
        let vhl = bytes.read_u8().ok()?;
        if (vhl >> 4) != 4 {
            return None;
        }
        let ihl = ((vhl & 0x0f) as usize) * 4;
        if ihl < IPV4_MIN_LEN {
            return None;
        }
        let tos = bytes.read_u8().ok()?;
        bytes.consume(4);
        let frag = bytes.read_u16::<BigEndian>().ok()?;
        bytes.consume(1);
        let proto = bytes.read_u8().ok()?;
        bytes.consume(2);
        let src = bytes.read_u32::<BigEndian>().ok()?;
        let dst = bytes.read_u32::<BigEndian>().ok()?;
        let options_len = ihl - IPV4_MIN_LEN;
        if remaining(bytes) < options_len {
            return None;
        }
        bytes.consume(options_len);
        // Only the first fragment carries the transport header.
        let tp = if frag & 0x1fff != 0 {
            Tp::Unparsable(proto)
        } else {
            parse_tp(proto, bytes)
        };
        Some(Ip {
            tos,
            proto,
            src,
            dst,
            tp,
        })
    }
}

fn parse_tp(proto: u8, bytes: &mut Cursor<&[u8]>) -> Tp {
    match proto {
        p if p == IpProto::IpTCP as u8 && remaining(bytes) >= 20 => Tp::Tcp {
            src: bytes.read_u16::<BigEndian>().unwrap_or_default(),
            dst: bytes.read_u16::<BigEndian>().unwrap_or_default(),
        },
        p if p == IpProto::IpUDP as u8 && remaining(bytes) >= 8 => Tp::Udp {
            src: bytes.read_u16::<BigEndian>().unwrap_or_default(),
            dst: bytes.read_u16::<BigEndian>().unwrap_or_default(),
        },
        p if p == IpProto::IpICMP as u8 && remaining(bytes) >= 4 => Tp::Icmp {
            typ: bytes.read_u8().unwrap_or_default(),
            code: bytes.read_u8().unwrap_or_default(),
        },
        p => Tp::Unparsable(p),
    }
}

fn parse_arp(bytes: &mut Cursor<&[u8]>) -> Option<Nw> {
    if remaining(bytes) < 28 {
        return None;
    }
    bytes.consume(6);
    let oper = bytes.read_u16::<BigEndian>().ok()?;
    bytes.consume(6);
    let spa = bytes.read_u32::<BigEndian>().ok()?;
    bytes.consume(6);
    let tpa = bytes.read_u32::<BigEndian>().ok()?;
    Some(Nw::Arp { oper, spa, tpa })
}
