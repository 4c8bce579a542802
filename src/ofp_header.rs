use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{Error, Result};
use crate::openflow0x01::MsgCode;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be delimited on the secure channel and dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

/// Byte-size of an `OfpHeader` on the wire.
pub const OFP_HEADER_LEN: usize = 8;

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        OFP_HEADER_LEN
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        // Writes into a Vec cannot fail.
        let _ = bytes.write_u8(header.version);
        let _ = bytes.write_u8(header.typ);
        let _ = bytes.write_u16::<BigEndian>(header.length);
        let _ = bytes.write_u32::<BigEndian>(header.xid);
    }

    /// Parses the header at the front of `buf`.
    ///
    /// Fails if fewer than eight bytes are available or the declared length is
    /// shorter than the header itself.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < OFP_HEADER_LEN {
            return Err(Error::InvalidFrame("truncated header"));
        }
        let mut bytes = Cursor::new(&buf[..OFP_HEADER_LEN]);
        let header = OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        };
        if header.length() < OFP_HEADER_LEN {
            return Err(Error::InvalidFrame("declared length shorter than header"));
        }
        Ok(header)
    }

    /// Reads only the length field of a (possibly incomplete) frame prefix.
    ///
    /// Returns `None` until the first four bytes have arrived.
    pub fn peek_length(buf: &[u8]) -> Option<usize> {
        if buf.len() < 4 {
            return None;
        }
        Some(u16::from_be_bytes([buf[2], buf[3]]) as usize)
    }

    /// Overwrites the xid of an already marshaled frame in place.
    pub fn rewrite_xid(frame: &mut [u8], xid: u32) {
        if frame.len() >= OFP_HEADER_LEN {
            frame[4..8].copy_from_slice(&xid.to_be_bytes());
        }
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the raw message type byte of a header.
    pub fn type_byte(&self) -> u8 {
        self.typ
    }

    /// Return the OpenFlow message type code of a header, if it is one OpenFlow 1.0 defines.
    pub fn type_code(&self) -> Option<MsgCode> {
        MsgCode::from_u8(self.typ)
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}
