use crate::error::Result;
use crate::ofp_header::OfpHeader;

/// OpenFlow Message
///
/// Whole-frame view of a protocol version's messages: how large a message is
/// on the wire, which header it travels under, and how to turn it into or out
/// of a byte buffer.
pub trait OfpMessage: Sized {
    /// Byte-size of the framed message, header included.
    fn size_of(msg: &Self) -> usize;
    /// The header `msg` is sent under with transaction id `xid`.
    fn header_of(xid: u32, msg: &Self) -> OfpHeader;
    /// A complete frame, header first.
    fn marshal(xid: u32, msg: Self) -> Vec<u8>;
    /// Decode the body `buf` that followed `header`, returning the transaction
    /// id alongside the message. Fails on a foreign version or a short body.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Self)>;
}
