//! Non-blocking I/O on the secure channel: draining the socket into the
//! receive queue, carving frames, and flushing the send queue.

use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::Interest;
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::messenger::Messenger;
use crate::ofp_header::{OfpHeader, OFP_HEADER_LEN};
use crate::switch::SwitchConnection;

const READ_CHUNK: usize = 64 * 1024;
/// Most bytes taken from the socket per readiness event. Whatever is left is
/// picked up on the next poll.
pub const MAX_READ_PER_EVENT: usize = 256 * 1024;

/// A byte stream to a switch. `read` and `write` never block; they report
/// `ErrorKind::WouldBlock` when no progress can be made.
pub trait Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn close(&mut self);
    /// Identity of the remote end, for logs.
    fn peer(&self) -> String;
}

/// Which directions the connection wants to make progress in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// A `Channel` over a tokio TCP stream.
#[derive(Debug)]
pub struct TcpChannel {
    stream: Option<TcpStream>,
    peer: String,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        TcpChannel {
            stream: Some(stream),
            peer,
        }
    }

    /// Wait until the socket can make progress in one of the wanted directions.
    pub async fn ready(&self, want: Readiness) -> io::Result<Readiness> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| io::Error::from(ErrorKind::NotConnected))?;
        let mut interest = Interest::READABLE;
        if want.writable {
            interest = interest | Interest::WRITABLE;
        }
        let ready = stream.ready(interest).await?;
        Ok(Readiness {
            readable: ready.is_readable() || ready.is_read_closed(),
            writable: ready.is_writable(),
        })
    }
}

impl Channel for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &self.stream {
            Some(stream) => stream.try_read(buf),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &self.stream {
            Some(stream) => stream.try_write(buf),
            None => Err(ErrorKind::NotConnected.into()),
        }
    }

    fn close(&mut self) {
        self.stream = None;
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

impl<C: Channel, M: Messenger> SwitchConnection<C, M> {
    /// Directions to wait on: always read while the channel is open, write
    /// only with bytes queued. `None` once the channel is closed.
    pub fn interest(&self) -> Option<Readiness> {
        self.channel.as_ref()?;
        Some(Readiness {
            readable: true,
            writable: self
                .send_queue
                .as_ref()
                .is_some_and(|queue| !queue.is_empty()),
        })
    }

    /// Read what the OS has buffered, up to `MAX_READ_PER_EVENT` bytes, and
    /// push complete frames onto the receive queue. A trailing partial frame
    /// stays in the fragment buffer.
    pub fn recv_from_secure_channel(&mut self) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        let fragment = self.fragment_buf.get_or_insert_with(BytesMut::new);
        let mut chunk = [0u8; READ_CHUNK];
        let mut total = 0;
        while total < MAX_READ_PER_EVENT {
            let want = READ_CHUNK.min(MAX_READ_PER_EVENT - total);
            match channel.read(&mut chunk[..want]) {
                Ok(0) => return Err(Error::ConnectionClosed),
                Ok(n) => {
                    trace!(bytes = n, "Read from secure channel");
                    fragment.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }

        let recv_queue = self.recv_queue.as_mut().ok_or(Error::NotConnected)?;
        while let Some(length) = OfpHeader::peek_length(fragment) {
            if length < OFP_HEADER_LEN {
                return Err(Error::InvalidFrame("declared length shorter than header"));
            }
            if fragment.len() < length {
                break;
            }
            recv_queue.enqueue(fragment.split_to(length).freeze());
        }
        Ok(())
    }

    /// Write queued frames until the queue is empty or the socket is full.
    pub fn flush_secure_channel(&mut self) -> Result<()> {
        let channel = self.channel.as_mut().ok_or(Error::NotConnected)?;
        let Some(send_queue) = self.send_queue.as_mut() else {
            return Ok(());
        };
        while let Some(pending) = send_queue.pending() {
            match channel.write(pending) {
                Ok(0) => return Err(Error::Io(ErrorKind::WriteZero.into())),
                Ok(n) => {
                    trace!(bytes = n, "Wrote to secure channel");
                    send_queue.consume(n);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(())
    }

    /// One round of I/O after the driver saw readiness: read and dispatch,
    /// then flush whatever the dispatch queued. A channel failure disconnects.
    pub fn process_io(&mut self, readable: bool, writable: bool) -> Result<()> {
        if readable {
            if let Err(e) = self.recv_from_secure_channel() {
                debug!(error = %e, channel = %self.channel_id(), "Receive failed");
                self.disconnect();
                return Err(e);
            }
            self.handle_messages_from_secure_channel()?;
        }
        let queued = self.send_queue.as_ref().is_some_and(|q| !q.is_empty());
        if writable || queued {
            if let Err(e) = self.flush_secure_channel() {
                debug!(error = %e, channel = %self.channel_id(), "Send failed");
                self.disconnect();
                return Err(e);
            }
        }
        Ok(())
    }
}
