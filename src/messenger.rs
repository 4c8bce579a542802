//! Envelopes exchanged with application services, the `Messenger` seam the
//! connection talks through, and `LocalBus`, an in-process implementation of
//! it built on tokio channels.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Mirror target used when diagnostic dumping is re-established after a rename.
pub const DEFAULT_DUMP_SERVICE_NAME: &str = "dump_service";

/// Category tag carried by every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageTag {
    /// The secure channel is up; the handshake is starting.
    Connected,
    /// The handshake completed; the envelope carries the datapath id.
    Ready,
    /// The secure channel is gone.
    Disconnected,
    PacketIn,
    PortStatus,
    Vendor,
    StateNotify,
    /// A raw OpenFlow frame addressed to or from one specific service.
    OpenflowMessage,
    DumpXidTable,
    DumpCookieTable,
    ToggleCookieAging,
}

impl fmt::Display for MessageTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A message on the service bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub tag: MessageTag,
    /// The switch the message concerns. `None` before the handshake completes.
    pub datapath_id: Option<u64>,
    /// Sending service, for application-originated OpenFlow frames.
    pub service: Option<String>,
    pub payload: Bytes,
}

impl Envelope {
    pub fn new(tag: MessageTag, datapath_id: Option<u64>, payload: Bytes) -> Self {
        Envelope {
            tag,
            datapath_id,
            service: None,
            payload,
        }
    }

    /// An OpenFlow frame an application wants sent to switch `datapath_id`.
    pub fn openflow(datapath_id: u64, service: &str, frame: Bytes) -> Self {
        Envelope {
            tag: MessageTag::OpenflowMessage,
            datapath_id: Some(datapath_id),
            service: Some(service.to_string()),
            payload: frame,
        }
    }

    /// A control message without payload.
    pub fn control(tag: MessageTag) -> Self {
        Envelope::new(tag, None, Bytes::new())
    }
}

/// The pub/sub transport as seen from one connection.
pub trait Messenger {
    /// Deliver `envelope` to the endpoint named `service`.
    fn send(&mut self, service: &str, envelope: Envelope) -> Result<()>;
    /// Move the endpoint `from` to the name `to`, keeping its queued messages.
    fn rename_endpoint(&mut self, from: &str, to: &str) -> Result<()>;
    /// Whether diagnostic mirroring is active.
    fn dump_enabled(&self) -> bool;
    /// Mirror all traffic of `service` to `dump_service`.
    fn start_dump(&mut self, service: &str, dump_service: &str);
    fn stop_dump(&mut self);
    /// Push out anything buffered; called before the connection stops.
    fn flush(&mut self) {}
}

/// Process-local service bus. Cheap to clone; clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    endpoints: Arc<DashMap<String, mpsc::UnboundedSender<Envelope>>>,
    /// service name -> dump service name
    mirrors: Arc<DashMap<String, String>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its inbox. Re-registering a name
    /// replaces the previous inbox.
    pub fn register(&self, name: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.endpoints.insert(name.to_string(), tx).is_some() {
            warn!(service = name, "Endpoint re-registered, previous inbox dropped");
        }
        rx
    }

    pub fn unregister(&self, name: &str) {
        self.endpoints.remove(name);
        self.mirrors.remove(name);
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Deliver an envelope, mirroring it if the destination is being dumped.
    pub fn deliver(&self, service: &str, envelope: Envelope) -> Result<()> {
        if let Some(dump) = self.mirrors.get(service) {
            self.deliver_mirror(dump.value(), &envelope);
        }
        self.deliver_direct(service, envelope)
    }

    fn deliver_direct(&self, service: &str, envelope: Envelope) -> Result<()> {
        let closed = match self.endpoints.get(service) {
            None => return Err(Error::UnknownService(service.to_string())),
            Some(tx) => tx.send(envelope).is_err(),
        };
        if closed {
            self.endpoints.remove(service);
            return Err(Error::ChannelClosed);
        }
        Ok(())
    }

    fn deliver_mirror(&self, dump_service: &str, envelope: &Envelope) {
        if let Err(e) = self.deliver_direct(dump_service, envelope.clone()) {
            debug!(service = dump_service, error = %e, "Dump delivery failed");
        }
    }

    pub fn rename(&self, from: &str, to: &str) -> Result<()> {
        let (_, tx) = self
            .endpoints
            .remove(from)
            .ok_or_else(|| Error::UnknownService(from.to_string()))?;
        self.endpoints.insert(to.to_string(), tx);
        if let Some((_, dump)) = self.mirrors.remove(from) {
            self.mirrors.insert(to.to_string(), dump);
        }
        Ok(())
    }

    fn set_mirror(&self, service: &str, dump_service: &str) {
        self.mirrors
            .insert(service.to_string(), dump_service.to_string());
    }

    fn clear_mirror(&self, service: &str) {
        self.mirrors.remove(service);
    }
}

/// `Messenger` for one connection on a `LocalBus`.
#[derive(Debug, Clone)]
pub struct BusMessenger {
    bus: LocalBus,
    /// (mirrored service, dump service)
    dump: Option<(String, String)>,
}

impl BusMessenger {
    pub fn new(bus: LocalBus) -> Self {
        BusMessenger { bus, dump: None }
    }
}

impl Messenger for BusMessenger {
    fn send(&mut self, service: &str, envelope: Envelope) -> Result<()> {
        if let Some((_, dump_service)) = &self.dump {
            self.bus.deliver_mirror(dump_service, &envelope);
        }
        self.bus.deliver(service, envelope)
    }

    fn rename_endpoint(&mut self, from: &str, to: &str) -> Result<()> {
        self.bus.rename(from, to)
    }

    fn dump_enabled(&self) -> bool {
        self.dump.is_some()
    }

    fn start_dump(&mut self, service: &str, dump_service: &str) {
        self.bus.set_mirror(service, dump_service);
        self.dump = Some((service.to_string(), dump_service.to_string()));
    }

    fn stop_dump(&mut self) {
        if let Some((service, _)) = self.dump.take() {
            self.bus.clear_mirror(&service);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deliver_reaches_registered_inbox() {
        let bus = LocalBus::new();
        let mut rx = bus.register("app");
        bus.deliver("app", Envelope::control(MessageTag::Ready)).unwrap();
        assert_eq!(rx.try_recv().unwrap().tag, MessageTag::Ready);
        assert!(matches!(
            bus.deliver("nobody", Envelope::control(MessageTag::Ready)),
            Err(Error::UnknownService(_))
        ));
    }

    #[test]
    fn dropped_inbox_is_reported_and_forgotten() {
        let bus = LocalBus::new();
        drop(bus.register("gone"));
        assert!(matches!(
            bus.deliver("gone", Envelope::control(MessageTag::Ready)),
            Err(Error::ChannelClosed)
        ));
        assert!(!bus.is_registered("gone"));
    }

    #[test]
    fn rename_keeps_inbox() {
        let bus = LocalBus::new();
        let mut rx = bus.register("switch_manager");
        bus.rename("switch_manager", "switch.1").unwrap();
        assert!(!bus.is_registered("switch_manager"));
        bus.deliver("switch.1", Envelope::control(MessageTag::DumpXidTable))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().tag, MessageTag::DumpXidTable);
    }

    #[test]
    fn dump_mirrors_both_directions() {
        let bus = LocalBus::new();
        let mut dump_rx = bus.register(DEFAULT_DUMP_SERVICE_NAME);
        let _own = bus.register("switch.1");
        let _app = bus.register("app");
        let mut messenger = BusMessenger::new(bus.clone());
        messenger.start_dump("switch.1", DEFAULT_DUMP_SERVICE_NAME);
        assert!(messenger.dump_enabled());

        messenger
            .send("app", Envelope::control(MessageTag::PacketIn))
            .unwrap();
        bus.deliver("switch.1", Envelope::control(MessageTag::OpenflowMessage))
            .unwrap();
        assert_eq!(dump_rx.try_recv().unwrap().tag, MessageTag::PacketIn);
        assert_eq!(dump_rx.try_recv().unwrap().tag, MessageTag::OpenflowMessage);

        messenger.stop_dump();
        assert!(!messenger.dump_enabled());
        messenger
            .send("app", Envelope::control(MessageTag::PacketIn))
            .unwrap();
        assert!(dump_rx.try_recv().is_err());
    }
}
