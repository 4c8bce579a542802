//! Routing between the switch and application services.
//!
//! Inbound, a switch message is fanned out to every service subscribed to its
//! category. Outbound, an application frame is checked, registered in the
//! correlation tables where it needs to be, and queued for the switch.

use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tracing::{debug, warn};

use crate::cookie_table::CookieTable;
use crate::error::{Error, Result};
use crate::message_queue::MessageQueue;
use crate::messenger::{Envelope, MessageTag, Messenger};
use crate::ofp_header::OfpHeader;
use crate::openflow0x01::{FlowMod, MsgCode, OFP_VERSION};
use crate::xid_table::{XidEntry, XidTable};

/// Fan-out categories, each with its own destination list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Vendor,
    PacketIn,
    PortStatus,
    StateNotify,
}

impl Category {
    const ALL: [Category; 4] = [
        Category::Vendor,
        Category::PacketIn,
        Category::PortStatus,
        Category::StateNotify,
    ];

    /// Prefix of a destination rule, e.g. `packet_in::` in `packet_in::learning_switch`.
    pub fn rule_prefix(self) -> &'static str {
        match self {
            Category::Vendor => "vendor::",
            Category::PacketIn => "packet_in::",
            Category::PortStatus => "port_status::",
            Category::StateNotify => "state_notify::",
        }
    }

    /// The category a switch-originated message of type `code` is fanned out under.
    pub fn of_msg_code(code: MsgCode) -> Option<Category> {
        match code {
            MsgCode::Vendor => Some(Category::Vendor),
            MsgCode::PacketIn => Some(Category::PacketIn),
            MsgCode::PortStatus => Some(Category::PortStatus),
            _ => None,
        }
    }

    fn tag(self) -> MessageTag {
        match self {
            Category::Vendor => MessageTag::Vendor,
            Category::PacketIn => MessageTag::PacketIn,
            Category::PortStatus => MessageTag::PortStatus,
            Category::StateNotify => MessageTag::StateNotify,
        }
    }
}

/// Service names per category, fixed after startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationLists {
    vendor: Vec<String>,
    packet_in: Vec<String>,
    port_status: Vec<String>,
    state_notify: Vec<String>,
}

impl DestinationLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse one `category::service` rule.
    pub fn add_rule(&mut self, rule: &str) -> Result<()> {
        for category in Category::ALL {
            if let Some(service) = rule.strip_prefix(category.rule_prefix()) {
                if service.is_empty() {
                    return Err(Error::InvalidRule(rule.to_string()));
                }
                self.add(category, service);
                return Ok(());
            }
        }
        Err(Error::InvalidRule(rule.to_string()))
    }

    /// Build lists from rules, skipping (and logging) the ones that do not parse.
    pub fn from_rules<S: AsRef<str>>(rules: &[S]) -> Self {
        let mut lists = DestinationLists::new();
        for rule in rules {
            if let Err(e) = lists.add_rule(rule.as_ref()) {
                warn!(error = %e, "Ignoring destination rule");
            }
        }
        lists
    }

    pub fn add(&mut self, category: Category, service: &str) {
        let list = match category {
            Category::Vendor => &mut self.vendor,
            Category::PacketIn => &mut self.packet_in,
            Category::PortStatus => &mut self.port_status,
            Category::StateNotify => &mut self.state_notify,
        };
        if !list.iter().any(|s| s == service) {
            list.push(service.to_string());
        }
    }

    pub fn get(&self, category: Category) -> &[String] {
        match category {
            Category::Vendor => &self.vendor,
            Category::PacketIn => &self.packet_in,
            Category::PortStatus => &self.port_status,
            Category::StateNotify => &self.state_notify,
        }
    }
}

/// Multiplexes switch messages to services and application frames to the switch.
#[derive(Debug, Clone)]
pub struct ServiceRouter {
    destinations: DestinationLists,
}

impl ServiceRouter {
    pub fn new(destinations: DestinationLists) -> Self {
        ServiceRouter { destinations }
    }

    /// Deliver a copy of `payload` to every service in `category`'s list.
    /// A failed delivery is logged and does not stop the others. Returns the
    /// number of successful deliveries.
    pub fn fan_out<M: Messenger>(
        &self,
        messenger: &mut M,
        category: Category,
        tag: MessageTag,
        datapath_id: Option<u64>,
        payload: &Bytes,
    ) -> usize {
        let mut delivered = 0;
        for service in self.destinations.get(category) {
            let envelope = Envelope::new(tag, datapath_id, payload.clone());
            match messenger.send(service, envelope) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    service = %service,
                    tag = %tag,
                    error = %e,
                    "Failed to deliver to service"
                ),
            }
        }
        delivered
    }

    /// Announce a lifecycle event to the state-notify list.
    pub fn notify_state<M: Messenger>(
        &self,
        messenger: &mut M,
        tag: MessageTag,
        datapath_id: Option<u64>,
    ) -> usize {
        self.fan_out(
            messenger,
            Category::StateNotify,
            tag,
            datapath_id,
            &Bytes::new(),
        )
    }

    /// Fan a switch message out by its message type. Types without a
    /// destination list are not routed.
    pub fn route_inbound<M: Messenger>(
        &self,
        messenger: &mut M,
        code: MsgCode,
        datapath_id: u64,
        frame: &Bytes,
    ) -> usize {
        match Category::of_msg_code(code) {
            Some(category) => {
                self.fan_out(messenger, category, category.tag(), Some(datapath_id), frame)
            }
            None => {
                debug!(message = %code, "No destination list for message type");
                0
            }
        }
    }

    /// Queue an application frame for the switch.
    ///
    /// Flow mods that install a flow with a non-zero cookie register the
    /// cookie for `service`. Every frame gets a fresh xid and a record in
    /// `xids`, so a reply or an ERROR can be returned to `service` under its
    /// own xid.
    pub fn route_outbound(
        &self,
        xids: &mut XidTable,
        cookies: &mut CookieTable,
        send_queue: &mut MessageQueue,
        service: &str,
        frame: Bytes,
        now: Instant,
    ) -> Result<()> {
        let header = OfpHeader::parse(&frame)?;
        if header.version() != OFP_VERSION {
            return Err(Error::UnsupportedVersion(header.version()));
        }
        if header.length() != frame.len() {
            return Err(Error::InvalidFrame("length field does not match frame size"));
        }
        let code = header
            .type_code()
            .ok_or(Error::InvalidFrame("unknown message type"))?;

        if code == MsgCode::FlowMod {
            if let Some((cookie, command)) = FlowMod::peek_cookie_and_command(&frame) {
                if cookie != 0 && command.installs_flow() {
                    cookies.insert_or_refresh(cookie, service, now);
                }
            }
        }

        let xid = xids.next_xid();
        xids.insert(
            xid,
            XidEntry {
                service: Some(service.to_string()),
                original_xid: header.xid(),
                kind: code,
                issued_at: now,
            },
        )?;
        let mut buf = BytesMut::from(&frame[..]);
        OfpHeader::rewrite_xid(&mut buf, xid);
        debug!(
            service,
            message = %code,
            original_xid = header.xid(),
            xid,
            "Forwarding message"
        );
        let frame = buf.freeze();
        send_queue.enqueue(frame);
        Ok(())
    }
}
