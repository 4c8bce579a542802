//! OpenFlow 1.0 switch connection manager.
//!
//! One `SwitchConnection` per switch performs the handshake, frames the
//! secure channel, correlates replies with the services that asked for them
//! and fans switch events out to subscribed services.
#![deny(clippy::expect_used, clippy::unwrap_used)]

pub mod config;
pub mod cookie_table;
pub mod daemon;
pub mod error;
pub mod message_queue;
pub mod messenger;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod secure_channel;
pub mod service;
pub mod switch;
pub mod timer;
pub mod xid_table;

pub use config::Config;
pub use error::{Error, Result};
pub use messenger::{BusMessenger, Envelope, LocalBus, MessageTag, Messenger};
pub use secure_channel::{Channel, TcpChannel};
pub use switch::{SwitchConnection, SwitchState};
