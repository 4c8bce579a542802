//! Tunable parameters of a switch connection.

use std::net::SocketAddr;
use std::time::Duration;

use crate::openflow0x01::OFPC_FRAG_NORMAL;
use crate::service::DestinationLists;

/// Prefix of the datapath-specific service name taken once the handshake completes.
pub const SWITCH_MANAGER_PREFIX: &str = "switch.";

/// Everything a `SwitchConnection` and the daemon need to know.
#[derive(Debug, Clone)]
pub struct Config {
    /// Service name before the handshake completes. The management endpoint
    /// is this name with a `.m` suffix.
    pub service_name: String,
    /// Address the daemon accepts switch connections on.
    pub listen: SocketAddr,
    /// Fan-out lists.
    pub destinations: DestinationLists,
    pub handshake: HandshakeConfig,
    pub switch: SwitchDefaults,
    pub cookie_aging: CookieAgingConfig,
    /// Where diagnostic mirroring is sent when re-established after a rename.
    pub dump_service_name: String,
}

/// Per-phase handshake deadlines.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub hello_timeout: Duration,
    pub features_reply_timeout: Duration,
}

/// Values sent to the switch with SET_CONFIG.
#[derive(Debug, Clone)]
pub struct SwitchDefaults {
    /// One of the `OFPC_FRAG_*` flags.
    pub config_flags: u16,
    pub miss_send_len: u16,
}

/// Periodic cookie table aging.
#[derive(Debug, Clone)]
pub struct CookieAgingConfig {
    /// Start aging at connect instead of waiting for the toggle command.
    pub enabled: bool,
    pub interval: Duration,
    /// Entries untouched for longer than this are swept.
    pub max_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name: "switch_manager".to_string(),
            listen: SocketAddr::from(([127, 0, 0, 1], 6633)),
            destinations: DestinationLists::default(),
            handshake: HandshakeConfig::default(),
            switch: SwitchDefaults::default(),
            cookie_aging: CookieAgingConfig::default(),
            dump_service_name: crate::messenger::DEFAULT_DUMP_SERVICE_NAME.to_string(),
        }
    }
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        HandshakeConfig {
            hello_timeout: Duration::from_secs(5),
            features_reply_timeout: Duration::from_secs(5),
        }
    }
}

impl Default for SwitchDefaults {
    fn default() -> Self {
        SwitchDefaults {
            config_flags: OFPC_FRAG_NORMAL,
            miss_send_len: u16::MAX,
        }
    }
}

impl Default for CookieAgingConfig {
    fn default() -> Self {
        CookieAgingConfig {
            enabled: false,
            interval: Duration::from_secs(3600),
            max_age: Duration::from_secs(3600),
        }
    }
}

impl Config {
    /// Name of the diagnostics endpoint for a service.
    pub fn management_service_name(service_name: &str) -> String {
        format!("{}.m", service_name)
    }

    /// The datapath-specific service name.
    pub fn switch_service_name(datapath_id: u64) -> String {
        format!("{}{:x}", SWITCH_MANAGER_PREFIX, datapath_id)
    }
}
