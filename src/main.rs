use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ofp_switch_manager::config::{Config, CookieAgingConfig, HandshakeConfig, SwitchDefaults};
use ofp_switch_manager::messenger::DEFAULT_DUMP_SERVICE_NAME;
use ofp_switch_manager::openflow0x01::{OFPC_FRAG_DROP, OFPC_FRAG_NORMAL, OFPC_FRAG_REASM};
use ofp_switch_manager::service::DestinationLists;
use ofp_switch_manager::{daemon, LocalBus};

#[derive(Parser)]
#[command(name = "switch_manager")]
#[command(version)]
#[command(about = "OpenFlow 1.0 switch connection manager", long_about = None)]
struct Cli {
    /// Address to accept switch connections on
    #[arg(long, short, env = "SWITCH_MANAGER_LISTEN", default_value = "127.0.0.1:6633")]
    listen: SocketAddr,

    /// Service name used before a switch identifies itself
    #[arg(long, short, env = "SWITCH_MANAGER_NAME", default_value = "switch_manager")]
    name: String,

    /// Seconds to wait for the switch's HELLO
    #[arg(long, default_value_t = 5)]
    hello_timeout: u64,

    /// Seconds to wait for the FEATURES_REPLY
    #[arg(long, default_value_t = 5)]
    features_reply_timeout: u64,

    /// Age the cookie table from the start instead of waiting for the toggle command
    #[arg(long)]
    cookie_aging: bool,

    /// Seconds between cookie table sweeps
    #[arg(long, default_value_t = 3600)]
    cookie_aging_interval: u64,

    /// Seconds a cookie may stay untouched before it is swept
    #[arg(long, default_value_t = 3600)]
    cookie_max_age: u64,

    /// IP fragment handling requested with SET_CONFIG
    #[arg(long, value_enum, default_value_t = FragHandling::Normal)]
    ip_frag: FragHandling,

    /// miss_send_len sent with SET_CONFIG
    #[arg(long, default_value_t = u16::MAX)]
    miss_send_len: u16,

    /// Service that receives mirrored traffic when dumping is active
    #[arg(long, default_value = DEFAULT_DUMP_SERVICE_NAME)]
    dump_service: String,

    /// Destination rules, e.g. packet_in::learning_switch state_notify::topology
    rules: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum FragHandling {
    /// No special handling
    Normal,
    /// Drop fragments
    Drop,
    /// Reassemble fragments
    Reassemble,
}

impl FragHandling {
    fn config_flags(self) -> u16 {
        match self {
            FragHandling::Normal => OFPC_FRAG_NORMAL,
            FragHandling::Drop => OFPC_FRAG_DROP,
            FragHandling::Reassemble => OFPC_FRAG_REASM,
        }
    }
}

impl Cli {
    fn into_config(self) -> Config {
        Config {
            service_name: self.name,
            listen: self.listen,
            destinations: DestinationLists::from_rules(&self.rules),
            handshake: HandshakeConfig {
                hello_timeout: Duration::from_secs(self.hello_timeout),
                features_reply_timeout: Duration::from_secs(self.features_reply_timeout),
            },
            switch: SwitchDefaults {
                config_flags: self.ip_frag.config_flags(),
                miss_send_len: self.miss_send_len,
            },
            cookie_aging: CookieAgingConfig {
                enabled: self.cookie_aging,
                interval: Duration::from_secs(self.cookie_aging_interval),
                max_age: Duration::from_secs(self.cookie_max_age),
            },
            dump_service_name: self.dump_service,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Cli::parse().into_config();
    tracing::info!("Switch manager v{}", env!("CARGO_PKG_VERSION"));

    daemon::serve(config, LocalBus::new()).await?;
    Ok(())
}
