//! Shared helpers: a manager on an ephemeral port and a scripted switch.
#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use ofp_switch_manager::config::Config;
use ofp_switch_manager::daemon;
use ofp_switch_manager::messenger::{Envelope, LocalBus};
use ofp_switch_manager::ofp_header::OfpHeader;
use ofp_switch_manager::ofp_message::OfpMessage;
use ofp_switch_manager::openflow0x01::message::Message;
use ofp_switch_manager::openflow0x01::{Capabilities, MsgCode, SwitchFeatures};
use ofp_switch_manager::service::DestinationLists;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "ofp_switch_manager=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

pub struct Manager {
    pub bus: LocalBus,
    pub notify: UnboundedReceiver<Envelope>,
    pub app: UnboundedReceiver<Envelope>,
    pub addr: std::net::SocketAddr,
}

/// Start a manager whose state notifications go to `topology` and whose
/// packet-ins go to `app`.
pub async fn start_manager(tweak: impl FnOnce(&mut Config)) -> Manager {
    init_tracing();
    let bus = LocalBus::new();
    let notify = bus.register("topology");
    let app = bus.register("app");

    let mut config = Config::default();
    config.destinations =
        DestinationLists::from_rules(&["state_notify::topology", "packet_in::app"]);
    tweak(&mut config);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(daemon::serve_listener(listener, config, bus.clone()));
    Manager {
        bus,
        notify,
        app,
        addr,
    }
}

/// Read one complete OpenFlow frame.
pub async fn read_frame(stream: &mut TcpStream) -> Vec<u8> {
    let mut frame = vec![0u8; 8];
    tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut frame))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    let header = OfpHeader::parse(&frame).unwrap();
    frame.resize(header.length(), 0);
    stream.read_exact(&mut frame[8..]).await.unwrap();
    frame
}

pub fn code_of(frame: &[u8]) -> MsgCode {
    OfpHeader::parse(frame).unwrap().type_code().unwrap()
}

pub fn xid_of(frame: &[u8]) -> u32 {
    OfpHeader::parse(frame).unwrap().xid()
}

pub fn features_reply(xid: u32, datapath_id: u64) -> Vec<u8> {
    Message::marshal(
        xid,
        Message::FeaturesReply(SwitchFeatures {
            datapath_id,
            num_buffers: 256,
            num_tables: 1,
            supported_capabilities: Capabilities::default(),
            supported_actions: 0,
            ports: vec![1],
        }),
    )
}

pub async fn next_envelope(rx: &mut UnboundedReceiver<Envelope>) -> Envelope {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for an envelope")
        .expect("bus endpoint closed")
}

/// Play the switch side of a complete handshake and return the stream with
/// SET_CONFIG and the delete-all FLOW_MOD already read.
pub async fn handshake(manager: &Manager, datapath_id: u64) -> (TcpStream, Vec<Vec<u8>>) {
    let mut switch = TcpStream::connect(manager.addr).await.unwrap();
    let mut seen = Vec::new();

    let hello = read_frame(&mut switch).await;
    seen.push(hello);
    switch
        .write_all(&Message::marshal(1, Message::Hello))
        .await
        .unwrap();

    let request = read_frame(&mut switch).await;
    switch
        .write_all(&features_reply(xid_of(&request), datapath_id))
        .await
        .unwrap();
    seen.push(request);

    seen.push(read_frame(&mut switch).await);
    seen.push(read_frame(&mut switch).await);
    (switch, seen)
}
