//! A scripted switch against the daemon over real TCP.

mod common;

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use common::*;
use ofp_switch_manager::config::Config;
use ofp_switch_manager::daemon::{self, Acceptor};
use ofp_switch_manager::messenger::{Envelope, LocalBus, MessageTag};
use ofp_switch_manager::ofp_message::OfpMessage;
use ofp_switch_manager::openflow0x01::message::Message;
use ofp_switch_manager::openflow0x01::{MsgCode, OFPP_NONE};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Listener whose first few accepts fail.
struct FlakyListener {
    inner: TcpListener,
    failures: usize,
}

impl Acceptor for FlakyListener {
    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        if self.failures > 0 {
            self.failures -= 1;
            return Err(io::Error::other("too many open files"));
        }
        self.inner.accept().await
    }
}

#[tokio::test]
async fn handshake_completes_and_configures_switch() {
    let mut manager = start_manager(|_| ()).await;
    let (_switch, seen) = handshake(&manager, 1).await;

    let codes: Vec<MsgCode> = seen.iter().map(|frame| code_of(frame)).collect();
    assert_eq!(
        codes,
        vec![
            MsgCode::Hello,
            MsgCode::FeaturesReq,
            MsgCode::SetConfig,
            MsgCode::FlowMod
        ]
    );
    assert_eq!(&seen[2][8..], &[0x00, 0x00, 0xff, 0xff]);
    // Delete-all: command DELETE, out_port NONE.
    assert_eq!(&seen[3][8 + 48..8 + 50], &[0x00, 0x03]);
    assert_eq!(&seen[3][8 + 60..8 + 62], &OFPP_NONE.to_be_bytes());

    let connected = next_envelope(&mut manager.notify).await;
    assert_eq!(connected.tag, MessageTag::Connected);
    assert_eq!(connected.datapath_id, None);
    let ready = next_envelope(&mut manager.notify).await;
    assert_eq!(ready.tag, MessageTag::Ready);
    assert_eq!(ready.datapath_id, Some(1));
    assert!(manager.bus.is_registered("switch.1"));
}

#[tokio::test]
async fn closed_channel_announces_disconnect() {
    let mut manager = start_manager(|_| ()).await;
    let (switch, _) = handshake(&manager, 1).await;
    assert_eq!(next_envelope(&mut manager.notify).await.tag, MessageTag::Connected);
    assert_eq!(next_envelope(&mut manager.notify).await.tag, MessageTag::Ready);

    drop(switch);
    let gone = next_envelope(&mut manager.notify).await;
    assert_eq!(gone.tag, MessageTag::Disconnected);
    assert_eq!(gone.datapath_id, Some(1));

    tokio::time::timeout(Duration::from_secs(5), async {
        while manager.bus.is_registered("switch.1") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn silent_switch_times_out() {
    let mut manager = start_manager(|config| {
        config.handshake.hello_timeout = Duration::from_millis(100);
    })
    .await;
    let mut switch = TcpStream::connect(manager.addr).await.unwrap();
    assert_eq!(code_of(&read_frame(&mut switch).await), MsgCode::Hello);

    assert_eq!(next_envelope(&mut manager.notify).await.tag, MessageTag::Connected);
    let gone = next_envelope(&mut manager.notify).await;
    assert_eq!(gone.tag, MessageTag::Disconnected);
    assert_eq!(gone.datapath_id, None);

    let mut buf = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), switch.read(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn application_request_reply_keeps_its_xid() {
    let mut manager = start_manager(|_| ()).await;
    let (mut switch, _) = handshake(&manager, 1).await;
    assert_eq!(next_envelope(&mut manager.notify).await.tag, MessageTag::Connected);
    assert_eq!(next_envelope(&mut manager.notify).await.tag, MessageTag::Ready);

    let barrier = Message::marshal(0xbeef, Message::Other(MsgCode::BarrierReq, Vec::new()));
    manager
        .bus
        .deliver("switch.1", Envelope::openflow(1, "app", barrier.into()))
        .unwrap();

    let request = read_frame(&mut switch).await;
    assert_eq!(code_of(&request), MsgCode::BarrierReq);
    let switch_xid = xid_of(&request);
    assert_ne!(switch_xid, 0xbeef);

    let reply = Message::marshal(switch_xid, Message::Other(MsgCode::BarrierResp, Vec::new()));
    switch.write_all(&reply).await.unwrap();

    let env = next_envelope(&mut manager.app).await;
    assert_eq!(env.tag, MessageTag::OpenflowMessage);
    assert_eq!(env.datapath_id, Some(1));
    assert_eq!(code_of(&env.payload), MsgCode::BarrierResp);
    assert_eq!(xid_of(&env.payload), 0xbeef);
}

#[tokio::test]
async fn echo_request_is_answered() {
    let manager = start_manager(|_| ()).await;
    let (mut switch, _) = handshake(&manager, 7).await;

    let echo = Message::marshal(0x1234, Message::EchoRequest(b"keepalive".to_vec()));
    switch.write_all(&echo).await.unwrap();
    let reply = read_frame(&mut switch).await;
    assert_eq!(code_of(&reply), MsgCode::EchoResp);
    assert_eq!(xid_of(&reply), 0x1234);
    assert_eq!(&reply[8..], b"keepalive");
}

#[tokio::test]
async fn accept_failures_do_not_stop_the_listener() {
    init_tracing();
    let inner = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = inner.local_addr().unwrap();
    let listener = FlakyListener { inner, failures: 2 };
    let server = tokio::spawn(daemon::serve_listener(listener, Config::default(), LocalBus::new()));

    let mut switch = TcpStream::connect(addr).await.unwrap();
    let hello = read_frame(&mut switch).await;
    assert_eq!(code_of(&hello), MsgCode::Hello);
    assert!(!server.is_finished());
    server.abort();
}
