//! Accepts switch connections and drives each one from its own task.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::messenger::{BusMessenger, Envelope, LocalBus};
use crate::secure_channel::TcpChannel;
use crate::switch::SwitchConnection;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Source of secure channel connections.
pub trait Acceptor {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    fn accept(&mut self) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Bind the configured address and serve switches until the listener fails.
pub async fn serve(config: Config, bus: LocalBus) -> Result<()> {
    let listener = TcpListener::bind(config.listen).await?;
    info!(listen = %config.listen, service = %config.service_name, "Switch manager listening");
    serve_listener(listener, config, bus).await
}

/// Serve switches on an already bound listener. A failed accept is logged
/// and retried; it never stops the loop.
pub async fn serve_listener<L: Acceptor>(
    mut listener: L,
    config: Config,
    bus: LocalBus,
) -> Result<()> {
    let mut accepted: u64 = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "Failed to accept secure channel");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };
        let n = accepted;
        accepted += 1;
        let mut switch_config = config.clone();
        switch_config.service_name = format!("{}.{}", config.service_name, n);
        info!(%peer, service = %switch_config.service_name, "Accepted secure channel");

        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = run_switch(stream, switch_config, bus).await {
                warn!(%peer, error = %e, "Switch connection ended");
            }
        });
    }
}

/// Register the connection's endpoints, run it to completion and clean up.
pub async fn run_switch(stream: TcpStream, config: Config, bus: LocalBus) -> Result<()> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }
    let management_name = Config::management_service_name(&config.service_name);
    let service_rx = bus.register(&config.service_name);
    let management_rx = bus.register(&management_name);

    let conn = SwitchConnection::new(
        TcpChannel::new(stream),
        BusMessenger::new(bus.clone()),
        config,
    );
    let (result, conn) = drive(conn, service_rx, management_rx).await;

    let service_name = conn.service_name().to_string();
    bus.unregister(&service_name);
    bus.unregister(&Config::management_service_name(&service_name));
    result
}

/// Sleep until `deadline`, or forever when nothing is armed.
async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// The event loop of one connection. Returns the connection so the caller
/// can release the endpoints under its final name.
pub async fn drive(
    mut conn: SwitchConnection<TcpChannel, BusMessenger>,
    mut service_rx: UnboundedReceiver<Envelope>,
    mut management_rx: UnboundedReceiver<Envelope>,
) -> (Result<()>, SwitchConnection<TcpChannel, BusMessenger>) {
    if let Err(e) = conn.connect() {
        return (Err(e), conn);
    }

    let result = loop {
        if !conn.is_running() {
            break Ok(());
        }
        let (Some(want), Some(channel)) = (conn.interest(), conn.channel()) else {
            break Err(Error::ConnectionClosed);
        };
        let deadline = conn.next_deadline();

        tokio::select! {
            ready = channel.ready(want) => {
                let ready = match ready {
                    Ok(ready) => ready,
                    Err(e) => {
                        error!(error = %e, channel = %conn.channel_id(), "Secure channel failed");
                        conn.disconnect();
                        break Err(e.into());
                    }
                };
                if let Err(e) = conn.process_io(ready.readable, ready.writable) {
                    break Err(e);
                }
            }
            _ = sleep_until(deadline) => {
                conn.poll_timers(Instant::now());
            }
            Some(envelope) = service_rx.recv() => {
                conn.on_service_message(envelope);
            }
            Some(envelope) = management_rx.recv() => {
                conn.on_management(envelope.tag);
            }
        }
    };

    if conn.is_running() {
        conn.disconnect();
    }
    (result, conn)
}
