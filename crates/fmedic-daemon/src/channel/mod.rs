//! Result channel: the WebSocket endpoint the deployed test app reports to
//!
//! ## Architecture
//!
//! ```text
//! ResultChannel
//!   ├── accept loop ──spawn──> serve_connection (one per device socket)
//!   │                              │ touch / publish
//!   │                              v
//!   ├── ConnectionRegistry <── heartbeat sweep (every `interval`)
//!   └── EventBus ──dispatcher──> subscribers
//! ```
//!
//! All background tasks watch one shutdown signal; [`ResultChannel::stop`]
//! flips it, which closes the listening socket and ends the heartbeat.

mod bus;
mod connection;

pub use bus::EventBus;

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use connection::{serve_connection, ConnectionRegistry};
use fmedic_core::prelude::*;
use fmedic_core::{ChannelEvent, EventName, Platform};

/// Default interval between heartbeat sweeps
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(25);

/// Default idle time after which a connection is considered dead
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Heartbeat timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PING_INTERVAL,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT,
        }
    }
}

/// Which port(s) to listen on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PortSpec {
    /// Let the OS pick
    #[default]
    Any,
    /// Exactly this port; fails with `PortInUse` if taken
    Fixed(u16),
    /// First free port in `first..=last`
    Range { first: u16, last: u16 },
}

/// Address the deployed app uses to reach the channel
pub fn medic_address(platform: Platform, port: u16, reverse_port_forwarding: bool) -> String {
    format!("ws://{}:{}", platform.host_ip(reverse_port_forwarding), port)
}

/// Running result channel
pub struct ResultChannel {
    local_addr: SocketAddr,
    bus: EventBus,
    registry: ConnectionRegistry,
    shutdown_tx: watch::Sender<bool>,
}

impl ResultChannel {
    /// Bind and start serving.
    ///
    /// Returns once the listener is bound; connections are accepted in the
    /// background.
    pub async fn start(bind: IpAddr, port: PortSpec, heartbeat: HeartbeatConfig) -> Result<Self> {
        let listener = bind_listener(bind, port).await?;
        let local_addr = listener.local_addr()?;
        info!("Server is running on port: {}", local_addr.port());

        let bus = EventBus::new();
        let registry = ConnectionRegistry::default();
        let (shutdown_tx, _) = watch::channel(false);

        tokio::spawn(run_accept_loop(
            listener,
            registry.clone(),
            bus.clone(),
            shutdown_tx.subscribe(),
        ));
        tokio::spawn(run_heartbeat(
            registry.clone(),
            heartbeat,
            shutdown_tx.subscribe(),
        ));

        Ok(Self {
            local_addr,
            bus,
            registry,
            shutdown_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Invoke `handler` for every relayed `name` event
    pub fn subscribe<F>(&self, name: EventName, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.bus.subscribe(name, handler);
    }

    /// Receive the given events on one ordered queue
    pub fn listen(&self, names: &[EventName]) -> mpsc::UnboundedReceiver<ChannelEvent> {
        self.bus.listen(names)
    }

    /// True iff at least one device connection is open
    pub fn is_peer_connected(&self) -> bool {
        self.registry.len() > 0
    }

    /// Stop the heartbeat, close the listener and open connections. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown_tx.send_replace(true) {
            info!("Stopping result channel on port {}", self.port());
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }
}

impl Drop for ResultChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

// ─────────────────────────────────────────────────────────
// Binding
// ─────────────────────────────────────────────────────────

async fn bind_listener(bind: IpAddr, port: PortSpec) -> Result<TcpListener> {
    match port {
        PortSpec::Any => Ok(TcpListener::bind((bind, 0)).await?),
        PortSpec::Fixed(port) => TcpListener::bind((bind, port)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::PortInUse { port }
            } else {
                Error::Io(e)
            }
        }),
        PortSpec::Range { first, last } => {
            for candidate in first..=last {
                match TcpListener::bind((bind, candidate)).await {
                    Ok(listener) => return Ok(listener),
                    Err(e) => debug!("Port {} unavailable: {}", candidate, e),
                }
            }
            Err(Error::ChannelBindFailed { first, last })
        }
    }
}

// ─────────────────────────────────────────────────────────
// Background tasks
// ─────────────────────────────────────────────────────────

async fn run_accept_loop(
    listener: TcpListener,
    registry: ConnectionRegistry,
    bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted TCP connection from {}", peer);
                    tokio::spawn(serve_connection(
                        stream,
                        peer,
                        registry.clone(),
                        bus.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            _ = shutdown.changed() => break,
        }
    }
    debug!("Accept loop stopped");
}

async fn run_heartbeat(
    registry: ConnectionRegistry,
    config: HeartbeatConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = registry.sweep(config.timeout);
                if report.pinged + report.terminated > 0 {
                    trace!("Heartbeat: pinged {}, terminated {}", report.pinged, report.terminated);
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("Heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[test]
    fn test_medic_address() {
        assert_eq!(medic_address(Platform::Android, 7008, false), "ws://10.0.2.2:7008");
        assert_eq!(medic_address(Platform::Android, 7008, true), "ws://127.0.0.1:7008");
        assert_eq!(medic_address(Platform::IOS, 7008, false), "ws://127.0.0.1:7008");
    }

    #[tokio::test]
    async fn test_any_port() {
        let channel = ResultChannel::start(LOCALHOST, PortSpec::Any, HeartbeatConfig::default())
            .await
            .unwrap();
        assert_ne!(channel.port(), 0);
        assert!(!channel.is_peer_connected());
    }

    #[tokio::test]
    async fn test_fixed_port_in_use() {
        let taken = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = ResultChannel::start(LOCALHOST, PortSpec::Fixed(port), HeartbeatConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::PortInUse { port: p } if p == port));
    }

    #[tokio::test]
    async fn test_range_skips_taken_port() {
        let taken = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();
        let last = port.saturating_add(20);

        let channel = ResultChannel::start(
            LOCALHOST,
            PortSpec::Range { first: port, last },
            HeartbeatConfig::default(),
        )
        .await
        .unwrap();
        assert!(channel.port() > port && channel.port() <= last);
    }

    #[tokio::test]
    async fn test_exhausted_range() {
        let taken = std::net::TcpListener::bind((LOCALHOST, 0)).unwrap();
        let port = taken.local_addr().unwrap().port();

        let err = ResultChannel::start(
            LOCALHOST,
            PortSpec::Range { first: port, last: port },
            HeartbeatConfig::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::ChannelBindFailed { first, last } if first == port && last == port));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_closes_listener() {
        let channel = ResultChannel::start(LOCALHOST, PortSpec::Any, HeartbeatConfig::default())
            .await
            .unwrap();
        let addr = channel.local_addr();

        channel.stop();
        channel.stop();
        assert!(channel.is_stopped());

        // The accept loop drops the listener shortly after the signal
        let mut refused = false;
        for _ in 0..50 {
            if tokio::net::TcpStream::connect(addr).await.is_err() {
                refused = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(refused);
    }
}
