//! Per-connection I/O and the liveness registry
//!
//! Each accepted socket runs [`serve_connection`]. The registry holds one
//! entry per open connection with its last-activity stamp; the heartbeat
//! sweep reads the stamps and tells connections to ping or terminate.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use super::bus::EventBus;
use fmedic_core::prelude::*;
use fmedic_core::ChannelEvent;

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Longest a fresh TCP connection may take to complete the WebSocket upgrade
pub(crate) const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Instruction from the heartbeat sweep to one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Ping,
    Terminate,
}

struct Entry {
    last_activity: Instant,
    control: mpsc::UnboundedSender<Control>,
}

/// What one heartbeat sweep did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SweepReport {
    pub pinged: usize,
    pub terminated: usize,
}

/// Open connections keyed by a per-channel id
#[derive(Clone, Default)]
pub(crate) struct ConnectionRegistry {
    entries: Arc<Mutex<HashMap<u64, Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a connection, stamped active now
    pub fn register(&self, control: mpsc::UnboundedSender<Control>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().insert(
            id,
            Entry {
                last_activity: Instant::now(),
                control,
            },
        );
        id
    }

    /// Re-stamp `id` as active now
    pub fn touch(&self, id: u64) {
        if let Some(entry) = self.lock().get_mut(&id) {
            entry.last_activity = Instant::now();
        }
    }

    pub fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Visit every connection: terminate those idle longer than `timeout`,
    /// ping the rest.
    pub fn sweep(&self, timeout: Duration) -> SweepReport {
        let now = Instant::now();
        let mut report = SweepReport::default();

        for (id, entry) in self.lock().iter() {
            let idle = now.saturating_duration_since(entry.last_activity);
            let control = if idle > timeout {
                warn!("Connection {} idle for {:?}, terminating", id, idle);
                report.terminated += 1;
                Control::Terminate
            } else {
                report.pinged += 1;
                Control::Ping
            };
            let _ = entry.control.send(control);
        }

        report
    }
}

/// Run one device connection until it closes, is terminated, or the channel
/// shuts down. Publishes exactly one `disconnect` once a registered
/// connection ends.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: ConnectionRegistry,
    bus: EventBus,
    mut shutdown: watch::Receiver<bool>,
) {
    let handshake = tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        tokio_tungstenite::accept_async(stream),
    );
    let ws = tokio::select! {
        result = handshake => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!("WebSocket handshake with {} failed: {}", peer, e);
                return;
            }
            Err(_) => {
                debug!("WebSocket handshake with {} timed out", peer);
                return;
            }
        },
        _ = shutdown.wait_for(|stopped| *stopped) => {
            debug!("Channel stopped during handshake with {}", peer);
            return;
        }
    };

    let (control_tx, mut control_rx) = mpsc::unbounded_channel();
    let id = registry.register(control_tx);
    info!("New device connection {} from {}", id, peer);

    let (mut ws_sink, mut ws_stream) = ws.split();

    if !*shutdown.borrow() {
        loop {
            tokio::select! {
                // ── Incoming frame ───────────────────────────────────
                frame = ws_stream.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            registry.touch(id);
                            handle_text(text.as_str(), &bus);
                        }
                        Some(Ok(Message::Pong(_))) => {
                            registry.touch(id);
                            trace!("Connection {}: received pong", id);
                        }
                        Some(Ok(Message::Close(_))) => {
                            debug!("Connection {}: received Close frame", id);
                            break;
                        }
                        Some(Ok(_)) => {
                            // Ping (answered by tungstenite) and Binary
                            registry.touch(id);
                        }
                        Some(Err(e)) => {
                            debug!("Connection {}: read error: {}", id, e);
                            break;
                        }
                        None => {
                            debug!("Connection {}: stream ended", id);
                            break;
                        }
                    }
                }

                // ── Heartbeat instruction ────────────────────────────
                control = control_rx.recv() => {
                    match control {
                        Some(Control::Ping) => {
                            if let Err(e) = ws_sink.send(Message::Ping(Default::default())).await {
                                debug!("Connection {}: ping failed: {}", id, e);
                                break;
                            }
                        }
                        Some(Control::Terminate) | None => {
                            warn!("WebSocket has timed out and terminating.");
                            break;
                        }
                    }
                }

                // ── Channel shutdown ─────────────────────────────────
                _ = shutdown.changed() => {
                    send_close(&mut ws_sink).await;
                    break;
                }
            }
        }
    } else {
        send_close(&mut ws_sink).await;
    }

    registry.remove(id);
    info!("Device connection {} closed", id);
    bus.publish(ChannelEvent::disconnect());
}

/// Parse a text frame and relay it if allow-listed
fn handle_text(text: &str, bus: &EventBus) {
    match ChannelEvent::from_json(text) {
        Ok(Some(event)) => {
            trace!("Received {}", event.name);
            bus.publish(event);
        }
        Ok(None) => {
            debug!("Ignoring message with unknown event: {}", truncate(text));
        }
        Err(e) => {
            error!("Invalid JSON message with error: {}", e);
        }
    }
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(120) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn send_close(ws_sink: &mut WsSink) {
    let _ = ws_sink.send(Message::Close(None)).await;
    let _ = ws_sink.close().await;
}
