//! Result channel tests against a real WebSocket client

use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use fmedic_core::EventName;
use fmedic_daemon::{HeartbeatConfig, PortSpec, ResultChannel};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn start(heartbeat: HeartbeatConfig) -> ResultChannel {
    ResultChannel::start(LOCALHOST, PortSpec::Any, heartbeat)
        .await
        .expect("channel should bind")
}

fn url(channel: &ResultChannel) -> String {
    format!("ws://{}", channel.local_addr())
}

fn event(name: &str, data: serde_json::Value) -> Message {
    Message::Text(json!({"event": name, "data": data}).to_string().into())
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn disconnect_counter(channel: &ResultChannel) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&count);
    channel.subscribe(EventName::Disconnect, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    count
}

#[tokio::test]
async fn relays_allow_listed_events_in_order() {
    let channel = start(HeartbeatConfig::default()).await;
    let mut rx = channel.listen(&EventName::ALL);

    let (mut ws, _) = connect_async(url(&channel)).await.unwrap();
    ws.send(event("jasmineStarted", json!({"totalSpecsDefined": 2})))
        .await
        .unwrap();
    ws.send(event("specDone", json!({"status": "passed"})))
        .await
        .unwrap();
    ws.send(event("jasmineDone", json!({"specResults": {"specFailed": 0}})))
        .await
        .unwrap();

    let names: Vec<EventName> = [
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
        rx.recv().await.unwrap(),
    ]
    .into_iter()
    .map(|e| e.name)
    .collect();
    assert_eq!(
        names,
        vec![
            EventName::JasmineStarted,
            EventName::SpecDone,
            EventName::JasmineDone
        ]
    );
}

#[tokio::test]
async fn unknown_and_malformed_messages_are_dropped() {
    let channel = start(HeartbeatConfig::default()).await;
    let mut rx = channel.listen(&EventName::ALL);

    let (mut ws, _) = connect_async(url(&channel)).await.unwrap();
    ws.send(Message::Text("not json at all".into())).await.unwrap();
    ws.send(event("shutdownHost", json!(null))).await.unwrap();
    ws.send(event("constructor", json!({"x": 1}))).await.unwrap();
    ws.send(event("deviceInfo", json!({"model": "Pixel"})))
        .await
        .unwrap();

    // Only the allow-listed event arrives and the connection survives
    let first = rx.recv().await.unwrap();
    assert_eq!(first.name, EventName::DeviceInfo);
    assert_eq!(first.data["model"], "Pixel");
    assert!(channel.is_peer_connected());
}

#[tokio::test]
async fn client_close_synthesizes_one_disconnect() {
    let channel = start(HeartbeatConfig::default()).await;
    let disconnects = disconnect_counter(&channel);

    let (mut ws, _) = connect_async(url(&channel)).await.unwrap();
    wait_until(|| channel.is_peer_connected()).await;

    ws.close(None).await.unwrap();
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
    wait_until(|| !channel.is_peer_connected()).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn silent_peer_is_terminated_after_timeout() {
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(300),
    };
    let channel = start(heartbeat).await;
    let disconnects = disconnect_counter(&channel);

    // Never polled, so pings go unanswered
    let (_ws, _) = connect_async(url(&channel)).await.unwrap();
    wait_until(|| channel.is_peer_connected()).await;
    let connected_at = tokio::time::Instant::now();

    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
    let elapsed = connected_at.elapsed();
    assert!(elapsed >= Duration::from_millis(250), "terminated too early: {elapsed:?}");
    assert!(!channel.is_peer_connected());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn responsive_peer_survives_heartbeats() {
    let heartbeat = HeartbeatConfig {
        interval: Duration::from_millis(50),
        timeout: Duration::from_millis(200),
    };
    let channel = start(heartbeat).await;
    let disconnects = disconnect_counter(&channel);

    let (ws, _) = connect_async(url(&channel)).await.unwrap();
    let (_sink, mut stream) = ws.split();
    // Reading lets tungstenite answer pings with pongs
    let reader = tokio::spawn(async move { while let Some(Ok(_)) = stream.next().await {} });

    wait_until(|| channel.is_peer_connected()).await;
    tokio::time::sleep(Duration::from_millis(700)).await;

    assert!(channel.is_peer_connected());
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
    reader.abort();
}

#[tokio::test]
async fn stop_closes_open_connections() {
    let channel = start(HeartbeatConfig::default()).await;
    let disconnects = disconnect_counter(&channel);

    let (mut ws, _) = connect_async(url(&channel)).await.unwrap();
    wait_until(|| channel.is_peer_connected()).await;

    channel.stop();
    let closed = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
    wait_until(|| disconnects.load(Ordering::SeqCst) == 1).await;
}

#[tokio::test]
async fn stop_drops_sockets_stuck_before_the_handshake() {
    use tokio::io::AsyncReadExt;

    let channel = start(HeartbeatConfig::default()).await;
    let disconnects = disconnect_counter(&channel);

    // Plain TCP, never sends the upgrade request
    let mut socket = tokio::net::TcpStream::connect(channel.local_addr())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!channel.is_peer_connected());

    channel.stop();
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(2), socket.read(&mut buf))
        .await
        .expect("socket should be closed once the channel stops");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert_eq!(disconnects.load(Ordering::SeqCst), 0);
}
