use std::fs;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use glint_core::Message;
use glint_ipc::{ExecService, ServiceConfig, Transport, TransportConfig, TransportError};
use serde_json::json;
use tempfile::TempDir;
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};

type Peer = Framed<DuplexStream, LinesCodec>;

fn connected(timeout: Duration) -> (Transport, Peer) {
    let transport = Transport::new(TransportConfig {
        request_timeout: timeout,
        max_frame_len: 64 * 1024,
    });
    let (client, server) = tokio::io::duplex(64 * 1024);
    transport.attach(client).unwrap();
    (transport, Framed::new(server, LinesCodec::new()))
}

async fn next_request(peer: &mut Peer) -> Message {
    let line = peer.next().await.unwrap().unwrap();
    Message::decode(&line).unwrap()
}

async fn reply(peer: &mut Peer, request: &Message, body: serde_json::Value) {
    let mut response = Message::with_payload(request.kind.clone(), body).unwrap();
    response.id = request.id.clone();
    peer.send(response.encode().unwrap()).await.unwrap();
}

#[tokio::test]
async fn test_request_timeout_leaves_no_pending_entry() {
    let (transport, mut peer) = connected(Duration::from_millis(50));

    let err = transport.send("ping", json!({})).await.unwrap_err();
    assert!(matches!(err, TransportError::Timeout { timeout_ms: 50, .. }));
    assert_eq!(transport.pending_len(), 0);

    // The request still reached the peer.
    let request = next_request(&mut peer).await;
    assert_eq!(request.kind, "ping");
    assert!(request.id.is_some());
}

#[tokio::test]
async fn test_responses_correlate_out_of_order() {
    let (transport, mut peer) = connected(Duration::from_secs(5));

    let t1 = transport.clone();
    let first = tokio::spawn(async move { t1.send("echo", json!({ "n": 1 })).await });
    let t2 = transport.clone();
    let second = tokio::spawn(async move { t2.send("echo", json!({ "n": 2 })).await });

    let a = next_request(&mut peer).await;
    let b = next_request(&mut peer).await;
    assert_ne!(a.id, b.id);
    assert_eq!(transport.pending_len(), 2);

    for request in [&b, &a] {
        let n = request.get("n").cloned().unwrap();
        reply(&mut peer, request, json!({ "n": n })).await;
    }

    let first = first.await.unwrap().unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(first.get("n"), Some(&json!(1)));
    assert_eq!(second.get("n"), Some(&json!(2)));
    assert_eq!(transport.pending_len(), 0);
}

#[tokio::test]
async fn test_events_reach_every_subscriber() {
    let (transport, mut peer) = connected(Duration::from_secs(5));
    let mut first = transport.subscribe("battery.sh");
    let mut second = transport.subscribe("battery.sh");
    let mut other = transport.subscribe("clock.sh");

    peer.send(r#"{"type":"battery.sh","label":"main","data":{"level":80}}"#.to_string())
        .await
        .unwrap();

    let event = first.recv().await.unwrap();
    assert_eq!(event.get("data"), Some(&json!({ "level": 80 })));
    assert!(event.id.is_none());
    assert_eq!(second.recv().await.unwrap(), event);
    assert!(other.try_recv().is_none());
}

#[tokio::test]
async fn test_unsubscribed_listener_receives_nothing() {
    let (transport, mut peer) = connected(Duration::from_secs(5));
    let dropped = transport.subscribe("tick");
    let mut kept = transport.subscribe("tick");
    dropped.unsubscribe();

    peer.send(r#"{"type":"tick"}"#.to_string()).await.unwrap();
    assert_eq!(kept.recv().await.unwrap().kind, "tick");
    assert_eq!(transport.subscriber_count("tick"), 1);
}

#[tokio::test]
async fn test_malformed_line_is_skipped() {
    let (transport, mut peer) = connected(Duration::from_secs(5));
    let mut events = transport.subscribe("tick");

    peer.send("this is not json".to_string()).await.unwrap();
    peer.send(r#"{"type":"tick","data":1}"#.to_string()).await.unwrap();

    let event = events.recv().await.unwrap();
    assert_eq!(event.get("data"), Some(&json!(1)));
    assert!(transport.is_connected());
}

#[tokio::test]
async fn test_connection_loss_fails_in_flight_requests() {
    let (transport, mut peer) = connected(Duration::from_secs(5));

    let sender = transport.clone();
    let request = tokio::spawn(async move { sender.send("ping", json!({})).await });
    next_request(&mut peer).await;
    drop(peer);

    let err = request.await.unwrap().unwrap_err();
    assert!(matches!(err, TransportError::Disconnected { .. }));
    assert_eq!(transport.pending_len(), 0);
    assert!(!transport.is_connected());

    let err = transport.send("ping", json!({})).await.unwrap_err();
    assert!(matches!(err, TransportError::NotConnected));
}

fn exec_fixture(scripts: &[(&str, &str)]) -> (TempDir, Transport) {
    let dir = TempDir::new().unwrap();
    for (name, body) in scripts {
        fs::write(dir.path().join(name), body).unwrap();
    }

    let service = ExecService::new(ServiceConfig {
        scripts_dir: dir.path().to_path_buf(),
        max_frame_len: 64 * 1024,
    });
    let (client, server) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move { service.handle_connection(server).await });

    let transport = Transport::new(TransportConfig::default());
    transport.attach(client).unwrap();
    (dir, transport)
}

#[tokio::test]
async fn test_exec_returns_json_output() {
    let (_dir, transport) = exec_fixture(&[("cpu.sh", "echo \"{\\\"cpu\\\": $1}\"\n")]);

    let response = transport
        .send("exec", json!({ "label": "main", "path": "cpu.sh", "args": ["7"] }))
        .await
        .unwrap();

    assert_eq!(response.kind, "exec");
    assert_eq!(response.get("ok"), Some(&json!(true)));
    assert_eq!(response.get("result"), Some(&json!({ "cpu": 7 })));
}

#[tokio::test]
async fn test_exec_plain_text_output() {
    let (_dir, transport) = exec_fixture(&[("hello.sh", "echo hello world\n")]);

    let response = transport
        .send("exec", json!({ "path": "hello.sh", "args": [] }))
        .await
        .unwrap();
    assert_eq!(response.get("result"), Some(&json!("hello world")));
}

#[tokio::test]
async fn test_exec_polls_pushes_events_before_response() {
    let script = "echo '{\"n\":1}'\necho 'not json'\necho '{\"n\":2}'\n";
    let (_dir, transport) = exec_fixture(&[("poll.sh", script)]);
    let mut events = transport.subscribe("poll.sh");

    let response = transport
        .send("exec", json!({ "label": "bar", "path": "poll.sh", "polls": true }))
        .await
        .unwrap();
    assert_eq!(response.get("ok"), Some(&json!(true)));

    let first = events.try_recv().unwrap();
    let second = events.try_recv().unwrap();
    assert_eq!(first.get("data"), Some(&json!({ "n": 1 })));
    assert_eq!(first.get("label"), Some(&json!("bar")));
    assert_eq!(second.get("data"), Some(&json!({ "n": 2 })));
    assert!(events.try_recv().is_none());
}

#[tokio::test]
async fn test_exec_failure_and_unknown_type() {
    let (_dir, transport) = exec_fixture(&[("fail.sh", "echo oops >&2\nexit 3\n")]);

    let response = transport
        .send("exec", json!({ "path": "fail.sh" }))
        .await
        .unwrap();
    assert_eq!(response.get("ok"), Some(&json!(false)));
    let error = response.get("error").and_then(|e| e.as_str()).unwrap();
    assert!(error.contains("oops"));

    let response = transport
        .send("exec", json!({ "path": "../outside.sh" }))
        .await
        .unwrap();
    assert_eq!(response.get("ok"), Some(&json!(false)));

    let response = transport.send("frobnicate", json!({})).await.unwrap();
    assert_eq!(response.get("ok"), Some(&json!(false)));
}
