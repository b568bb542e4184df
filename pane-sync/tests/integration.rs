//! Integration tests for the WebSocket sync client.
//!
//! Each test runs a scripted authority in-process and drives a real
//! `SyncClient` against it, checking the frames the client puts on the wire.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use pane_sync::{
    Action, ClientConfig, CommandRequest, Delta, DocumentId, EditorHost, Operation, Range,
    Selection, SyncClient, SyncError, Version, ViewUpdate,
};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Duration};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const SESSION: &str = "0b7c9c52-1f0e-4d8e-9a59-5f3b1c2d4e6f";
const CLIENT: &str = "f1e2d3c4-b5a6-4789-8abc-def012345678";

#[derive(Default)]
struct Recorded {
    documents: HashMap<DocumentId, Delta>,
    renders: Vec<ViewUpdate>,
    errors: Vec<SyncError>,
}

#[derive(Clone, Default)]
struct SharedHost(Arc<Mutex<Recorded>>);

impl EditorHost for SharedHost {
    fn apply_remote_delta(&mut self, id: DocumentId, delta: &Delta, _version: Version) {
        let mut state = self.0.lock().unwrap();
        let doc = state.documents.entry(id).or_default();
        *doc = doc.compose(delta);
    }

    fn replace_content(&mut self, id: DocumentId, content: &Delta, _version: Version) {
        self.0.lock().unwrap().documents.insert(id, content.clone());
    }

    fn contents(&self, id: DocumentId) -> Option<Delta> {
        self.0.lock().unwrap().documents.get(&id).cloned()
    }

    fn render(&mut self, update: ViewUpdate) {
        self.0.lock().unwrap().renders.push(update);
    }

    fn signal_error(&mut self, error: &SyncError) {
        self.0.lock().unwrap().errors.push(error.clone());
    }
}

impl SharedHost {
    async fn wait_for(&self, check: impl Fn(&Recorded) -> bool) {
        timeout(Duration::from_secs(5), async {
            loop {
                if check(&self.0.lock().unwrap()) {
                    return;
                }
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("host never reached the expected state");
    }
}

fn config(port: u16) -> ClientConfig {
    ClientConfig {
        server_url: format!("ws://127.0.0.1:{port}/ws"),
        initial_backoff: Duration::from_millis(50),
        max_backoff: Some(Duration::from_millis(200)),
        command_capacity: 16,
    }
}

async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client never connected")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

/// Next text frame from the client, parsed.
async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame from client")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// Accept a client and complete the handshake.
async fn handshake(listener: &TcpListener) -> (WebSocketStream<TcpStream>, Value) {
    let mut ws = accept(listener).await;
    let hello = next_json(&mut ws).await;
    send_json(&mut ws, json!({"session": SESSION, "client": CLIENT})).await;
    (ws, hello)
}

#[tokio::test]
async fn test_handshake_update_and_edit_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = SharedHost::default();
    let (client, handle) = SyncClient::new(config(port), host.clone());
    let task = tokio::spawn(client.run());

    let (mut ws, hello) = handshake(&listener).await;
    assert_eq!(hello, json!({"session": null, "client": null}));

    send_json(
        &mut ws,
        json!({
            "updates": {
                "0": {"base": 0, "version": 1, "delta": {"ops": [{"insert": "1 0 0\n2 0 0\n"}]}},
                "2": {"base": 0, "version": 1, "delta": {"ops": [{"insert": "hello"}]}}
            }
        }),
    )
    .await;

    // the new acks go out without any user action
    let acks = next_json(&mut ws).await;
    assert_eq!(acks, json!({"acks": {"0": 1, "2": 1}}));

    host.wait_for(|r| r.documents.get(&2).map(|d| d.text()) == Some("hello".into()))
        .await;
    host.wait_for(|r| {
        r.renders
            .iter()
            .any(|u| u.layout.as_ref().is_some_and(|cols| cols[0].rows[0].id == 1))
    })
    .await;

    handle.edit(2, Delta::new().retain(5).insert("!"), 1).await.unwrap();
    handle
        .action(Action::Execute(CommandRequest {
            id: 2,
            index: 0,
            command: "Put".into(),
            selection: Selection {
                id: 2,
                range: Range { index: 0, length: 5 },
            },
        }))
        .await
        .unwrap();

    let payload = next_json(&mut ws).await;
    assert_eq!(payload["action"]["type"], "execute");
    assert_eq!(payload["action"]["command"], "Put");
    assert_eq!(payload["changes"][0]["id"], 2);
    assert_eq!(payload["changes"][0]["base"], 1);
    assert_eq!(payload["changes"][0]["client_version"], 1);
    assert_eq!(
        payload["changes"][0]["delta"],
        json!({"ops": [{"retain": 5}, {"insert": "!"}]})
    );
    assert_eq!(payload["acks"], json!({"0": 1, "2": 1}));

    // authority commits the change
    send_json(
        &mut ws,
        json!({
            "updates": {
                "2": {"base": 1, "version": 2, "delta": {"ops": []}, "last_committed_client_version": 1}
            }
        }),
    )
    .await;
    let acks = next_json(&mut ws).await;
    assert_eq!(acks, json!({"acks": {"0": 1, "2": 2}}));
    host.wait_for(|r| {
        r.renders
            .iter()
            .any(|u| u.dirty_changes.get(&2) == Some(&false))
    })
    .await;

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_reconnect_reuses_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = SharedHost::default();
    let (client, handle) = SyncClient::new(config(port), host.clone());
    let task = tokio::spawn(client.run());

    let (mut ws, _) = handshake(&listener).await;
    send_json(
        &mut ws,
        json!({"updates": {"2": {"base": 0, "version": 1, "delta": {"ops": [{"insert": "a"}]}}}}),
    )
    .await;
    next_json(&mut ws).await;

    // an unacknowledged change must survive the reconnect
    handle.edit(2, Delta::new().insert("b"), 1).await.unwrap();
    handle.flush().await.unwrap();
    let sent = next_json(&mut ws).await;
    assert_eq!(sent["changes"][0]["client_version"], 1);

    ws.close(None).await.unwrap();
    drop(ws);

    let (mut ws, hello) = handshake(&listener).await;
    assert_eq!(hello, json!({"session": SESSION, "client": CLIENT}));

    let resent = next_json(&mut ws).await;
    assert_eq!(resent["changes"], sent["changes"]);
    assert_eq!(resent["acks"], json!({"2": 1}));

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_hash_mismatch_reaches_host() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let host = SharedHost::default();
    let (client, handle) = SyncClient::new(config(port), host.clone());
    let task = tokio::spawn(client.run());

    let (mut ws, _) = handshake(&listener).await;
    send_json(
        &mut ws,
        json!({
            "updates": {"0": {"base": 0, "version": 3, "delta": {"ops": [{"insert": "1 0 0\n"}]}}},
            "hashes": {"0": {"hash": "0000", "version": 3}}
        }),
    )
    .await;

    host.wait_for(|r| {
        r.errors
            .iter()
            .any(|e| matches!(e, SyncError::ContentMismatch { id: 0, version: 3, .. }))
    })
    .await;
    assert_eq!(host.0.lock().unwrap().errors.len(), 1);

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_flush_while_disconnected_is_reported() {
    // bind then drop so nothing listens on the port
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let host = SharedHost::default();
    let (client, handle) = SyncClient::new(config(port), host.clone());
    let task = tokio::spawn(client.run());

    handle.edit(2, Delta::new().insert("x"), 0).await.unwrap();
    handle.flush().await.unwrap();
    host.wait_for(|r| r.errors.contains(&SyncError::NotConnected)).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap().unwrap();
}
