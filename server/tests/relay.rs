//! Relay integration tests: start a real server and talk to it over
//! WebSocket and HTTP.
//!
//! Run with: `cargo test -p sketchroom_server --test relay`

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sketchroom_server::{serve, AppState, ServerConfig};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start_server(dir: &tempfile::TempDir, csrf_token: Option<&str>) -> (SocketAddr, AppState) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let mut config = ServerConfig::with_file_storage(addr, dir.path().join("snapshots"));
    config.csrf_token = csrf_token.map(str::to_string);
    let state = AppState::from_config(&config).await.unwrap();
    let serve_state = state.clone();
    tokio::spawn(async move {
        let _ = serve(listener, serve_state).await;
    });
    (addr, state)
}

async fn next_json(ws: &mut Socket) -> Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("socket closed")
            .expect("socket error");
        if let Message::Text(text) = message {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

/// Reads until a message of the given type arrives.
async fn next_of_type(ws: &mut Socket, kind: &str) -> Value {
    loop {
        let value = next_json(ws).await;
        if value["type"] == kind {
            return value;
        }
    }
}

async fn connect(addr: SocketAddr) -> (Socket, u64) {
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    let hello = next_json(&mut ws).await;
    assert_eq!(hello["type"], "connected");
    let client_id = hello["client_id"].as_u64().unwrap();
    (ws, client_id)
}

async fn send(ws: &mut Socket, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

fn draw(session_id: &str, x: f64, y: f64, sequence_no: u64) -> Value {
    json!({
        "type": "draw",
        "session_id": session_id,
        "x": x,
        "y": y,
        "color": "#ff0000",
        "brush_size": 4,
        "tool": "pen",
        "sequence_no": sequence_no,
    })
}

#[tokio::test]
async fn two_clients_exchange_strokes() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;

    let (mut a, a_id) = connect(addr).await;
    let (mut b, b_id) = connect(addr).await;
    assert_ne!(a_id, b_id);

    send(&mut a, json!({ "type": "join", "session_id": "room1" })).await;
    next_of_type(&mut a, "joined").await;
    send(&mut b, json!({ "type": "join", "session_id": "room1" })).await;
    let joined = next_of_type(&mut b, "joined").await;
    assert_eq!(joined["members"], json!([a_id, b_id]));
    let peer = next_of_type(&mut a, "peer_joined").await;
    assert_eq!(peer["client_id"], b_id);

    send(&mut a, draw("room1", 10.0, 10.0, 1)).await;
    send(&mut a, draw("room1", 20.0, 20.0, 2)).await;

    let first = next_of_type(&mut b, "draw").await;
    let second = next_of_type(&mut b, "draw").await;
    assert_eq!((first["x"].as_f64(), first["y"].as_f64()), (Some(10.0), Some(10.0)));
    assert_eq!((second["x"].as_f64(), second["y"].as_f64()), (Some(20.0), Some(20.0)));
    assert_eq!(first["origin_client_id"], a_id);
    assert_eq!(second["origin_client_id"], a_id);

    // B draws; A gets it and B never hears its own event back.
    send(&mut b, draw("room1", 5.0, 5.0, 1)).await;
    let echoed = next_of_type(&mut a, "draw").await;
    assert_eq!(echoed["origin_client_id"], b_id);

    send(&mut a, draw("room1", 30.0, 30.0, 3)).await;
    let third = next_of_type(&mut b, "draw").await;
    assert_eq!(third["origin_client_id"], a_id);
    assert_eq!(third["sequence_no"], 3);
}

#[tokio::test]
async fn last_disconnect_removes_session() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, state) = start_server(&dir, None).await;

    let (mut ws, client_id) = connect(addr).await;
    send(&mut ws, json!({ "type": "join", "session_id": "solo" })).await;
    let joined = next_of_type(&mut ws, "joined").await;
    assert_eq!(joined["members"], json!([client_id]));
    assert_eq!(state.relay.session_count().await.unwrap(), 1);

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if state.relay.session_count().await.unwrap() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(state.relay.session_count().await.unwrap(), 0);
    assert!(state.relay.members("solo").await.unwrap().is_empty());
}

#[tokio::test]
async fn session_path_joins_automatically() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/board-7")).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "connected");
    let joined = next_of_type(&mut ws, "joined").await;
    assert_eq!(joined["session_id"], "board-7");
}

#[tokio::test]
async fn malformed_input_gets_an_error_reply() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;

    let (mut ws, _) = connect(addr).await;
    ws.send(Message::Text("not json".to_string().into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "error");

    send(&mut ws, json!({ "type": "join", "session_id": "bad id" })).await;
    assert_eq!(next_json(&mut ws).await["type"], "error");
}

#[tokio::test]
async fn snapshot_endpoints_enforce_csrf() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, Some("secret")).await;
    let http = reqwest::Client::new();
    let body = json!({ "name": "sketch1", "image": "AAEC" });

    let missing = http
        .post(format!("http://{addr}/snapshots"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 403);

    let wrong = http
        .post(format!("http://{addr}/snapshots"))
        .header("x-csrf-token", "guess")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status(), 403);

    let created = http
        .post(format!("http://{addr}/snapshots"))
        .header("x-csrf-token", "secret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let id = created.json::<Value>().await.unwrap()["id"]
        .as_str()
        .unwrap()
        .to_string();

    let fetched: Value = http
        .get(format!("http://{addr}/snapshots/{id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["name"], "sketch1");
    assert_eq!(fetched["image"], "AAEC");

    let missing_id = http
        .get(format!("http://{addr}/snapshots/00000000-0000-0000-0000-000000000000"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_id.status(), 404);
}

#[tokio::test]
async fn ping_and_root() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;

    let ping = reqwest::get(format!("http://{addr}/ping")).await.unwrap();
    assert_eq!(ping.status(), 204);

    let root: Value = reqwest::get(format!("http://{addr}/"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = root["session_id"].as_str().unwrap();
    assert_eq!(root["ws_path"], format!("/ws/{session_id}"));
}

#[tokio::test]
async fn rejoin_restarts_sequence_numbering() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;

    let (mut a, _) = connect(addr).await;
    let (mut b, _) = connect(addr).await;
    for ws in [&mut a, &mut b] {
        send(ws, json!({ "type": "join", "session_id": "room1" })).await;
        next_of_type(ws, "joined").await;
    }

    for sequence_no in 1..=3 {
        send(&mut a, draw("room1", sequence_no as f64, 1.0, sequence_no)).await;
        assert_eq!(next_of_type(&mut b, "draw").await["sequence_no"], sequence_no);
    }

    send(&mut a, json!({ "type": "join", "session_id": "room1" })).await;
    next_of_type(&mut a, "joined").await;
    send(&mut a, draw("room1", 50.0, 1.0, 1)).await;
    let after_rejoin = next_of_type(&mut b, "draw").await;
    assert_eq!(after_rejoin["x"].as_f64(), Some(50.0));
    assert_eq!(after_rejoin["sequence_no"], 1);

    send(&mut a, json!({ "type": "leave", "session_id": "room1" })).await;
    next_of_type(&mut a, "left").await;
    send(&mut a, json!({ "type": "join", "session_id": "room1" })).await;
    next_of_type(&mut a, "joined").await;
    send(&mut a, draw("room1", 60.0, 1.0, 1)).await;
    assert_eq!(next_of_type(&mut b, "draw").await["x"].as_f64(), Some(60.0));
}

#[tokio::test]
async fn snapshot_names_round_trip_and_deleted_snapshots_stay_deleted() {
    let dir = tempfile::tempdir().unwrap();
    let (addr, _state) = start_server(&dir, None).await;
    let http = reqwest::Client::new();

    let created: Value = http
        .post(format!("http://{addr}/snapshots"))
        .header("x-csrf-token", "t")
        .json(&json!({ "name": " sketch1 ", "image": "AAEC" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let url = format!("http://{addr}/snapshots/{}", created["id"].as_str().unwrap());

    let fetched: Value = http.get(&url).send().await.unwrap().json().await.unwrap();
    assert_eq!(fetched["name"], " sketch1 ");

    let deleted = http
        .delete(&url)
        .header("x-csrf-token", "t")
        .send()
        .await
        .unwrap();
    assert_eq!(deleted.status(), 204);
    let updated = http
        .put(&url)
        .header("x-csrf-token", "t")
        .json(&json!({ "name": "sketch2", "image": "AAEC" }))
        .send()
        .await
        .unwrap();
    assert_eq!(updated.status(), 404);
    assert_eq!(http.get(&url).send().await.unwrap().status(), 404);
}
