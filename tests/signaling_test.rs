//! Integration tests for the signaling WebSocket: registration, call setup,
//! answer/reject, ICE relay, hangup, and disconnect cleanup.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use translink_server::directory::{OpenDirectory, RosterDirectory, UserDirectory};
use translink_server::state::AppState;
use translink_server::translation::connector::UnavailableConnector;

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server on a random port with the given directory and no
/// translation backend. Returns the bound address.
async fn start_test_server(directory: Arc<dyn UserDirectory>) -> SocketAddr {
    let state = AppState::new(Arc::new(UnavailableConnector), directory);
    let app = translink_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn start_open_server() -> SocketAddr {
    start_test_server(Arc::new(OpenDirectory)).await
}

/// One WebSocket client against the test server.
struct TestClient {
    write: futures_util::stream::SplitSink<WsStream, Message>,
    read: futures_util::stream::SplitStream<WsStream>,
}

impl TestClient {
    async fn connect(addr: SocketAddr) -> Self {
        let url = format!("ws://{}/ws", addr);
        let (stream, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("Failed to connect to WebSocket");
        let (write, read) = stream.split();
        Self { write, read }
    }

    async fn send(&mut self, value: Value) {
        self.write
            .send(Message::text(value.to_string()))
            .await
            .expect("Failed to send message");
    }

    /// Next JSON envelope, skipping ping/pong noise.
    async fn recv(&mut self) -> Value {
        loop {
            let msg = tokio::time::timeout(Duration::from_secs(2), self.read.next())
                .await
                .expect("Timed out waiting for message")
                .expect("Stream ended unexpectedly")
                .expect("WebSocket error");
            match msg {
                Message::Text(text) => {
                    return serde_json::from_str(text.as_str()).expect("Invalid JSON from server")
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => panic!("Expected text frame, got: {:?}", other),
            }
        }
    }

    /// Assert no envelope arrives within the window.
    async fn expect_silence(&mut self, window: Duration) {
        loop {
            match tokio::time::timeout(window, self.read.next()).await {
                Err(_) => return,
                Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
                Ok(other) => panic!("Expected silence, got: {:?}", other),
            }
        }
    }

    async fn register(&mut self, user_id: &str) {
        self.send(json!({"type": "register", "payload": {"userId": user_id}}))
            .await;
        let ack = self.recv().await;
        assert_eq!(ack["type"], "register", "unexpected reply: {}", ack);
        assert_eq!(ack["payload"]["success"], true);
    }
}

/// Register two users and run a call from `caller_id` to `callee_id` up to the
/// ringing state. Returns the room id.
async fn ring(
    caller: &mut TestClient,
    caller_id: &str,
    callee: &mut TestClient,
    callee_id: &str,
) -> String {
    caller
        .send(json!({
            "type": "call",
            "payload": {
                "targetUserId": callee_id,
                "callType": "audio",
                "offer": {"type": "offer", "sdp": "caller-sdp"},
            }
        }))
        .await;

    let incoming = callee.recv().await;
    assert_eq!(incoming["type"], "incoming-call", "got: {}", incoming);
    assert_eq!(incoming["payload"]["callerId"], caller_id);
    let room_id = incoming["payload"]["roomId"].as_str().unwrap().to_string();

    let initiated = caller.recv().await;
    assert_eq!(initiated["type"], "call-initiated", "got: {}", initiated);
    assert_eq!(initiated["payload"]["roomId"], room_id.as_str());

    room_id
}

/// Ring and accept: the full path to a connected room.
async fn connect_call(
    caller: &mut TestClient,
    caller_id: &str,
    callee: &mut TestClient,
    callee_id: &str,
) -> String {
    let room_id = ring(caller, caller_id, callee, callee_id).await;
    callee
        .send(json!({
            "type": "answer",
            "payload": {
                "roomId": room_id,
                "accepted": true,
                "answer": {"type": "answer", "sdp": "callee-sdp"},
            }
        }))
        .await;
    let accepted = caller.recv().await;
    assert_eq!(accepted["type"], "call-accepted");
    assert_eq!(accepted["payload"]["roomId"], room_id.as_str());
    room_id
}

#[tokio::test]
async fn test_register_ack() {
    let addr = start_open_server().await;
    let mut client = TestClient::connect(addr).await;
    client.register("u1").await;
}

#[tokio::test]
async fn test_register_unknown_user_rejected() {
    let addr = start_test_server(Arc::new(RosterDirectory::new(["u1"]))).await;

    let mut known = TestClient::connect(addr).await;
    known.register("u1").await;

    let mut unknown = TestClient::connect(addr).await;
    unknown
        .send(json!({"type": "register", "payload": {"userId": "stranger"}}))
        .await;
    let reply = unknown.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Unknown user");
}

#[tokio::test]
async fn test_duplicate_register_supersedes_old_connection() {
    let addr = start_open_server().await;

    let mut first = TestClient::connect(addr).await;
    first.register("u1").await;

    let mut second = TestClient::connect(addr).await;
    second.register("u1").await;

    // The first connection is force-closed with the supersession code.
    let msg = tokio::time::timeout(Duration::from_secs(2), first.read.next())
        .await
        .expect("Expected close on superseded connection");
    match msg {
        Some(Ok(Message::Close(Some(frame)))) => {
            assert_eq!(
                frame.code,
                tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::from(4000)
            );
        }
        Some(Ok(Message::Close(None))) | None => {}
        other => panic!("Expected close frame, got: {:?}", other),
    }

    // Calls to u1 now reach the second connection.
    let mut caller = TestClient::connect(addr).await;
    caller.register("u9").await;
    ring(&mut caller, "u9", &mut second, "u1").await;
}

#[tokio::test]
async fn test_call_delivers_offer_to_callee() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    u1.send(json!({
        "type": "call",
        "payload": {
            "targetUserId": "u2",
            "callType": "video",
            "offer": {"type": "offer", "sdp": "offer-O"},
        }
    }))
    .await;

    let incoming = u2.recv().await;
    assert_eq!(incoming["type"], "incoming-call");
    assert_eq!(incoming["payload"]["callerId"], "u1");
    assert_eq!(incoming["payload"]["callType"], "video");
    assert_eq!(incoming["payload"]["offer"]["sdp"], "offer-O");

    let initiated = u1.recv().await;
    assert_eq!(initiated["type"], "call-initiated");
    assert_eq!(initiated["payload"]["targetUserId"], "u2");
    assert_eq!(
        initiated["payload"]["roomId"],
        incoming["payload"]["roomId"]
    );
}

#[tokio::test]
async fn test_call_to_offline_user_fails() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    u1.register("u1").await;

    u1.send(json!({
        "type": "call",
        "payload": {"targetUserId": "nobody", "offer": {"sdp": "x"}}
    }))
    .await;
    let reply = u1.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "User is not online");
}

#[tokio::test]
async fn test_rejected_call_tears_the_room_down() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = ring(&mut u1, "u1", &mut u2, "u2").await;

    u2.send(json!({
        "type": "answer",
        "payload": {"roomId": room_id, "accepted": false}
    }))
    .await;

    let rejected = u1.recv().await;
    assert_eq!(rejected["type"], "call-rejected");
    assert_eq!(rejected["payload"]["roomId"], room_id.as_str());

    // Both users are free again: a fresh call succeeds.
    let second_room = ring(&mut u1, "u1", &mut u2, "u2").await;
    assert_ne!(second_room, room_id);
}

#[tokio::test]
async fn test_accepted_call_forwards_answer() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = ring(&mut u1, "u1", &mut u2, "u2").await;

    u2.send(json!({
        "type": "answer",
        "payload": {
            "roomId": room_id,
            "accepted": true,
            "answer": {"type": "answer", "sdp": "answer-A"},
        }
    }))
    .await;

    let accepted = u1.recv().await;
    assert_eq!(accepted["type"], "call-accepted");
    assert_eq!(accepted["payload"]["answer"]["sdp"], "answer-A");

    // The room is connected now; answering again is a protocol error.
    u2.send(json!({
        "type": "answer",
        "payload": {"roomId": room_id, "accepted": true, "answer": {"sdp": "again"}}
    }))
    .await;
    let reply = u2.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Call already answered");
}

#[tokio::test]
async fn test_accept_without_sdp_is_an_error_and_room_survives() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = ring(&mut u1, "u1", &mut u2, "u2").await;

    u2.send(json!({
        "type": "answer",
        "payload": {"roomId": room_id, "accepted": true}
    }))
    .await;
    let reply = u2.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Missing SDP answer");

    // The room stayed ringing; a retry with an SDP goes through.
    u2.send(json!({
        "type": "answer",
        "payload": {"roomId": room_id, "accepted": true, "answer": {"sdp": "retry"}}
    }))
    .await;
    let accepted = u1.recv().await;
    assert_eq!(accepted["type"], "call-accepted");
}

#[tokio::test]
async fn test_single_active_call_per_user() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    let mut u3 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;
    u3.register("u3").await;

    let room_id = ring(&mut u1, "u1", &mut u2, "u2").await;

    // A third party calling the busy callee fails and rings nobody.
    u3.send(json!({
        "type": "call",
        "payload": {"targetUserId": "u2", "offer": {"sdp": "x"}}
    }))
    .await;
    let reply = u3.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "User is busy");

    // The busy caller dialing out also fails.
    u1.send(json!({
        "type": "call",
        "payload": {"targetUserId": "u3", "offer": {"sdp": "x"}}
    }))
    .await;
    let reply = u1.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "You are already in a call");

    // The original ringing room is unchanged and can still be accepted.
    u2.send(json!({
        "type": "answer",
        "payload": {"roomId": room_id, "accepted": true, "answer": {"sdp": "a"}}
    }))
    .await;
    let accepted = u1.recv().await;
    assert_eq!(accepted["type"], "call-accepted");
    u2.expect_silence(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_ice_candidates_relay_verbatim() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = connect_call(&mut u1, "u1", &mut u2, "u2").await;

    u1.send(json!({
        "type": "ice-candidate",
        "payload": {
            "roomId": room_id,
            "candidate": {"candidate": "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host", "sdpMLineIndex": 0},
        }
    }))
    .await;

    let relayed = u2.recv().await;
    assert_eq!(relayed["type"], "ice-candidate");
    assert_eq!(relayed["payload"]["roomId"], room_id.as_str());
    assert_eq!(
        relayed["payload"]["candidate"]["sdpMLineIndex"], 0,
        "candidate must be relayed verbatim"
    );
}

#[tokio::test]
async fn test_ice_candidate_validation() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    let mut u3 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;
    u3.register("u3").await;

    let room_id = connect_call(&mut u1, "u1", &mut u2, "u2").await;

    // Unknown room.
    u1.send(json!({
        "type": "ice-candidate",
        "payload": {"roomId": "no-such-room", "candidate": {"x": 1}}
    }))
    .await;
    let reply = u1.recv().await;
    assert_eq!(reply["payload"]["message"], "Room not found");

    // Not a member.
    u3.send(json!({
        "type": "ice-candidate",
        "payload": {"roomId": room_id, "candidate": {"x": 1}}
    }))
    .await;
    let reply = u3.recv().await;
    assert_eq!(reply["payload"]["message"], "You are not a member of this room");

    // Null candidate.
    u1.send(json!({
        "type": "ice-candidate",
        "payload": {"roomId": room_id, "candidate": null}
    }))
    .await;
    let reply = u1.recv().await;
    assert_eq!(reply["payload"]["message"], "Missing ICE candidate");
}

#[tokio::test]
async fn test_hangup_notifies_peer_once() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = connect_call(&mut u1, "u1", &mut u2, "u2").await;

    u1.send(json!({"type": "hangup", "payload": {"roomId": room_id}}))
        .await;
    let hangup = u2.recv().await;
    assert_eq!(hangup["type"], "hangup");
    assert_eq!(hangup["payload"]["roomId"], room_id.as_str());

    // A second hangup hits a destroyed room and never re-notifies the peer.
    u1.send(json!({"type": "hangup", "payload": {"roomId": room_id}}))
        .await;
    let reply = u1.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Room not found");
    u2.expect_silence(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_disconnect_mid_call_cleans_up() {
    let addr = start_open_server().await;
    let mut u1 = TestClient::connect(addr).await;
    let mut u2 = TestClient::connect(addr).await;
    u1.register("u1").await;
    u2.register("u2").await;

    let room_id = connect_call(&mut u1, "u1", &mut u2, "u2").await;

    // u1 vanishes without a hangup.
    drop(u1);

    let disconnected = u2.recv().await;
    assert_eq!(disconnected["type"], "user-disconnected");
    assert_eq!(disconnected["payload"]["userId"], "u1");
    assert_eq!(disconnected["payload"]["roomId"], room_id.as_str());

    // The room is gone: late candidates referencing it are errors.
    u2.send(json!({
        "type": "ice-candidate",
        "payload": {"roomId": room_id, "candidate": {"x": 1}}
    }))
    .await;
    let reply = u2.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Room not found");
}

#[tokio::test]
async fn test_protocol_errors() {
    let addr = start_open_server().await;
    let mut client = TestClient::connect(addr).await;

    // Messages before registration are rejected.
    client
        .send(json!({"type": "hangup", "payload": {"roomId": "r"}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["payload"]["message"], "You are not registered");

    client.register("u1").await;

    // Unknown message type.
    client
        .send(json!({"type": "mystery", "payload": {}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["message"], "Unrecognized or malformed message");

    // Malformed JSON.
    client
        .write
        .send(Message::text("this is not json"))
        .await
        .unwrap();
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");

    // A missing required payload field is a protocol error, not a crash.
    client
        .send(json!({"type": "call", "payload": {"callType": "audio"}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["type"], "error");

    // The connection survived all of it.
    client
        .send(json!({"type": "call", "payload": {"targetUserId": "nobody", "offer": {}}}))
        .await;
    let reply = client.recv().await;
    assert_eq!(reply["payload"]["message"], "User is not online");
}
