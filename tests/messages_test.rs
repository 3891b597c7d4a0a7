//! Integration tests for the REST endpoints: history, read tracking, rooms,
//! and the message mutations that emit live events.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use chat_relay::auth::jwt::{self, JwtVerifier};
use chat_relay::db::models::{NewMessage, NewRoom};
use chat_relay::db::{MessageStore, RoomDirectory, SqliteStore};
use chat_relay::hub::{Hub, HubSettings};
use chat_relay::state::{AppState, KeepaliveSettings};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

struct TestServer {
    addr: SocketAddr,
    base_url: String,
    jwt_secret: Vec<u8>,
    store: Arc<SqliteStore>,
    client: reqwest::Client,
    /// Room with alice and bob as members
    room_id: String,
}

impl TestServer {
    fn token(&self, user_id: &str) -> String {
        jwt::issue_access_token(&self.jwt_secret, user_id, None, 3600).unwrap()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn insert_message(&self, room_id: &str, sender: &str, content: &str, secs: i64) -> String {
        self.store
            .insert(&NewMessage {
                room_id: room_id.to_string(),
                sender_id: sender.to_string(),
                content: content.to_string(),
                media_url: None,
                reply_to: None,
                timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            })
            .unwrap()
    }

    fn create_room(&self, name: &str, members: &[&str]) -> String {
        self.store
            .create_room(&NewRoom {
                name: name.to_string(),
                members: members.iter().map(|m| m.to_string()).collect(),
                is_group: members.len() > 2,
            })
            .unwrap()
            .id
    }

    async fn post(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(self.token(user_id))
            .send()
            .await
            .unwrap()
    }

    async fn get(&self, user_id: &str, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .bearer_auth(self.token(user_id))
            .send()
            .await
            .unwrap()
    }

    /// Connect over WebSocket and subscribe to `room_id`, returning once the
    /// hub reports the subscription.
    async fn subscribe(&self, user_id: &str, room_id: &str) -> (WsWrite, WsRead) {
        let ws_url = format!("ws://{}/ws?token={}", self.addr, self.token(user_id));
        let (ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
            .await
            .expect("Failed to connect to WebSocket");
        let (mut write, read) = ws_stream.split();

        let join = json!({"type": "join", "roomId": room_id});
        write
            .send(Message::Text(join.to_string().into()))
            .await
            .unwrap();

        for _ in 0..100 {
            let presence: Value = self
                .get(user_id, &format!("/users/{}/presence", user_id))
                .await
                .json()
                .await
                .unwrap();
            if presence["roomId"] == room_id {
                return (write, read);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("{} never subscribed to {}", user_id, room_id);
    }
}

/// Helper: start the server on a random port with the display names of
/// alice, bob and carol already recorded, and one room shared by alice and bob.
async fn start_test_server() -> TestServer {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = chat_relay::db::init_db(&data_dir).expect("Failed to init DB");
    let jwt_secret =
        jwt::load_or_generate_jwt_secret(&data_dir).expect("Failed to generate JWT secret");

    let store = Arc::new(SqliteStore::new(db));
    store.upsert_user("alice", Some("Alice")).unwrap();
    store.upsert_user("bob", Some("Bob")).unwrap();
    store.upsert_user("carol", Some("Carol")).unwrap();
    let room = store
        .create_room(&NewRoom {
            name: "general".to_string(),
            members: BTreeSet::from(["alice".to_string(), "bob".to_string()]),
            is_group: true,
        })
        .unwrap();

    let state = AppState {
        messages: store.clone(),
        rooms: store.clone(),
        verifier: Arc::new(JwtVerifier::new(jwt_secret.clone())),
        hub: Hub::spawn(HubSettings::default()),
        keepalive: KeepaliveSettings::default(),
    };

    let app = chat_relay::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
        let _keep = tmp_dir;
    });

    TestServer {
        addr,
        base_url: format!("http://{}", addr),
        jwt_secret,
        store,
        client: reqwest::Client::new(),
        room_id: room.id,
    }
}

/// Skip events until one of type `kind` arrives.
async fn next_event_of(read: &mut WsRead, kind: &str) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), read.next())
            .await
            .expect("Timed out waiting for an event")
            .expect("Stream ended")
            .expect("WebSocket error");
        if let Message::Text(text) = msg {
            let event: Value = serde_json::from_str(text.as_str()).unwrap();
            if event["type"] == kind {
                return event;
            }
        }
    }
}

#[tokio::test]
async fn test_rest_requires_token() {
    let server = start_test_server().await;

    let resp = server
        .client
        .get(server.url(&format!("/rooms/{}/messages", server.room_id)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = server
        .client
        .post(server.url("/messages/whatever/pin"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_history_pages_oldest_first() {
    let server = start_test_server().await;
    let m1 = server.insert_message(&server.room_id, "alice", "one", 0);
    let m2 = server.insert_message(&server.room_id, "bob", "two", 1);
    let m3 = server.insert_message(&server.room_id, "alice", "three", 2);

    let page: Vec<Value> = server
        .get("alice", &format!("/rooms/{}/messages?limit=2", server.room_id))
        .await
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = page.iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec![m2.as_str(), m3.as_str()]);

    let older: Vec<Value> = server
        .get(
            "alice",
            &format!("/rooms/{}/messages?before={}", server.room_id, m2),
        )
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(older.len(), 1);
    assert_eq!(older[0]["id"], m1.as_str());
    assert_eq!(older[0]["content"], "one");
}

#[tokio::test]
async fn test_history_forbidden_for_non_member() {
    let server = start_test_server().await;
    let resp = server
        .get("carol", &format!("/rooms/{}/messages", server.room_id))
        .await;
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn test_pin_and_unpin_emit_events() {
    let server = start_test_server().await;
    let message_id = server.insert_message(&server.room_id, "alice", "pin me", 0);
    let (_bob_w, mut bob_r) = server.subscribe("bob", &server.room_id).await;

    let resp = server
        .post("alice", &format!("/messages/{}/pin", message_id))
        .await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["pinned"], true);

    let event = next_event_of(&mut bob_r, "pin").await;
    assert_eq!(event["roomId"], server.room_id);
    assert_eq!(event["messageId"], message_id.as_str());
    assert_eq!(event["message"]["pinned"], true);

    server
        .post("alice", &format!("/messages/{}/unpin", message_id))
        .await;
    let event = next_event_of(&mut bob_r, "unpin").await;
    assert_eq!(event["message"]["pinned"], false);
}

#[tokio::test]
async fn test_pin_unknown_message_is_404() {
    let server = start_test_server().await;
    let resp = server.post("alice", "/messages/does-not-exist/pin").await;
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_star_and_starred_listing() {
    let server = start_test_server().await;
    let message_id = server.insert_message(&server.room_id, "bob", "star me", 0);
    let (_alice_w, mut alice_r) = server.subscribe("alice", &server.room_id).await;

    let resp = server
        .post("alice", &format!("/messages/{}/star", message_id))
        .await;
    assert_eq!(resp.status(), 200);

    let event = next_event_of(&mut alice_r, "star").await;
    assert_eq!(event["message"]["starredBy"], json!(["alice"]));

    let starred: Vec<Value> = server
        .get("alice", "/messages/starred")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(starred.len(), 1);
    assert_eq!(starred[0]["id"], message_id.as_str());
    assert_eq!(starred[0]["senderName"], "Bob");
    assert_eq!(starred[0]["content"], "star me");

    // Stars are per user
    let bobs: Vec<Value> = server
        .get("bob", "/messages/starred")
        .await
        .json()
        .await
        .unwrap();
    assert!(bobs.is_empty());

    server
        .post("alice", &format!("/messages/{}/unstar", message_id))
        .await;
    let event = next_event_of(&mut alice_r, "unstar").await;
    assert_eq!(event["message"]["starredBy"], json!([]));

    let starred: Vec<Value> = server
        .get("alice", "/messages/starred")
        .await
        .json()
        .await
        .unwrap();
    assert!(starred.is_empty());
}

#[tokio::test]
async fn test_delete_emits_event_and_removes_message() {
    let server = start_test_server().await;
    let message_id = server.insert_message(&server.room_id, "alice", "oops", 0);
    let (_bob_w, mut bob_r) = server.subscribe("bob", &server.room_id).await;

    let resp = server
        .client
        .delete(server.url(&format!("/messages/{}", message_id)))
        .bearer_auth(server.token("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = next_event_of(&mut bob_r, "delete").await;
    assert_eq!(event, json!({"type": "delete", "roomId": server.room_id, "messageId": message_id}));

    let history: Vec<Value> = server
        .get("bob", &format!("/rooms/{}/messages", server.room_id))
        .await
        .json()
        .await
        .unwrap();
    assert!(history.is_empty());

    let resp = server
        .client
        .delete(server.url(&format!("/messages/{}", message_id)))
        .bearer_auth(server.token("alice"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn test_forward_targets_destination_room() {
    let server = start_test_server().await;
    let other_room = server.create_room("side", &["alice", "bob"]);
    let message_id = server.insert_message(&server.room_id, "alice", "pass it on", 0);
    let (_bob_w, mut bob_r) = server.subscribe("bob", &other_room).await;

    let resp = server
        .client
        .post(server.url(&format!("/messages/{}/forward", message_id)))
        .bearer_auth(server.token("alice"))
        .json(&json!({"toRoomId": other_room}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let forwarded: Value = resp.json().await.unwrap();
    assert_eq!(forwarded["roomId"], other_room.as_str());
    assert_ne!(forwarded["id"], message_id.as_str());

    let event = next_event_of(&mut bob_r, "forward").await;
    assert_eq!(event["roomId"], other_room.as_str());
    assert_eq!(event["messageId"], forwarded["id"]);
    assert_eq!(event["message"]["content"], "pass it on");
    assert_eq!(event["message"]["senderId"], "alice");
    assert_eq!(event["message"]["pinned"], false);
}

#[tokio::test]
async fn test_rooms_unread_and_mark_read() {
    let server = start_test_server().await;

    let resp = server
        .client
        .post(server.url("/rooms"))
        .bearer_auth(server.token("alice"))
        .json(&json!({"name": "book club", "members": ["bob", "carol"], "isGroup": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let room: Value = resp.json().await.unwrap();
    assert_eq!(room["members"], json!(["alice", "bob", "carol"]));
    let room_id = room["id"].as_str().unwrap().to_string();

    server.insert_message(&room_id, "alice", "first", 0);
    server.insert_message(&room_id, "carol", "latest", 1);

    let rooms: Vec<Value> = server
        .get("bob", "/users/bob/rooms")
        .await
        .json()
        .await
        .unwrap();
    let club = rooms
        .iter()
        .find(|r| r["id"] == room_id.as_str())
        .expect("bob should see the new room");
    assert_eq!(club["unreadCount"], 2);
    assert_eq!(club["lastMessage"]["content"], "latest");

    let resp = server
        .post("bob", &format!("/rooms/{}/messages/mark-read", room_id))
        .await;
    assert_eq!(resp.status(), 200);

    let rooms: Vec<Value> = server
        .get("bob", "/users/bob/rooms")
        .await
        .json()
        .await
        .unwrap();
    let club = rooms.iter().find(|r| r["id"] == room_id.as_str()).unwrap();
    assert_eq!(club["unreadCount"], 0);

    let history: Vec<Value> = server
        .get("alice", &format!("/rooms/{}/messages", room_id))
        .await
        .json()
        .await
        .unwrap();
    assert!(history
        .iter()
        .all(|m| m["readBy"].as_array().unwrap().contains(&json!("bob"))));

    // Listing someone else's rooms is refused
    let resp = server.get("bob", "/users/alice/rooms").await;
    assert_eq!(resp.status(), 403);
}
