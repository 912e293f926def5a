//! Shared harness for the integration tests: an in-process server on a
//! random port, direct database seeding, and cookie-authenticated clients.

#![allow(dead_code)]

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use social_server::auth::session::SESSION_COOKIE_NAME;
use social_server::state::AppState;
use social_server::ws::liveness::LivenessConfig;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsWrite = SplitSink<WsStream, Message>;
pub type WsRead = SplitStream<WsStream>;

const FAR_FUTURE: &str = "2999-01-01T00:00:00.000Z";
const SEED_TIME: &str = "2026-01-01T00:00:00.000Z";

/// Start the server on a random port with the default keepalive.
pub async fn start_test_server() -> (SocketAddr, AppState) {
    start_test_server_with(LivenessConfig::default()).await
}

/// Start the server on a random port and return its address and shared state.
pub async fn start_test_server_with(liveness: LivenessConfig) -> (SocketAddr, AppState) {
    let tmp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let data_dir = tmp_dir.path().to_str().unwrap().to_string();

    let db = social_server::db::init_db(&data_dir).expect("Failed to init DB");
    let state = AppState::new(db, liveness);

    let app = social_server::routes::build_router(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
        let _keep = tmp_dir;
    });

    (addr, state)
}

/// Insert a user with a live session. Returns the session id.
pub fn seed_user(state: &AppState, user_id: &str, nickname: &str) -> String {
    let session_id = format!("session-{}", user_id);
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO users (id, nickname, avatar, created_at) VALUES (?1, ?2, '', ?3)",
        rusqlite::params![user_id, nickname, SEED_TIME],
    )
    .unwrap();
    conn.execute(
        "INSERT INTO active_sessions (session_id, user_id, expires_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![session_id, user_id, FAR_FUTURE],
    )
    .unwrap();
    session_id
}

pub fn seed_follow(state: &AppState, follower: &str, followed: &str, status: &str) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO followers (follower_id, followed_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![follower, followed, status, SEED_TIME],
    )
    .unwrap();
}

pub fn seed_group(state: &AppState, group_id: &str, members: &[&str]) {
    let conn = state.db.lock().unwrap();
    conn.execute(
        "INSERT INTO groups (id, title, creator_id, created_at) VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![group_id, format!("Group {}", group_id), members[0], SEED_TIME],
    )
    .unwrap();
    for member in members {
        conn.execute(
            "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![group_id, member, SEED_TIME],
        )
        .unwrap();
    }
}

pub fn count_rows(state: &AppState, table: &str) -> i64 {
    let conn = state.db.lock().unwrap();
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
        .unwrap()
}

pub fn cookie(session_id: &str) -> String {
    format!("{}={}", SESSION_COOKIE_NAME, session_id)
}

/// Open a socket at `path`, sending the session cookie when one is given.
pub async fn connect(addr: SocketAddr, path: &str, session_id: Option<&str>) -> (WsWrite, WsRead) {
    let mut request = format!("ws://{}{}", addr, path)
        .into_client_request()
        .unwrap();
    if let Some(session_id) = session_id {
        request
            .headers_mut()
            .insert("Cookie", cookie(session_id).parse().unwrap());
    }
    let (ws_stream, _) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream.split()
}

pub async fn send_json(write: &mut WsWrite, payload: Value) {
    write
        .send(Message::Text(payload.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame within `wait`, skipping control frames. `None` on timeout or close.
pub async fn next_text_within(read: &mut WsRead, wait: Duration) -> Option<String> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, read.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(text.as_str().to_owned()),
            Ok(Some(Ok(Message::Ping(_)))) | Ok(Some(Ok(Message::Pong(_)))) => continue,
            _ => return None,
        }
    }
}

pub async fn next_json(read: &mut WsRead) -> Value {
    let text = next_text_within(read, Duration::from_secs(2))
        .await
        .expect("Expected a text frame within timeout");
    serde_json::from_str(&text).expect("Frame is not JSON")
}

/// Read frames until one satisfies `matches`.
pub async fn next_json_matching(read: &mut WsRead, matches: impl Fn(&Value) -> bool) -> Value {
    loop {
        let value = next_json(read).await;
        if matches(&value) {
            return value;
        }
    }
}

/// Assert nothing but control frames arrives for a short while.
pub async fn assert_silent(read: &mut WsRead) {
    if let Some(text) = next_text_within(read, Duration::from_millis(300)).await {
        panic!("Expected no frame, got: {}", text);
    }
}

/// Poll `condition` until it holds, failing after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "Condition not met within timeout"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A run of `n` space-separated words.
pub fn words(n: usize) -> String {
    vec!["word"; n].join(" ")
}
