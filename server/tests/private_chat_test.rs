//! Integration tests for the private chat socket: auth, delivery, the follow
//! gate, typing indicators, body limits and connection replacement.

mod common;

use futures_util::SinkExt;
use serde_json::json;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use common::*;
use social_server::chat::protocol::{ERR_EMPTY, ERR_NOT_FOLLOWING, ERR_TOO_LONG};
use social_server::ws::Role;

#[tokio::test]
async fn test_upgrade_without_session_is_rejected() {
    let (addr, state) = start_test_server().await;

    let (_write, mut read) = connect(addr, "/chat/private", None).await;

    let text = next_text_within(&mut read, Duration::from_secs(2)).await;
    assert_eq!(text.as_deref(), Some("Unauthorized"));
    assert!(next_text_within(&mut read, Duration::from_secs(2)).await.is_none());
    assert!(state.registry.online_users().is_empty());
}

#[tokio::test]
async fn test_unknown_session_is_rejected() {
    let (addr, _state) = start_test_server().await;

    let (_write, mut read) = connect(addr, "/chat/private", Some("no-such-session")).await;

    let text = next_text_within(&mut read, Duration::from_secs(2)).await;
    assert_eq!(text.as_deref(), Some("Unauthorized"));
}

#[tokio::test]
async fn test_message_delivered_and_persisted_unread() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "alice", "bob", "accepted");

    let (mut alice_write, _alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(
        &mut alice_write,
        json!({"receiver_id": "bob", "message": "hello bob", "type": "message"}),
    )
    .await;

    let frame = next_json(&mut bob_read).await;
    assert_eq!(frame["sender_id"], "alice");
    assert_eq!(frame["receiver_id"], "bob");
    assert_eq!(frame["message"], "hello bob");
    assert_eq!(frame["type"], "message");
    assert_eq!(frame["sender_name"], "Alice");
    assert!(!frame["id"].as_str().unwrap().is_empty());
    assert!(!frame["created_at"].as_str().unwrap().is_empty());

    let conn = state.db.lock().unwrap();
    let (sender, read): (String, bool) = conn
        .query_row(
            "SELECT sender_id, read FROM private_chat_messages WHERE id = ?1",
            [frame["id"].as_str().unwrap()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(sender, "alice");
    assert!(!read);
}

#[tokio::test]
async fn test_message_to_offline_receiver_is_still_stored() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    seed_user(&state, "bob", "Bob");
    seed_follow(&state, "bob", "alice", "accepted");

    let (mut alice_write, mut alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "alice").is_some()).await;

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": "see you later"})).await;

    wait_until(|| count_rows(&state, "private_chat_messages") == 1).await;
    assert_silent(&mut alice_read).await;
}

#[tokio::test]
async fn test_message_without_follow_is_refused() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "alice", "bob", "pending");

    let (mut alice_write, mut alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": "hi"})).await;

    let frame = next_json(&mut alice_read).await;
    assert_eq!(frame["error"], ERR_NOT_FOLLOWING);
    assert_silent(&mut bob_read).await;
    assert_eq!(count_rows(&state, "private_chat_messages"), 0);

    // The socket stays usable after an inline error.
    assert!(state.registry.lookup(Role::Chat, "alice").is_some());
}

#[tokio::test]
async fn test_typing_forwarded_without_follow_and_not_stored() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");

    let (mut alice_write, _alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(
        &mut alice_write,
        json!({"receiver_id": "bob", "type": "typing", "sender_id": "mallory"}),
    )
    .await;

    let frame = next_json(&mut bob_read).await;
    assert_eq!(frame, json!({"type": "typing", "sender_id": "alice"}));
    assert_eq!(count_rows(&state, "private_chat_messages"), 0);
}

#[tokio::test]
async fn test_word_limit_enforced_at_boundary() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "alice", "bob", "accepted");

    let (mut alice_write, mut alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": words(200)})).await;
    let delivered = next_json(&mut bob_read).await;
    assert_eq!(delivered["message"], words(200));

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": words(201)})).await;
    let frame = next_json(&mut alice_read).await;
    assert_eq!(frame["error"], ERR_TOO_LONG);
    assert_silent(&mut bob_read).await;

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": "   "})).await;
    let frame = next_json(&mut alice_read).await;
    assert_eq!(frame["error"], ERR_EMPTY);

    assert_eq!(count_rows(&state, "private_chat_messages"), 1);
}

#[tokio::test]
async fn test_client_supplied_identity_is_overridden() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "alice", "bob", "accepted");

    let (mut alice_write, _alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(
        &mut alice_write,
        json!({
            "id": "forged-id",
            "sender_id": "mallory",
            "receiver_id": "bob",
            "message": "it's me",
            "created_at": "1999-01-01T00:00:00Z",
            "unknown_field": [1, 2, 3]
        }),
    )
    .await;

    let frame = next_json(&mut bob_read).await;
    assert_eq!(frame["sender_id"], "alice");
    assert_ne!(frame["id"], "forged-id");
    assert_ne!(frame["created_at"], "1999-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_undecodable_frame_is_ignored() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");

    let (mut alice_write, mut alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "alice").is_some()).await;

    alice_write
        .send(Message::Text("{not json".into()))
        .await
        .unwrap();

    assert_silent(&mut alice_read).await;
    assert!(state.registry.lookup(Role::Chat, "alice").is_some());
}

#[tokio::test]
async fn test_replaced_connection_closing_keeps_newer_registration() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "bob", "alice", "accepted");

    let (mut first_write, _first_read) = connect(addr, "/chat/private", Some(&alice)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "alice").is_some()).await;
    let first_id = state.registry.lookup(Role::Chat, "alice").unwrap().id();

    let (_second_write, mut second_read) = connect(addr, "/chat/private", Some(&alice)).await;
    wait_until(|| {
        state
            .registry
            .lookup(Role::Chat, "alice")
            .is_some_and(|handle| handle.id() != first_id)
    })
    .await;

    first_write.send(Message::Close(None)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(state.registry.lookup(Role::Chat, "alice").is_some());

    let (mut bob_write, _bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;
    send_json(&mut bob_write, json!({"receiver_id": "alice", "message": "which tab?"})).await;

    let frame = next_json(&mut second_read).await;
    assert_eq!(frame["message"], "which tab?");
    assert_eq!(frame["sender_name"], "Bob");
}

#[tokio::test]
async fn test_delivery_survives_failed_persist() {
    let (addr, state) = start_test_server().await;
    let alice = seed_user(&state, "alice", "Alice");
    let bob = seed_user(&state, "bob", "Bob");
    seed_follow(&state, "alice", "bob", "accepted");
    state
        .db
        .lock()
        .unwrap()
        .execute_batch("DROP TABLE private_chat_messages;")
        .unwrap();

    let (mut alice_write, mut alice_read) = connect(addr, "/chat/private", Some(&alice)).await;
    let (_bob_write, mut bob_read) = connect(addr, "/chat/private", Some(&bob)).await;
    wait_until(|| state.registry.lookup(Role::Chat, "bob").is_some()).await;

    send_json(&mut alice_write, json!({"receiver_id": "bob", "message": "not saved"})).await;

    let frame = next_json(&mut bob_read).await;
    assert_eq!(frame["message"], "not saved");
    assert_eq!(frame["sender_name"], "Alice");

    // No error reaches the sender and the socket stays up.
    assert_silent(&mut alice_read).await;
    assert!(state.registry.lookup(Role::Chat, "alice").is_some());
}
