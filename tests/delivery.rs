//! Push Dispatcher Delivery Tests
//!
//! Exercises the dispatcher's side-effect paths against a local push-backend
//! stub: stale-token invalidation, the no-devices skip, active-room
//! suppression, and sender-name fallback. Skipped when no Postgres is
//! reachable (TEST_DATABASE_BASE_URL overrides the default).

mod common;

use std::sync::atomic::Ordering;

use sqlx::Row;
use uuid::Uuid;

use courier::app::dispatch::{DispatchOutcome, PushDispatcher};
use courier::domain::notification::PushRequest;
use courier::infra::db::Db;

fn request(user_id: Uuid) -> PushRequest {
    PushRequest {
        id: Some(Uuid::new_v4()),
        user_id,
        title: None,
        body: "hi".to_string(),
        notification_type: None,
        channel: "direct_message".to_string(),
        room_id: None,
        post_id: None,
        sender_id: None,
        message_id: None,
        data: None,
    }
}

async fn build_dispatcher(db: &Db, base_url: &str) -> PushDispatcher {
    PushDispatcher::new(
        db.clone(),
        reqwest::Client::new(),
        &common::push_settings(base_url),
    )
}

async fn seed_device(db: &Db, user_id: Uuid, token: &str, room_id: Option<Uuid>) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO user_devices (id, user_id, device_id, fcm_token, push_enabled, current_room_id) \
         VALUES ($1, $2, $3, $4, TRUE, $5)",
    )
    .bind(id)
    .bind(user_id)
    .bind(format!("device-{}", id))
    .bind(token)
    .bind(room_id)
    .execute(db.pool())
    .await
    .expect("failed to seed device");
    id
}

async fn device_state(db: &Db, id: Uuid) -> (Option<String>, bool) {
    let row = sqlx::query("SELECT fcm_token, push_enabled FROM user_devices WHERE id = $1")
        .bind(id)
        .fetch_one(db.pool())
        .await
        .expect("failed to read device");
    (row.get("fcm_token"), row.get("push_enabled"))
}

#[tokio::test]
async fn unregistered_token_clears_only_that_registration() {
    let Some(db) = common::db().await else { return };
    let (base_url, stub) = common::spawn_fcm_stub().await;
    let dispatcher = build_dispatcher(&db, &base_url).await;

    let user_id = Uuid::new_v4();
    let stale = seed_device(&db, user_id, "stale-token-1", None).await;
    let healthy = seed_device(&db, user_id, "healthy-token-1", None).await;

    let outcome = dispatcher
        .deliver(&request(user_id))
        .await
        .expect("deliver should not fail on per-device errors");
    let DispatchOutcome::Delivered(summary) = outcome else {
        panic!("expected a delivery, got a skip");
    };
    assert_eq!(summary.sent, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.total_devices, 2);

    let (stale_token, stale_enabled) = device_state(&db, stale).await;
    assert!(stale_token.is_none(), "stale token was not cleared");
    assert!(!stale_enabled, "stale registration still push-enabled");

    let (healthy_token, healthy_enabled) = device_state(&db, healthy).await;
    assert_eq!(healthy_token.as_deref(), Some("healthy-token-1"));
    assert!(healthy_enabled);

    assert_eq!(stub.send_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn zero_eligible_devices_skips_without_backend_calls() {
    let Some(db) = common::db().await else { return };
    let (base_url, stub) = common::spawn_fcm_stub().await;
    let dispatcher = build_dispatcher(&db, &base_url).await;

    let outcome = dispatcher
        .deliver(&request(Uuid::new_v4()))
        .await
        .expect("deliver should not fail for an unknown user");
    let DispatchOutcome::Skipped { reason } = outcome else {
        panic!("expected a skip for a user with no devices");
    };
    assert_eq!(reason, "no_devices");

    // No token exchange and no send may happen for a skip.
    assert_eq!(stub.token_calls.load(Ordering::SeqCst), 0);
    assert_eq!(stub.send_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn device_viewing_the_room_is_not_interrupted() {
    let Some(db) = common::db().await else { return };
    let (base_url, stub) = common::spawn_fcm_stub().await;
    let dispatcher = build_dispatcher(&db, &base_url).await;

    let user_id = Uuid::new_v4();
    let room_id = Uuid::new_v4();
    seed_device(&db, user_id, "viewing-token", Some(room_id)).await;
    seed_device(&db, user_id, "idle-token", None).await;
    seed_device(&db, user_id, "other-room-token", Some(Uuid::new_v4())).await;

    let mut req = request(user_id);
    req.channel = "group_message".to_string();
    req.room_id = Some(room_id);

    let outcome = dispatcher.deliver(&req).await.expect("deliver");
    let DispatchOutcome::Delivered(summary) = outcome else {
        panic!("expected a delivery");
    };
    assert_eq!(summary.sent, 2);
    assert_eq!(summary.failed, 0);

    let tokens = stub.sent_tokens();
    assert!(tokens.contains(&"idle-token".to_string()));
    assert!(tokens.contains(&"other-room-token".to_string()));
    assert!(!tokens.contains(&"viewing-token".to_string()));
}

#[tokio::test]
async fn whitespace_sender_name_falls_back_to_username_in_title() {
    let Some(db) = common::db().await else { return };
    let (base_url, stub) = common::spawn_fcm_stub().await;
    let dispatcher = build_dispatcher(&db, &base_url).await;

    let user_id = Uuid::new_v4();
    let sender_id = Uuid::new_v4();
    seed_device(&db, user_id, "recipient-token", None).await;
    sqlx::query(
        "INSERT INTO profiles (id, username, first_name, last_name) VALUES ($1, $2, $3, $4)",
    )
    .bind(sender_id)
    .bind("alexh")
    .bind(" ")
    .bind("")
    .execute(db.pool())
    .await
    .expect("failed to seed sender profile");

    let mut req = request(user_id);
    req.sender_id = Some(sender_id);

    let outcome = dispatcher.deliver(&req).await.expect("deliver");
    assert!(matches!(outcome, DispatchOutcome::Delivered(_)));

    // direct_message with no explicit title uses the sender name verbatim.
    assert_eq!(stub.last_title().as_deref(), Some("alexh"));
}
