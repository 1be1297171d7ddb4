#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use livetail_core::config::StreamConfig;
use livetail_server::routes::{AppState, build_router};
use livetail_server::storage::StreamDatabase;

const SECRET: &str = "test-secret";

async fn app() -> (axum::Router, StreamDatabase) {
    let db = StreamDatabase::open_in_memory().await.unwrap();
    let router = build_router(AppState {
        db: db.clone(),
        secret: Arc::from(SECRET),
        stream: StreamConfig {
            poll_interval_ms: 20,
            heartbeat_secs: 30,
            countdown_check_secs: 5,
            max_duration_secs: 1,
        },
        retention: 20,
        shutdown: CancellationToken::new(),
    });
    (router, db)
}

/// POST a JSON body with the shared secret and return (status, body JSON).
async fn post(router: &axum::Router, uri: &str, body: &Value) -> (StatusCode, Value) {
    post_with_auth(router, uri, body, Some(SECRET)).await
}

async fn post_with_auth(
    router: &axum::Router,
    uri: &str,
    body: &Value,
    secret: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(secret) = secret {
        builder = builder.header("authorization", format!("Bearer {secret}"));
    }
    let resp = router
        .clone()
        .oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// GET the stream and return the response headers' content type plus the
/// parsed `(event, data)` pairs.
async fn get_stream(router: &axum::Router, query: &str) -> (String, Vec<(String, Value)>) {
    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/stream{query}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers().clone();
    assert_eq!(
        headers.get("cache-control").unwrap(),
        "no-cache, no-transform"
    );
    assert_eq!(headers.get("x-accel-buffering").unwrap(), "no");
    let content_type = headers
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();

    let mut events = Vec::new();
    for block in text.split("\n\n").filter(|b| !b.trim().is_empty()) {
        let mut name = String::new();
        let mut data = String::new();
        for line in block.lines() {
            if let Some(v) = line.strip_prefix("event:") {
                name = v.trim().to_string();
            } else if let Some(v) = line.strip_prefix("data:") {
                data.push_str(v.trim());
            }
        }
        events.push((name, serde_json::from_str(&data).unwrap()));
    }
    (content_type, events)
}

async fn start(router: &axum::Router, producer_ref: i64) -> String {
    let (status, body) = post(
        router,
        "/session",
        &json!({"action": "start", "producerRef": producer_ref}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    body["sessionId"].as_str().unwrap().to_string()
}

async fn push(router: &axum::Router, session_id: &str, sequence: u64, text: &str) -> StatusCode {
    let content = livetail_core::codec::encode_chunk(text.as_bytes());
    post(
        router,
        "/push",
        &json!({"sessionId": session_id, "sequence": sequence, "content": content}),
    )
    .await
    .0
}

fn names(events: &[(String, Value)]) -> Vec<&str> {
    events.iter().map(|(n, _)| n.as_str()).collect()
}

fn chunk_sequences(events: &[(String, Value)]) -> Vec<i64> {
    events
        .iter()
        .filter(|(n, _)| n == "chunk")
        .map(|(_, d)| d["sequence"].as_i64().unwrap())
        .collect()
}

// === Auth ===

#[tokio::test]
async fn write_routes_require_secret() {
    let (router, _db) = app().await;
    let body = json!({"action": "start", "producerRef": 1});

    let (status, json) = post_with_auth(&router, "/session", &body, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(json["error"].is_string());

    let (status, _) = post_with_auth(&router, "/session", &body, Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = post_with_auth(
        &router,
        "/countdown",
        &json!({"nextCheckAt": null}),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// === Session lifecycle ===

#[tokio::test]
async fn start_push_end_flow() {
    let (router, db) = app().await;
    let session_id = start(&router, 7).await;

    let (status, body) = post(
        &router,
        "/push",
        &json!({"sessionId": session_id, "sequence": 0, "content": "aGVsbG8="}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"received": 0, "sessionId": session_id}));

    let (status, body) = post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "completed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));

    let chunks = db.get_all_chunks(&session_id).await.unwrap();
    assert_eq!(chunks[0].content, b"hello");
}

#[tokio::test]
async fn end_validation_and_conflicts() {
    let (router, _db) = app().await;
    let session_id = start(&router, 1).await;

    let (status, _) = post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "active"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "paused"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": "ghost", "status": "failed"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let end = json!({"action": "end", "sessionId": session_id, "status": "failed"});
    assert_eq!(post(&router, "/session", &end).await.0, StatusCode::OK);
    assert_eq!(post(&router, "/session", &end).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn push_rejections() {
    let (router, _db) = app().await;
    assert_eq!(push(&router, "ghost", 0, "x").await, StatusCode::NOT_FOUND);

    let session_id = start(&router, 1).await;
    let (status, _) = post(
        &router,
        "/push",
        &json!({"sessionId": session_id, "sequence": 0, "content": "!!not base64!!"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = post(&router, "/push", &json!({"sessionId": session_id})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "completed"}),
    )
    .await;
    assert_eq!(
        push(&router, &session_id, 0, "late").await,
        StatusCode::BAD_REQUEST
    );
}

#[tokio::test]
async fn countdown_set_and_clear() {
    let (router, db) = app().await;
    let (status, body) = post(&router, "/countdown", &json!({"nextCheckAt": 1_900_000_000})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"success": true}));
    assert_eq!(db.get_next_check().await.unwrap(), Some(1_900_000_000));

    post(&router, "/countdown", &json!({"nextCheckAt": null})).await;
    assert_eq!(db.get_next_check().await.unwrap(), None);
}

#[tokio::test]
async fn health_reports_version() {
    let (router, _db) = app().await;
    let resp = router
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

// === Stream ===

#[tokio::test]
async fn replay_of_finished_session() {
    let (router, _db) = app().await;
    let session_id = start(&router, 3).await;
    for (seq, text) in ["hello ", "wor", "ld\n"].iter().enumerate() {
        assert_eq!(push(&router, &session_id, seq as u64, text).await, StatusCode::OK);
    }
    post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "completed"}),
    )
    .await;

    let (content_type, events) = get_stream(&router, "").await;
    assert!(content_type.starts_with("text/event-stream"));
    assert_eq!(
        names(&events),
        vec!["session", "chunk", "chunk", "chunk", "replay_complete"]
    );
    assert_eq!(events[0].1["id"], session_id.as_str());
    assert_eq!(events[0].1["status"], "completed");
    assert_eq!(events[4].1["totalChunks"], 3);

    let mut bytes = Vec::new();
    for (_, data) in events.iter().filter(|(n, _)| n == "chunk") {
        bytes.extend(livetail_core::codec::decode_chunk(data["content"].as_str().unwrap()).unwrap());
    }
    assert_eq!(bytes, b"hello world\n");
}

#[tokio::test]
async fn replay_flag_on_active_session() {
    let (router, _db) = app().await;
    let session_id = start(&router, 1).await;
    push(&router, &session_id, 0, "partial").await;

    let (_, events) = get_stream(&router, &format!("?sessionId={session_id}&replay=true")).await;
    assert_eq!(names(&events), vec!["session", "chunk", "replay_complete"]);
}

#[tokio::test]
async fn live_catch_up_from_sequence() {
    let (router, _db) = app().await;
    let session_id = start(&router, 1).await;
    for seq in 0..=5 {
        push(&router, &session_id, seq, "x").await;
    }

    let (_, events) = get_stream(&router, "?fromSequence=3").await;
    assert_eq!(events[0].0, "session");
    assert_eq!(chunk_sequences(&events), vec![4, 5]);
    assert_eq!(events.last().unwrap().0, "timeout");
    assert_eq!(events.last().unwrap().1["lastSequence"], 5);
}

#[tokio::test]
async fn live_stream_sees_session_end_without_further_chunks() {
    let (router, _db) = app().await;
    let session_id = start(&router, 1).await;
    push(&router, &session_id, 0, "a").await;
    push(&router, &session_id, 1, "b").await;

    let stream_router = router.clone();
    let handle = tokio::spawn(async move { get_stream(&stream_router, "").await });

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    push(&router, &session_id, 2, "c").await;
    post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": session_id, "status": "failed"}),
    )
    .await;

    let (_, events) = handle.await.unwrap();
    assert_eq!(chunk_sequences(&events), vec![0, 1, 2]);
    let end = events.iter().find(|(n, _)| n == "session_end").unwrap();
    assert_eq!(end.1["status"], "failed");
    assert_eq!(events.iter().filter(|(n, _)| n == "session_end").count(), 1);
    assert_eq!(events.last().unwrap().0, "timeout");
}

#[tokio::test]
async fn every_live_viewer_sees_end_before_the_next_session() {
    let (router, _db) = app().await;
    let first = start(&router, 1).await;
    push(&router, &first, 0, "a").await;

    let viewers: Vec<_> = (0..2)
        .map(|_| {
            let stream_router = router.clone();
            tokio::spawn(async move { get_stream(&stream_router, "").await })
        })
        .collect();

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    push(&router, &first, 1, "b").await;
    post(
        &router,
        "/session",
        &json!({"action": "end", "sessionId": first, "status": "completed"}),
    )
    .await;
    let second = start(&router, 2).await;
    push(&router, &second, 0, "c").await;

    for viewer in viewers {
        let (_, events) = viewer.await.unwrap();
        let end_at = events
            .iter()
            .position(|(n, d)| n == "session_end" && d["sessionId"] == first.as_str())
            .unwrap();
        assert_eq!(events[end_at].1["status"], "completed");

        let (before, after) = events.split_at(end_at);
        assert_eq!(chunk_sequences(before), vec![0, 1]);
        let next = after
            .iter()
            .position(|(n, d)| n == "session" && d["id"] == second.as_str())
            .unwrap();
        assert_eq!(chunk_sequences(&after[next..]), vec![0]);
        assert_eq!(events.iter().filter(|(n, _)| n == "session_end").count(), 1);
    }
}

#[tokio::test]
async fn no_session_keeps_connection_until_timeout() {
    let (router, _db) = app().await;
    let (_, events) = get_stream(&router, "").await;
    assert_eq!(names(&events), vec!["no_session", "timeout"]);
    assert!(events[1].1["lastSequence"].is_null());
}

#[tokio::test]
async fn stream_allows_cross_origin_reads() {
    let (router, _db) = app().await;
    let resp = router
        .oneshot(
            Request::builder()
                .uri("/stream?replay=true")
                .header("origin", "https://viewer.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(resp.headers().contains_key("access-control-allow-origin"));
}
