use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::NaiveTime;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use hbooking::engine::{BookingStore, Engine};
use hbooking::http::{router, AppState};
use hbooking::model::WorkshopSchedule;

// ── Test infrastructure ──────────────────────────────────────

struct TestApp {
    router: Router,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

async fn start_app(handler_timeout: Duration) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(Engine::open(&dir.path().join("http.wal")).unwrap());
    engine
        .put_schedule(WorkshopSchedule {
            workshop_id: 1,
            timezone: "UTC".into(),
            begin: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        })
        .await
        .unwrap();

    let shutdown = CancellationToken::new();
    let router = router(Arc::new(AppState {
        engine: engine.clone(),
        handler_timeout,
        shutdown: shutdown.clone(),
    }));
    TestApp {
        router,
        engine,
        shutdown,
        _dir: dir,
    }
}

async fn app() -> TestApp {
    start_app(Duration::from_secs(5)).await
}

async fn send(router: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = router.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body)
}

async fn post(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    post_raw(router, path, body.to_string()).await
}

async fn post_raw(router: &Router, path: &str, body: String) -> (StatusCode, Value) {
    let req = Request::post(path)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap();
    send(router, req).await
}

async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    send(router, Request::get(path).body(Body::empty()).unwrap()).await
}

fn booking(begin: &str, end: &str, tz: &str) -> Value {
    json!({
        "client_id": "client-1",
        "begin_at": begin,
        "end_at": end,
        "client_timezone": tz,
    })
}

// ── Create ───────────────────────────────────────────────────

#[tokio::test]
async fn create_inside_window_returns_booking() {
    let app = app().await;
    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC"),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(body["workshop_id"], 1);
    assert_eq!(body["client_id"], "client-1");
    assert_eq!(body["begin_at"], "15-01-2099 10:00");
    assert_eq!(body["end_at"], "15-01-2099 11:00");
    assert_eq!(body["client_timezone"], "UTC");
}

#[tokio::test]
async fn create_echoes_client_zone() {
    let app = app().await;
    // 10:30 in Berlin is 09:30 UTC
    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:30", "15-01-2099 11:30", "Europe/Berlin"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["begin_at"], "15-01-2099 10:30");
    assert_eq!(body["client_timezone"], "Europe/Berlin");
}

#[tokio::test]
async fn out_of_schedule_is_422() {
    let app = app().await;
    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 08:00", "15-01-2099 09:30", "UTC"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().starts_with("validation failed: "));
}

#[tokio::test]
async fn overlap_is_422() {
    let app = app().await;
    let first = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC"),
    )
    .await;
    assert_eq!(first.0, StatusCode::OK);

    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:30", "15-01-2099 11:30", "UTC"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("overlap"));
}

#[tokio::test]
async fn invalid_duration_and_past_are_422() {
    let app = app().await;
    let (short, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 10:15", "UTC"),
    )
    .await;
    let (past, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2001 10:00", "15-01-2001 11:00", "UTC"),
    )
    .await;
    let (inverted, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 11:00", "15-01-2099 10:00", "UTC"),
    )
    .await;
    assert_eq!(short, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(past, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(inverted, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn malformed_requests_are_400() {
    let app = app().await;
    let ok_body = booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC");

    let (bad_id, _) = post(&app.router, "/api/v1/bookings/abc", ok_body.clone()).await;
    let (bad_json, _) = post_raw(&app.router, "/api/v1/bookings/1", "{not json".into()).await;
    let (missing_field, _) = post(&app.router, "/api/v1/bookings/1", json!({"client_id": "c"})).await;
    let (bad_zone, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "Mars/Olympus"),
    )
    .await;
    let (bad_format, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("2099-01-15T10:00", "2099-01-15T11:00", "UTC"),
    )
    .await;

    let (loose_format, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("5-1-2099 9:00", "5-1-2099 10:00", "UTC"),
    )
    .await;
    let mut long_client = ok_body.clone();
    long_client["client_id"] = json!("c".repeat(257));
    let (long_id, _) = post(&app.router, "/api/v1/bookings/1", long_client).await;

    assert_eq!(loose_format, StatusCode::BAD_REQUEST);
    assert_eq!(long_id, StatusCode::BAD_REQUEST);
    assert_eq!(bad_id, StatusCode::BAD_REQUEST);
    assert_eq!(bad_json, StatusCode::BAD_REQUEST);
    assert_eq!(missing_field, StatusCode::BAD_REQUEST);
    assert_eq!(bad_zone, StatusCode::BAD_REQUEST);
    assert_eq!(bad_format, StatusCode::BAD_REQUEST);
    assert!(app.engine.list_bookings(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_schedule_is_500_without_details() {
    let app = app().await;
    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/77",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal error");
}

#[tokio::test]
async fn handler_timeout_is_500_and_rolls_back() {
    let app = start_app(Duration::from_millis(50)).await;
    let held = app.engine.store().begin(1).await.unwrap();

    let (status, body) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "internal error");

    drop(held);
    assert!(app.engine.list_bookings(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn shutdown_aborts_new_units_of_work() {
    let app = app().await;
    app.shutdown.cancel();
    let (status, _) = post(
        &app.router,
        "/api/v1/bookings/1",
        booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC"),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(app.engine.list_bookings(1).await.unwrap().is_empty());
}

#[tokio::test]
async fn client_id_at_the_length_cap_is_accepted() {
    let app = app().await;
    let mut body = booking("15-01-2099 10:00", "15-01-2099 11:00", "UTC");
    body["client_id"] = json!("c".repeat(256));
    let (status, created) = post(&app.router, "/api/v1/bookings/1", body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["client_id"].as_str().unwrap().len(), 256);
}

// ── List ─────────────────────────────────────────────────────

#[tokio::test]
async fn list_returns_bookings_without_ids() {
    let app = app().await;
    for (begin, end, tz) in [
        ("15-01-2099 14:00", "15-01-2099 15:00", "UTC"),
        ("15-01-2099 10:30", "15-01-2099 11:30", "Europe/Berlin"),
    ] {
        let (status, _) = post(&app.router, "/api/v1/bookings/1", booking(begin, end, tz)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = get(&app.router, "/api/v1/bookings/1").await;
    assert_eq!(status, StatusCode::OK);
    let bookings = body["bookings"].as_array().unwrap();
    assert_eq!(bookings.len(), 2);
    assert!(bookings.iter().all(|b| b.get("id").is_none()));
    // insertion order, each in its own client zone
    assert_eq!(bookings[0]["begin_at"], "15-01-2099 14:00");
    assert_eq!(bookings[1]["begin_at"], "15-01-2099 10:30");
    assert_eq!(bookings[1]["client_timezone"], "Europe/Berlin");
}

#[tokio::test]
async fn list_of_unknown_workshop_is_empty() {
    let app = app().await;
    let (status, body) = get(&app.router, "/api/v1/bookings/404").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"bookings": []}));
}

#[tokio::test]
async fn list_with_bad_id_is_400() {
    let app = app().await;
    let (status, body) = get(&app.router, "/api/v1/bookings/one").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
