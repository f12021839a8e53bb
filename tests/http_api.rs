use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::NaiveDate;
use serde_json::{json, Value};
use tokio_test::{assert_err, assert_ok};
use tower::ServiceExt;
use ulid::Ulid;

use hostbook::clock::ManualClock;
use hostbook::engine::{Engine, EngineOptions};
use hostbook::http::actor::{USER_ID_HEADER, USER_ROLE_HEADER};
use hostbook::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

struct TestApp {
    router: Router,
    engine: Arc<Engine>,
}

fn start_test_app() -> TestApp {
    let dir = std::env::temp_dir().join(format!("hostbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let options = EngineOptions {
        clock: Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
        ..EngineOptions::default()
    };
    let engine =
        Arc::new(Engine::new(dir.join("hostbook.wal"), Arc::new(NotifyHub::new()), options).unwrap());
    TestApp {
        router: hostbook::http::router(engine.clone()),
        engine,
    }
}

#[derive(Clone, Copy)]
struct As<'a>(Ulid, &'a str);

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        who: Option<As<'_>>,
        body: Option<Value>,
    ) -> (StatusCode, Value, Option<String>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(As(id, role)) = who {
            builder = builder
                .header(USER_ID_HEADER, id.to_string())
                .header(USER_ROLE_HEADER, role);
        }
        let body = match body {
            Some(v) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::String(
                String::from_utf8_lossy(&bytes).into_owned(),
            ))
        };
        (status, value, retry_after)
    }

    /// Host with rate 10,000 and max 2 guests, owned by `owner`.
    async fn host(&self, owner: Ulid) -> Ulid {
        let host_id = Ulid::new();
        let (status, _, _) = self
            .call(
                Method::PUT,
                &format!("/hosts/{host_id}"),
                Some(As(owner, "host")),
                Some(json!({"owner_id": owner.to_string(), "nightly_rate": 10_000, "max_guests": 2})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        host_id
    }

    async fn book(&self, guest: Ulid, host_id: Ulid, check_in: &str, check_out: &str) -> (StatusCode, Value) {
        let (status, body, _) = self
            .call(
                Method::POST,
                "/bookings",
                Some(As(guest, "guest")),
                Some(json!({
                    "host_id": host_id.to_string(),
                    "check_in": check_in,
                    "check_out": check_out,
                    "guest_count": 2,
                })),
            )
            .await;
        (status, body)
    }
}

fn id_of(v: &Value) -> String {
    v["id"].as_str().unwrap().to_string()
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_open() {
    let app = start_test_app();
    let (status, body, _) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}

#[tokio::test]
async fn request_then_approve_round_trip() {
    let app = start_test_app();
    let owner = Ulid::new();
    let guest = Ulid::new();
    let host_id = app.host(owner).await;

    let (status, booking) = app.book(guest, host_id, "2024-03-15", "2024-03-17").await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(booking["status"], "pending");
    assert_eq!(booking["total_price"], 20_000);
    assert_eq!(booking["nights"], 2);
    assert_eq!(booking["check_in"], "2024-03-15");
    let id = id_of(&booking);

    let (status, approved, _) = app
        .call(Method::POST, &format!("/bookings/{id}/approve"), Some(As(owner, "host")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "confirmed");

    let (_, fetched, _) = app
        .call(Method::GET, &format!("/bookings/{id}"), Some(As(guest, "guest")), None)
        .await;
    assert_eq!(fetched["status"], "confirmed");

    let (_, avail, _) = app
        .call(
            Method::GET,
            &format!("/hosts/{host_id}/availability?check_in=2024-03-16&check_out=2024-03-18"),
            None,
            None,
        )
        .await;
    assert_eq!(avail["available"], false);
}

#[tokio::test]
async fn error_bodies_carry_codes() {
    let app = start_test_app();
    let owner = Ulid::new();
    let host_id = app.host(owner).await;

    let (status, body) = app.book(Ulid::new(), host_id, "2023-01-01", "2023-01-03").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "validation_error");
    assert_eq!(body["rule"], "past_date");

    let (_, first) = app.book(Ulid::new(), host_id, "2024-03-15", "2024-03-17").await;
    let id = id_of(&first);
    app.call(Method::POST, &format!("/bookings/{id}/approve"), Some(As(owner, "host")), None)
        .await;
    let (status, body) = app.book(Ulid::new(), host_id, "2024-03-16", "2024-03-18").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "availability_conflict");
    assert!(body.get("rule").is_none());

    let (status, body, _) = app
        .call(Method::POST, &format!("/bookings/{id}/approve"), Some(As(owner, "host")), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state_transition");

    let (status, body, _) = app
        .call(Method::GET, &format!("/bookings/{}", Ulid::new()), Some(As(owner, "host")), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body, _) = app
        .call(Method::POST, &format!("/bookings/{id}/approve"), Some(As(Ulid::new(), "guest")), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}

#[tokio::test]
async fn identity_headers_are_required() {
    let app = start_test_app();
    let (status, body, _) = app
        .call(Method::GET, &format!("/bookings/{}", Ulid::new()), None, None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthenticated");
}

#[tokio::test]
async fn malformed_input_is_bad_request() {
    let app = start_test_app();
    let guest = Ulid::new();

    let (status, body, _) = app
        .call(Method::GET, "/bookings/not-a-ulid", Some(As(guest, "guest")), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_request");

    let (status, _, _) = app
        .call(
            Method::POST,
            "/bookings",
            Some(As(guest, "guest")),
            Some(json!({"host_id": Ulid::new().to_string(), "check_in": "15/03/2024"})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = app
        .call(
            Method::GET,
            &format!("/guests/{guest}/bookings?status=archived"),
            Some(As(guest, "guest")),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cascade_and_cancel_through_routes() {
    let app = start_test_app();
    let owner = Ulid::new();
    let host_id = app.host(owner).await;
    let g1 = Ulid::new();
    let g2 = Ulid::new();

    let (_, b1) = app.book(g1, host_id, "2024-03-15", "2024-03-17").await;
    let (_, b2) = app.book(g2, host_id, "2024-03-16", "2024-03-18").await;
    let (id1, id2) = (id_of(&b1), id_of(&b2));

    app.call(Method::POST, &format!("/bookings/{id1}/approve"), Some(As(owner, "host")), None)
        .await;

    let (_, mine, _) = app
        .call(
            Method::GET,
            &format!("/guests/{g2}/bookings?status=cancelled"),
            Some(As(g2, "guest")),
            None,
        )
        .await;
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"], id2.as_str());
    assert_eq!(mine[0]["cancellation_reason"], "dates no longer available");

    let (status, cancelled, _) = app
        .call(
            Method::POST,
            &format!("/bookings/{id1}/cancel"),
            Some(As(g1, "guest")),
            Some(json!({"reason": "flight cancelled"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["cancellation_reason"], "flight cancelled");

    // DELETE is a reasonless cancel and repeats harmlessly.
    let (status, again, _) = app
        .call(Method::DELETE, &format!("/bookings/{id1}"), Some(As(g1, "guest")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["status"], "cancelled");

    let (_, listed, _) = app
        .call(
            Method::GET,
            &format!("/hosts/{host_id}/bookings"),
            Some(As(owner, "host")),
            None,
        )
        .await;
    assert_eq!(listed.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn reason_body_must_parse_when_present() {
    let app = start_test_app();
    let owner = Ulid::new();
    let guest = Ulid::new();
    let host_id = app.host(owner).await;
    let (_, booking) = app.book(guest, host_id, "2024-03-15", "2024-03-17").await;
    let id = id_of(&booking);

    let (status, body, _) = app
        .call(
            Method::POST,
            &format!("/bookings/{id}/cancel"),
            Some(As(guest, "guest")),
            Some(json!({"reason": 5})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "malformed_request");
    let (_, fetched, _) = app
        .call(Method::GET, &format!("/bookings/{id}"), Some(As(guest, "guest")), None)
        .await;
    assert_eq!(fetched["status"], "pending");

    let (status, _, _) = app
        .call(
            Method::POST,
            &format!("/bookings/{id}/reject"),
            Some(As(owner, "host")),
            Some(json!({"reason": {"text": "dates moved"}})),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // No body at all is a reasonless cancel.
    let (status, cancelled, _) = app
        .call(Method::POST, &format!("/bookings/{id}/cancel"), Some(As(guest, "guest")), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], Value::Null);
}

#[tokio::test]
async fn busy_host_returns_retry_after() {
    let dir = std::env::temp_dir().join(format!("hostbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let options = EngineOptions {
        lock_timeout: std::time::Duration::from_millis(30),
        clock: Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())),
    };
    let engine =
        Arc::new(Engine::new(dir.join("hostbook.wal"), Arc::new(NotifyHub::new()), options).unwrap());
    let app = TestApp {
        router: hostbook::http::router(engine.clone()),
        engine,
    };
    let host_id = app.host(Ulid::new()).await;

    let state = app.engine.get_host_state(&host_id).unwrap();
    let held = state.write().await;
    let (status, body, retry_after) = app
        .call(
            Method::POST,
            "/bookings",
            Some(As(Ulid::new(), "guest")),
            Some(json!({
                "host_id": host_id.to_string(),
                "check_in": "2024-03-15",
                "check_out": "2024-03-17",
                "guest_count": 1,
            })),
        )
        .await;
    drop(held);

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "busy");
    assert_eq!(retry_after.as_deref(), Some("1"));
}

#[tokio::test]
async fn host_edits_are_owner_only() {
    let app = start_test_app();
    let owner = Ulid::new();
    let host_id = app.host(owner).await;

    let (status, _, _) = app
        .call(
            Method::PUT,
            &format!("/hosts/{host_id}"),
            Some(As(Ulid::new(), "host")),
            Some(json!({"owner_id": owner.to_string(), "nightly_rate": 1, "max_guests": 1})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, profile, _) = app
        .call(Method::GET, &format!("/hosts/{host_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["nightly_rate"], 10_000);
    assert_eq!(profile["active"], true);

    assert_ok!(app.engine.get_host(host_id).await);
    assert_err!(app.engine.get_host(Ulid::new()).await);
}
