//! API Integration Tests (in-memory store)

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use transaction_processor::api::{
    self, middleware::REQUEST_ID_HEADER, routes::SOURCE_TYPE_HEADER,
};

mod common;

fn app(accounts: &[(i64, rust_decimal::Decimal)]) -> Router {
    let (_store, processor) = common::memory_processor(accounts);
    api::build_router(processor)
}

fn apply_request(user_id: &str, source: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/v1/transactions?user_id={}", user_id))
        .header("content-type", "application/json")
        .header(SOURCE_TYPE_HEADER, source)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn event(state: &str, amount: &str, transaction_id: Uuid) -> Value {
    json!({ "state": state, "amount": amount, "transaction_id": transaction_id })
}

#[tokio::test]
async fn test_health() {
    let app = app(&[]);
    let (status, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_apply_then_replay() {
    let app = app(&[(1, dec!(100.00))]);
    let id = Uuid::new_v4();

    let (status, body) = send(&app, apply_request("1", "game", event("win", "10.15", id))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "success");
    assert_eq!(body["balance"], "110.15");

    // same id again, even with a different amount, is a replay
    let (status, body) = send(&app, apply_request("1", "game", event("win", "99.00", id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "already_applied");
    assert_eq!(body["balance"], "110.15");

    let (_, body) = send(&app, get("/api/v1/users/1/balance")).await;
    assert_eq!(body["balance"], "110.15");
}

#[tokio::test]
async fn test_lost_below_zero_rejected() {
    let app = app(&[(1, dec!(5.00))]);

    let (status, body) = send(
        &app,
        apply_request("1", "payment", event("lost", "10.00", Uuid::new_v4())),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    let (_, body) = send(&app, get("/api/v1/users/1/balance")).await;
    assert_eq!(body["balance"], "5.00");
}

#[tokio::test]
async fn test_validation_errors() {
    let app = app(&[(1, dec!(100.00))]);
    let valid = || event("win", "1.00", Uuid::new_v4());

    let (status, body) = send(&app, apply_request("1", "casino", valid())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SOURCE_TYPE");

    let missing_user = Request::builder()
        .method("POST")
        .uri("/api/v1/transactions")
        .header("content-type", "application/json")
        .header(SOURCE_TYPE_HEADER, "game")
        .body(Body::from(valid().to_string()))
        .unwrap();
    let (status, body) = send(&app, missing_user).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(&app, apply_request("-3", "game", valid())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let (status, body) = send(&app, apply_request("1", "game", json!({ "state": "win" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_REQUEST");

    let draw = event("draw", "1.00", Uuid::new_v4());
    let (status, body) = send(&app, apply_request("1", "game", draw)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_STATE");

    for amount in ["0", "-5.00", "abc", "1.005"] {
        let request = apply_request("1", "game", event("win", amount, Uuid::new_v4()));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "amount {amount}");
        assert_eq!(body["code"], "INVALID_AMOUNT", "amount {amount}");
    }

    let (_, body) = send(&app, get("/api/v1/users/1/balance")).await;
    assert_eq!(body["balance"], "100.00");
}

#[tokio::test]
async fn test_unknown_user_rejected() {
    let app = app(&[(1, dec!(100.00))]);
    let request = apply_request("42", "game", event("win", "1.00", Uuid::new_v4()));
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_duplicate_id_for_other_user_conflicts() {
    let app = app(&[(1, dec!(100.00)), (2, dec!(100.00))]);
    let id = Uuid::new_v4();

    let (status, _) = send(&app, apply_request("1", "server", event("win", "5.00", id))).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, apply_request("2", "server", event("win", "5.00", id))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_TRANSACTION");

    let (_, body) = send(&app, get("/api/v1/users/2/balance")).await;
    assert_eq!(body["balance"], "100.00");
}

#[tokio::test]
async fn test_balance_lookup() {
    let app = app(&[(2, dec!(200))]);

    let (status, body) = send(&app, get("/api/v1/users/2/balance")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user_id"], 2);
    assert_eq!(body["balance"], "200.00");

    let (status, body) = send(&app, get("/api/v1/users/999/balance")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");

    let (status, body) = send(&app, get("/api/v1/users/abc/balance")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "USER_NOT_FOUND");
}

#[tokio::test]
async fn test_list_transactions_paginates_newest_first() {
    let app = app(&[(1, dec!(100.00))]);
    let mut ids = Vec::new();
    for amount in ["1.00", "2.00", "3.00", "4.00"] {
        let id = Uuid::new_v4();
        let (status, _) = send(&app, apply_request("1", "game", event("win", amount, id))).await;
        assert_eq!(status, StatusCode::CREATED);
        ids.push(id);
    }

    let (status, body) = send(&app, get("/api/v1/transactions/user/1?limit=2&offset=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 1);
    assert_eq!(body["total"], 2);

    let listed: Vec<String> = body["transactions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["transaction_id"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(listed, vec![ids[2].to_string(), ids[1].to_string()]);

    let first = &body["transactions"][0];
    assert_eq!(first["user_id"], 1);
    assert_eq!(first["state"], "win");
    assert_eq!(first["source_type"], "game");
    assert_eq!(first["status"], "applied");

    let (status, body) = send(&app, get("/api/v1/transactions/user/7")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(body["limit"], 10);
}

#[tokio::test]
async fn test_request_id_echoed() {
    let app = app(&[(1, dec!(100.00))]);

    let req = Request::builder()
        .uri("/api/v1/users/1/balance")
        .header(REQUEST_ID_HEADER, "trace-me-123")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(
        response.headers().get(REQUEST_ID_HEADER).unwrap(),
        "trace-me-123"
    );

    let response = app.clone().oneshot(get("/api/v1/users/1/balance")).await.unwrap();
    assert!(response.headers().get(REQUEST_ID_HEADER).is_some());
}
