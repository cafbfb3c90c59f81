mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use common::{harness, Harness};
use patternbot::analysis::TechnicalAnalyzer;
use patternbot::api::router::create_router;
use patternbot::models::{MarketEvent, Portfolio, PricePoint};
use patternbot::services::SignalIntake;
use patternbot::AppState;

/// Router over a fresh harness. The intake receiver is handed back so the
/// queue stays open for the duration of the test.
fn build_test_app(h: &Harness, queue_capacity: usize) -> (axum::Router, mpsc::Receiver<MarketEvent>) {
    let (intake, rx) = SignalIntake::channel(queue_capacity);
    let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

    let state = AppState {
        engine: h.engine.clone(),
        analyzer: TechnicalAnalyzer::default(),
        store: Arc::new(h.store.clone()),
        intake,
        events: h.events.clone(),
        metrics_handle,
    };
    (create_router(state), rx)
}

async fn body_json(resp: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn pattern_event(token_id: Uuid) -> Value {
    json!({
        "type": "pattern_detected",
        "data": {
            "id": Uuid::new_v4(),
            "token_id": token_id,
            "pattern_type": "double_bottom",
            "confidence": "75",
            "timeframe": "1h",
        }
    })
}

#[tokio::test]
async fn test_health_check() {
    let h = harness();
    h.portfolio("2000").await;
    let (app, _rx) = build_test_app(&h, 16);

    let resp = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["enabled_portfolios"], 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let h = harness();
    let (app, _rx) = build_test_app(&h, 16);

    let resp = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_publish_event_accepted() {
    let h = harness();
    let token = h.token("ABC", "1.00");
    let (app, mut rx) = build_test_app(&h, 16);

    let resp = app
        .oneshot(post_json("/api/events", pattern_event(token.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let queued = rx.try_recv().expect("event queued");
    assert_eq!(queued.token_id(), token.id);
}

#[tokio::test]
async fn test_publish_event_full_queue_unavailable() {
    let h = harness();
    let token = h.token("ABC", "1.00");
    let (app, _rx) = build_test_app(&h, 1);

    let first = app
        .clone()
        .oneshot(post_json("/api/events", pattern_event(token.id)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::ACCEPTED);

    let second = app
        .oneshot(post_json("/api/events", pattern_event(token.id)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_toggle_unknown_portfolio_not_found() {
    let h = harness();
    let (app, _rx) = build_test_app(&h, 16);

    let uri = format!("/api/portfolios/{}/auto-trading", Uuid::new_v4());
    let resp = app
        .oneshot(post_json(&uri, json!({ "enabled": true })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let json = body_json(resp).await;
    assert_eq!(json["success"], false);
}

#[tokio::test]
async fn test_toggle_auto_trading() {
    let h = harness();
    let portfolio = h.store.insert_portfolio(Portfolio::new("api", Decimal::from(2_000)));
    let (app, _rx) = build_test_app(&h, 16);
    let uri = format!("/api/portfolios/{}/auto-trading", portfolio.id);

    let resp = app
        .clone()
        .oneshot(post_json(&uri, json!({ "enabled": true })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["auto_trading_enabled"], true);
    assert!(h.engine.state(portfolio.id).is_some());

    let resp = app
        .oneshot(post_json(&uri, json!({ "enabled": false })))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(h.engine.state(portfolio.id).is_none());
}

#[tokio::test]
async fn test_place_order_and_read_stats() {
    let h = harness();
    let portfolio = h.portfolio("10000").await;
    let token = h.token("ABC", "1.00");
    let (app, _rx) = build_test_app(&h, 16);

    let order = json!({
        "token_id": token.id,
        "trade_type": "buy",
        "amount": "1000",
    });
    let resp = app
        .clone()
        .oneshot(post_json(&format!("/api/portfolios/{}/orders", portfolio.id), order))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["trade_type"], "buy");

    let resp = app
        .oneshot(get(&format!("/api/portfolios/{}/stats", portfolio.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = body_json(resp).await;
    assert_eq!(json["data"]["total_trades"], 1);
    assert_eq!(json["data"]["active_positions"], 1);
}

#[tokio::test]
async fn test_rejected_order_is_bad_request() {
    let h = harness();
    let portfolio = h.portfolio("10000").await;
    let token = h.token("ABC", "1.00");
    let (app, _rx) = build_test_app(&h, 16);

    let order = json!({ "token_id": token.id, "trade_type": "sell" });
    let resp = app
        .oneshot(post_json(&format!("/api/portfolios/{}/orders", portfolio.id), order))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_analysis_unknown_token_not_found() {
    let h = harness();
    let (app, _rx) = build_test_app(&h, 16);

    let resp = app
        .oneshot(get(&format!("/api/tokens/{}/analysis", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analysis_report() {
    let h = harness();
    let token = h.token("ABC", "100");
    let start = Utc::now() - Duration::hours(40);
    let points: Vec<PricePoint> = (0..40)
        .map(|i| {
            let price = Decimal::from(100 + (i % 8) * 2);
            PricePoint::new(price, Decimal::from(1_000), start + Duration::hours(i))
        })
        .collect();
    h.store.push_price_points(token.id, &points);
    let (app, _rx) = build_test_app(&h, 16);

    let resp = app
        .oneshot(get(&format!("/api/tokens/{}/analysis?limit=30", token.id)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = body_json(resp).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["sample_count"], 30);
    assert!(json["data"]["support_resistance"].is_array());
    assert!(json["data"]["signal"]["action"].is_string());
}
