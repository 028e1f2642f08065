//! Chart Gateway Integration Tests
//!
//! Runs `ChartGateway` against a mock REST upstream: request shape, response
//! decoding, retry on 429 and on failures, and degradation to an empty list.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kiwoom_stream_gateway::infrastructure::config::ChartSettings;
use kiwoom_stream_gateway::infrastructure::kiwoom::auth::TOKEN_PATH;
use kiwoom_stream_gateway::infrastructure::kiwoom::chart::CHART_PATH;
use kiwoom_stream_gateway::{ChartGateway, KiwoomCredentials, SessionManager, Symbol, Timeframe};

fn settings() -> ChartSettings {
    ChartSettings {
        concurrency: 3,
        rate_per_sec: 1000.0,
        burst: 100,
        max_attempts: 3,
        backoff_base: Duration::from_millis(10),
        http_timeout: Duration::from_secs(5),
    }
}

async fn mount_token(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
        .mount(server)
        .await;
}

fn gateway(server: &MockServer) -> ChartGateway {
    gateway_with_session(server, &settings()).0
}

fn gateway_with_session(
    server: &MockServer,
    settings: &ChartSettings,
) -> (ChartGateway, Arc<SessionManager>) {
    let client = reqwest::Client::new();
    let session = Arc::new(SessionManager::new(
        client.clone(),
        &server.uri(),
        KiwoomCredentials::new("app".to_string(), "secret".to_string()),
    ));
    let gateway = ChartGateway::new(client, &server.uri(), Arc::clone(&session), settings);
    (gateway, session)
}

async fn chart_requests(server: &MockServer) -> Vec<wiremock::Request> {
    server
        .received_requests()
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.url.path() == CHART_PATH)
        .collect()
}

#[tokio::test]
async fn daily_chart_request_and_decode() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .and(header("api-id", "ka10081"))
        .and(header("authorization", "Bearer tok"))
        .and(body_json(json!({
            "stk_cd": "005930_AL",
            "upd_stkpc_tp": "1",
            "base_dt": "20250214",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stk_cd": "005930",
            "stk_dt_pole_chart_qry": [{
                "cntr_tm": "20250214",
                "open_pric": "+71000",
                "high_pric": "+72000",
                "low_pric": "-70500",
                "cur_prc": "+71500",
                "trde_qty": "1234567",
            }],
            "return_code": 0,
        })))
        .expect(1)
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Daily, "20250214")
        .await;

    assert_eq!(candles.len(), 1);
    let candle = &candles[0];
    assert_eq!(candle.time, "20250214");
    assert_eq!(candle.open, 71000.0);
    assert_eq!(candle.high, 72000.0);
    assert_eq!(candle.low, 70500.0);
    assert_eq!(candle.close, 71500.0);
    assert_eq!(candle.volume, 1_234_567.0);
}

#[tokio::test]
async fn minute_chart_prefixes_base_date() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .and(header("api-id", "ka10080"))
        .and(body_json(json!({
            "stk_cd": "005930_AL",
            "upd_stkpc_tp": "1",
            "base_dt": "20250214",
            "tic_scope": "5",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stk_min_pole_chart_qry": [
                {"cntr_tm": "090500", "cur_prc": "-71200", "trde_qty": "300"},
                {"cntr_tm": "090000", "cur_prc": "+71000", "trde_qty": "500"},
            ],
        })))
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Minutes(5), "20250214")
        .await;

    let times: Vec<&str> = candles.iter().map(|c| c.time.as_str()).collect();
    assert_eq!(times, vec!["20250214090500", "20250214090000"]);
    assert_eq!(candles[0].close, 71200.0);
}

#[tokio::test]
async fn rate_limited_attempt_is_retried() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stk_dt_pole_chart_qry": [{"dt": "20250214", "cur_prc": "71500"}],
        })))
        .expect(1)
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Daily, "20250214")
        .await;
    assert_eq!(candles.len(), 1);
}

#[tokio::test]
async fn exhausted_retries_yield_empty_list() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Weekly, "20250214")
        .await;
    assert!(candles.is_empty());
}

#[tokio::test]
async fn missing_list_field_yields_empty_list() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"return_code": 0, "stk_dt_pole_chart_qry": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Daily, "20250214")
        .await;
    assert!(candles.is_empty());
}

#[tokio::test]
async fn unobtainable_token_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let candles = gateway(&server)
        .fetch_on(&Symbol::new("005930"), Timeframe::Daily, "20250214")
        .await;
    assert!(candles.is_empty());
}

#[tokio::test]
async fn concurrent_lookups_release_admission_slots() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stk_dt_pole_chart_qry": [{"dt": "20250214", "cur_prc": "1"}]}))
                .set_delay(Duration::from_millis(20)),
        )
        .expect(8)
        .mount(&server)
        .await;

    let gateway = Arc::new(gateway(&server));
    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .fetch_on(&Symbol::new(format!("00{i}")), Timeframe::Daily, "20250214")
                    .await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap().len(), 1);
    }
    assert_eq!(gateway.available_slots(), 3);
}

#[tokio::test]
async fn admission_gate_caps_requests_in_flight() {
    let server = MockServer::start().await;
    mount_token(&server).await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stk_dt_pole_chart_qry": [{"dt": "20250214", "cur_prc": "1"}]}))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(6)
        .mount(&server)
        .await;

    let gateway = Arc::new(gateway(&server));
    let tasks: Vec<_> = (0..6)
        .map(|i| {
            let gateway = Arc::clone(&gateway);
            tokio::spawn(async move {
                gateway
                    .fetch_on(&Symbol::new(format!("00{i}")), Timeframe::Daily, "20250214")
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(chart_requests(&server).await.len(), 3);
    assert_eq!(gateway.available_slots(), 0);

    for task in tasks {
        assert_eq!(task.await.unwrap().len(), 1);
    }
    assert_eq!(chart_requests(&server).await.len(), 6);
    assert_eq!(gateway.available_slots(), 3);
}

#[tokio::test]
async fn queued_lookup_uses_token_refreshed_after_invalidation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "old"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "new"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer old"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stk_dt_pole_chart_qry": [{"dt": "20250214", "cur_prc": "1"}]}))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHART_PATH))
        .and(header("authorization", "Bearer new"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"stk_dt_pole_chart_qry": [{"dt": "20250214", "cur_prc": "2"}]})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let single = ChartSettings {
        concurrency: 1,
        ..settings()
    };
    let (gateway, session) = gateway_with_session(&server, &single);
    let gateway = Arc::new(gateway);

    let first = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            gateway
                .fetch_on(&Symbol::new("005930"), Timeframe::Daily, "20250214")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    let queued = {
        let gateway = Arc::clone(&gateway);
        tokio::spawn(async move {
            gateway
                .fetch_on(&Symbol::new("000660"), Timeframe::Daily, "20250214")
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.invalidate();

    assert_eq!(first.await.unwrap()[0].close, 1.0);
    assert_eq!(queued.await.unwrap()[0].close, 2.0);
}
