//! Stream Session Integration Tests
//!
//! Drives `StreamClient` against a local WebSocket server scripted as the
//! upstream, with the token endpoint served by a mock REST server.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::float_cmp)]

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use kiwoom_stream_gateway::infrastructure::config::RegistrationSettings;
use kiwoom_stream_gateway::infrastructure::kiwoom::auth::TOKEN_PATH;
use kiwoom_stream_gateway::{
    KiwoomCredentials, SessionManager, StreamClient, StreamClientConfig, StreamEvent,
    SubscriptionRegistry, Symbol,
};

const WAIT: Duration = Duration::from_secs(5);

type Upstream = WebSocketStream<TcpStream>;

struct Harness {
    events: mpsc::Receiver<StreamEvent>,
    registry: SubscriptionRegistry,
    session: Arc<SessionManager>,
    cancel: CancellationToken,
    client: tokio::task::JoinHandle<()>,
}

async fn bind_upstream() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

async fn accept(listener: &TcpListener) -> Upstream {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn next_text(ws: &mut Upstream) -> String {
    loop {
        let msg = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().to_string();
        }
    }
}

async fn send_json(ws: &mut Upstream, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn expect_event(
    events: &mut mpsc::Receiver<StreamEvent>,
    matches: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    loop {
        let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
        if matches(&event) {
            return event;
        }
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn start(url: String, auth: &MockServer, registry: SubscriptionRegistry) -> Harness {
    start_with(url, auth, registry, |_| {}).await
}

async fn start_with(
    url: String,
    auth: &MockServer,
    registry: SubscriptionRegistry,
    tune: impl FnOnce(&mut StreamClientConfig),
) -> Harness {
    let session = Arc::new(SessionManager::new(
        reqwest::Client::new(),
        &auth.uri(),
        KiwoomCredentials::new("app".to_string(), "secret".to_string()),
    ));

    let mut config = StreamClientConfig::new(url);
    config.reconnect.base_delay = Duration::from_millis(50);
    config.reconnect.max_delay = Duration::from_millis(200);
    config.token_retry = Duration::from_millis(50);
    tune(&mut config);

    let (tx, events) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let client = Arc::new(StreamClient::new(
        config,
        Arc::clone(&session),
        registry.clone(),
        tx,
        cancel.clone(),
    ));
    let client = tokio::spawn(client.run());

    Harness {
        events,
        registry,
        session,
        cancel,
        client,
    }
}

async fn stop(harness: Harness) {
    harness.cancel.cancel();
    timeout(WAIT, harness.client).await.unwrap().unwrap();
}

async fn mount_token(auth: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": token})))
        .mount(auth)
        .await;
}

#[tokio::test]
async fn login_registers_pending_symbols_and_forwards_ticks() {
    let auth = MockServer::start().await;
    mount_token(&auth, "tok").await;
    let (listener, url) = bind_upstream().await;

    let registry = SubscriptionRegistry::new(RegistrationSettings::default());
    registry.request(&Symbol::new("005930"));
    let mut harness = start(url, &auth, registry).await;

    let mut upstream = accept(&listener).await;
    let login: Value = serde_json::from_str(&next_text(&mut upstream).await).unwrap();
    assert_eq!(login, json!({"trnm": "LOGIN", "token": "tok"}));

    send_json(&mut upstream, json!({"trnm": "LOGIN", "return_code": 0, "return_msg": "ok"})).await;
    expect_event(&mut harness.events, |e| *e == StreamEvent::Connected).await;

    let reg: Value = serde_json::from_str(&next_text(&mut upstream).await).unwrap();
    assert_eq!(reg["trnm"], "REG");
    assert_eq!(reg["refresh"], "1");
    assert_eq!(reg["data"][0]["item"], json!(["005930_AL"]));
    assert_eq!(reg["data"][0]["type"], json!(["00", "0B"]));
    assert!(harness.registry.pending().is_empty());
    wait_until(|| harness.registry.registered().contains("005930_AL")).await;

    let ping = r#"{"trnm":"PING","seq":7}"#;
    upstream.send(Message::Text(ping.into())).await.unwrap();
    assert_eq!(next_text(&mut upstream).await, ping);

    send_json(
        &mut upstream,
        json!({
            "trnm": "REAL",
            "data": [{
                "type": "0B",
                "item": "005930_AL",
                "values": {"10": "-71500", "12": "-0.42", "13": "1200", "20": "093015"},
            }],
        }),
    )
    .await;

    let StreamEvent::Tick(tick) =
        expect_event(&mut harness.events, |e| matches!(e, StreamEvent::Tick(_))).await
    else {
        unreachable!();
    };
    assert_eq!(tick.symbol, "005930");
    assert_eq!(tick.price, 71500);
    assert_eq!(tick.open, 71500);
    assert_eq!(tick.change_rate, -0.42);
    assert_eq!(tick.timestamp, "093015");

    stop(harness).await;
}

#[tokio::test]
async fn rejected_login_invalidates_token_and_reauthenticates() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "stale"})))
        .up_to_n_times(1)
        .mount(&auth)
        .await;
    mount_token(&auth, "fresh").await;
    let (listener, url) = bind_upstream().await;

    let mut harness = start(url, &auth, SubscriptionRegistry::new(RegistrationSettings::default())).await;

    let mut first = accept(&listener).await;
    let login: Value = serde_json::from_str(&next_text(&mut first).await).unwrap();
    assert_eq!(login["token"], "stale");
    send_json(
        &mut first,
        json!({"trnm": "LOGIN", "return_code": "8005", "return_msg": "token invalid"}),
    )
    .await;

    let rejected = expect_event(&mut harness.events, |e| {
        matches!(e, StreamEvent::LoginRejected { .. })
    })
    .await;
    assert_eq!(
        rejected,
        StreamEvent::LoginRejected {
            code: 8005,
            message: "token invalid".to_string(),
        }
    );
    expect_event(&mut harness.events, |e| {
        matches!(e, StreamEvent::Reconnecting { attempt: 1, .. })
    })
    .await;

    let mut second = accept(&listener).await;
    let login: Value = serde_json::from_str(&next_text(&mut second).await).unwrap();
    assert_eq!(login["token"], "fresh");
    send_json(&mut second, json!({"trnm": "LOGIN", "return_code": 0})).await;
    expect_event(&mut harness.events, |e| *e == StreamEvent::Connected).await;
    assert_eq!(harness.session.current().unwrap().as_str(), "fresh");

    stop(harness).await;
}

#[tokio::test]
async fn dropped_connection_reconnects_with_same_token() {
    let auth = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "tok"})))
        .expect(1)
        .mount(&auth)
        .await;
    let (listener, url) = bind_upstream().await;

    let registry = SubscriptionRegistry::new(RegistrationSettings::default());
    let mut harness = start(url, &auth, registry).await;

    let mut first = accept(&listener).await;
    next_text(&mut first).await;
    send_json(&mut first, json!({"trnm": "LOGIN", "return_code": 0})).await;
    expect_event(&mut harness.events, |e| *e == StreamEvent::Connected).await;

    harness.registry.request(&Symbol::new("000660"));
    let reg: Value = serde_json::from_str(&next_text(&mut first).await).unwrap();
    assert_eq!(reg["data"][0]["item"], json!(["000660_AL"]));

    first.close(None).await.unwrap();
    drop(first);
    expect_event(&mut harness.events, |e| *e == StreamEvent::Disconnected).await;
    assert!(!harness.registry.is_attached());

    let mut second = accept(&listener).await;
    let login: Value = serde_json::from_str(&next_text(&mut second).await).unwrap();
    assert_eq!(login["token"], "tok");
    send_json(&mut second, json!({"trnm": "LOGIN", "return_code": 0})).await;

    // Registered symbols are re-sent on the new session.
    let reg: Value = serde_json::from_str(&next_text(&mut second).await).unwrap();
    assert_eq!(reg["data"][0]["item"], json!(["000660_AL"]));

    stop(harness).await;
}

#[tokio::test]
async fn data_before_login_ack_is_ignored() {
    let auth = MockServer::start().await;
    mount_token(&auth, "tok").await;
    let (listener, url) = bind_upstream().await;

    let mut harness = start(url, &auth, SubscriptionRegistry::new(RegistrationSettings::default())).await;

    let mut upstream = accept(&listener).await;
    next_text(&mut upstream).await;
    send_json(
        &mut upstream,
        json!({"data": [{"item": "005930_AL", "values": {"10": "71500"}}]}),
    )
    .await;
    upstream.send(Message::Text("not json".into())).await.unwrap();
    send_json(&mut upstream, json!({"trnm": "LOGIN", "return_code": 0})).await;

    let first = timeout(WAIT, harness.events.recv()).await.unwrap().unwrap();
    assert_eq!(first, StreamEvent::Connected);

    stop(harness).await;
}

#[tokio::test]
async fn silent_upstream_is_dropped_after_ping_timeout() {
    let auth = MockServer::start().await;
    mount_token(&auth, "tok").await;
    let (listener, url) = bind_upstream().await;

    let mut harness = start_with(
        url,
        &auth,
        SubscriptionRegistry::new(RegistrationSettings::default()),
        |config| {
            config.heartbeat.ping_interval = Duration::from_millis(100);
            config.heartbeat.ping_timeout = Duration::from_millis(150);
        },
    )
    .await;

    let mut upstream = accept(&listener).await;
    next_text(&mut upstream).await;
    send_json(&mut upstream, json!({"trnm": "LOGIN", "return_code": 0})).await;
    expect_event(&mut harness.events, |e| *e == StreamEvent::Connected).await;

    // Stop reading: pings go unanswered.
    let connected = tokio::time::Instant::now();
    expect_event(&mut harness.events, |e| *e == StreamEvent::Disconnected).await;
    assert!(connected.elapsed() < Duration::from_secs(2));

    drop(upstream);
    stop(harness).await;
}
