use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use research_api::config::AppConfig;
use research_api::routes::build_router;
use research_api::state::AppState;
use research_core::{
    EngineOutcome, EngineSignal, InMemoryReportStore, ScriptStep, ScriptedEngine, SecretValue,
};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

fn config() -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".into(),
        max_concurrent_executions: 2,
        auth_token: Some(SecretValue::new("secret")),
        ..AppConfig::default()
    }
}

async fn serve(config: &AppConfig, engine: Arc<ScriptedEngine>) -> (SocketAddr, AppState) {
    let state = AppState::with_engine(config, engine, Arc::new(InMemoryReportStore::new()))
        .expect("state initialization failed");
    let shared = state.clone();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, build_router(state)).await.unwrap();
    });
    (addr, shared)
}

async fn spawn_server(steps: Vec<ScriptStep>) -> SocketAddr {
    let (addr, _) = serve(&config(), Arc::new(ScriptedEngine::new(steps))).await;
    addr
}

async fn connect(addr: SocketAddr) -> Result<Client, WsError> {
    let mut request = format!("ws://{addr}/research/ws")
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert("authorization", HeaderValue::from_static("Bearer secret"));
    let (client, _) = connect_async(request).await?;
    Ok(client)
}

/// Read until the server closes; returns the event payloads and the close frame.
async fn collect(client: &mut Client) -> (Vec<Value>, Option<CloseFrame<'static>>) {
    let mut events = Vec::new();
    let result = timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Text(text)) => events.push(serde_json::from_str(&text).unwrap()),
                Ok(Message::Close(frame)) => return frame,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    })
    .await
    .expect("server did not close the socket in time");
    (events, result)
}

fn event_types(events: &[Value]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| event["event_type"].as_str())
        .collect()
}

#[tokio::test]
async fn websocket_streams_events_and_closes_normally() {
    let addr = spawn_server(vec![
        ScriptStep::Emit(EngineSignal::Progress {
            message: "planning".into(),
        }),
        ScriptStep::Succeed(EngineOutcome::Message("all done".into())),
    ])
    .await;

    let mut client = connect(addr).await.unwrap();
    client
        .send(Message::Text(json!({ "query": "q" }).to_string()))
        .await
        .unwrap();

    let (events, frame) = collect(&mut client).await;
    assert_eq!(
        event_types(&events),
        vec!["research_started", "progress", "research_completed"]
    );
    assert_eq!(events[2]["data"]["final_message"], "all done");
    let frame = frame.expect("close frame missing");
    assert_eq!(u16::from(frame.code), 1000);
}

#[tokio::test]
async fn websocket_failure_closes_with_description() {
    let addr = spawn_server(vec![ScriptStep::Fail("search backend unavailable".into())]).await;

    let mut client = connect(addr).await.unwrap();
    client
        .send(Message::Text(json!({ "query": "q" }).to_string()))
        .await
        .unwrap();

    let (events, frame) = collect(&mut client).await;
    assert_eq!(event_types(&events), vec!["research_started", "error"]);
    let frame = frame.expect("close frame missing");
    assert_eq!(u16::from(frame.code), 1011);
    assert_eq!(frame.reason, "search backend unavailable");
}

#[tokio::test]
async fn websocket_rejects_invalid_request_with_policy_close() {
    let addr = spawn_server(Vec::new()).await;

    let mut client = connect(addr).await.unwrap();
    client
        .send(Message::Text(
            json!({ "query": "q", "max_iterations": 0 }).to_string(),
        ))
        .await
        .unwrap();

    let (events, frame) = collect(&mut client).await;
    assert!(events.is_empty());
    let frame = frame.expect("close frame missing");
    assert_eq!(u16::from(frame.code), 1008);
    assert!(frame.reason.contains("max_iterations"), "{}", frame.reason);
}

#[tokio::test]
async fn websocket_upgrade_requires_credentials() {
    let addr = spawn_server(Vec::new()).await;

    let request = format!("ws://{addr}/research/ws")
        .into_client_request()
        .unwrap();
    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade should have been refused"),
    }
}

#[tokio::test]
async fn silent_socket_is_closed_and_releases_its_slot() {
    let config = AppConfig {
        max_concurrent_executions: 1,
        ws_request_timeout: Duration::from_millis(200),
        ..config()
    };
    let (addr, state) = serve(&config, Arc::new(ScriptedEngine::new(Vec::new()))).await;

    let mut client = connect(addr).await.unwrap();
    assert_eq!(state.capacity().active_executions, 1);

    let (events, frame) = collect(&mut client).await;
    assert!(events.is_empty());
    let frame = frame.expect("close frame missing");
    assert_eq!(u16::from(frame.code), 1008);
    assert_eq!(frame.reason, "request not received");

    timeout(Duration::from_secs(2), async {
        while state.capacity().active_executions != 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("execution slot was not released");
}

#[tokio::test]
async fn closing_the_socket_cancels_the_engine() {
    let engine = Arc::new(ScriptedEngine::new(vec![
        ScriptStep::Emit(EngineSignal::Progress {
            message: "planning".into(),
        }),
        ScriptStep::Hang,
    ]));
    let (addr, state) = serve(&config(), engine.clone()).await;

    let mut client = connect(addr).await.unwrap();
    client
        .send(Message::Text(json!({ "query": "q" }).to_string()))
        .await
        .unwrap();

    let first = timeout(Duration::from_secs(5), client.next())
        .await
        .expect("no event received")
        .expect("socket closed early")
        .unwrap();
    let Message::Text(text) = first else {
        panic!("expected a text message, got {first:?}");
    };
    let event: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(event["event_type"], "research_started");

    client.close(None).await.unwrap();

    timeout(Duration::from_secs(5), async {
        while !engine.cancel_observed() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("engine never saw the cancellation");

    timeout(Duration::from_secs(2), async {
        while state.capacity().active_executions != 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("execution slot was not released");
}
