use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use distribution_core::{
    config::TransportConfig,
    traits::{Credentials, DistributionTransport, EventStreamClient},
    DistributionActionType, DistributionError, DistributionPackage, DistributionRequest,
};
use distribution_infrastructure::{HttpEventStreamClient, HttpTransport};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

#[derive(Default)]
struct ServerState {
    received: Mutex<Vec<(DistributionPackage, Option<String>)>>,
    pending: Mutex<VecDeque<DistributionPackage>>,
    polled_queues: Mutex<Vec<String>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    fail_posts: Mutex<bool>,
}

async fn receive_package(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(package): Json<DistributionPackage>,
) -> StatusCode {
    if *state.fail_posts.lock().unwrap() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.received.lock().unwrap().push((package, auth));
    StatusCode::OK
}

async fn next_package(
    State(state): State<Arc<ServerState>>,
    Path(queue): Path<String>,
) -> Response {
    state.polled_queues.lock().unwrap().push(queue);
    match state.pending.lock().unwrap().pop_front() {
        Some(package) => Json(package).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

async fn events(State(state): State<Arc<ServerState>>) -> Response {
    match state.events.lock().unwrap().take() {
        Some(rx) => {
            let stream = UnboundedReceiverStream::new(rx).map(Ok::<_, Infallible>);
            Body::from_stream(stream).into_response()
        }
        None => StatusCode::GONE.into_response(),
    }
}

async fn start_server(state: Arc<ServerState>) -> SocketAddr {
    let app = Router::new()
        .route("/distribution/packages", post(receive_package))
        .route("/distribution/queues/{queue}/next", get(next_package))
        .route("/events", get(events))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport(addr: SocketAddr, credentials: Credentials) -> HttpTransport {
    let endpoint = Url::parse(&format!("http://{addr}/distribution")).unwrap();
    HttpTransport::new("http", endpoint, credentials, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_deliver_posts_package_with_credentials() {
    let state = Arc::new(ServerState::default());
    let addr = start_server(state.clone()).await;
    let transport = transport(addr, Credentials::Bearer("abc".to_string()));

    let request = DistributionRequest::new(DistributionActionType::Add, ["/content/a"]);
    transport.deliver(&request).await.unwrap();

    let received = state.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.action_type, DistributionActionType::Add);
    assert_eq!(received[0].0.paths, vec!["/content/a".to_string()]);
    assert_eq!(received[0].1.as_deref(), Some("Bearer abc"));
}

#[tokio::test]
async fn test_deliver_failure_status_is_retryable() {
    let state = Arc::new(ServerState::default());
    *state.fail_posts.lock().unwrap() = true;
    let addr = start_server(state.clone()).await;
    let transport = transport(addr, Credentials::Anonymous);

    let request = DistributionRequest::new(DistributionActionType::Delete, ["/content/a"]);
    let err = transport.deliver(&request).await.unwrap_err();
    assert!(matches!(err, DistributionError::Transport(_)));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_poll_fetches_until_empty() {
    let state = Arc::new(ServerState::default());
    for path in ["/content/a", "/content/b"] {
        let request = DistributionRequest::new(DistributionActionType::Add, [path]);
        state
            .pending
            .lock()
            .unwrap()
            .push_back(DistributionPackage::from_request(&request));
    }
    let addr = start_server(state.clone()).await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = transport(addr, Credentials::Anonymous).with_package_sink(tx);

    let poll = DistributionRequest::new(DistributionActionType::Poll, ["/"]);
    transport.deliver(&poll).await.unwrap();

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert_eq!(first.paths, vec!["/content/a".to_string()]);
    assert_eq!(second.paths, vec!["/content/b".to_string()]);
    assert!(transport.fetch("default").await.unwrap().is_none());
    assert!(state
        .polled_queues
        .lock()
        .unwrap()
        .iter()
        .all(|queue| queue == "default"));
}

#[tokio::test]
async fn test_poll_uses_configured_queue() {
    let state = Arc::new(ServerState::default());
    let request = DistributionRequest::new(DistributionActionType::Add, ["/content/a"]);
    state
        .pending
        .lock()
        .unwrap()
        .push_back(DistributionPackage::from_request(&request));
    let addr = start_server(state.clone()).await;

    let config = TransportConfig {
        endpoint: Some(format!("http://{addr}/distribution")),
        poll_queue: "reverse".to_string(),
        ..TransportConfig::default()
    };
    let (tx, mut rx) = mpsc::unbounded_channel();
    let transport = HttpTransport::from_config("http", &config)
        .unwrap()
        .with_package_sink(tx);

    let poll = DistributionRequest::new(DistributionActionType::Poll, ["/"]);
    transport.deliver(&poll).await.unwrap();

    assert_eq!(rx.recv().await.unwrap().paths, vec!["/content/a".to_string()]);
    assert_eq!(
        *state.polled_queues.lock().unwrap(),
        vec!["reverse".to_string(), "reverse".to_string()]
    );
}

#[tokio::test]
async fn test_poll_respects_package_limit() {
    let state = Arc::new(ServerState::default());
    for _ in 0..5 {
        let request = DistributionRequest::new(DistributionActionType::Add, ["/content"]);
        state
            .pending
            .lock()
            .unwrap()
            .push_back(DistributionPackage::from_request(&request));
    }
    let addr = start_server(state.clone()).await;
    let transport = transport(addr, Credentials::Anonymous).with_max_poll_packages(2);

    let poll = DistributionRequest::new(DistributionActionType::Poll, ["/"]);
    transport.deliver(&poll).await.unwrap();
    assert_eq!(state.pending.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_event_stream_yields_chunks() {
    let state = Arc::new(ServerState::default());
    let (tx, rx) = mpsc::unbounded_channel();
    *state.events.lock().unwrap() = Some(rx);
    let addr = start_server(state.clone()).await;

    let client = HttpEventStreamClient::new(Duration::from_secs(5)).unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/events")).unwrap();
    let mut stream = client
        .connect(&endpoint, &Credentials::Anonymous)
        .await
        .unwrap();

    tx.send("event-1".to_string()).unwrap();
    let chunk = stream.next().await.unwrap().unwrap();
    assert_eq!(chunk.as_ref(), b"event-1");

    drop(tx);
    assert!(stream.next().await.is_none());
}

#[tokio::test]
async fn test_event_stream_rejects_error_status() {
    let state = Arc::new(ServerState::default());
    let addr = start_server(state).await;

    let client = HttpEventStreamClient::new(Duration::from_secs(5)).unwrap();
    let endpoint = Url::parse(&format!("http://{addr}/events")).unwrap();
    let result = client.connect(&endpoint, &Credentials::Anonymous).await;
    assert!(matches!(result, Err(DistributionError::Network(_))));
}
