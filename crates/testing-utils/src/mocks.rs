//! In-memory test doubles for the agent's collaborators
//!
//! All doubles are cheap to clone and share their recorded state between
//! clones, so a test can hand one clone to the agent and inspect another.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use distribution_core::{
    traits::{
        AuthenticationContext, AuthenticationProvider, AuthenticationTarget,
        AuthorizationContext, AuthorizationDecision, Credentials, DistributionRequestHandler,
        DistributionTransport, EventChunkStream, EventStreamClient, RequestAuthorizationStrategy,
    },
    DistributionError, DistributionPackage, DistributionRequest, DistributionResult,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use url::Url;

/// Mock implementation of DistributionTransport
///
/// Records every delivered request. Failures can be scripted for the next
/// N deliveries or for all of them, and each delivery can be slowed down.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    delivered: Arc<Mutex<Vec<DistributionRequest>>>,
    attempts: Arc<AtomicUsize>,
    failures_left: Arc<Mutex<usize>>,
    always_fail: Arc<Mutex<bool>>,
    delay: Arc<Mutex<Option<Duration>>>,
    packages: Arc<Mutex<HashMap<String, VecDeque<DistributionPackage>>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` deliveries
    pub fn fail_next(self, count: usize) -> Self {
        *self.failures_left.lock().unwrap() = count;
        self
    }

    pub fn always_failing(self) -> Self {
        *self.always_fail.lock().unwrap() = true;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn set_always_fail(&self, fail: bool) {
        *self.always_fail.lock().unwrap() = fail;
    }

    /// Queue a package to be returned by `fetch`
    pub fn push_package(&self, queue_name: &str, package: DistributionPackage) {
        self.packages
            .lock()
            .unwrap()
            .entry(queue_name.to_string())
            .or_default()
            .push_back(package);
    }

    pub fn delivered(&self) -> Vec<DistributionRequest> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.lock().unwrap().len()
    }

    /// Number of deliver calls, successful or not
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        if *self.always_fail.lock().unwrap() {
            return true;
        }
        let mut failures_left = self.failures_left.lock().unwrap();
        if *failures_left > 0 {
            *failures_left -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl DistributionTransport for MockTransport {
    async fn deliver(&self, request: &DistributionRequest) -> DistributionResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.should_fail() {
            return Err(DistributionError::Transport(
                "scripted delivery failure".to_string(),
            ));
        }

        self.delivered.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn fetch(&self, queue_name: &str) -> DistributionResult<Option<DistributionPackage>> {
        Ok(self
            .packages
            .lock()
            .unwrap()
            .get_mut(queue_name)
            .and_then(|queue| queue.pop_front()))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Mock implementation of DistributionRequestHandler that records requests
#[derive(Debug, Clone)]
pub struct MockRequestHandler {
    id: String,
    requests: Arc<Mutex<Vec<DistributionRequest>>>,
}

impl MockRequestHandler {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<DistributionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl DistributionRequestHandler for MockRequestHandler {
    fn handler_id(&self) -> String {
        self.id.clone()
    }

    async fn handle(&self, request: DistributionRequest) {
        self.requests.lock().unwrap().push(request);
    }
}

/// Sending half of a scripted event-stream connection
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<DistributionResult<Bytes>>,
}

impl EventSender {
    /// Push one content chunk; returns false once the client side is gone
    pub fn send(&self, chunk: &str) -> bool {
        self.tx.send(Ok(Bytes::from(chunk.to_string()))).is_ok()
    }

    pub fn fail(&self, message: &str) -> bool {
        self.tx
            .send(Err(DistributionError::Network(message.to_string())))
            .is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[derive(Debug)]
enum ScriptedConnection {
    Refuse(String),
    Open(mpsc::UnboundedReceiver<DistributionResult<Bytes>>),
}

struct OpenConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl Drop for OpenConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock implementation of EventStreamClient
///
/// Every `connect` consumes the next scripted connection. With no script
/// left the connection is refused. Open connections are counted until their
/// stream is dropped, which lets tests assert that nothing leaks.
#[derive(Debug, Clone, Default)]
pub struct MockEventStreamClient {
    script: Arc<Mutex<VecDeque<ScriptedConnection>>>,
    attempts: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
    credentials: Arc<Mutex<Vec<Credentials>>>,
    endpoints: Arc<Mutex<Vec<Url>>>,
}

impl MockEventStreamClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a successful connection and return the sender feeding it
    pub fn push_connection(&self) -> EventSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedConnection::Open(rx));
        EventSender { tx }
    }

    /// Script a refused connection
    pub fn push_refusal(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(ScriptedConnection::Refuse(message.to_string()));
    }

    pub fn connect_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    pub fn credentials_seen(&self) -> Vec<Credentials> {
        self.credentials.lock().unwrap().clone()
    }

    pub fn endpoints_seen(&self) -> Vec<Url> {
        self.endpoints.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventStreamClient for MockEventStreamClient {
    async fn connect(
        &self,
        endpoint: &Url,
        credentials: &Credentials,
    ) -> DistributionResult<EventChunkStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.endpoints.lock().unwrap().push(endpoint.clone());
        self.credentials.lock().unwrap().push(credentials.clone());

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(ScriptedConnection::Open(rx)) => {
                self.open.fetch_add(1, Ordering::SeqCst);
                let guard = OpenConnectionGuard {
                    open: Arc::clone(&self.open),
                };
                let stream = futures::stream::unfold((rx, guard), |(mut rx, guard)| async move {
                    rx.recv().await.map(|chunk| (chunk, (rx, guard)))
                });
                Ok(stream.boxed())
            }
            Some(ScriptedConnection::Refuse(message)) => Err(DistributionError::Network(message)),
            None => Err(DistributionError::Network(format!(
                "no scripted connection for {endpoint}"
            ))),
        }
    }
}

/// Mock implementation of AuthenticationProvider
#[derive(Debug, Clone)]
pub struct MockAuthenticationProvider {
    credentials: Credentials,
    supports_http_client: bool,
}

impl MockAuthenticationProvider {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            supports_http_client: true,
        }
    }

    /// A provider that cannot authenticate HTTP clients
    pub fn unsupported() -> Self {
        Self {
            credentials: Credentials::Anonymous,
            supports_http_client: false,
        }
    }
}

impl AuthenticationProvider for MockAuthenticationProvider {
    fn can_authenticate(&self, target: AuthenticationTarget) -> bool {
        self.supports_http_client && target == AuthenticationTarget::HttpClient
    }

    fn authenticate(&self, _context: &AuthenticationContext) -> DistributionResult<Credentials> {
        Ok(self.credentials.clone())
    }
}

/// Mock implementation of RequestAuthorizationStrategy with a fixed verdict
#[derive(Debug, Clone)]
pub struct MockAuthorizationStrategy {
    deny_reason: Option<String>,
    calls: Arc<AtomicUsize>,
}

impl MockAuthorizationStrategy {
    pub fn allow_all() -> Self {
        Self {
            deny_reason: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn deny_all(reason: &str) -> Self {
        Self {
            deny_reason: Some(reason.to_string()),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RequestAuthorizationStrategy for MockAuthorizationStrategy {
    fn authorize(
        &self,
        _request: &DistributionRequest,
        _context: &AuthorizationContext,
    ) -> AuthorizationDecision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.deny_reason {
            Some(reason) => AuthorizationDecision::Denied(reason.clone()),
            None => AuthorizationDecision::Allowed,
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
