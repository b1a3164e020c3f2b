//! Test helpers for integration tests
//!
//! [`FakeGateway`] plays both the REST endpoint and the duplex connection. Every
//! `connect` from the client opens a fresh scripted link, handed to the test as a
//! [`ServerHandle`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gateway_client::connection::{ConnectionState, GatewayClientBuilder};
use gateway_client::rest::{GatewayEndpoint, GatewayEndpointProvider};
use gateway_client::transport::{Frame, GatewayConnection, Incoming};
use gateway_client::{
    CloseStatus, DispatchEvent, GatewayClient, GatewayError, GatewayMessage, GatewayResult,
    OpCode, Subscription,
};
use gateway_common::GatewayConfig;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

/// How long any single expectation may wait
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// URL returned by the fake REST endpoint
pub const FAKE_GATEWAY_URL: &str = "wss://gateway.test";

struct Link {
    inbound: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<GatewayResult<Incoming>>>>,
    outbound: mpsc::UnboundedSender<GatewayMessage>,
}

#[derive(Default)]
struct LinkState {
    current: Option<Link>,
    open: usize,
    max_open: usize,
    connects: usize,
}

/// In-memory gateway: endpoint provider and connection in one
pub struct FakeGateway {
    links: Mutex<LinkState>,
    rest_calls: AtomicUsize,
    handles_tx: mpsc::UnboundedSender<ServerHandle>,
    handles_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServerHandle>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        let (handles_tx, handles_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            links: Mutex::new(LinkState::default()),
            rest_calls: AtomicUsize::new(0),
            handles_tx,
            handles_rx: tokio::sync::Mutex::new(handles_rx),
        })
    }

    /// Build a client wired to this gateway
    pub fn client(self: &Arc<Self>, config: GatewayConfig) -> (GatewayClient, FailureLog) {
        self.client_with(config, |builder| builder)
    }

    /// Build a client wired to this gateway, with extra builder settings
    pub fn client_with(
        self: &Arc<Self>,
        config: GatewayConfig,
        customize: impl FnOnce(GatewayClientBuilder) -> GatewayClientBuilder,
    ) -> (GatewayClient, FailureLog) {
        let failures = FailureLog::default();
        let recorder = failures.clone();
        let builder = GatewayClient::builder(config)
            .endpoint_provider(Arc::clone(self) as Arc<dyn GatewayEndpointProvider>)
            .connection(Arc::clone(self) as Arc<dyn GatewayConnection>)
            .on_failure(move |e| recorder.record(e));
        let client = customize(builder).build().expect("client builds");
        (client, failures)
    }

    /// Wait for the client to open its next connection
    pub async fn next_connection(&self) -> ServerHandle {
        tokio::time::timeout(STEP_TIMEOUT, self.handles_rx.lock().await.recv())
            .await
            .expect("client did not connect in time")
            .expect("gateway dropped")
    }

    /// The next connection, if one opens within `wait`
    pub async fn connection_within(&self, wait: Duration) -> Option<ServerHandle> {
        tokio::time::timeout(wait, self.handles_rx.lock().await.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn rest_calls(&self) -> usize {
        self.rest_calls.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.links.lock().connects
    }

    /// Highest number of simultaneously open connections seen
    pub fn max_open(&self) -> usize {
        self.links.lock().max_open
    }
}

#[async_trait]
impl GatewayEndpointProvider for FakeGateway {
    async fn get_gateway(&self) -> GatewayResult<GatewayEndpoint> {
        self.rest_calls.fetch_add(1, Ordering::SeqCst);
        Ok(GatewayEndpoint::new(FAKE_GATEWAY_URL))
    }
}

#[async_trait]
impl GatewayConnection for FakeGateway {
    async fn connect(&self, url: &Url) -> GatewayResult<()> {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();

        {
            let mut links = self.links.lock();
            if links.current.is_none() {
                links.open += 1;
            }
            links.connects += 1;
            links.max_open = links.max_open.max(links.open);
            links.current = Some(Link {
                inbound: Arc::new(tokio::sync::Mutex::new(inbound)),
                outbound,
            });
        }

        let handle = ServerHandle {
            url: url.clone(),
            to_client,
            from_client,
        };
        self.handles_tx
            .send(handle)
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn read(&self) -> GatewayResult<Incoming> {
        let inbound = self
            .links
            .lock()
            .current
            .as_ref()
            .map(|link| Arc::clone(&link.inbound))
            .ok_or(GatewayError::NotConnected)?;

        let next = inbound.lock().await.recv().await;
        next.unwrap_or_else(|| Ok(Incoming::Closed(CloseStatus::abnormal("server handle dropped"))))
    }

    async fn send(&self, frame: Frame) -> GatewayResult<()> {
        let message = GatewayMessage::from_json(frame.as_bytes())?;
        let links = self.links.lock();
        let link = links.current.as_ref().ok_or(GatewayError::NotConnected)?;
        link.outbound
            .send(message)
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn disconnect(&self) -> GatewayResult<()> {
        let mut links = self.links.lock();
        if links.current.take().is_some() {
            links.open -= 1;
        }
        Ok(())
    }
}

/// Server side of one client connection
pub struct ServerHandle {
    pub url: Url,
    to_client: mpsc::UnboundedSender<GatewayResult<Incoming>>,
    from_client: mpsc::UnboundedReceiver<GatewayMessage>,
}

impl ServerHandle {
    /// Send a message to the client
    pub fn send(&self, message: &GatewayMessage) {
        let json = message.to_json().expect("message encodes");
        self.send_raw(json);
    }

    /// Send a raw text frame to the client
    pub fn send_raw(&self, text: impl Into<String>) {
        self.send_frame(Frame::Text(text.into()));
    }

    /// Send a frame exactly as given, e.g. already compressed
    pub fn send_frame(&self, frame: Frame) {
        // The client may already have moved on to a newer connection
        let _ = self.to_client.send(Ok(Incoming::Frame(frame)));
    }

    /// Close the connection with a close code
    pub fn close(&self, code: u16) {
        let _ = self
            .to_client
            .send(Ok(Incoming::Closed(CloseStatus::new(code, "closed by test"))));
    }

    /// Make the client's next read fail as if the socket broke
    pub fn fail(&self, reason: &str) {
        let _ = self
            .to_client
            .send(Err(GatewayError::Transport(reason.to_string())));
    }

    /// Value of a query parameter on the URL the client connected to
    pub fn query(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Next message from the client, heartbeats included
    pub async fn recv(&mut self) -> GatewayMessage {
        tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("client sent nothing in time")
            .expect("client connection closed")
    }

    /// Next message with `op`; heartbeats are skipped unless asked for
    pub async fn expect_op(&mut self, op: OpCode) -> GatewayMessage {
        loop {
            let message = self.recv().await;
            if message.op == op {
                return message;
            }
            assert_eq!(
                message.op,
                OpCode::Heartbeat,
                "expected {op}, client sent {message}"
            );
        }
    }

    /// Acknowledge every heartbeat for `wait`; returns how many were acknowledged
    pub async fn ack_heartbeats_for(&mut self, wait: Duration) -> usize {
        let deadline = tokio::time::Instant::now() + wait;
        let mut acked = 0;
        while let Ok(Some(message)) =
            tokio::time::timeout_at(deadline, self.from_client.recv()).await
        {
            if message.op == OpCode::Heartbeat {
                self.send(&GatewayMessage::heartbeat_ack());
                acked += 1;
            }
        }
        acked
    }

    /// Whether the client sent anything but heartbeats within `wait`
    pub async fn is_quiet_for(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.from_client.recv()).await {
                Err(_) | Ok(None) => return true,
                Ok(Some(message)) if message.op == OpCode::Heartbeat => {}
                Ok(Some(_)) => return false,
            }
        }
    }
}

/// Failures reported through the client's failure hook
#[derive(Clone, Default)]
pub struct FailureLog {
    errors: Arc<Mutex<Vec<String>>>,
}

impl FailureLog {
    fn record(&self, error: &GatewayError) {
        self.errors.lock().push(error.to_string());
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.lock().is_empty()
    }
}

/// Wait until the client reaches `state`
pub async fn wait_for_state(client: &GatewayClient, state: ConnectionState) {
    let mut watcher = client.watch_state();
    tokio::time::timeout(STEP_TIMEOUT, watcher.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {state}, still {}", client.state()))
        .expect("client dropped");
}

/// Poll `condition` until it holds
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(STEP_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

/// Next dispatch delivered to a subscription
pub async fn next_event(subscription: &mut Subscription) -> DispatchEvent {
    tokio::time::timeout(STEP_TIMEOUT, subscription.recv())
        .await
        .expect("no dispatch in time")
        .expect("subscription closed")
}

/// Subscribe to every dispatch the client receives
pub fn subscribe_all(client: &GatewayClient) -> Subscription {
    client
        .registry()
        .expect("client uses the internal registry")
        .subscribe(gateway_client::EventFilter::All)
}
