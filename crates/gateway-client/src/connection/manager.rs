//! Gateway session manager
//!
//! Owns the connect/reconnect/disconnect lifecycle and the event loop of the current
//! connection. Every reconnect, whoever asks for it (a close code, the heartbeat monitor,
//! an opcode from the server), goes through the same lifecycle lock.

use super::heartbeat::{HeartbeatDriver, HeartbeatMonitor, HeartbeatOutcome, HeartbeatSignal};
use super::rate_limit::RateLimiter;
use super::session::{ResumeInfo, SessionState};
use super::state::ConnectionState;
use crate::dispatch::{DispatchRegistry, DispatchSink};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEventType;
use crate::protocol::{
    CloseStatus, GatewayMessage, IdentifyPayload, OpCode, PresenceUpdatePayload,
    RequestGuildMembersPayload, ResumePayload,
};
use crate::rest::GatewayEndpointProvider;
use crate::transport::{GatewayCompression, GatewayConnection, GatewayEncoding, Incoming};
use async_trait::async_trait;
use gateway_common::{GatewayConfig, ShardSpec};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use url::Url;

/// Callback for fatal gateway failures
pub type FailureHook = Arc<dyn Fn(&GatewayError) + Send + Sync>;

/// Interval used for a resume when no Hello was ever seen
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(41_250);

/// Pluggable parts of a client, assembled by the builder
pub(super) struct Collaborators {
    pub endpoint: Arc<dyn GatewayEndpointProvider>,
    pub connection: Arc<dyn GatewayConnection>,
    pub encoding: Arc<dyn GatewayEncoding>,
    pub compression: Option<Arc<dyn GatewayCompression>>,
    pub sink: Arc<dyn DispatchSink>,
    pub registry: Option<Arc<DispatchRegistry>>,
    pub on_failure: Option<FailureHook>,
    pub presence: Option<PresenceUpdatePayload>,
}

/// Handle to a running event loop
struct EventLoopHandle {
    token: CancellationToken,
    task: JoinHandle<GatewayResult<()>>,
}

/// State guarded by the lifecycle lock
#[derive(Default)]
struct Lifecycle {
    event_loop: Option<EventLoopHandle>,
}

/// Gateway client
///
/// Cheap to clone; all clones drive the same connection.
#[derive(Clone)]
pub struct GatewayClient {
    inner: Arc<GatewayInner>,
}

pub(super) struct GatewayInner {
    config: GatewayConfig,
    parts: Collaborators,

    session: SessionState,
    rate_limiter: RateLimiter,

    /// Serializes connect, disconnect and reconnect
    lifecycle: tokio::sync::Mutex<Lifecycle>,
    /// Bumped whenever a connection is started or torn down; read under the lifecycle lock
    generation: AtomicU64,
    connected: AtomicBool,
    /// Token of the running event loop, for sends from outside the loop
    active_token: Mutex<Option<CancellationToken>>,

    shard: Mutex<Option<ShardSpec>>,
    heartbeat_interval: Mutex<Option<Duration>>,
    latency: Mutex<Option<Duration>>,
    state: watch::Sender<ConnectionState>,
}

impl GatewayClient {
    pub(super) fn from_inner(inner: GatewayInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Connect, resuming the previous session when possible
    pub async fn connect(&self) -> GatewayResult<()> {
        self.connect_with(true).await
    }

    /// Connect; with `resume` false any previous session is discarded
    pub async fn connect_with(&self, resume: bool) -> GatewayResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.inner.connect_locked(&mut lifecycle, resume).await
    }

    /// Close the connection
    ///
    /// A graceful disconnect waits for the event loop to finish. The session is kept so a
    /// later [`connect`](Self::connect) can resume it.
    pub async fn disconnect(&self, graceful: bool) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.inner.disconnect_locked(&mut lifecycle, graceful).await;
    }

    /// Disconnect and connect again as one step
    pub async fn reconnect(&self, resume: bool, graceful: bool) -> GatewayResult<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.inner.disconnect_locked(&mut lifecycle, graceful).await;
        self.inner.connect_locked(&mut lifecycle, resume).await
    }

    /// Send a client message through the rate limiter
    pub async fn send(&self, message: &GatewayMessage) -> GatewayResult<()> {
        if !message.op.is_client_op() {
            return Err(GatewayError::Encode(format!("{} is not a client opcode", message.op)));
        }
        let token = self
            .inner
            .active_token
            .lock()
            .clone()
            .ok_or(GatewayError::NotConnected)?;
        self.inner.send_message(&token, message).await
    }

    pub async fn update_presence(&self, presence: &PresenceUpdatePayload) -> GatewayResult<()> {
        if !presence.is_valid_status() {
            return Err(GatewayError::Encode(format!(
                "invalid presence status {:?}",
                presence.status
            )));
        }
        self.send(&GatewayMessage::presence_update(presence)?).await
    }

    pub async fn request_guild_members(
        &self,
        request: &RequestGuildMembersPayload,
    ) -> GatewayResult<()> {
        self.send(&GatewayMessage::request_guild_members(request)?).await
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Subscribe to lifecycle state changes
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn shard(&self) -> Option<ShardSpec> {
        *self.inner.shard.lock()
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.inner.session.session_id()
    }

    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.inner.session.sequence()
    }

    #[must_use]
    pub fn can_resume(&self) -> bool {
        self.inner.session.can_resume()
    }

    #[must_use]
    pub fn heartbeat_interval(&self) -> Option<Duration> {
        *self.inner.heartbeat_interval.lock()
    }

    /// Round trip of the last acknowledged heartbeat
    #[must_use]
    pub fn latency(&self) -> Option<Duration> {
        *self.inner.latency.lock()
    }

    /// The internal registry, unless a custom sink replaced it
    #[must_use]
    pub fn registry(&self) -> Option<&Arc<DispatchRegistry>> {
        self.inner.parts.registry.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayClient")
            .field("state", &self.state())
            .field("session_id", &self.session_id())
            .field("sequence", &self.sequence())
            .field("shard", &self.shard())
            .finish_non_exhaustive()
    }
}

impl GatewayInner {
    pub(super) fn new(config: GatewayConfig, parts: Collaborators) -> Self {
        let rate_limiter = RateLimiter::new(config.outbound_limit, config.outbound_window);
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            config,
            parts,
            session: SessionState::new(),
            rate_limiter,
            lifecycle: tokio::sync::Mutex::new(Lifecycle::default()),
            generation: AtomicU64::new(0),
            connected: AtomicBool::new(false),
            active_token: Mutex::new(None),
            shard: Mutex::new(None),
            heartbeat_interval: Mutex::new(None),
            latency: Mutex::new(None),
            state,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Connection state changed");
        }
    }

    fn report_failure(&self, error: &GatewayError) {
        if let Some(hook) = &self.parts.on_failure {
            hook(error);
        }
    }

    // === Lifecycle ===

    async fn connect_locked(
        self: &Arc<Self>,
        lifecycle: &mut Lifecycle,
        resume: bool,
    ) -> GatewayResult<()> {
        if self.connected.load(Ordering::Acquire) {
            info!("Already connected, ignoring connect");
            return Ok(());
        }

        self.set_state(ConnectionState::Connecting);
        let opened = async {
            let url = self.resolve_url(resume).await?;
            info!(url = %url, resume, "Connecting to gateway");
            self.parts.connection.connect(&url).await
        }
        .await;

        if let Err(e) = opened {
            self.set_state(ConnectionState::Disconnected);
            return Err(e);
        }

        self.connected.store(true, Ordering::Release);
        self.start_event_loop(lifecycle).await;
        Ok(())
    }

    async fn resolve_url(&self, resume: bool) -> GatewayResult<Url> {
        let resumable = if resume { self.session.resume_info() } else { None };

        let mut url = if let Some(ResumeInfo { resume_url, .. }) = resumable {
            debug!(url = %resume_url, "Using resume URL");
            resume_url
        } else {
            self.session.clear();
            let endpoint = self.parts.endpoint.get_gateway().await?;
            Url::parse(&endpoint.url)?
        };

        url.set_query(None);
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("v", &self.config.gateway_version.to_string())
                .append_pair("encoding", self.parts.encoding.identifier());
            if let Some(compression) = &self.parts.compression {
                query.append_pair("compress", compression.identifier());
            }
        }
        Ok(url)
    }

    async fn start_event_loop(self: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if let Some(previous) = lifecycle.event_loop.take() {
            previous.token.cancel();
            let _ = previous.task.await;
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let token = CancellationToken::new();
        *self.active_token.lock() = Some(token.clone());

        let inner = Arc::clone(self);
        let loop_token = token.clone();
        let task = tokio::spawn(async move { inner.run_event_loop(generation, loop_token).await });

        lifecycle.event_loop = Some(EventLoopHandle { token, task });
    }

    async fn disconnect_locked(&self, lifecycle: &mut Lifecycle, graceful: bool) {
        self.set_state(ConnectionState::Closing);
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.active_token.lock().take();

        if let Some(handle) = lifecycle.event_loop.take() {
            handle.token.cancel();
            if graceful {
                let _ = handle.task.await;
            }
        }

        if let Err(e) = self.parts.connection.disconnect().await {
            warn!(error = %e, "Error closing gateway connection");
        }

        self.shard.lock().take();
        self.connected.store(false, Ordering::Release);
        self.set_state(ConnectionState::Disconnected);
        info!(graceful, "Disconnected from gateway");
    }

    /// Reconnect on behalf of a loop or heartbeat of `generation`
    async fn reconnect_from(self: Arc<Self>, generation: u64, resume: bool) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(generation, "Dropping reconnect for a replaced connection");
            return;
        }

        info!(resume, "Reconnecting to gateway");
        self.disconnect_locked(&mut lifecycle, false).await;
        if let Err(e) = self.connect_locked(&mut lifecycle, resume).await {
            error!(error = %e, "Reconnect failed");
            self.report_failure(&e);
        }
    }

    /// Tear down on behalf of a loop of `generation` that failed for good
    async fn teardown_from(self: Arc<Self>, generation: u64) {
        let mut lifecycle = self.lifecycle.lock().await;
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        self.disconnect_locked(&mut lifecycle, false).await;
    }

    /// Detached so the reconnect is not cancelled along with the connection it replaces
    fn spawn_reconnect(self: &Arc<Self>, generation: u64, resume: bool) {
        tokio::spawn(Arc::clone(self).reconnect_from(generation, resume));
    }

    fn spawn_teardown(self: &Arc<Self>, generation: u64) {
        tokio::spawn(Arc::clone(self).teardown_from(generation));
    }

    // === Event loop ===

    async fn run_event_loop(
        self: Arc<Self>,
        generation: u64,
        token: CancellationToken,
    ) -> GatewayResult<()> {
        let mut heartbeat = None;
        let result = self.drive(generation, &token, &mut heartbeat).await;

        token.cancel();
        if let Some(task) = heartbeat {
            let _ = task.await;
        }

        match &result {
            Ok(()) => {}
            Err(e) if e.is_expected() => debug!(error = %e, "Event loop stopped"),
            Err(e) => {
                error!(error = %e, "Event loop failed");
                self.report_failure(e);
                self.spawn_teardown(generation);
            }
        }
        result
    }

    async fn drive(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        heartbeat: &mut Option<JoinHandle<()>>,
    ) -> GatewayResult<()> {
        let (signal_tx, signal_rx) = mpsc::channel(1);

        if let Some(info) = self.session.resume_info() {
            self.resume_handshake(generation, token, info, &signal_tx, signal_rx, heartbeat)
                .await?;
        } else {
            self.identify_handshake(generation, token, signal_rx, heartbeat)
                .await?;
        }

        loop {
            let message = self.receive(generation, token).await?;
            self.handle(generation, token, &signal_tx, message).await?;
        }
    }

    async fn resume_handshake(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        info: ResumeInfo,
        signal_tx: &mpsc::Sender<HeartbeatSignal>,
        signal_rx: mpsc::Receiver<HeartbeatSignal>,
        heartbeat: &mut Option<JoinHandle<()>>,
    ) -> GatewayResult<()> {
        self.set_state(ConnectionState::Resuming);
        info!(session_id = %info.session_id, sequence = info.sequence, "Resuming session");

        let resume = GatewayMessage::resume(&ResumePayload {
            token: self.config.token.clone(),
            session_id: info.session_id,
            seq: info.sequence,
        })?;
        self.send_message(token, &resume).await?;

        let interval = self
            .heartbeat_interval
            .lock()
            .unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        *heartbeat = Some(self.spawn_heartbeat(generation, token, interval, signal_rx, true));

        let mut replay = VecDeque::new();
        let mut first = true;
        loop {
            let message = if first {
                first = false;
                self.receive_first(generation, token).await?
            } else {
                self.receive(generation, token).await?
            };

            let resumed = message.event_name() == Some(GatewayEventType::Resumed.as_str());
            if message.op == OpCode::Dispatch && !resumed {
                replay.push_back(message);
                continue;
            }

            self.handle(generation, token, signal_tx, message).await?;
            if resumed {
                break;
            }
        }

        info!(replayed = replay.len(), "Session resumed");
        while let Some(message) = replay.pop_front() {
            self.handle(generation, token, signal_tx, message).await?;
        }
        Ok(())
    }

    async fn identify_handshake(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        signal_rx: mpsc::Receiver<HeartbeatSignal>,
        heartbeat: &mut Option<JoinHandle<()>>,
    ) -> GatewayResult<()> {
        self.set_state(ConnectionState::Handshaking);

        let message = self.receive_first(generation, token).await?;
        let hello = message
            .as_hello()
            .ok_or_else(|| GatewayError::UnexpectedPayload {
                expected: "Hello",
                received: message.op.to_string(),
            })?;

        let interval = Duration::from_millis(hello.heartbeat_interval);
        *self.heartbeat_interval.lock() = Some(interval);
        *heartbeat = Some(self.spawn_heartbeat(generation, token, interval, signal_rx, false));

        let identify = GatewayMessage::identify(&IdentifyPayload {
            token: self.config.token.clone(),
            properties: self.config.properties.clone().into(),
            intents: self.config.intents.bits(),
            compress: self.config.compress,
            large_threshold: self.config.large_threshold,
            shard: self.config.shard.map(|s| [s.id, s.count]),
            presence: self.parts.presence.clone(),
        })?;
        self.send_message(token, &identify).await?;
        info!(
            interval_ms = hello.heartbeat_interval,
            intents = self.config.intents.bits(),
            "Identify sent"
        );
        Ok(())
    }

    // === Receive path ===

    async fn receive_first(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
    ) -> GatewayResult<GatewayMessage> {
        tokio::time::timeout(self.config.startup_timeout, self.receive(generation, token))
            .await
            .map_err(|_| GatewayError::StartupTimeout)?
    }

    async fn receive(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
    ) -> GatewayResult<GatewayMessage> {
        let incoming = tokio::select! {
            biased;
            () = token.cancelled() => return Err(GatewayError::Cancelled),
            incoming = self.parts.connection.read() => match incoming {
                Ok(incoming) => incoming,
                Err(GatewayError::Transport(reason)) => {
                    warn!(error = %reason, "Gateway read failed");
                    Incoming::Closed(CloseStatus::abnormal(reason))
                }
                Err(e) => return Err(e),
            },
        };

        let frame = match incoming {
            Incoming::Frame(frame) => frame,
            Incoming::Closed(status) => {
                self.on_closed(generation, &status);
                return Err(GatewayError::Closed(status));
            }
        };

        let bytes = match &self.parts.compression {
            Some(compression) => Cow::Owned(compression.decompress(frame.as_bytes())?),
            None => Cow::Borrowed(frame.as_bytes()),
        };
        let message = self.parts.encoding.decode(&bytes)?;
        trace!(op = %message.op, sequence = ?message.s, event = ?message.t, "Received");

        if let Some(sequence) = message.s {
            self.session.record_sequence(sequence);
        }
        Ok(message)
    }

    fn on_closed(self: &Arc<Self>, generation: u64, status: &CloseStatus) {
        if status.should_reconnect() {
            warn!(close_code = status.code, reason = %status.reason, "Gateway closed, resuming");
            self.spawn_reconnect(generation, true);
        } else {
            error!(close_code = status.code, reason = %status.reason, "Gateway closed for good");
            self.session.clear();
            self.report_failure(&GatewayError::Closed(status.clone()));
            self.spawn_teardown(generation);
        }
    }

    // === Control messages ===

    async fn handle(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        signal_tx: &mpsc::Sender<HeartbeatSignal>,
        message: GatewayMessage,
    ) -> GatewayResult<()> {
        match message.op {
            OpCode::Dispatch => {
                let Some(name) = message.t.clone() else {
                    warn!(sequence = ?message.s, "Dispatch without an event name");
                    return Ok(());
                };
                let session_event =
                    GatewayEventType::from_name(&name).filter(|e| e.is_session_event());
                match session_event {
                    Some(GatewayEventType::Ready) => self.on_ready(&message)?,
                    Some(_) => self.set_state(ConnectionState::Connected),
                    None => {}
                }
                self.parts.sink.accept(&name, message.d).await;
            }
            OpCode::Heartbeat => {
                debug!("Server requested a heartbeat");
                self.signal_heartbeat(token, signal_tx, HeartbeatSignal::Requested)
                    .await?;
            }
            OpCode::HeartbeatAck => {
                self.signal_heartbeat(token, signal_tx, HeartbeatSignal::Acked)
                    .await?;
            }
            OpCode::Reconnect => {
                info!("Server requested a reconnect");
                self.spawn_reconnect(generation, true);
            }
            OpCode::InvalidSession => {
                let resumable =
                    message
                        .as_invalid_session()
                        .ok_or_else(|| GatewayError::UnexpectedPayload {
                            expected: "boolean resumable flag",
                            received: format!("{:?}", message.d),
                        })?;
                warn!(resumable, "Session invalidated");
                self.spawn_reconnect(generation, resumable);
            }
            OpCode::Hello => {
                if let Some(hello) = message.as_hello() {
                    debug!(interval_ms = hello.heartbeat_interval, "Heartbeat interval updated");
                    *self.heartbeat_interval.lock() =
                        Some(Duration::from_millis(hello.heartbeat_interval));
                }
            }
            other => warn!(op = %other, "Ignoring unexpected opcode"),
        }
        Ok(())
    }

    fn on_ready(&self, message: &GatewayMessage) -> GatewayResult<()> {
        let ready = message
            .as_ready()
            .ok_or_else(|| GatewayError::UnexpectedPayload {
                expected: "READY payload",
                received: format!("{:?}", message.d),
            })?;

        let resume_url = Url::parse(&ready.resume_gateway_url)?;
        let shard = ready.shard_spec().or(self.config.shard);
        self.session.establish(ready.session_id.clone(), resume_url);
        *self.shard.lock() = shard;
        self.set_state(ConnectionState::Connected);

        info!(session_id = %ready.session_id, shard = ?shard, "Gateway ready");
        Ok(())
    }

    async fn signal_heartbeat(
        &self,
        token: &CancellationToken,
        signal_tx: &mpsc::Sender<HeartbeatSignal>,
        signal: HeartbeatSignal,
    ) -> GatewayResult<()> {
        tokio::select! {
            biased;
            () = token.cancelled() => Err(GatewayError::Cancelled),
            sent = signal_tx.send(signal) => {
                if sent.is_err() {
                    warn!(signal = ?signal, "Heartbeat monitor gone, dropping signal");
                }
                Ok(())
            }
        }
    }

    // === Send path ===

    async fn send_message(
        &self,
        token: &CancellationToken,
        message: &GatewayMessage,
    ) -> GatewayResult<()> {
        tokio::select! {
            biased;
            () = token.cancelled() => return Err(GatewayError::Cancelled),
            () = self.rate_limiter.acquire() => {}
        }
        // The connection outlives this token; a replacement link may already be open
        if token.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let frame = self.parts.encoding.encode(message)?;
        trace!(op = %message.op, "Sending");
        tokio::select! {
            biased;
            () = token.cancelled() => Err(GatewayError::Cancelled),
            sent = self.parts.connection.send(frame) => sent,
        }
    }

    // === Heartbeat ===

    fn spawn_heartbeat(
        self: &Arc<Self>,
        generation: u64,
        token: &CancellationToken,
        interval: Duration,
        signals: mpsc::Receiver<HeartbeatSignal>,
        immediate: bool,
    ) -> JoinHandle<()> {
        let monitor = HeartbeatMonitor::new(interval, signals)
            .ack_timeout(self.config.heartbeat_ack_timeout)
            .max_attempts(self.config.max_heartbeat_attempts)
            .immediate_first(immediate);
        let link = HeartbeatLink {
            inner: Arc::clone(self),
            generation,
            token: token.clone(),
        };
        let token = token.clone();

        tokio::spawn(async move {
            match monitor.run(&link, token).await {
                HeartbeatOutcome::Cancelled => debug!("Heartbeat stopped"),
                HeartbeatOutcome::Unacknowledged { attempts } => {
                    let e = GatewayError::HeartbeatUnacknowledged { attempts };
                    warn!(error = %e, "Reconnect requested");
                }
                HeartbeatOutcome::Failed(e) => {
                    warn!(error = %e, "Heartbeat send failed, reconnecting");
                    link.request_reconnect();
                }
            }
        })
    }
}

/// What the heartbeat monitor of one connection holds on to
struct HeartbeatLink {
    inner: Arc<GatewayInner>,
    generation: u64,
    token: CancellationToken,
}

#[async_trait]
impl HeartbeatDriver for HeartbeatLink {
    async fn send_heartbeat(&self) -> GatewayResult<()> {
        let heartbeat = GatewayMessage::heartbeat(self.inner.session.sequence());
        self.inner.send_message(&self.token, &heartbeat).await
    }

    fn request_reconnect(&self) {
        self.inner.spawn_reconnect(self.generation, true);
    }

    fn acknowledged(&self, latency: Duration) {
        *self.inner.latency.lock() = Some(latency);
    }
}
