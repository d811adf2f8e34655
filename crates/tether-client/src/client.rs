//! The client handle and the driver task that owns all connection state.
//!
//! [`Client`] is a cheap handle. Every operation becomes a [`Command`] on a
//! channel drained by a single driver task, which also consumes transport
//! events and runs the liveness tick. Nothing the driver owns is shared, so
//! no locking is needed; callers observe state through a `watch` channel and
//! lifecycle events through a `broadcast` channel.

use crate::config::ClientConfig;
use crate::error::{ConnectError, RequestError, TransportError};
use crate::events::{ClientEvent, ConnectKind, DisconnectReason};
use crate::listeners::{Listener, ListenerId, Listeners};
use crate::transport::{Dialer, RawEvent, Transport, TransportEvent, WsDialer};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{SystemTime, UNIX_EPOCH};
use tether_core::{
    ConnectionState, EnvelopeCodec, ErrorCode, HEARTBEAT_REQUEST, HEARTBEAT_RESPONSE, Response,
};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

const EVENT_CAPACITY: usize = 64;

/// Snapshot of the observable client state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub state: ConnectionState,
    /// Last address passed to `connect`.
    pub address: Option<String>,
    /// Server clock minus local clock, in milliseconds.
    pub ping: i64,
    pub reconnecting: bool,
}

/// Handle to a client. Clones share the same connection.
///
/// The driver task stops once every handle is dropped.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<Status>,
    events: broadcast::Sender<ClientEvent>,
    next_listener: Arc<AtomicU64>,
}

impl Client {
    /// Client dialing over WebSocket. Must be called inside a Tokio runtime.
    pub fn new(config: ClientConfig) -> Result<Self, TransportError> {
        let dialer = WsDialer::new(config.ca_cert.as_deref())?;
        Ok(Self::with_dialer(config, Arc::new(dialer)))
    }

    /// Client dialing through a custom [`Dialer`]. Must be called inside a
    /// Tokio runtime.
    pub fn with_dialer(config: ClientConfig, dialer: Arc<dyn Dialer>) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(Status::default());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (transport, raw_rx) = Transport::new(dialer);

        let driver = Driver::new(config, transport, status_tx, events.clone());
        tokio::spawn(driver.run(command_rx, raw_rx));

        Self {
            commands,
            status,
            events,
            next_listener: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Load the routing table and payload codec. Required before `connect`.
    pub fn set_proto_config(&self, codec: EnvelopeCodec) {
        self.command(Command::SetProtoConfig(Arc::new(codec)));
    }

    /// Connect to `address`. Resolves once, when the link is up or the
    /// attempt has failed.
    ///
    /// Connecting to a different address than the current one closes the
    /// current link first.
    pub fn connect(&self, address: impl Into<String>) -> PendingConnect {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Connect {
            address: address.into(),
            reply,
        });
        PendingConnect { rx }
    }

    /// Send a request. Resolves with the matching response.
    ///
    /// Fails immediately, without touching the link, unless connected.
    /// The heartbeat pair is reserved and always refused.
    pub fn send(&self, msg_name: impl Into<String>, payload: Value) -> PendingResponse {
        let msg_name = msg_name.into();
        let ticket = Arc::new(Ticket::default());
        if msg_name == HEARTBEAT_REQUEST || msg_name == HEARTBEAT_RESPONSE {
            return PendingResponse::failed(ticket, RequestError::Reserved(msg_name));
        }
        match self.state() {
            ConnectionState::Connected => {}
            ConnectionState::Connecting => {
                tracing::warn!("send {} while connecting ({})", msg_name, ErrorCode::ConnectingNow);
                return PendingResponse::failed(ticket, RequestError::Connecting);
            }
            _ => return PendingResponse::failed(ticket, RequestError::NotConnected),
        }

        let (reply, rx) = oneshot::channel();
        self.command(Command::Send {
            msg_name,
            payload,
            ticket: ticket.clone(),
            reply,
        });
        PendingResponse {
            ticket,
            reply: Reply::Waiting(rx),
        }
    }

    /// Register a listener for a response type. Higher priorities run first.
    pub fn on_notification<F>(&self, msg_name: impl Into<String>, priority: i32, callback: F) -> ListenerId
    where
        F: Fn(&str, &Response) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::Relaxed));
        self.command(Command::Listen {
            msg_name: msg_name.into(),
            id,
            priority,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove one listener, or every listener of `msg_name` when `id` is `None`.
    pub fn off(&self, msg_name: impl Into<String>, id: Option<ListenerId>) {
        self.command(Command::Off {
            msg_name: msg_name.into(),
            id,
        });
    }

    /// Close the link. Pending requests are abandoned, listeners are kept.
    pub fn close(&self) {
        self.command(Command::Close);
    }

    /// Tear everything down and return to Idle. The protocol configuration
    /// must be loaded again before reconnecting.
    pub fn reset(&self) {
        self.command(Command::Reset);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn is_reconnecting(&self) -> bool {
        self.status.borrow().reconnecting
    }

    pub fn address(&self) -> Option<String> {
        self.status.borrow().address.clone()
    }

    pub fn ping(&self) -> i64 {
        self.status.borrow().ping
    }

    /// Estimated server clock in Unix milliseconds.
    pub fn server_time(&self) -> i64 {
        unix_millis() + self.ping()
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!("client driver has stopped");
        }
    }
}

/// Result of [`Client::connect`].
pub struct PendingConnect {
    rx: oneshot::Receiver<Result<(), ConnectError>>,
}

impl Future for PendingConnect {
    type Output = Result<(), ConnectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(ConnectError::Abandoned)))
    }
}

#[derive(Debug, Default)]
struct Ticket {
    /// 0 until the request is on the wire.
    seq_id: AtomicU32,
    timed_out: AtomicBool,
}

enum Reply {
    Ready(Option<RequestError>),
    Waiting(oneshot::Receiver<Result<Response, RequestError>>),
}

/// Result of [`Client::send`].
pub struct PendingResponse {
    ticket: Arc<Ticket>,
    reply: Reply,
}

impl PendingResponse {
    fn failed(ticket: Arc<Ticket>, error: RequestError) -> Self {
        Self {
            ticket,
            reply: Reply::Ready(Some(error)),
        }
    }

    /// Sequence id, once the request has been sent.
    pub fn seq_id(&self) -> Option<u32> {
        match self.ticket.seq_id.load(Ordering::Acquire) {
            0 => None,
            seq => Some(seq),
        }
    }

    /// Whether the protocol timeout has elapsed for this request.
    pub fn timed_out(&self) -> bool {
        self.ticket.timed_out.load(Ordering::Acquire)
    }
}

impl Future for PendingResponse {
    type Output = Result<Response, RequestError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.reply {
            Reply::Ready(error) => Poll::Ready(Err(error.take().unwrap_or(RequestError::Abandoned))),
            Reply::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|r| r.unwrap_or(Err(RequestError::Abandoned))),
        }
    }
}

enum Command {
    SetProtoConfig(Arc<EnvelopeCodec>),
    Connect {
        address: String,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Send {
        msg_name: String,
        payload: Value,
        ticket: Arc<Ticket>,
        reply: oneshot::Sender<Result<Response, RequestError>>,
    },
    Listen {
        msg_name: String,
        id: ListenerId,
        priority: i32,
        callback: Listener,
    },
    Off {
        msg_name: String,
        id: Option<ListenerId>,
    },
    Close,
    Reset,
}

/// Who is waiting for the connect attempt in flight.
enum ConnectWaiter {
    Caller(oneshot::Sender<Result<(), ConnectError>>),
    Reconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReconnectPhase {
    Idle,
    InFlight,
}

struct PendingRequest {
    msg_name: String,
    sent_at: Instant,
    ticket: Arc<Ticket>,
    reply: oneshot::Sender<Result<Response, RequestError>>,
}

struct Driver {
    config: ClientConfig,
    codec: Option<Arc<EnvelopeCodec>>,
    transport: Transport,
    state: ConnectionState,
    address: Option<String>,
    waiter: Option<ConnectWaiter>,
    reconnect: ReconnectPhase,
    connect_started: Instant,
    next_seq: u32,
    pending: BTreeMap<u32, PendingRequest>,
    listeners: Listeners,
    heartbeat_seq: u32,
    heartbeat_sent: Instant,
    heartbeat_ack: Instant,
    ping: i64,
    status: watch::Sender<Status>,
    events: broadcast::Sender<ClientEvent>,
}

impl Driver {
    fn new(
        config: ClientConfig,
        transport: Transport,
        status: watch::Sender<Status>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        let now = Instant::now();
        Self {
            config,
            codec: None,
            transport,
            state: ConnectionState::Idle,
            address: None,
            waiter: None,
            reconnect: ReconnectPhase::Idle,
            connect_started: now,
            next_seq: 1,
            pending: BTreeMap::new(),
            listeners: Listeners::default(),
            heartbeat_seq: 0,
            heartbeat_sent: now,
            heartbeat_ack: now,
            ping: 0,
            status,
            events,
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut raw: mpsc::UnboundedReceiver<RawEvent>,
    ) {
        let mut ticker: Option<Interval> = None;
        loop {
            self.sync_ticker(&mut ticker);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = raw.recv() => {
                    if let Some(event) = self.transport.handle(event) {
                        self.on_transport(event);
                    }
                }
                _ = next_tick(&mut ticker) => self.tick(),
            }
        }
        self.transport.close();
        tracing::debug!("client driver stopped");
    }

    /// The tick only runs while a link is being established or is up.
    fn sync_ticker(&self, ticker: &mut Option<Interval>) {
        let wanted = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        if wanted && ticker.is_none() {
            let period = self.config.tick_period();
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            *ticker = Some(interval);
        } else if !wanted {
            *ticker = None;
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SetProtoConfig(codec) => {
                tracing::debug!("protocol configuration loaded: {} routes", codec.routes().len());
                self.codec = Some(codec);
            }
            Command::Connect { address, reply } => {
                self.connect(address, ConnectWaiter::Caller(reply));
            }
            Command::Send {
                msg_name,
                payload,
                ticket,
                reply,
            } => self.send(msg_name, payload, ticket, reply),
            Command::Listen {
                msg_name,
                id,
                priority,
                callback,
            } => self.listeners.add(msg_name, id, priority, callback),
            Command::Off { msg_name, id } => self.listeners.remove(&msg_name, id),
            Command::Close => self.close(),
            Command::Reset => self.reset(),
        }
    }

    fn connect(&mut self, address: String, waiter: ConnectWaiter) {
        if self.codec.is_none() {
            tracing::warn!("connect before protocol configuration ({})", ErrorCode::CallBeforeConfig);
            self.resolve(waiter, Err(ConnectError::NotConfigured));
            return;
        }

        let live = matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        );
        if live && self.address.as_deref() != Some(address.as_str()) {
            tracing::info!("switching address from {:?} to {}", self.address, address);
            self.close();
        }

        match self.state {
            ConnectionState::Connected => {
                self.resolve(waiter, Ok(()));
                return;
            }
            ConnectionState::Connecting => {
                tracing::warn!("already connecting, ignoring {} ({})", address, ErrorCode::ConnectingRepeat);
                self.resolve(waiter, Err(ConnectError::AlreadyConnecting));
                return;
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }

        tracing::info!("connecting to {}", address);
        self.waiter = Some(waiter);
        self.address = Some(address.clone());
        self.set_state(ConnectionState::Connecting);
        self.transport.connect(
            &address,
            self.config.connect_retry,
            self.config.connect_interval,
        );
    }

    fn send(
        &mut self,
        msg_name: String,
        payload: Value,
        ticket: Arc<Ticket>,
        reply: oneshot::Sender<Result<Response, RequestError>>,
    ) {
        let codec = match (&self.codec, self.state) {
            (Some(codec), ConnectionState::Connected) => codec.clone(),
            (_, ConnectionState::Connecting) => {
                let _ = reply.send(Err(RequestError::Connecting));
                return;
            }
            _ => {
                let _ = reply.send(Err(RequestError::NotConnected));
                return;
            }
        };

        let seq = self.next_seq;
        let frame = match codec.encode_outbound(&msg_name, seq, &payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("cannot encode {} ({}): {}", msg_name, e.code(), e);
                let _ = reply.send(Err(e.into()));
                return;
            }
        };
        if let Err(e) = self.transport.send(frame) {
            tracing::warn!("cannot send {}: {}", msg_name, e);
            let _ = reply.send(Err(e.into()));
            return;
        }
        self.next_seq = self.next_seq.checked_add(1).unwrap_or(1);

        ticket.seq_id.store(seq, Ordering::Release);
        self.log_frame("send", &msg_name, seq);
        self.pending.insert(
            seq,
            PendingRequest {
                msg_name,
                sent_at: Instant::now(),
                ticket,
                reply,
            },
        );
    }

    fn send_heartbeat(&mut self) {
        self.heartbeat_sent = Instant::now();
        let Some(codec) = &self.codec else {
            return;
        };
        self.heartbeat_seq = self.heartbeat_seq.wrapping_add(1);
        let payload = json!({ "clientTime": unix_millis() });
        let sent = codec
            .encode_outbound(HEARTBEAT_REQUEST, self.heartbeat_seq, &payload)
            .map_err(|e| format!("{} ({})", e, e.code()))
            .and_then(|frame| self.transport.send(frame).map_err(|e| e.to_string()));
        match sent {
            Ok(()) => self.log_frame("send", HEARTBEAT_REQUEST, self.heartbeat_seq),
            Err(e) => tracing::warn!("cannot send heartbeat: {}", e),
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Connected);
                }
            }
            TransportEvent::Message(bytes) => self.on_frame(&bytes),
            TransportEvent::Close => {
                self.link_lost(DisconnectReason::TransportClose, "closed by peer".to_string());
            }
            TransportEvent::Error(e) => {
                self.link_lost(DisconnectReason::TransportError, e.to_string());
            }
        }
    }

    fn link_lost(&mut self, reason: DisconnectReason, detail: String) {
        let reason = if self.state == ConnectionState::Connecting
            && self.reconnect == ReconnectPhase::InFlight
        {
            DisconnectReason::ReconnectFailed
        } else {
            reason
        };
        let retry = self.needs_reconnect();
        self.drop_link(reason, retry, detail);
        if retry {
            self.start_reconnect();
        }
    }

    fn on_frame(&mut self, bytes: &[u8]) {
        let Some(codec) = self.codec.clone() else {
            return;
        };
        let envelope = match codec.decode_inbound(bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("dropping malformed frame ({}): {}", e.code(), e);
                return;
            }
        };
        let route = match codec.resolve_route(&envelope) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!("dropping frame for route {} ({}): {}", envelope.route_id, e.code(), e);
                return;
            }
        };

        let seq = envelope.sequence_id;
        let heartbeat = envelope.is_heartbeat();
        // Heartbeats have their own sequence space and never answer a request.
        let awaited = !heartbeat && self.pending.contains_key(&seq);
        if !heartbeat && !awaited && !self.listeners.has(route.response_type) {
            tracing::trace!("nobody waiting for {} #{}, frame dropped", route.response_type, seq);
            return;
        }

        self.log_frame("recv", route.response_type, seq);
        let data = match codec.decode_payload(route.response_type, &envelope.payload) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!("cannot decode {} #{} ({}): {}", route.response_type, seq, e.code(), e);
                if awaited && let Some(request) = self.pending.remove(&seq) {
                    let _ = request.reply.send(Err(e.into()));
                }
                return;
            }
        };
        let response = Response {
            code: envelope.status,
            data,
            msg_name: route.response_type.to_string(),
            diagnostic: envelope.diagnostic().map(str::to_string),
        };

        if heartbeat {
            self.on_heartbeat(&response);
        }
        if awaited && let Some(request) = self.pending.remove(&seq) {
            let _ = request.reply.send(Ok(response.clone()));
        }
        for listener in self.listeners.snapshot(route.response_type) {
            listener(route.response_type, &response);
        }
    }

    fn on_heartbeat(&mut self, response: &Response) {
        if response.is_success() {
            self.heartbeat_ack = Instant::now();
            if let Some(server_time) = response.data.get("serverTime").and_then(Value::as_i64) {
                self.ping = server_time - unix_millis();
            }
        } else {
            tracing::warn!("heartbeat rejected with status {} ({})", response.code, ErrorCode::HeartbeatFailed);
        }
        self.emit(ClientEvent::Heartbeat(response.clone()));
    }

    fn tick(&mut self) {
        let now = Instant::now();
        self.scan_pending(now);

        match self.state {
            ConnectionState::Connecting => {
                let elapsed = now.saturating_duration_since(self.connect_started);
                if elapsed >= self.config.connect_timeout {
                    let reason = match self.reconnect {
                        ReconnectPhase::InFlight => DisconnectReason::ReconnectTimeout,
                        ReconnectPhase::Idle => DisconnectReason::ConnectTimeout,
                    };
                    tracing::warn!("connect timed out after {:?} ({})", elapsed, ErrorCode::ConnectTimeout);
                    self.drop_link(reason, false, format!("not connected after {elapsed:?}"));
                }
            }
            ConnectionState::Connected => {
                let silent = now.saturating_duration_since(self.heartbeat_ack);
                if silent >= self.config.heartbeat_timeout {
                    tracing::warn!("no heartbeat for {:?} ({})", silent, ErrorCode::HeartbeatTimeout);
                    let retry = self.needs_reconnect();
                    self.drop_link(
                        DisconnectReason::HeartbeatTimeout,
                        retry,
                        format!("no heartbeat for {silent:?}"),
                    );
                    if retry {
                        self.start_reconnect();
                    }
                } else if now.saturating_duration_since(self.heartbeat_sent)
                    >= self.config.heartbeat_interval
                {
                    self.send_heartbeat();
                }
            }
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }
    }

    /// Report protocol timeouts once per request and evict stale requests.
    ///
    /// A request is never evicted before its protocol timeout was reported.
    fn scan_pending(&mut self, now: Instant) {
        let timeout = self.config.protocol_timeout;
        let eviction = match self.config.pending_eviction {
            limit if limit.is_zero() => None,
            limit => Some(limit.max(timeout)),
        };
        let mut evicted = Vec::new();
        let mut timed_out = Vec::new();

        for (&seq, request) in &self.pending {
            let age = now.saturating_duration_since(request.sent_at);
            if age >= timeout && !request.ticket.timed_out.swap(true, Ordering::AcqRel) {
                timed_out.push(ClientEvent::ProtocolTimeout {
                    seq_id: seq,
                    msg_name: request.msg_name.clone(),
                    elapsed: age,
                });
            }
            if eviction.is_some_and(|limit| age >= limit) {
                evicted.push((seq, age));
            }
        }

        for event in timed_out {
            if let ClientEvent::ProtocolTimeout { seq_id, msg_name, elapsed } = &event {
                tracing::warn!(
                    "no response to {} #{} after {:?} ({})",
                    msg_name,
                    seq_id,
                    elapsed,
                    ErrorCode::ProtocolTimeout
                );
            }
            self.emit(event);
        }
        for (seq_id, elapsed) in evicted {
            if let Some(request) = self.pending.remove(&seq_id) {
                tracing::warn!("evicting {} #{} after {:?}", request.msg_name, seq_id, elapsed);
                let _ = request.reply.send(Err(RequestError::Evicted { seq_id, elapsed }));
            }
        }
    }

    fn needs_reconnect(&self) -> bool {
        self.state == ConnectionState::Connected
            && self.config.auto_reconnect
            && self.reconnect == ReconnectPhase::Idle
            && self.address.is_some()
    }

    fn start_reconnect(&mut self) {
        let Some(address) = self.address.clone() else {
            return;
        };
        self.reconnect = ReconnectPhase::InFlight;
        tracing::info!("reconnecting to {}", address);
        self.emit(ClientEvent::ReconnectStarted);
        self.connect(address, ConnectWaiter::Reconnect);
    }

    /// Tear down the link: abandon pending requests, fail the connect
    /// attempt in flight and report the disconnect.
    fn drop_link(&mut self, reason: DisconnectReason, will_retry: bool, detail: String) {
        self.transport.close();
        let abandoned = self.pending.len();
        self.pending.clear();
        self.set_state(ConnectionState::Disconnected);
        self.settle_waiter(Err(ConnectError::Failed(reason)));
        tracing::info!(
            "disconnected: {}, {} (will retry: {}, {} requests abandoned)",
            reason,
            detail,
            will_retry,
            abandoned
        );
        self.emit(ClientEvent::Disconnected {
            reason,
            will_retry,
            detail,
        });
    }

    fn close(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.drop_link(DisconnectReason::ManualClose, false, "closed by caller".to_string());
        }
    }

    fn reset(&mut self) {
        // The caller waiting on a connect sees it abandoned, not failed.
        self.waiter = None;
        self.listeners.clear();
        if self.state != ConnectionState::Idle {
            self.close();
        }
        self.pending.clear();
        self.transport.close();
        self.codec = None;
        self.address = None;
        self.reconnect = ReconnectPhase::Idle;
        self.ping = 0;
        self.set_state(ConnectionState::Idle);
        self.publish();
        tracing::debug!("client reset");
    }

    fn set_state(&mut self, next: ConnectionState) {
        let from = self.state;
        if from == next {
            return;
        }
        self.state = next;
        tracing::debug!("state {:?} -> {:?}", from, next);
        match next {
            ConnectionState::Connecting => self.connect_started = Instant::now(),
            ConnectionState::Connected => self.next_seq = 1,
            ConnectionState::Idle | ConnectionState::Disconnected => {}
        }
        self.emit(ClientEvent::StateChanged { from, to: next });

        if next == ConnectionState::Connected {
            let kind = match self.waiter {
                Some(ConnectWaiter::Reconnect) => ConnectKind::Reconnected,
                _ => ConnectKind::Fresh,
            };
            tracing::info!("connected to {:?} ({:?})", self.address, kind);
            self.emit(ClientEvent::Connected { kind });
            self.settle_waiter(Ok(()));
            self.heartbeat_ack = Instant::now();
            self.send_heartbeat();
        }
    }

    fn settle_waiter(&mut self, result: Result<(), ConnectError>) {
        if let Some(waiter) = self.waiter.take() {
            self.resolve(waiter, result);
        }
    }

    fn resolve(&mut self, waiter: ConnectWaiter, result: Result<(), ConnectError>) {
        match waiter {
            ConnectWaiter::Caller(reply) => {
                let _ = reply.send(result);
            }
            ConnectWaiter::Reconnect => {
                self.reconnect = ReconnectPhase::Idle;
                let success = result.is_ok();
                tracing::info!("reconnect finished (success: {})", success);
                self.emit(ClientEvent::ReconnectFinished { success });
            }
        }
    }

    fn emit(&self, event: ClientEvent) {
        self.publish();
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        let status = Status {
            state: self.state,
            address: self.address.clone(),
            ping: self.ping,
            reconnecting: self.reconnect == ReconnectPhase::InFlight,
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    fn log_frame(&self, direction: &'static str, msg_name: &str, seq: u32) {
        if self.config.debug_mode {
            tracing::debug!("{} {} #{}", direction, msg_name, seq);
        } else {
            tracing::trace!("{} {} #{}", direction, msg_name, seq);
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
