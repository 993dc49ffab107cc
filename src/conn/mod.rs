//! The connection engine: state machine, query façade and reply routing.
//!
//! A `Connection` owns the WebSocket link, the correlator registry and every
//! timer. Outbound writes funnel through one channel to the socket task,
//! which also drives inbound frames, so all socket traffic is serialized on
//! a single loop.

mod liveness;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::auth::AuthInfo;
use crate::binary::{self, Node};
use crate::bus::{topic, EventBus};
use crate::correlator::Correlator;
use crate::crypto;
use crate::error::{self, WaError};
use crate::options::ConnectOptions;
use crate::socket::framer::{self, flags, InboundPayload, Metric};
use crate::socket::{Dial, Transport, WireFrame, WsDialer};
use crate::sync::KeyedMutex;
use crate::tagger::Tagger;
use crate::types::{ConnectionState, DisconnectReason, Event, MessageLogEntry, ServerMessage};

use liveness::Liveness;

/// Options for a single request/response exchange.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub json: Value,
    /// Present for binary frames: the metric and flag routing bytes.
    pub binary_tags: Option<(Metric, u8)>,
    /// Explicit tag; generated from the tagger when absent.
    pub tag: Option<String>,
    /// Per-request deadline. `None` waits until the socket closes.
    pub timeout: Option<Duration>,
    /// Treat a reply status outside 200..=299 as an error.
    pub expect_2xx: bool,
    pub wait_for_open: bool,
    pub long_tag: bool,
    pub requires_phone: bool,
    pub start_debounce: bool,
}

impl QueryOptions {
    pub fn json(json: Value) -> Self {
        Self {
            json,
            binary_tags: None,
            tag: None,
            timeout: None,
            expect_2xx: false,
            wait_for_open: true,
            long_tag: false,
            requires_phone: true,
            start_debounce: false,
        }
    }

    pub fn binary(mut self, metric: Metric, flag: u8) -> Self {
        self.binary_tags = Some((metric, flag));
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn expect_2xx(mut self, value: bool) -> Self {
        self.expect_2xx = value;
        self
    }

    pub fn wait_for_open(mut self, value: bool) -> Self {
        self.wait_for_open = value;
        self
    }

    pub fn long_tag(mut self, value: bool) -> Self {
        self.long_tag = value;
        self
    }

    pub fn requires_phone(mut self, value: bool) -> Self {
        self.requires_phone = value;
        self
    }

    pub fn start_debounce(mut self, value: bool) -> Self {
        self.start_debounce = value;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CloseEvent {
    reason: DisconnectReason,
    is_reconnecting: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct StateSnapshot {
    state: ConnectionState,
    close: Option<CloseEvent>,
}

struct Link {
    tx: mpsc::UnboundedSender<WireFrame>,
    cancel: CancellationToken,
    generation: u64,
}

struct Inner {
    opts: ConnectOptions,
    dialer: Box<dyn Dial>,
    auth: RwLock<Option<AuthInfo>>,
    tagger: Tagger,
    correlator: Correlator,
    bus: EventBus,
    liveness: Liveness,
    state_tx: watch::Sender<StateSnapshot>,
    link: Mutex<Option<Link>>,
    /// Serializes tag assignment, waiter registration and socket hand-off.
    send_lock: AsyncMutex<()>,
    phone_connected: AtomicBool,
    retries: AtomicU32,
    generation: AtomicU64,
    jid_locks: KeyedMutex,
    msg_log: Mutex<VecDeque<MessageLogEntry>>,
}

/// Handle to one logical connection.
///
/// Clones share the same engine. User-level query modules are free
/// functions over this type rather than extensions of it.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connection against the production endpoint.
    pub fn new(opts: ConnectOptions) -> Self {
        Self::with_dialer(opts, WsDialer::default())
    }

    /// Connection over a custom dialer, used for fallback endpoints and in
    /// tests.
    pub fn with_dialer(opts: ConnectOptions, dialer: impl Dial + 'static) -> Self {
        let (state_tx, _) = watch::channel(StateSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                opts,
                dialer: Box::new(dialer),
                auth: RwLock::new(None),
                tagger: Tagger::new(),
                correlator: Correlator::new(),
                bus: EventBus::new(),
                liveness: Liveness::new(),
                state_tx,
                link: Mutex::new(None),
                send_lock: AsyncMutex::new(()),
                phone_connected: AtomicBool::new(false),
                retries: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                jid_locks: KeyedMutex::new(),
                msg_log: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Install credentials for binary frames and reconnect handshakes.
    pub fn load_auth_info(&self, auth: AuthInfo) {
        *self.inner.auth.write().unwrap() = Some(auth);
    }

    pub fn auth_info(&self) -> Option<AuthInfo> {
        self.inner.auth.read().unwrap().clone()
    }

    pub fn clear_auth_info(&self) {
        *self.inner.auth.write().unwrap() = None;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    pub fn phone_connected(&self) -> bool {
        self.inner.phone_connected.load(Ordering::SeqCst)
    }

    /// Number of frames sent on the current connection.
    pub fn sent_count(&self) -> u64 {
        self.inner.tagger.count()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.correlator.pending_count()
    }

    pub fn options(&self) -> &ConnectOptions {
        &self.inner.opts
    }

    /// The event bus carrying `open`, `close`, `ws-close`,
    /// `connection-phone-change`, tag-specific and domain-update topics.
    pub fn events(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Per-JID locks for mutating helpers.
    pub fn jid_locks(&self) -> &KeyedMutex {
        &self.inner.jid_locks
    }

    /// Snapshot of the frame ring log.
    pub fn message_log(&self) -> Vec<MessageLogEntry> {
        self.inner.msg_log.lock().unwrap().iter().cloned().collect()
    }

    /// Adopt the keep-alive timer started by the handshake stage. It is
    /// cancelled whenever the connection leaves the open state.
    pub fn install_keep_alive(&self, token: CancellationToken) {
        self.inner.liveness.install_keep_alive(token);
    }

    /// Dial and move to the open state.
    pub async fn connect(&self) -> Result<(), WaError> {
        connect_inner(&self.inner).await
    }

    /// Resolves once the connection is open.
    ///
    /// Honors `pending_request_timeout` and rejects when the connection
    /// closes intentionally or with invalid credentials.
    pub async fn wait_for_connection(&self) -> Result<(), WaError> {
        self.inner.wait_for_connection().await
    }

    /// Issue a request and wait for its correlated reply.
    ///
    /// A 599 reply tears the connection down and retries once after the
    /// reconnect; the second failure surfaces as `BadSession`.
    pub async fn query(&self, options: QueryOptions) -> Result<ServerMessage, WaError> {
        match query_once(&self.inner, &options).await {
            Err(WaError::BadSession) => {
                debug!("bad session, retrying query after reconnect");
                query_once(&self.inner, &options).await
            }
            result => result,
        }
    }

    /// Send an `action` set, wrapped with the current epoch.
    pub async fn set_query(
        &self,
        nodes: Vec<Value>,
        binary_tags: Option<(Metric, u8)>,
        tag: Option<String>,
    ) -> Result<ServerMessage, WaError> {
        let (metric, flag) = binary_tags.unwrap_or((Metric::Group, flags::IGNORE));
        let epoch = self.inner.tagger.count().to_string();
        let json = json!(["action", {"epoch": epoch, "type": "set"}, nodes]);
        let mut options = QueryOptions::json(json)
            .binary(metric, flag)
            .expect_2xx(true);
        options.tag = tag;
        self.query(options).await
    }

    /// Arm the idle-debounce window.
    pub fn start_debounce(&self) {
        arm_idle_debounce(&self.inner);
    }

    /// Tear down after a failure detected outside the socket loop.
    pub fn unexpected_disconnect(&self, reason: DisconnectReason) {
        unexpected_disconnect(&self.inner, reason);
    }

    /// Close the connection without touching credentials.
    pub fn close(&self) {
        self.inner.begin_close(DisconnectReason::Intentional);
    }

    /// Say goodbye to the server, drop credentials and close.
    pub async fn logout(&self) {
        if self.inner.state() == ConnectionState::Open {
            let tag = self.inner.tagger.next_tag(false);
            let frame = framer::compose_json(&tag, &json!(["admin", "Conn", "disconnect"]));
            if self.inner.send_frame(frame, &tag, None).is_err() {
                debug!("goodbye frame not sent, socket already gone");
            }
        }
        *self.inner.auth.write().unwrap() = None;
        self.inner.begin_close(DisconnectReason::Intentional);
    }
}

impl Inner {
    fn state(&self) -> ConnectionState {
        self.state_tx.borrow().state
    }

    async fn wait_open(&self) -> Result<(), WaError> {
        let mut rx = self.state_tx.subscribe();
        loop {
            let snapshot = *rx.borrow_and_update();
            match snapshot.state {
                ConnectionState::Open => return Ok(()),
                ConnectionState::Closed | ConnectionState::Closing => {
                    match snapshot.close.map(|c| c.reason) {
                        Some(DisconnectReason::InvalidSession) => {
                            return Err(WaError::InvalidSession)
                        }
                        Some(DisconnectReason::Intentional) => return Err(WaError::Intentional),
                        _ => {}
                    }
                }
                ConnectionState::Connecting => {}
            }
            if rx.changed().await.is_err() {
                return Err(WaError::NotConnected);
            }
        }
    }

    /// Queue a frame on the socket task and count the send.
    fn send_frame(
        &self,
        frame: WireFrame,
        tag: &str,
        binary_flags: Option<(u8, u8)>,
    ) -> Result<(), WaError> {
        let payload = match &frame {
            WireFrame::Text(text) => text.clone(),
            WireFrame::Binary(_) => String::new(),
        };
        {
            let link = self.link.lock().unwrap();
            let link = link.as_ref().ok_or(WaError::NotConnected)?;
            link.tx.send(frame).map_err(|_| WaError::NotConnected)?;
        }
        self.tagger.bump();
        self.record_log(MessageLogEntry {
            tag: tag.to_string(),
            payload,
            from_me: true,
            binary_flags,
        });
        Ok(())
    }

    fn record_log(&self, entry: MessageLogEntry) {
        if !self.opts.log_messages {
            return;
        }
        let mut log = self.msg_log.lock().unwrap();
        log.push_back(entry);
        while log.len() > self.opts.max_cached_messages {
            log.pop_front();
        }
    }

    fn begin_close(&self, reason: DisconnectReason) {
        let mut closing = false;
        self.state_tx.send_modify(|snapshot| {
            if !matches!(snapshot.state, ConnectionState::Closed) {
                snapshot.state = ConnectionState::Closing;
                closing = true;
            }
        });
        if closing {
            self.close_internal(reason, false);
        }
    }

    /// The single transition into `closed`: fail waiters, release timers,
    /// publish `ws-close` then `close`. Returns false when the connection
    /// was already closed.
    fn close_internal(&self, reason: DisconnectReason, will_reconnect: bool) -> bool {
        let mut proceed = false;
        self.state_tx.send_modify(|snapshot| {
            if snapshot.state != ConnectionState::Closed {
                snapshot.state = ConnectionState::Closed;
                snapshot.close = Some(CloseEvent {
                    reason,
                    is_reconnecting: will_reconnect,
                });
                proceed = true;
            }
        });
        if !proceed {
            return false;
        }

        if let Some(link) = self.link.lock().unwrap().take() {
            link.cancel.cancel();
        }
        self.liveness.release();
        self.correlator.fail_all(WaError::from_disconnect(reason));
        self.phone_connected.store(false, Ordering::SeqCst);
        if reason == DisconnectReason::InvalidSession {
            *self.auth.write().unwrap() = None;
        }

        info!(%reason, will_reconnect, "connection closed");
        self.bus.publish(topic::WS_CLOSE, &Event::WsClose { reason });
        self.bus.publish(
            topic::CLOSE,
            &Event::Close {
                reason,
                is_reconnecting: will_reconnect,
            },
        );
        true
    }

    /// `wait_open` bounded by `pending_request_timeout`.
    async fn wait_for_connection(&self) -> Result<(), WaError> {
        match self.opts.pending_request_timeout {
            Some(limit) if limit.is_zero() => Err(WaError::Closed { code: 428 }),
            Some(limit) => tokio::time::timeout(limit, self.wait_open())
                .await
                .map_err(|_| WaError::Timeout)?,
            None => self.wait_open().await,
        }
    }
}

async fn connect_inner(inner: &Arc<Inner>) -> Result<(), WaError> {
    let mut started = false;
    inner.state_tx.send_modify(|snapshot| {
        if snapshot.state == ConnectionState::Closed {
            snapshot.state = ConnectionState::Connecting;
            snapshot.close = None;
            started = true;
        }
    });
    if !started {
        return Err(WaError::AlreadyConnected);
    }

    info!("dialing");
    match inner.dialer.dial().await {
        Ok(transport) => {
            // a close racing the dial wins; the fresh socket is discarded
            if inner.state() != ConnectionState::Connecting {
                return Err(WaError::Intentional);
            }
            on_socket_open(inner, transport);
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "dial failed");
            unexpected_disconnect(inner, DisconnectReason::Error);
            Err(e)
        }
    }
}

fn on_socket_open(inner: &Arc<Inner>, transport: Box<dyn Transport>) {
    inner.tagger.reset();
    inner.retries.store(0, Ordering::SeqCst);

    let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    *inner.link.lock().unwrap() = Some(Link {
        tx,
        cancel: cancel.clone(),
        generation,
    });

    tokio::spawn(socket_task(inner.clone(), transport, rx, cancel, generation));
    spawn_phone_probe(inner);

    inner.state_tx.send_modify(|snapshot| {
        snapshot.state = ConnectionState::Open;
        snapshot.close = None;
    });
    inner.bus.publish(topic::OPEN, &Event::Open);
    info!("connection open");
}

/// The single loop owning the transport: writes queued frames, reads
/// inbound ones, and reports the peer closing the socket.
async fn socket_task(
    inner: Arc<Inner>,
    mut transport: Box<dyn Transport>,
    mut out_rx: mpsc::UnboundedReceiver<WireFrame>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // flush frames queued before the close, the goodbye included
                while let Ok(frame) = out_rx.try_recv() {
                    let _ = transport.send(frame).await;
                }
                transport.close().await;
                return;
            }
            outbound = out_rx.recv() => match outbound {
                Some(frame) => {
                    if let Err(e) = transport.send(frame).await {
                        warn!(error = %e, "socket send failed");
                        on_socket_closed(&inner, generation, DisconnectReason::Error);
                        return;
                    }
                }
                None => {
                    transport.close().await;
                    return;
                }
            },
            inbound = transport.recv() => match inbound {
                Some(frame) => handle_frame(&inner, frame),
                None => {
                    on_socket_closed(&inner, generation, DisconnectReason::Close);
                    return;
                }
            },
        }
    }
}

fn on_socket_closed(inner: &Arc<Inner>, generation: u64, reason: DisconnectReason) {
    // ignore callbacks from sockets a newer connect already superseded
    let stale = inner
        .link
        .lock()
        .unwrap()
        .as_ref()
        .is_some_and(|link| link.generation != generation);
    if stale {
        return;
    }
    unexpected_disconnect(inner, reason);
}

fn unexpected_disconnect(inner: &Arc<Inner>, reason: DisconnectReason) {
    let will_reconnect = inner.opts.reconnect_mode.should_reconnect(reason)
        && inner.retries.load(Ordering::SeqCst) < inner.opts.max_retries;
    if inner.close_internal(reason, will_reconnect) && will_reconnect {
        schedule_reconnect(inner);
    }
}

fn schedule_reconnect(inner: &Arc<Inner>) {
    let attempt = inner.retries.fetch_add(1, Ordering::SeqCst) + 1;
    let cooldown = inner.opts.connect_cooldown;
    info!(attempt, ?cooldown, "scheduling reconnect");
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::time::sleep(cooldown).await;
        if inner.state() != ConnectionState::Closed {
            return;
        }
        if let Err(e) = connect_inner(&inner).await {
            warn!(error = %e, attempt, "reconnect failed");
        }
    });
}

fn handle_frame(inner: &Arc<Inner>, frame: WireFrame) {
    let (tag, payload) = match framer::parse_inbound(&frame) {
        Ok(parsed) => parsed,
        Err(e) => {
            debug!(error = %e, "dropping malformed frame");
            return;
        }
    };

    match payload {
        InboundPayload::Pong(ts) => trace!(%ts, "pong"),
        InboundPayload::Json(json) => {
            inner.record_log(MessageLogEntry {
                tag: tag.clone(),
                payload: json.to_string(),
                from_me: false,
                binary_flags: None,
            });
            route(inner, tag, ServerMessage::Json(json));
        }
        InboundPayload::Sealed(sealed) => {
            let auth = inner.auth.read().unwrap().clone();
            let Some(auth) = auth else {
                debug!(%tag, "dropping binary frame, no credentials");
                return;
            };
            let decoded = crypto::open(&sealed, &auth.enc_key, &auth.mac_key).and_then(|plain| {
                binary::decode(&plain).map_err(|e| WaError::Frame(e.to_string()))
            });
            match decoded {
                Ok(node) => {
                    inner.record_log(MessageLogEntry {
                        tag: tag.clone(),
                        payload: node.to_json().to_string(),
                        from_me: false,
                        binary_flags: None,
                    });
                    route(inner, tag, ServerMessage::Node(node));
                }
                // bad frames are dropped, the socket stays open
                Err(e) => warn!(%tag, error = %e, "dropping undecodable binary frame"),
            }
        }
    }
}

fn route(inner: &Arc<Inner>, tag: String, message: ServerMessage) {
    if let Some(reason) = server_disconnect_reason(&message) {
        info!(%reason, "server requested disconnect");
        unexpected_disconnect(inner, reason);
        return;
    }

    if let Some(unclaimed) = inner.correlator.deliver(&tag, message) {
        inner
            .bus
            .publish(&topic::tagged(&tag), &Event::Message(unclaimed.clone()));
        if let ServerMessage::Json(Value::Array(items)) = &unclaimed {
            if let Some(head) = items.first().and_then(Value::as_str) {
                inner.bus.publish(head, &Event::Message(unclaimed.clone()));
            }
        }
    }
}

/// Recognize `["Cmd", {"type": "disconnect", ...}]` pushes.
fn server_disconnect_reason(message: &ServerMessage) -> Option<DisconnectReason> {
    let ServerMessage::Json(Value::Array(items)) = message else {
        return None;
    };
    if items.first().and_then(Value::as_str) != Some("Cmd") {
        return None;
    }
    let attrs = items.get(1)?.as_object()?;
    if attrs.get("type").and_then(Value::as_str) != Some("disconnect") {
        return None;
    }
    match attrs.get("kind").and_then(Value::as_str) {
        Some("replaced") => Some(DisconnectReason::Replaced),
        _ => Some(DisconnectReason::Close),
    }
}

async fn query_once(inner: &Arc<Inner>, options: &QueryOptions) -> Result<ServerMessage, WaError> {
    if options.wait_for_open {
        inner.wait_for_connection().await?;
    }

    let pending = {
        // Tag assignment, registration and hand-off stay together so a
        // reply can never beat its waiter and concurrent sends get
        // distinct tags.
        let _guard = inner.send_lock.lock().await;
        let tag = options
            .tag
            .clone()
            .unwrap_or_else(|| inner.tagger.next_tag(options.long_tag));
        let pending = inner.correlator.register(&tag, options.requires_phone)?;

        if let Some((metric, flag)) = options.binary_tags {
            let auth = inner
                .auth
                .read()
                .unwrap()
                .clone()
                .ok_or(WaError::NoSession)?;
            let node =
                Node::from_json(&options.json).map_err(|e| WaError::Frame(e.to_string()))?;
            let sealed = crypto::seal(&binary::encode(&node), &auth.enc_key, &auth.mac_key);
            inner.send_frame(
                framer::compose_binary(&tag, metric, flag, &sealed),
                &tag,
                Some((metric as u8, flag)),
            )?;
        } else {
            inner.send_frame(framer::compose_json(&tag, &options.json), &tag, None)?;
        }
        pending
    };

    let reply = match options.timeout {
        Some(deadline) => tokio::time::timeout(deadline, pending.wait())
            .await
            .map_err(|_| WaError::Timeout)??,
        None => pending.wait().await?,
    };

    if options.expect_2xx {
        if let Some(status) = reply.status() {
            if !(200..300).contains(&status) {
                if status == 599 {
                    warn!("server replied 599, forcing disconnect");
                    unexpected_disconnect(inner, DisconnectReason::BadSession);
                    return Err(WaError::BadSession);
                }
                return Err(WaError::ServerError {
                    status,
                    status_text: error::status_text(status).to_string(),
                    query: options.json.to_string(),
                });
            }
        }
    }

    if options.start_debounce {
        arm_idle_debounce(inner);
    }
    Ok(reply)
}

/// Probe interval armed for the lifetime of the open state; each tick only
/// fires while a requires-phone waiter exists.
fn spawn_phone_probe(inner: &Arc<Inner>) {
    let token = CancellationToken::new();
    inner.liveness.set_phone_probe(token.clone());
    let inner = inner.clone();
    tokio::spawn(async move {
        let period = inner.opts.phone_response_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = ticker.tick() => {
                    if inner.state() != ConnectionState::Open {
                        continue;
                    }
                    if !inner.correlator.has_phone_waiters() {
                        continue;
                    }
                    probe_phone(&inner).await;
                }
            }
        }
    });
}

/// Send `["admin","test"]`, assume the phone is gone until it answers.
async fn probe_phone(inner: &Arc<Inner>) {
    let pending = {
        let _guard = inner.send_lock.lock().await;
        let tag = inner.tagger.next_tag(false);
        let Ok(pending) = inner.correlator.register(&tag, false) else {
            return;
        };
        let frame = framer::compose_json(&tag, &json!(["admin", "test"]));
        if inner.send_frame(frame, &tag, None).is_err() {
            return;
        }
        pending
    };
    debug!("phone probe sent");

    inner.phone_connected.store(false, Ordering::SeqCst);
    inner
        .bus
        .publish(topic::PHONE_CHANGE, &Event::PhoneChange { connected: false });

    let deadline = inner.opts.phone_response_interval;
    let inner = inner.clone();
    tokio::spawn(async move {
        if let Ok(Ok(_)) = tokio::time::timeout(deadline, pending.wait()).await {
            inner.phone_connected.store(true, Ordering::SeqCst);
            inner
                .bus
                .publish(topic::PHONE_CHANGE, &Event::PhoneChange { connected: true });
        }
    });
}

fn arm_idle_debounce(inner: &Arc<Inner>) {
    let token = CancellationToken::new();
    inner.liveness.arm_debounce(token.clone());
    let window = inner.opts.max_idle;
    let inner = inner.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(window) => {
                debug!("idle debounce expired");
                unexpected_disconnect(&inner, DisconnectReason::TimedOut);
            }
        }
    });
}
