use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{
    AckPayload, Announcement, ChatMessage, InboundEvent, OutboundChatMessage, PresenceUpdate, RoomPayload,
    ERROR_EVENT, JOIN_EVENT, LEAVE_EVENT, SEND_EVENT,
};

use super::listeners::{self, ListenerHandle, Listeners};
use super::rooms::RoomSubscriptions;
use super::transport::{ConnectionState, OutboundEvent, Transport, TransportError, TransportEvent, TransportLink};
use super::wsclient::WsTransport;

/// Timeouts and reconnect backoff of the realtime client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimings {
    /// How long `send` waits for the backend acknowledgment
    pub ack_timeout: Duration,
    /// Budget for opening the transport and receiving the connect acknowledgment
    pub connect_timeout: Duration,
    pub reconnect_delay: Duration,
    pub reconnect_delay_max: Duration,
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(20),
            reconnect_delay: Duration::from_secs(1),
            reconnect_delay_max: Duration::from_secs(5),
        }
    }
}

impl ClientTimings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ack_timeout: config.ack_timeout(),
            connect_timeout: config.connect_timeout(),
            reconnect_delay: config.reconnect_delay(),
            reconnect_delay_max: config.reconnect_delay_max(),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based): doubles each time, capped.
    pub fn reconnect_backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.reconnect_delay.saturating_mul(factor).min(self.reconnect_delay_max)
    }
}

/// Settings for the realtime client
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    pub base_url: String,
    pub bearer_token: Option<String>,
    pub timings: ClientTimings,
}

impl RealtimeConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.realtime_base_url(),
            bearer_token: None,
            timings: ClientTimings::from_config(config),
        }
    }
}

/// Identifies the live connection a caller is talking to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub epoch: u64,
    pub sid: Option<String>,
}

struct Session {
    state: ConnectionState,
    epoch: u64,
    sid: Option<String>,
    /// Set by an explicit disconnect; sends stop reconnecting until a join or connect.
    shut_down: bool,
    last_error: Option<String>,
    outgoing: Option<mpsc::UnboundedSender<OutboundEvent>>,
    rooms: RoomSubscriptions,
    pending_acks: HashMap<u64, oneshot::Sender<Option<Value>>>,
    next_ack: u64,
    driver: Option<JoinHandle<()>>,
    /// Pending automatic reconnect after an unexpected drop
    reconnect: Option<JoinHandle<()>>,
    reconnect_attempts: u32,
}

impl Session {
    fn emit(&self, name: &str, data: Value, ack: Option<u64>) -> bool {
        debug!("Socket: {} emit {}", name, data);
        match &self.outgoing {
            Some(tx) => tx.send(OutboundEvent { name: name.to_string(), data, ack }).is_ok(),
            None => false,
        }
    }

    fn emit_room(&self, name: &str, plan_id: &str) -> bool {
        let payload = RoomPayload { plan_id: plan_id.to_string() };
        match serde_json::to_value(payload) {
            Ok(data) => self.emit(name, data, None),
            Err(_) => false,
        }
    }

    fn fail_pending_acks(&mut self) {
        for (_, tx) in self.pending_acks.drain() {
            let _ = tx.send(None);
        }
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect.take() {
            timer.abort();
        }
    }
}

struct Inner<T: Transport> {
    transport: T,
    timings: ClientTimings,
    session: Mutex<Session>,
    listeners: Mutex<Listeners>,
    state_tx: watch::Sender<ConnectionState>,
}

impl<T: Transport> Inner<T> {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, session: &mut Session, state: ConnectionState) {
        session.state = state;
        self.state_tx.send_replace(state);
    }

    /// Disconnected → Connecting. Returns the epoch the caller should wait on.
    fn start_connect(self: &Arc<Self>, session: &mut Session) -> Result<u64, TransportError> {
        if session.state != ConnectionState::Disconnected {
            return Ok(session.epoch);
        }
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        session.cancel_reconnect();
        session.epoch += 1;
        session.shut_down = false;
        session.last_error = None;
        session.rooms.begin_epoch();
        self.set_state(session, ConnectionState::Connecting);

        let epoch = session.epoch;
        info!("Socket: connecting (epoch {})", epoch);
        session.driver = Some(runtime.spawn(drive(Arc::clone(self), epoch)));
        Ok(epoch)
    }

    fn attach(&self, epoch: u64, outgoing: mpsc::UnboundedSender<OutboundEvent>) -> bool {
        let mut session = self.session();
        if session.epoch != epoch || session.state != ConnectionState::Connecting {
            return false;
        }
        session.outgoing = Some(outgoing);
        true
    }

    /// Connecting → Connected, then replay every subscribed room on this epoch.
    fn on_connected(&self, epoch: u64, sid: Option<String>) {
        let mut session = self.session();
        if session.epoch != epoch {
            return;
        }
        info!("Socket: connected {:?}", sid);
        session.sid = sid;
        session.reconnect_attempts = 0;
        self.set_state(&mut session, ConnectionState::Connected);
        for plan_id in session.rooms.drain_pending() {
            debug!("Socket: plan:join replay {}", plan_id);
            session.emit_room(JOIN_EVENT, &plan_id);
        }
    }

    fn on_closed(self: &Arc<Self>, epoch: u64, reason: &str) {
        let mut session = self.session();
        if session.epoch != epoch || session.state == ConnectionState::Disconnected {
            return;
        }
        info!("Socket: disconnected ({})", reason);
        session.outgoing = None;
        session.sid = None;
        session.driver = None;
        if session.last_error.is_none() {
            session.last_error = Some(reason.to_string());
        }
        session.fail_pending_acks();
        self.set_state(&mut session, ConnectionState::Disconnected);
        if !session.shut_down {
            self.schedule_reconnect(&mut session);
        }
    }

    /// Retry the connection after the backoff delay unless a disconnect or a
    /// newer connection attempt gets there first.
    fn schedule_reconnect(self: &Arc<Self>, session: &mut Session) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let delay = self.timings.reconnect_backoff(session.reconnect_attempts);
        session.reconnect_attempts = session.reconnect_attempts.saturating_add(1);
        info!("Socket: reconnect attempt {} in {:?}", session.reconnect_attempts, delay);

        let epoch = session.epoch;
        let weak = Arc::downgrade(self);
        session.cancel_reconnect();
        session.reconnect = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut session = inner.session();
            if session.shut_down || session.epoch != epoch {
                return;
            }
            session.reconnect = None;
            if let Err(e) = inner.start_connect(&mut session) {
                warn!("Socket: reconnect failed to start: {}", e);
            }
        }));
    }

    fn on_connect_failed(&self, epoch: u64, error: &TransportError) {
        warn!("Socket: connect_error {}", error);
        let mut session = self.session();
        if session.epoch == epoch {
            session.last_error = Some(error.to_string());
        }
    }

    fn on_ack(&self, epoch: u64, id: u64, data: Option<Value>) {
        let mut session = self.session();
        if session.epoch != epoch {
            return;
        }
        match session.pending_acks.remove(&id) {
            Some(tx) => {
                let _ = tx.send(data.filter(|v| !v.is_null()));
            }
            None => debug!("Socket: ack {} has no waiter", id),
        }
    }

    fn on_transport_event(self: &Arc<Self>, epoch: u64, event: TransportEvent) {
        match event {
            TransportEvent::Connected { sid } => self.on_connected(epoch, sid),
            TransportEvent::Event { name, data } => self.on_event(epoch, &name, &data),
            TransportEvent::Ack { id, data } => self.on_ack(epoch, id, data),
            TransportEvent::Closed { reason } => self.on_closed(epoch, &reason),
        }
    }

    fn on_event(&self, epoch: u64, name: &str, data: &Value) {
        if name == ERROR_EVENT {
            warn!("Socket: server error {}", data);
            return;
        }
        let event = match InboundEvent::from_wire(name, data) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!("Socket: onAny {} {}", name, data);
                return;
            }
            Err(e) => {
                warn!("Socket: malformed {} payload: {}", name, e);
                return;
            }
        };
        {
            let session = self.session();
            if session.epoch != epoch {
                return;
            }
            if let Some(plan_id) = event.plan_id() {
                if !session.rooms.contains(plan_id) {
                    debug!("Socket: dropping {} for left plan {}", name, plan_id);
                    return;
                }
            }
        }
        listeners::dispatch(&self.listeners, &event);
    }
}

/// Marks the epoch closed however the driver ends, including abort.
struct DriverGuard<T: Transport> {
    inner: Arc<Inner<T>>,
    epoch: u64,
}

impl<T: Transport> Drop for DriverGuard<T> {
    fn drop(&mut self) {
        self.inner.on_closed(self.epoch, "driver stopped");
    }
}

async fn drive<T: Transport>(inner: Arc<Inner<T>>, epoch: u64) {
    let _guard = DriverGuard { inner: Arc::clone(&inner), epoch };

    let connect_timeout = inner.timings.connect_timeout;
    let mut incoming = match tokio::time::timeout(connect_timeout, handshake(&inner, epoch)).await {
        Ok(Ok(incoming)) => incoming,
        Ok(Err(e)) => {
            inner.on_connect_failed(epoch, &e);
            return;
        }
        Err(_) => {
            let e = TransportError::Unavailable(format!("connect timed out after {:?}", connect_timeout));
            inner.on_connect_failed(epoch, &e);
            return;
        }
    };

    while let Some(event) = incoming.recv().await {
        let closed = matches!(event, TransportEvent::Closed { .. });
        inner.on_transport_event(epoch, event);
        if closed {
            break;
        }
    }
}

/// Open the transport and wait for the server's connect acknowledgment.
async fn handshake<T: Transport>(
    inner: &Arc<Inner<T>>,
    epoch: u64,
) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
    let TransportLink { outgoing, mut incoming } = inner.transport.connect().await?;
    if !inner.attach(epoch, outgoing) {
        return Err(TransportError::Closed);
    }

    while let Some(event) = incoming.recv().await {
        match event {
            TransportEvent::Connected { sid } => {
                inner.on_connected(epoch, sid);
                return Ok(incoming);
            }
            TransportEvent::Closed { reason } => return Err(TransportError::Unavailable(reason)),
            other => inner.on_transport_event(epoch, other),
        }
    }
    Err(TransportError::Closed)
}

/// Realtime plan-room client: one connection multiplexed over every joined plan.
///
/// Construction does no I/O. The connection opens on the first `connect`,
/// `join_plan` or `send`, and is closed by `disconnect` or when the client
/// is dropped. An unexpected drop is retried with exponential backoff, and
/// every (re)connect replays the joined plans exactly once.
pub struct PlanRoomClient<T: Transport = WsTransport> {
    inner: Arc<Inner<T>>,
}

impl PlanRoomClient<WsTransport> {
    pub fn websocket(config: RealtimeConfig) -> Self {
        let mut transport = WsTransport::new(&config.base_url);
        if let Some(token) = &config.bearer_token {
            transport = transport.with_bearer(token.clone());
        }
        Self::new(transport, config.timings)
    }
}

impl<T: Transport> PlanRoomClient<T> {
    pub fn new(transport: T, timings: ClientTimings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let session = Session {
            state: ConnectionState::Disconnected,
            epoch: 0,
            sid: None,
            shut_down: false,
            last_error: None,
            outgoing: None,
            rooms: RoomSubscriptions::default(),
            pending_acks: HashMap::new(),
            next_ack: 0,
            driver: None,
            reconnect: None,
            reconnect_attempts: 0,
        };
        Self {
            inner: Arc::new(Inner {
                transport,
                timings,
                session: Mutex::new(session),
                listeners: Mutex::new(Listeners::default()),
                state_tx,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.session().state
    }

    /// Observe connection state changes, including unexpected drops.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn connection_info(&self) -> Option<ConnectionInfo> {
        let session = self.inner.session();
        (session.state == ConnectionState::Connected).then(|| ConnectionInfo {
            epoch: session.epoch,
            sid: session.sid.clone(),
        })
    }

    pub fn joined_plans(&self) -> Vec<String> {
        self.inner.session().rooms.plans().to_vec()
    }

    /// Open the connection, or return the live one. Waits for the server's
    /// connect acknowledgment.
    pub async fn connect(&self) -> Result<ConnectionInfo, TransportError> {
        let mut state_rx = {
            let mut session = self.inner.session();
            if session.state == ConnectionState::Connected {
                return Ok(ConnectionInfo { epoch: session.epoch, sid: session.sid.clone() });
            }
            self.inner.start_connect(&mut session)?;
            self.inner.state_tx.subscribe()
        };

        loop {
            let state = *state_rx.borrow_and_update();
            match state {
                ConnectionState::Connected => break,
                ConnectionState::Disconnected => {
                    let reason = self.inner.session().last_error.clone().unwrap_or_else(|| "closed".to_string());
                    return Err(TransportError::Unavailable(reason));
                }
                ConnectionState::Connecting => {}
            }
            if state_rx.changed().await.is_err() {
                return Err(TransportError::Closed);
            }
        }

        self.connection_info().ok_or(TransportError::Closed)
    }

    /// Close the connection and stop reconnecting. Joined plans are kept and
    /// replayed on the next connect.
    pub fn disconnect(&self) {
        let mut session = self.inner.session();
        session.shut_down = true;
        session.reconnect_attempts = 0;
        session.cancel_reconnect();
        if session.state == ConnectionState::Disconnected {
            return;
        }
        info!("Socket: disconnect requested (epoch {})", session.epoch);
        session.outgoing = None;
        session.sid = None;
        session.fail_pending_acks();
        self.inner.set_state(&mut session, ConnectionState::Disconnected);
        if let Some(driver) = session.driver.take() {
            driver.abort();
        }
    }

    pub fn join_plan(&self, plan_id: &str) {
        let mut session = self.inner.session();
        session.rooms.insert(plan_id);
        match session.state {
            ConnectionState::Connected => {
                if session.rooms.mark_emitted(plan_id) {
                    debug!("Socket: plan:join emit (connected) {}", plan_id);
                    session.emit_room(JOIN_EVENT, plan_id);
                }
            }
            ConnectionState::Connecting => {
                debug!("Socket: plan:join deferred until connect {}", plan_id);
            }
            ConnectionState::Disconnected => {
                if let Err(e) = self.inner.start_connect(&mut session) {
                    warn!("Socket: cannot connect for plan {}: {}", plan_id, e);
                }
            }
        }
    }

    pub fn leave_plan(&self, plan_id: &str) {
        let mut session = self.inner.session();
        session.rooms.remove(plan_id);
        if session.state == ConnectionState::Connected {
            session.emit_room(LEAVE_EVENT, plan_id);
        }
    }

    /// Send a chat message and wait for the backend's acknowledgment.
    ///
    /// `None` means the message could not be delivered or confirmed: no
    /// connection, the connection dropped, or the ack timed out. Never retried.
    pub async fn send(&self, plan_id: &str, text: &str) -> Option<AckPayload> {
        if self.inner.session().shut_down {
            debug!("Socket: send after disconnect dropped");
            return None;
        }
        if let Err(e) = self.connect().await {
            warn!("Socket: send to plan {} without connection: {}", plan_id, e);
            return None;
        }

        let payload = serde_json::to_value(OutboundChatMessage {
            plan_id: plan_id.to_string(),
            text: text.to_string(),
        })
        .ok()?;

        let (tx, rx) = oneshot::channel();
        let id = {
            let mut session = self.inner.session();
            if session.state != ConnectionState::Connected {
                return None;
            }
            let id = session.next_ack;
            session.next_ack += 1;
            if !session.emit(SEND_EVENT, payload, Some(id)) {
                return None;
            }
            session.pending_acks.insert(id, tx);
            id
        };

        match tokio::time::timeout(self.inner.timings.ack_timeout, rx).await {
            Ok(Ok(Some(value))) => match serde_json::from_value::<AckPayload>(value) {
                Ok(ack) => {
                    debug!("Socket: plan:message:send ack {:?}", ack);
                    Some(ack)
                }
                Err(e) => {
                    warn!("Socket: unreadable ack for plan {}: {}", plan_id, e);
                    None
                }
            },
            Ok(_) => None,
            Err(_) => {
                warn!("Socket: ack for plan {} timed out", plan_id);
                self.inner.session().pending_acks.remove(&id);
                None
            }
        }
    }

    pub fn on_message<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&ChatMessage) + Send + Sync + 'static,
    {
        self.listeners().on_message(Arc::new(handler))
    }

    pub fn on_presence<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&PresenceUpdate) + Send + Sync + 'static,
    {
        self.listeners().on_presence(Arc::new(handler))
    }

    pub fn on_announcement<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&Announcement) + Send + Sync + 'static,
    {
        self.listeners().on_announcement(Arc::new(handler))
    }

    /// Remove the listener registered under `handle`. False if it was already gone.
    pub fn off(&self, handle: ListenerHandle) -> bool {
        self.listeners().remove(handle)
    }

    fn listeners(&self) -> MutexGuard<'_, Listeners> {
        self.inner.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Transport> Drop for PlanRoomClient<T> {
    fn drop(&mut self) {
        self.disconnect();
    }
}
