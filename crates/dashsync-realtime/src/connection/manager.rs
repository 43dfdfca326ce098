//! ConnectionManager - lifecycle of the push channel
//!
//! State machine with race condition prevention:
//! - `generation`: monotonic counter, incremented whenever the current channel
//!   is discarded (new attempt, disconnect). Signals from older channels,
//!   open results and reconnect timers carry the generation they were started
//!   under and are dropped when it no longer matches.
//! - At most one reconnect timer is pending; scheduling aborts the previous one.
//! - Listeners are always invoked after the state lock is released.
//! - Transitions and their notifications are serialized by a reentrant
//!   `transitions` lock, always taken before the state lock, so listeners see
//!   states in the order they were entered. Listeners may call back into the
//!   manager from the notifying thread.
//!
//! ```text
//!  Disconnected ──connect()──▶ Connecting ──open──▶ Connected
//!       ▲                        │   ▲                 │
//!       │ disconnect()      fail │   │ timer      lost │
//!       │                        ▼   │                 │
//!       └──────────────────── Errored ◀────────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashsync_core::{
    ConnectionConfig, ConnectionState, EventBus, EventCallback, OutboundMessage, PushEvent,
    Subscription,
};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use super::listeners::ListenerSet;
use super::policy::ReconnectPolicy;
use crate::transport::{ChannelHandle, ChannelSignal, Transport, TransportError};

/// Keep-alive settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// How often a ping is sent while connected
    pub interval: Duration,
    /// Channel is declared dead when nothing arrives for this long
    pub timeout: Duration,
}

/// Result of a `connect()` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// A new attempt was started
    Started,
    AlreadyConnected,
    AlreadyConnecting,
    /// The circuit breaker is open; call `reset_circuit()` first
    CircuitOpen,
    /// The manager was destroyed
    Destroyed,
}

/// One-time signal that reconnection gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalFailure {
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Whether further connects are now refused
    pub circuit_open: bool,
}

/// A reconnect timer was scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectScheduled {
    pub attempt: u32,
    pub delay: Duration,
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub reconnect_pending: bool,
    pub pending_delay: Option<Duration>,
    /// Delay of the most recently scheduled reconnect
    pub last_delay: Option<Duration>,
    pub circuit_open: bool,
    pub terminal_signaled: bool,
    pub joined_rooms: Vec<String>,
    pub last_error: Option<String>,
}

struct ActiveChannel {
    id: Uuid,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    reader: JoinHandle<()>,
}

impl ActiveChannel {
    /// Tear the channel down from outside its reader task
    fn close(self) {
        self.reader.abort();
        debug!(channel_id = %self.id, "[ConnectionManager] Channel discarded");
    }
}

struct PendingReconnect {
    handle: JoinHandle<()>,
    attempt: u32,
    delay: Duration,
}

#[derive(Default)]
struct ManagerState {
    state: ConnectionState,
    generation: u64,
    reconnect_attempts: u32,
    channel: Option<ActiveChannel>,
    connect_task: Option<JoinHandle<()>>,
    reconnect_timer: Option<PendingReconnect>,
    circuit_open: bool,
    terminal_signaled: bool,
    destroyed: bool,
    joined_rooms: BTreeSet<String>,
    last_error: Option<String>,
    last_delay: Option<Duration>,
}

struct Inner {
    id: Uuid,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    policy: ReconnectPolicy,
    heartbeat: Option<HeartbeatConfig>,
    /// Held from a transition through its notifications
    transitions: ReentrantMutex<()>,
    state: Mutex<ManagerState>,
    state_tx: watch::Sender<ConnectionState>,
    state_listeners: ListenerSet<ConnectionState>,
    terminal_listeners: ListenerSet<TerminalFailure>,
    reconnect_listeners: ListenerSet<ReconnectScheduled>,
}

/// Builder for [`ConnectionManager`]
pub struct ConnectionManagerBuilder {
    transport: Arc<dyn Transport>,
    bus: EventBus,
    policy: ReconnectPolicy,
    heartbeat: Option<HeartbeatConfig>,
}

impl ConnectionManagerBuilder {
    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.heartbeat = Some(HeartbeatConfig { interval, timeout });
        self
    }

    pub fn without_heartbeat(mut self) -> Self {
        self.heartbeat = None;
        self
    }

    pub fn build(self) -> ConnectionManager {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            id: Uuid::new_v4(),
            transport: self.transport,
            bus: self.bus,
            policy: self.policy,
            heartbeat: self.heartbeat,
            transitions: ReentrantMutex::new(()),
            state: Mutex::new(ManagerState::default()),
            state_tx,
            state_listeners: ListenerSet::new("state"),
            terminal_listeners: ListenerSet::new("terminal"),
            reconnect_listeners: ListenerSet::new("reconnect"),
        };
        ConnectionManager {
            inner: Arc::new(inner),
        }
    }
}

/// Owner of the single push channel of an application session
///
/// Cheaply cloneable; clones control the same connection. Must be used from
/// within a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    /// Create a manager with the default policy and no heartbeat
    pub fn new(transport: Arc<dyn Transport>, bus: EventBus) -> Self {
        Self::builder(transport, bus).build()
    }

    pub fn builder(transport: Arc<dyn Transport>, bus: EventBus) -> ConnectionManagerBuilder {
        ConnectionManagerBuilder {
            transport,
            bus,
            policy: ReconnectPolicy::default(),
            heartbeat: None,
        }
    }

    pub fn from_config(
        config: &ConnectionConfig,
        transport: Arc<dyn Transport>,
        bus: EventBus,
    ) -> Self {
        let mut builder =
            Self::builder(transport, bus).with_policy(ReconnectPolicy::from_config(config));
        if let Some(interval) = config.heartbeat_interval() {
            builder = builder.with_heartbeat(interval, config.heartbeat_timeout());
        }
        builder.build()
    }

    // =========================================================================
    // State
    // =========================================================================

    pub fn state(&self) -> ConnectionState {
        self.inner.state.lock().state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.inner.policy
    }

    /// Async view of the connection state
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        let st = self.inner.state.lock();
        ConnectionStats {
            state: st.state,
            reconnect_attempts: st.reconnect_attempts,
            reconnect_pending: st.reconnect_timer.is_some(),
            pending_delay: st.reconnect_timer.as_ref().map(|p| p.delay),
            last_delay: st.last_delay,
            circuit_open: st.circuit_open,
            terminal_signaled: st.terminal_signaled,
            joined_rooms: st.joined_rooms.iter().cloned().collect(),
            last_error: st.last_error.clone(),
        }
    }

    /// Rooms joined on the current channel
    pub fn joined_rooms(&self) -> Vec<String> {
        self.inner.state.lock().joined_rooms.iter().cloned().collect()
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Open the channel
    ///
    /// A user-initiated connect starts a new disconnect episode: the attempt
    /// counter and the terminal signal are reset.
    pub fn connect(&self) -> ConnectOutcome {
        self.inner.connect()
    }

    /// Close the channel without triggering reconnection
    ///
    /// Returns `false` when already disconnected.
    pub fn disconnect(&self) -> bool {
        self.inner.disconnect()
    }

    /// Disconnect permanently and drop every listener
    pub fn destroy(&self) {
        self.inner.destroy();
    }

    /// Trip the circuit breaker by hand and disconnect
    pub fn disable(&self) {
        self.inner.state.lock().circuit_open = true;
        warn!(manager = %self.inner.id, "[ConnectionManager] Disabled, circuit open");
        self.inner.disconnect();
    }

    /// Close the circuit breaker so `connect()` works again
    pub fn reset_circuit(&self) {
        let mut st = self.inner.state.lock();
        st.circuit_open = false;
        st.reconnect_attempts = 0;
        st.terminal_signaled = false;
        info!(manager = %self.inner.id, "[ConnectionManager] Circuit reset");
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Ask the backend for a room's events; `false` if not connected
    pub fn join_room(&self, room_id: &str) -> bool {
        let mut st = self.inner.state.lock();
        let sent = self.inner.send_locked(
            &st,
            OutboundMessage::JoinRoom {
                room_id: room_id.to_string(),
            },
        );
        if sent {
            st.joined_rooms.insert(room_id.to_string());
            debug!(manager = %self.inner.id, room_id, "[ConnectionManager] Joined room");
        }
        sent
    }

    /// Stop receiving a room's events; `false` if not connected
    pub fn leave_room(&self, room_id: &str) -> bool {
        let mut st = self.inner.state.lock();
        let sent = self.inner.send_locked(
            &st,
            OutboundMessage::LeaveRoom {
                room_id: room_id.to_string(),
            },
        );
        if sent {
            st.joined_rooms.remove(room_id);
            debug!(manager = %self.inner.id, room_id, "[ConnectionManager] Left room");
        }
        sent
    }

    /// Pass-through emit; dropped (not queued) when not connected
    pub fn emit(&self, event_type: &str, data: serde_json::Value) -> bool {
        let st = self.inner.state.lock();
        self.inner.send_locked(
            &st,
            OutboundMessage::Emit {
                event_type: event_type.to_string(),
                data,
            },
        )
    }

    // =========================================================================
    // Listeners
    // =========================================================================

    /// Called once immediately with the current state, then on every transition
    pub fn on_connection_state_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        let _transition = self.inner.transitions.lock();
        let current = {
            let st = self.inner.state.lock();
            if st.destroyed {
                return Subscription::noop();
            }
            st.state
        };
        self.inner.state_listeners.add_and_call(
            Arc::new(move |state: &ConnectionState| callback(*state)),
            &current,
        )
    }

    /// Called once per disconnect episode when reconnection gives up
    pub fn on_terminal_failure<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&TerminalFailure) + Send + Sync + 'static,
    {
        if self.inner.state.lock().destroyed {
            return Subscription::noop();
        }
        self.inner.terminal_listeners.add(Arc::new(callback))
    }

    /// Called whenever a reconnect timer is scheduled
    pub fn on_reconnect_scheduled<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ReconnectScheduled) + Send + Sync + 'static,
    {
        if self.inner.state.lock().destroyed {
            return Subscription::noop();
        }
        self.inner.reconnect_listeners.add(Arc::new(callback))
    }

    /// Registered manager-level listeners (bus listeners not included)
    pub fn listener_count(&self) -> usize {
        self.inner.state_listeners.len()
            + self.inner.terminal_listeners.len()
            + self.inner.reconnect_listeners.len()
    }

    /// Shorthand for subscribing on the manager's event bus
    pub fn subscribe(&self, event_type: &str, callback: EventCallback) -> Subscription {
        self.inner.bus.subscribe(event_type, callback)
    }
}

impl Inner {
    fn set_state(&self, st: &mut ManagerState, state: ConnectionState) {
        st.state = state;
        self.state_tx.send_replace(state);
    }

    fn connect(self: &Arc<Self>) -> ConnectOutcome {
        let _transition = self.transitions.lock();
        let mut st = self.state.lock();
        if st.destroyed {
            warn!(manager = %self.id, "[ConnectionManager] connect() on destroyed manager");
            return ConnectOutcome::Destroyed;
        }
        if st.circuit_open {
            warn!(
                manager = %self.id,
                "[ConnectionManager] Circuit open, refusing to connect"
            );
            return ConnectOutcome::CircuitOpen;
        }
        match st.state {
            ConnectionState::Connected => return ConnectOutcome::AlreadyConnected,
            ConnectionState::Connecting => return ConnectOutcome::AlreadyConnecting,
            ConnectionState::Disconnected | ConnectionState::Errored => {}
        }

        st.reconnect_attempts = 0;
        st.terminal_signaled = false;
        info!(
            manager = %self.id,
            transport = %self.transport.description(),
            "[ConnectionManager] Connecting"
        );
        self.start_attempt(&mut st);
        drop(st);

        self.state_listeners.notify(&ConnectionState::Connecting);
        ConnectOutcome::Started
    }

    /// Discard whatever channel exists and open a new one
    fn start_attempt(self: &Arc<Self>, st: &mut ManagerState) {
        if let Some(pending) = st.reconnect_timer.take() {
            pending.handle.abort();
        }
        if let Some(task) = st.connect_task.take() {
            task.abort();
        }
        if let Some(channel) = st.channel.take() {
            channel.close();
        }
        st.joined_rooms.clear();
        st.generation += 1;
        let generation = st.generation;
        self.set_state(st, ConnectionState::Connecting);

        let inner = Arc::clone(self);
        st.connect_task = Some(tokio::spawn(async move {
            let result = inner.transport.open().await;
            inner.on_open_result(generation, result);
        }));
    }

    fn on_open_result(
        self: &Arc<Self>,
        generation: u64,
        result: Result<ChannelHandle, TransportError>,
    ) {
        let _transition = self.transitions.lock();
        let mut st = self.state.lock();
        if st.generation != generation || st.destroyed {
            debug!(
                manager = %self.id,
                expected_generation = st.generation,
                actual_generation = generation,
                "[ConnectionManager] Dropping stale open result"
            );
            return;
        }
        st.connect_task = None;

        let handle = match result {
            Ok(handle) => handle,
            Err(e) => {
                drop(st);
                self.on_channel_lost(generation, e.to_string());
                return;
            }
        };

        let ChannelHandle { outbound, inbound } = handle;
        let channel_id = Uuid::new_v4();
        let inner = Arc::clone(self);
        let pinger = outbound.clone();
        let reader = tokio::spawn(async move {
            let reason = inner.read_until_lost(inbound, pinger).await;
            inner.on_channel_lost(generation, reason);
        });

        st.channel = Some(ActiveChannel {
            id: channel_id,
            outbound,
            reader,
        });
        st.reconnect_attempts = 0;
        st.terminal_signaled = false;
        st.last_error = None;
        self.set_state(&mut st, ConnectionState::Connected);
        drop(st);

        info!(
            manager = %self.id,
            channel_id = %channel_id,
            "[ConnectionManager] Connected"
        );
        self.state_listeners.notify(&ConnectionState::Connected);
    }

    /// Pump inbound signals into the bus until the channel dies
    async fn read_until_lost(
        &self,
        mut inbound: mpsc::UnboundedReceiver<ChannelSignal>,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
    ) -> String {
        let mut ping = self
            .heartbeat
            .map(|hb| tokio::time::interval_at(Instant::now() + hb.interval, hb.interval));
        let mut last_seen = Instant::now();

        loop {
            let deadline = self.heartbeat.map(|hb| last_seen + hb.timeout);
            tokio::select! {
                signal = inbound.recv() => match signal {
                    Some(ChannelSignal::Event(event)) => {
                        last_seen = Instant::now();
                        self.forward(&event);
                    }
                    Some(ChannelSignal::Pong) => {
                        last_seen = Instant::now();
                    }
                    Some(ChannelSignal::Closed { reason }) => {
                        return reason.unwrap_or_else(|| "closed by remote".to_string());
                    }
                    Some(ChannelSignal::Error(e)) => return e.to_string(),
                    None => return "channel dropped".to_string(),
                },
                _ = next_tick(&mut ping) => {
                    if outbound.send(OutboundMessage::Ping).is_err() {
                        return "outbound closed".to_string();
                    }
                    trace!(manager = %self.id, "[ConnectionManager] Ping sent");
                }
                _ = sleep_until_deadline(deadline) => {
                    return "heartbeat timeout".to_string();
                }
            }
        }
    }

    fn forward(&self, event: &PushEvent) {
        let delivered = self.bus.publish_event(event);
        trace!(
            manager = %self.id,
            event_type = %event.event_type,
            room = ?event.room,
            delivered,
            "[ConnectionManager] Forwarded event"
        );
    }

    fn on_channel_lost(self: &Arc<Self>, generation: u64, reason: String) {
        let _transition = self.transitions.lock();
        let mut st = self.state.lock();
        if st.generation != generation || st.destroyed {
            debug!(
                manager = %self.id,
                reason = %reason,
                "[ConnectionManager] Ignoring loss of a discarded channel"
            );
            return;
        }
        if !matches!(
            st.state,
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return;
        }

        // The reader (or connect task) calling us is finishing on its own
        st.channel = None;
        st.connect_task = None;
        st.joined_rooms.clear();
        st.last_error = Some(reason.clone());
        self.set_state(&mut st, ConnectionState::Errored);
        warn!(
            manager = %self.id,
            reason = %reason,
            "[ConnectionManager] Channel lost"
        );

        let (scheduled, terminal) = self.schedule_reconnect(&mut st);
        drop(st);

        self.state_listeners.notify(&ConnectionState::Errored);
        if let Some(scheduled) = scheduled {
            self.reconnect_listeners.notify(&scheduled);
        }
        if let Some(terminal) = terminal {
            self.terminal_listeners.notify(&terminal);
        }
    }

    fn schedule_reconnect(
        self: &Arc<Self>,
        st: &mut ManagerState,
    ) -> (Option<ReconnectScheduled>, Option<TerminalFailure>) {
        if self.policy.allows(st.reconnect_attempts) {
            st.reconnect_attempts += 1;
            let attempt = st.reconnect_attempts;
            let delay = self.policy.delay_for(attempt);

            if let Some(previous) = st.reconnect_timer.take() {
                previous.handle.abort();
            }
            let inner = Arc::clone(self);
            let generation = st.generation;
            let handle = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.on_reconnect_timer(generation);
            });
            st.last_delay = Some(delay);
            st.reconnect_timer = Some(PendingReconnect {
                handle,
                attempt,
                delay,
            });

            info!(
                manager = %self.id,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "[ConnectionManager] Reconnect scheduled"
            );
            return (Some(ReconnectScheduled { attempt, delay }), None);
        }

        if st.terminal_signaled {
            return (None, None);
        }
        st.terminal_signaled = true;
        if self.policy.circuit_breaker {
            st.circuit_open = true;
        }
        error!(
            manager = %self.id,
            attempts = st.reconnect_attempts,
            circuit_open = st.circuit_open,
            last_error = ?st.last_error,
            "[ConnectionManager] Giving up on reconnection"
        );
        (
            None,
            Some(TerminalFailure {
                attempts: st.reconnect_attempts,
                last_error: st.last_error.clone(),
                circuit_open: st.circuit_open,
            }),
        )
    }

    fn on_reconnect_timer(self: &Arc<Self>, generation: u64) {
        let _transition = self.transitions.lock();
        let mut st = self.state.lock();
        if st.generation != generation || st.destroyed {
            return;
        }
        let attempt = st.reconnect_timer.take().map(|p| p.attempt);
        if st.circuit_open || st.state != ConnectionState::Errored {
            return;
        }

        info!(
            manager = %self.id,
            attempt = ?attempt,
            "[ConnectionManager] Reconnecting"
        );
        self.start_attempt(&mut st);
        drop(st);

        self.state_listeners.notify(&ConnectionState::Connecting);
    }

    fn disconnect(self: &Arc<Self>) -> bool {
        let _transition = self.transitions.lock();
        let mut st = self.state.lock();
        if st.destroyed {
            return false;
        }

        if let Some(pending) = st.reconnect_timer.take() {
            pending.handle.abort();
            debug!(manager = %self.id, "[ConnectionManager] Pending reconnect cancelled");
        }
        if let Some(task) = st.connect_task.take() {
            task.abort();
        }
        if let Some(channel) = st.channel.take() {
            channel.close();
        }
        st.joined_rooms.clear();
        st.generation += 1;
        st.reconnect_attempts = 0;

        if st.state == ConnectionState::Disconnected {
            debug!(manager = %self.id, "[ConnectionManager] Already disconnected");
            return false;
        }

        self.set_state(&mut st, ConnectionState::Disconnected);
        drop(st);

        info!(manager = %self.id, "[ConnectionManager] Disconnected");
        self.state_listeners.notify(&ConnectionState::Disconnected);
        true
    }

    fn destroy(self: &Arc<Self>) {
        let _transition = self.transitions.lock();
        self.disconnect();
        {
            let mut st = self.state.lock();
            if st.destroyed {
                return;
            }
            st.destroyed = true;
        }

        self.state_listeners.clear();
        self.terminal_listeners.clear();
        self.reconnect_listeners.clear();
        self.bus.clear();
        info!(manager = %self.id, "[ConnectionManager] Destroyed");
    }

    fn send_locked(&self, st: &ManagerState, message: OutboundMessage) -> bool {
        let channel = match st.channel.as_ref() {
            Some(channel) if st.state == ConnectionState::Connected => channel,
            _ => {
                warn!(
                    manager = %self.id,
                    message_type = message.type_name(),
                    state = %st.state,
                    "[ConnectionManager] Not connected, dropping outbound message"
                );
                return false;
            }
        };

        let message_type = message.type_name().to_string();
        match channel.outbound.send(message) {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    manager = %self.id,
                    channel_id = %channel.id,
                    message_type = %message_type,
                    "[ConnectionManager] Channel closed, dropping outbound message"
                );
                false
            }
        }
    }
}

async fn next_tick(ping: &mut Option<Interval>) {
    match ping {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
