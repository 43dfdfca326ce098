//! Connection manager test harness
//!
//! Builds a manager over a [`MockTransport`] and records every state
//! transition, reconnect schedule and terminal signal.

use std::sync::Arc;
use std::time::Duration;

use dashsync_core::{ConnectionState, EventBus, Subscription};
use dashsync_realtime::{ConnectionManager, ReconnectPolicy, ReconnectScheduled, TerminalFailure};
use parking_lot::Mutex;

use crate::mocks::MockTransport;

pub struct ConnectionManagerTestHarness {
    pub manager: ConnectionManager,
    pub transport: Arc<MockTransport>,
    pub bus: EventBus,
    states: Arc<Mutex<Vec<ConnectionState>>>,
    scheduled: Arc<Mutex<Vec<ReconnectScheduled>>>,
    terminal: Arc<Mutex<Vec<TerminalFailure>>>,
    _subscriptions: Vec<Subscription>,
}

impl ConnectionManagerTestHarness {
    /// Default policy (5 attempts, 1s base), no heartbeat
    pub fn new(transport: Arc<MockTransport>) -> Self {
        Self::with_policy(transport, ReconnectPolicy::default())
    }

    pub fn with_policy(transport: Arc<MockTransport>, policy: ReconnectPolicy) -> Self {
        let bus = EventBus::new();
        let manager = ConnectionManager::builder(transport.clone(), bus.clone())
            .with_policy(policy)
            .build();
        Self::wrap(manager, transport, bus)
    }

    pub fn with_heartbeat(
        transport: Arc<MockTransport>,
        interval: Duration,
        timeout: Duration,
    ) -> Self {
        let bus = EventBus::new();
        let manager = ConnectionManager::builder(transport.clone(), bus.clone())
            .with_heartbeat(interval, timeout)
            .build();
        Self::wrap(manager, transport, bus)
    }

    fn wrap(manager: ConnectionManager, transport: Arc<MockTransport>, bus: EventBus) -> Self {
        let states = Arc::new(Mutex::new(Vec::new()));
        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let terminal = Arc::new(Mutex::new(Vec::new()));

        let states_sink = states.clone();
        let scheduled_sink = scheduled.clone();
        let terminal_sink = terminal.clone();
        let subscriptions = vec![
            manager.on_connection_state_change(move |state| states_sink.lock().push(state)),
            manager.on_reconnect_scheduled(move |s| scheduled_sink.lock().push(*s)),
            manager.on_terminal_failure(move |t| terminal_sink.lock().push(t.clone())),
        ];

        Self {
            manager,
            transport,
            bus,
            states,
            scheduled,
            terminal,
            _subscriptions: subscriptions,
        }
    }

    /// Every state reported so far, starting with the immediate callback
    pub fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.scheduled.lock().iter().map(|s| s.delay).collect()
    }

    pub fn terminal_failures(&self) -> Vec<TerminalFailure> {
        self.terminal.lock().clone()
    }

    /// Connect and let the open complete
    pub async fn connect(&self) {
        self.manager.connect();
        crate::settle().await;
    }
}
