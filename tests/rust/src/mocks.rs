//! Mock implementations for testing
//!
//! - [`MockTransport`]: scriptable push transport. Each `open()` consumes the
//!   next scripted behavior; accepted channels are exposed as
//!   [`RemoteChannel`]s so tests can play the backend.
//! - [`CountingFetcher`]: query fetcher that counts its invocations.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashsync_core::{OutboundMessage, PushEvent};
use dashsync_realtime::{ChannelHandle, ChannelSignal, Transport, TransportError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;

// =============================================================================
// Mock Transport
// =============================================================================

/// What one `open()` call does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenBehavior {
    /// Hand out a working channel
    Accept,
    /// Fail with a connect error
    Fail(String),
    /// Hand out a channel the backend has already closed
    AcceptThenClose,
    /// Never resolve
    Hang,
}

/// The backend end of an accepted channel
pub struct RemoteChannel {
    signals: mpsc::UnboundedSender<ChannelSignal>,
    outbound: Mutex<mpsc::UnboundedReceiver<OutboundMessage>>,
}

impl RemoteChannel {
    /// Deliver an application event; `false` once the client dropped the channel
    pub fn push_event(&self, event_type: &str, payload: serde_json::Value) -> bool {
        self.push(PushEvent::new(event_type, payload))
    }

    pub fn push(&self, event: PushEvent) -> bool {
        self.signals.send(ChannelSignal::Event(event)).is_ok()
    }

    pub fn pong(&self) -> bool {
        self.signals.send(ChannelSignal::Pong).is_ok()
    }

    /// Close from the backend side
    pub fn close(&self, reason: &str) -> bool {
        self.signals
            .send(ChannelSignal::Closed {
                reason: Some(reason.to_string()),
            })
            .is_ok()
    }

    pub fn fail(&self, error: TransportError) -> bool {
        self.signals.send(ChannelSignal::Error(error)).is_ok()
    }

    /// Whether the client still holds the channel
    pub fn is_open(&self) -> bool {
        !self.signals.is_closed()
    }

    /// Drain every message the client sent so far
    pub fn sent(&self) -> Vec<OutboundMessage> {
        let mut outbound = self.outbound.lock();
        let mut messages = Vec::new();
        while let Ok(message) = outbound.try_recv() {
            messages.push(message);
        }
        messages
    }
}

pub struct MockTransport {
    script: Mutex<VecDeque<OpenBehavior>>,
    fallback: Mutex<OpenBehavior>,
    opens: AtomicUsize,
    remotes: Mutex<Vec<Arc<RemoteChannel>>>,
}

impl MockTransport {
    /// Transport whose opens always succeed
    pub fn accepting() -> Arc<Self> {
        Self::with_fallback(OpenBehavior::Accept)
    }

    /// Transport whose opens always fail
    pub fn failing() -> Arc<Self> {
        Self::with_fallback(OpenBehavior::Fail("connection refused".to_string()))
    }

    pub fn with_fallback(fallback: OpenBehavior) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            opens: AtomicUsize::new(0),
            remotes: Mutex::new(Vec::new()),
        })
    }

    /// Queue behaviors for the next opens; the fallback applies afterwards
    pub fn script(&self, behaviors: impl IntoIterator<Item = OpenBehavior>) {
        self.script.lock().extend(behaviors);
    }

    pub fn set_fallback(&self, fallback: OpenBehavior) {
        *self.fallback.lock() = fallback;
    }

    /// Number of `open()` calls so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every channel accepted so far, oldest first
    pub fn remotes(&self) -> Vec<Arc<RemoteChannel>> {
        self.remotes.lock().clone()
    }

    /// Most recently accepted channel
    pub fn remote(&self) -> Arc<RemoteChannel> {
        self.remotes
            .lock()
            .last()
            .cloned()
            .expect("no channel accepted yet")
    }

    fn next_behavior(&self) -> OpenBehavior {
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self) -> Result<ChannelHandle, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        match self.next_behavior() {
            OpenBehavior::Accept => {
                let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
                let (signal_tx, signal_rx) = mpsc::unbounded_channel();
                self.remotes.lock().push(Arc::new(RemoteChannel {
                    signals: signal_tx,
                    outbound: Mutex::new(outbound_rx),
                }));
                Ok(ChannelHandle::new(outbound_tx, signal_rx))
            }
            OpenBehavior::AcceptThenClose => {
                let (outbound_tx, _) = mpsc::unbounded_channel();
                let (signal_tx, signal_rx) = mpsc::unbounded_channel();
                let _ = signal_tx.send(ChannelSignal::Closed {
                    reason: Some("closed on open".to_string()),
                });
                Ok(ChannelHandle::new(outbound_tx, signal_rx))
            }
            OpenBehavior::Fail(message) => Err(TransportError::Connect(message)),
            OpenBehavior::Hang => futures::future::pending().await,
        }
    }

    fn description(&self) -> String {
        "mock://push".to_string()
    }
}

// =============================================================================
// Counting Fetcher
// =============================================================================

/// Fetcher that records how often it ran
///
/// Responses are taken from the script in order; the last one repeats.
#[derive(Clone)]
pub struct CountingFetcher<T> {
    calls: Arc<AtomicUsize>,
    responses: Arc<Mutex<VecDeque<Result<T, String>>>>,
    latency: Duration,
}

impl<T> CountingFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn ok(value: T) -> Self {
        Self::script(vec![Ok(value)])
    }

    pub fn failing(message: &str) -> Self {
        Self::script(vec![Err(message.to_string())])
    }

    pub fn script(responses: Vec<Result<T, String>>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            responses: Arc::new(Mutex::new(responses.into())),
            latency: Duration::ZERO,
        }
    }

    /// Every fetch takes this long before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The closure handed to the query cache
    pub fn fetcher(
        &self,
    ) -> impl Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync + 'static {
        let this = self.clone();
        move || this.call()
    }

    fn call(&self) -> BoxFuture<'static, anyhow::Result<T>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let response = {
            let mut responses = self.responses.lock();
            if responses.len() > 1 {
                responses.pop_front()
            } else {
                responses.front().cloned()
            }
        };
        let latency = self.latency;
        async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            match response {
                Some(Ok(value)) => Ok(value),
                Some(Err(message)) => Err(anyhow::anyhow!(message)),
                None => Err(anyhow::anyhow!("no scripted response")),
            }
        }
        .boxed()
    }
}
