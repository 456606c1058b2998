//! # Connection Hub
//!
//! Owns the two logical duplex channels, `music` and `care`. Each channel
//! connects only while the orchestrator reports a fully established session,
//! reconnects with jittered exponential backoff up to a ceiling, queues
//! outbound messages while disconnected, and sends a liveness ping on a
//! fixed interval once open.
//!
//! The hub reads [`AuthState`](crate::state::AuthState) through
//! [`AuthStateSource`] and never asks for an identity check. Socket
//! hiccups stay socket hiccups.
//!
//! ## Lifecycle
//!
//! ```text
//! idle → connecting → open → closed → reconnect-scheduled → connecting → …
//!                                   ↘ failed (ceiling reached or session gone)
//! ```
//!
//! `start` and `stop` are reference counted: the first `start` connects and
//! only the matching last `stop` disconnects.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;

use crate::config::OrchestratorConfig;
use crate::error::AuthResult;
use crate::events::{AuthEvent, EventBus};
use crate::health::HealthProbe;
use crate::orchestrator::AuthOrchestrator;
use crate::protocol::envelope::Envelope;
use crate::state::AuthStateSource;
use crate::token_store::TokenStore;

mod connector;
mod driver;

pub use connector::{TungsteniteConnector, WsConnector, WsLink};

/// Outbound messages kept per channel while disconnected.
pub const QUEUE_CAPACITY: usize = 256;

/// Opens a queued message may fail on before it is dropped.
pub const FLUSH_ATTEMPTS: u32 = 3;

/// Jitter applied to reconnect delays (±10%).
const RECONNECT_JITTER: f64 = 0.10;

/// Buffer size for channel event and inbound message broadcasts.
const BROADCAST_BUFFER: usize = 256;

// ─── Channel identity ───────────────────────────────────────────────────

/// The logical channels the hub manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelName {
    Music,
    Care,
}

impl ChannelName {
    pub const ALL: [ChannelName; 2] = [ChannelName::Music, ChannelName::Care];

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelName::Music => "music",
            ChannelName::Care => "care",
        }
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a channel is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Open,
    Closed,
    ReconnectScheduled,
    /// Terminal until the session changes or the channel is restarted.
    Failed,
}

/// Why a channel could not connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    NotAuthenticated,
    BackendNotHealthy,
    MaxReconnectAttempts,
    ConnectFailed(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::NotAuthenticated => f.write_str("Not authenticated"),
            FailureReason::BackendNotHealthy => f.write_str("Backend not healthy"),
            FailureReason::MaxReconnectAttempts => f.write_str("Max reconnection attempts reached"),
            FailureReason::ConnectFailed(reason) => {
                write!(f, "Failed to create connection: {reason}")
            }
        }
    }
}

/// Per-channel lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connecting {
        channel: ChannelName,
    },
    Opened {
        channel: ChannelName,
    },
    Closed {
        channel: ChannelName,
    },
    ReconnectScheduled {
        channel: ChannelName,
        attempt: u32,
        delay: Duration,
    },
    Failed {
        channel: ChannelName,
        reason: FailureReason,
    },
}

impl ChannelEvent {
    pub fn channel(&self) -> ChannelName {
        match self {
            ChannelEvent::Connecting { channel }
            | ChannelEvent::Opened { channel }
            | ChannelEvent::Closed { channel }
            | ChannelEvent::ReconnectScheduled { channel, .. }
            | ChannelEvent::Failed { channel, .. } => *channel,
        }
    }
}

/// An envelope received on one of the channels.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub channel: ChannelName,
    pub envelope: Envelope,
}

/// Point-in-time view of a channel, for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSnapshot {
    pub status: ConnectionStatus,
    pub ref_count: usize,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub queued: usize,
    pub failure_reason: Option<FailureReason>,
    pub last_failure: Option<Instant>,
}

// ─── Shared state ───────────────────────────────────────────────────────

/// A message waiting for an open socket.
#[derive(Debug)]
struct Queued {
    text: String,
    /// Opens whose socket died before this message went out.
    failed_opens: u32,
}

impl Queued {
    fn new(text: String) -> Self {
        Self {
            text,
            failed_opens: 0,
        }
    }
}

struct ChannelSlot {
    status: ConnectionStatus,
    ref_count: usize,
    reconnect_attempts: u32,
    max_reconnect_attempts: u32,
    last_failure: Option<Instant>,
    failure_reason: Option<FailureReason>,
    queue: VecDeque<Queued>,
    /// Sender into the live socket, present only while open.
    link: Option<mpsc::Sender<String>>,
    driver: Option<AbortHandle>,
    /// Bumped whenever the driver is replaced; stale drivers stop writing.
    session: u64,
}

impl ChannelSlot {
    fn new(max_reconnect_attempts: u32) -> Self {
        Self {
            status: ConnectionStatus::Idle,
            ref_count: 0,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_failure: None,
            failure_reason: None,
            queue: VecDeque::new(),
            link: None,
            driver: None,
            session: 0,
        }
    }

    fn enqueue(&mut self, channel: ChannelName, text: String) {
        self.queue.push_back(Queued::new(text));
        self.trim_queue(channel);
    }

    /// Put undelivered messages back ahead of anything queued since.
    fn requeue_front(&mut self, channel: ChannelName, unsent: Vec<Queued>) {
        for queued in unsent.into_iter().rev() {
            self.queue.push_front(queued);
        }
        self.trim_queue(channel);
    }

    fn trim_queue(&mut self, channel: ChannelName) {
        while self.queue.len() > QUEUE_CAPACITY {
            self.queue.pop_front();
            tracing::warn!(
                %channel,
                capacity = QUEUE_CAPACITY,
                "Outbound queue full, dropped oldest message"
            );
        }
    }

    /// Invalidate the current driver and connection.
    fn retire_driver(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
        self.session += 1;
        self.link = None;
    }
}

struct HubInner {
    config: OrchestratorConfig,
    auth: Arc<dyn AuthStateSource>,
    health: Arc<HealthProbe>,
    tokens: TokenStore,
    events: EventBus,
    connector: Arc<dyn WsConnector>,
    music: Mutex<ChannelSlot>,
    care: Mutex<ChannelSlot>,
    channel_events: broadcast::Sender<ChannelEvent>,
    inbound: broadcast::Sender<InboundMessage>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl HubInner {
    fn slot(&self, channel: ChannelName) -> MutexGuard<'_, ChannelSlot> {
        let slot = match channel {
            ChannelName::Music => &self.music,
            ChannelName::Care => &self.care,
        };
        lock(slot)
    }

    fn url_for(&self, channel: ChannelName) -> String {
        match channel {
            ChannelName::Music => self.config.music_ws_url(),
            ChannelName::Care => self.config.care_ws_url(),
        }
    }

    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = Duration::from_millis(self.config.reconnect.base_delay_ms);
        let max = Duration::from_millis(self.config.reconnect.max_delay_ms);
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = base.saturating_mul(1_u32 << exponent).min(max);
        crate::backoff::jittered(delay, RECONNECT_JITTER)
    }

    fn publish(&self, event: ChannelEvent) {
        tracing::debug!(channel = %event.channel(), event = ?event, "Channel event");
        let _ = self.channel_events.send(event);
    }

    fn emit_failure(&self, channel: ChannelName, reason: FailureReason) {
        self.events.emit(AuthEvent::ConnectionFailed { channel, reason });
    }

    /// Replace the channel's driver with a fresh one, resetting attempts.
    fn restart(self: &Arc<Self>, channel: ChannelName) {
        let mut slot = self.slot(channel);
        if slot.ref_count == 0 {
            return;
        }
        slot.retire_driver();
        slot.reconnect_attempts = 0;
        slot.failure_reason = None;
        let session = slot.session;
        let inner = Arc::clone(self);
        slot.driver = Some(tokio::spawn(inner.drive(channel, session)).abort_handle());
    }

    /// Follow credential changes and readiness gains.
    fn ensure_watcher(self: &Arc<Self>) {
        let mut watcher = lock(&self.watcher);
        if watcher.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut rx = self.events.subscribe();
        let mut was_ready = self.auth.auth_snapshot().can_open_channels();
        let weak: Weak<HubInner> = Arc::downgrade(self);

        *watcher = Some(tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Hub event watcher lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(inner) = weak.upgrade() else { break };

                let kick = match &event {
                    AuthEvent::StateChanged { .. } => {
                        let ready = inner.auth.auth_snapshot().can_open_channels();
                        let rose = ready && !was_ready;
                        was_ready = ready;
                        rose
                    }
                    other => other.changes_credentials(),
                };
                if kick {
                    tracing::info!(event = event.name(), "Session changed, cycling channels");
                    for channel in ChannelName::ALL {
                        inner.restart(channel);
                    }
                }
            }
        }));
    }
}

// ─── Public handle ──────────────────────────────────────────────────────

/// Auth-gated manager for the music and care channels.
///
/// Dropping the hub closes every channel.
pub struct ConnectionHub {
    inner: Arc<HubInner>,
}

impl ConnectionHub {
    pub fn new(
        config: &OrchestratorConfig,
        auth: Arc<dyn AuthStateSource>,
        health: Arc<HealthProbe>,
        tokens: TokenStore,
        events: EventBus,
        connector: Arc<dyn WsConnector>,
    ) -> Self {
        let max_attempts = config.reconnect.max_attempts;
        let (channel_events, _) = broadcast::channel(BROADCAST_BUFFER);
        let (inbound, _) = broadcast::channel(BROADCAST_BUFFER);

        Self {
            inner: Arc::new(HubInner {
                config: config.clone(),
                auth,
                health,
                tokens,
                events,
                connector,
                music: Mutex::new(ChannelSlot::new(max_attempts)),
                care: Mutex::new(ChannelSlot::new(max_attempts)),
                channel_events,
                inbound,
                watcher: Mutex::new(None),
            }),
        }
    }

    /// Hub wired to an orchestrator's state, health probe, tokens, and events.
    pub fn for_orchestrator(
        orchestrator: &AuthOrchestrator,
        connector: Arc<dyn WsConnector>,
    ) -> Self {
        Self::new(
            orchestrator.config(),
            Arc::new(orchestrator.clone()),
            orchestrator.health_probe(),
            orchestrator.token_store().clone(),
            orchestrator.events().clone(),
            connector,
        )
    }

    /// Take a reference on each channel; the first reference connects.
    pub fn start(&self, channels: &[ChannelName]) {
        self.inner.ensure_watcher();
        for &channel in channels {
            let first = {
                let mut slot = self.inner.slot(channel);
                slot.ref_count += 1;
                slot.ref_count == 1
            };
            if first {
                tracing::info!(%channel, "Starting channel");
                self.inner.restart(channel);
            }
        }
    }

    /// Release a reference on each channel; the last reference disconnects.
    pub fn stop(&self, channels: &[ChannelName]) {
        for &channel in channels {
            let closed = {
                let mut slot = self.inner.slot(channel);
                if slot.ref_count == 0 {
                    continue;
                }
                slot.ref_count -= 1;
                if slot.ref_count > 0 {
                    continue;
                }
                slot.retire_driver();
                let was_open = slot.status == ConnectionStatus::Open;
                slot.status = ConnectionStatus::Idle;
                was_open
            };
            tracing::info!(%channel, "Channel stopped");
            if closed {
                self.inner.publish(ChannelEvent::Closed { channel });
            }
        }
    }

    /// Send an envelope, or queue it until the channel opens.
    ///
    /// # Errors
    /// Returns [`AuthError::Json`](crate::AuthError::Json) if the envelope
    /// cannot be serialized. Delivery problems never surface here.
    pub async fn send(&self, channel: ChannelName, envelope: &Envelope) -> AuthResult<()> {
        let text = envelope.to_text()?;

        let link = {
            let mut slot = self.inner.slot(channel);
            match slot.link.clone() {
                Some(link) if slot.status == ConnectionStatus::Open => link,
                _ => {
                    slot.enqueue(channel, text);
                    return Ok(());
                }
            }
        };

        if let Err(mpsc::error::SendError(text)) = link.send(text).await {
            tracing::debug!(%channel, "Socket closed under send, queueing");
            self.inner.slot(channel).enqueue(channel, text);
        }
        Ok(())
    }

    /// # Errors
    /// See [`send`](Self::send).
    pub async fn send_music(&self, envelope: &Envelope) -> AuthResult<()> {
        self.send(ChannelName::Music, envelope).await
    }

    /// # Errors
    /// See [`send`](Self::send).
    pub async fn send_care(&self, envelope: &Envelope) -> AuthResult<()> {
        self.send(ChannelName::Care, envelope).await
    }

    pub fn status(&self, channel: ChannelName) -> ChannelSnapshot {
        let slot = self.inner.slot(channel);
        ChannelSnapshot {
            status: slot.status,
            ref_count: slot.ref_count,
            reconnect_attempts: slot.reconnect_attempts,
            max_reconnect_attempts: slot.max_reconnect_attempts,
            queued: slot.queue.len(),
            failure_reason: slot.failure_reason.clone(),
            last_failure: slot.last_failure,
        }
    }

    pub fn is_open(&self, channel: ChannelName) -> bool {
        self.inner.slot(channel).status == ConnectionStatus::Open
    }

    pub fn channel_events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.channel_events.subscribe()
    }

    pub fn inbound(&self) -> broadcast::Receiver<InboundMessage> {
        self.inner.inbound.subscribe()
    }

    /// Close every channel regardless of reference counts.
    pub fn shutdown(&self) {
        if let Some(watcher) = lock(&self.inner.watcher).take() {
            watcher.abort();
        }
        for channel in ChannelName::ALL {
            let mut slot = self.inner.slot(channel);
            slot.retire_driver();
            slot.ref_count = 0;
            slot.status = ConnectionStatus::Idle;
        }
        tracing::debug!("Connection hub shut down");
    }
}

impl Drop for ConnectionHub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ConnectionHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHub")
            .field("music", &self.status(ChannelName::Music).status)
            .field("care", &self.status(ChannelName::Care).status)
            .finish_non_exhaustive()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
