//! # Backend Health
//!
//! [`HealthProbe`] answers "is the backend reachable right now" with a
//! short abort timeout and a small verdict cache, shared by the
//! orchestrator's readiness gate and the connection hub.
//!
//! [`HealthMonitor`] is the background poller that keeps the cache warm
//! and reports sustained outages.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::backend::SessionBackend;
use crate::config::{HealthConfig, OrchestratorConfig};

/// Outcome of a single health probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthVerdict {
    /// The backend answered with a `2xx`/`4xx` status.
    Reachable { status: u16 },

    /// `5xx`, timeout, or transport failure.
    Unreachable { reason: String },
}

impl HealthVerdict {
    /// Any answer below `500` means the backend is up, even if it refused us.
    pub fn from_status(status: u16) -> Self {
        if status >= 500 {
            HealthVerdict::Unreachable {
                reason: format!("HTTP {status}"),
            }
        } else {
            HealthVerdict::Reachable { status }
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthVerdict::Reachable { .. })
    }
}

/// Cached, timeout-bounded health probe.
pub struct HealthProbe {
    backend: Arc<dyn SessionBackend>,
    timeout: Duration,
    cache_ttl: Duration,
    last: Mutex<Option<(HealthVerdict, Instant)>>,
}

impl HealthProbe {
    pub fn new(backend: Arc<dyn SessionBackend>, config: &OrchestratorConfig) -> Self {
        Self {
            backend,
            timeout: Duration::from_millis(config.timeouts.health_probe_timeout_ms),
            cache_ttl: Duration::from_millis(config.health.cache_ttl_ms),
            last: Mutex::new(None),
        }
    }

    /// Run a live probe, abandoning it after the probe timeout.
    pub async fn probe(&self) -> HealthVerdict {
        let verdict = match tokio::time::timeout(self.timeout, self.backend.probe_health()).await {
            Ok(verdict) => verdict,
            Err(_) => HealthVerdict::Unreachable {
                reason: format!("health probe timed out after {}ms", self.timeout.as_millis()),
            },
        };
        self.record(verdict.clone());
        verdict
    }

    /// Cached verdict if younger than the cache TTL, otherwise a live probe.
    pub async fn is_healthy(&self) -> bool {
        if let Some(verdict) = self.fresh_verdict() {
            return verdict.is_healthy();
        }
        self.probe().await.is_healthy()
    }

    pub fn record(&self, verdict: HealthVerdict) {
        *self.lock() = Some((verdict, Instant::now()));
    }

    fn fresh_verdict(&self) -> Option<HealthVerdict> {
        self.lock()
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.cache_ttl)
            .map(|(verdict, _)| verdict.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<(HealthVerdict, Instant)>> {
        self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Signals emitted by the health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// The backend responded.
    Healthy,

    /// A health check failed. Contains the consecutive failure count.
    Degraded { consecutive_failures: u32 },

    /// Too many consecutive failures, the backend is considered down.
    Unhealthy { consecutive_failures: u32 },
}

/// Turns a run of probe verdicts into [`HealthStatus`] signals.
#[derive(Debug)]
struct FailureStreak {
    failures: u32,
    threshold: u32,
}

impl FailureStreak {
    fn new(threshold: u32) -> Self {
        Self {
            failures: 0,
            threshold: threshold.max(1),
        }
    }

    fn observe(&mut self, verdict: &HealthVerdict) -> HealthStatus {
        match verdict {
            HealthVerdict::Reachable { .. } => {
                if self.failures > 0 {
                    tracing::info!(previous_failures = self.failures, "Backend health recovered");
                }
                self.failures = 0;
                HealthStatus::Healthy
            }
            HealthVerdict::Unreachable { reason } => {
                self.failures = self.failures.saturating_add(1);
                tracing::warn!(
                    consecutive_failures = self.failures,
                    reason = %reason,
                    "Backend health probe failed"
                );
                if self.failures >= self.threshold {
                    HealthStatus::Unhealthy {
                        consecutive_failures: self.failures,
                    }
                } else {
                    HealthStatus::Degraded {
                        consecutive_failures: self.failures,
                    }
                }
            }
        }
    }
}

/// Background poller feeding the shared [`HealthProbe`] cache.
///
/// After `max_consecutive_failures` failures it reports `Unhealthy`; the
/// orchestrator drops `session_ready` until a probe succeeds again.
/// Polling ends when the monitor is dropped.
pub struct HealthMonitor {
    poller: JoinHandle<()>,
}

impl HealthMonitor {
    /// Spawn the poller. The first probe runs one interval after start.
    pub fn start(
        probe: Arc<HealthProbe>,
        config: &HealthConfig,
    ) -> (Self, mpsc::Receiver<HealthStatus>) {
        let period = Duration::from_secs(config.interval_secs.max(1));
        let mut streak = FailureStreak::new(config.max_consecutive_failures);
        let (tx, rx) = mpsc::channel(16);

        let poller = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let status = streak.observe(&probe.probe().await);
                if tx.send(status).await.is_err() {
                    tracing::debug!("Health status listener gone, polling stopped");
                    break;
                }
            }
        });

        (Self { poller }, rx)
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.poller.abort();
    }
}
