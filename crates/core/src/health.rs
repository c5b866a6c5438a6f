//! Periodic liveness verification of the backend.

use crate::backend::Backend;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle, time::Instant};
use tracing::{debug, info, warn};

/// Result of the most recent liveness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthStatus {
    pub healthy: bool,
    /// `None` until the first check completes.
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_checked_at: None,
        }
    }
}

/// Polls the backend liveness endpoint and publishes a [`HealthStatus`].
///
/// The monitor holds the only `watch::Sender` for the status, so it is the
/// single writer; everybody else reads through [`HealthMonitor::subscribe`].
pub struct HealthMonitor {
    backend: Arc<dyn Backend>,
    timeout: Duration,
    status_tx: watch::Sender<HealthStatus>,
}

impl HealthMonitor {
    pub fn new(backend: Arc<dyn Backend>, timeout: Duration) -> Self {
        let (status_tx, _) = watch::channel(HealthStatus::default());
        Self {
            backend,
            timeout,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.status_tx.subscribe()
    }

    pub fn current(&self) -> HealthStatus {
        *self.status_tx.borrow()
    }

    /// Runs one liveness check and publishes its outcome.
    ///
    /// Never fails: transport errors, timeouts, non-200 answers and bodies
    /// without an explicit `"healthy"` all collapse into `healthy = false`.
    pub async fn check_health(&self) -> HealthStatus {
        let healthy = match tokio::time::timeout(self.timeout, self.backend.check_health()).await {
            Ok(Ok(reply)) if reply.is_healthy() => true,
            Ok(Ok(reply)) => {
                debug!(status = %reply.status, "Backend reported a non-healthy status");
                false
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Health check failed");
                false
            }
            Err(_) => {
                debug!(timeout = ?self.timeout, "Health check timed out");
                false
            }
        };

        let status = HealthStatus {
            healthy,
            last_checked_at: Some(Utc::now()),
        };
        let previous = self.status_tx.send_replace(status);
        match (previous.healthy, healthy) {
            (true, false) => warn!("Backend health check failed. Start is disabled."),
            (false, true) => info!("Backend is healthy again."),
            _ => {}
        }
        status
    }

    /// Spawns the polling loop. The first check runs immediately, then one
    /// per `every`, on a fixed grid measured from the spawn. Grid points that
    /// pass while a check is still running are dropped, not run late.
    pub fn spawn(self: Arc<Self>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let origin = Instant::now();
            let mut due = origin;
            loop {
                tokio::time::sleep_until(due).await;
                self.check_health().await;
                due = next_tick(origin, every, Instant::now());
            }
        })
    }
}

/// First grid point `origin + k * every` strictly after `now`.
fn next_tick(origin: Instant, every: Duration, now: Instant) -> Instant {
    let period = every.as_nanos().max(1);
    let elapsed = now.saturating_duration_since(origin).as_nanos();
    let ticks = elapsed / period + 1;
    let offset = u64::try_from(ticks.saturating_mul(period)).unwrap_or(u64::MAX);
    origin + Duration::from_nanos(offset)
}
