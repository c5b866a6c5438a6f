//! Start/stop control of the backend video stream.
//!
//! The controller is a small state machine (`Idle → Starting → Live →
//! Stopping → Idle`) whose current state and stream locator are published
//! through a `watch` channel for the view to render.

use crate::{
    backend::Backend,
    error::ControlError,
    health::HealthStatus,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Lifecycle of the video stream as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamState {
    #[default]
    Idle,
    Starting,
    Live,
    Stopping,
}

impl StreamState {
    pub fn is_transitioning(self) -> bool {
        matches!(self, StreamState::Starting | StreamState::Stopping)
    }
}

/// What the view needs to render the stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StreamSnapshot {
    pub state: StreamState,
    /// Present only while `Live`.
    pub locator: Option<String>,
}

/// Outcome of a `stop()` call. Local state is `Idle` whatever it says.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StopReport {
    /// `false` when `stop()` was a no-op because nothing was streaming.
    pub was_live: bool,
    /// Set when the backend could not be told to stop.
    pub backend_error: Option<String>,
}

/// The push channel as the stream controller needs it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Opens the channel unless a handle already exists. Returns `true` when
    /// a new handle was created.
    async fn open(&self) -> bool;

    /// Tears the channel down. Closing an absent channel is a no-op.
    async fn close(&self);
}

/// Drives stream start/stop against the backend.
pub struct StreamController {
    backend: Arc<dyn Backend>,
    channel: Arc<dyn PushChannel>,
    health: watch::Receiver<HealthStatus>,
    snapshot_tx: watch::Sender<StreamSnapshot>,
}

impl StreamController {
    pub fn new(
        backend: Arc<dyn Backend>,
        channel: Arc<dyn PushChannel>,
        health: watch::Receiver<HealthStatus>,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(StreamSnapshot::default());
        Self {
            backend,
            channel,
            health,
            snapshot_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StreamSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Applies `f` to the published snapshot atomically. Subscribers are only
    /// notified when `f` actually changed something.
    fn transition<T>(
        &self,
        f: impl FnOnce(&mut StreamSnapshot) -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        let mut result = Err(ControlError::TransitionInProgress);
        self.snapshot_tx.send_if_modified(|snapshot| {
            let before = snapshot.clone();
            result = f(snapshot);
            *snapshot != before
        });
        result
    }

    /// Asks the backend to begin streaming.
    ///
    /// Rejected without contacting the backend when the last health check
    /// failed, when a transition is already in flight, or when the stream is
    /// already live.
    pub async fn start(&self) -> Result<(), ControlError> {
        let healthy = self.health.borrow().healthy;
        self.transition(|snapshot| match snapshot.state {
            StreamState::Idle if !healthy => Err(ControlError::BackendUnavailable),
            StreamState::Idle => {
                snapshot.state = StreamState::Starting;
                Ok(())
            }
            StreamState::Live => Err(ControlError::AlreadyStreaming),
            StreamState::Starting | StreamState::Stopping => {
                Err(ControlError::TransitionInProgress)
            }
        })?;
        info!("Starting video stream...");

        if self.channel.open().await {
            debug!("Push channel handle created.");
        }

        match self.backend.start_video_feed().await {
            Ok(()) => {
                let locator = self.backend.stream_locator();
                info!(%locator, "Video streaming started.");
                self.snapshot_tx.send_replace(StreamSnapshot {
                    state: StreamState::Live,
                    locator: Some(locator),
                });
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error starting video stream.");
                self.snapshot_tx.send_replace(StreamSnapshot::default());
                Err(ControlError::StreamStartFailed(e.to_string()))
            }
        }
    }

    /// Stops the stream and releases the push channel.
    ///
    /// The locator is cleared before the backend is contacted, and the
    /// backend's answer never gates the return to `Idle`: an unreachable
    /// backend is reported in the [`StopReport`], not as an error.
    pub async fn stop(&self) -> Result<StopReport, ControlError> {
        let was_live = self.transition(|snapshot| match snapshot.state {
            StreamState::Live => {
                snapshot.state = StreamState::Stopping;
                snapshot.locator = None;
                Ok(true)
            }
            StreamState::Idle => Ok(false),
            StreamState::Starting | StreamState::Stopping => {
                Err(ControlError::TransitionInProgress)
            }
        })?;
        if !was_live {
            debug!("Stop requested while idle; nothing to do.");
            return Ok(StopReport::default());
        }
        info!("Video streaming stopped.");

        let backend_error = match self.backend.stop_video_feed().await {
            Ok(()) => None,
            Err(e) => {
                warn!(error = %e, "Backend did not acknowledge stop; continuing teardown.");
                Some(e.to_string())
            }
        };

        self.channel.close().await;
        self.snapshot_tx.send_replace(StreamSnapshot::default());
        Ok(StopReport {
            was_live: true,
            backend_error,
        })
    }
}
