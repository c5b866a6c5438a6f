//! Terminal rendering of the session state.

use facewatch_core::{
    Identity,
    health::HealthStatus,
    stream::{StreamSnapshot, StreamState},
};
use socketio_client::{ChannelStatus, ConnectionState};
use std::fmt::Write;

pub const HEALTH_BANNER: &str = "Server health check failed. Please try again later.";

/// Everything the operator sees.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewState {
    pub stream: StreamSnapshot,
    pub detected_persons: Vec<Identity>,
    pub health: HealthStatus,
    pub channel: ChannelStatus,
    /// The latest user-facing alert, if any.
    pub alert: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            stream: StreamSnapshot::default(),
            detected_persons: vec![Identity::unknown()],
            health: HealthStatus::default(),
            channel: ChannelStatus::default(),
            alert: None,
        }
    }
}

impl ViewState {
    pub fn is_streaming(&self) -> bool {
        self.stream.state == StreamState::Live
    }

    pub fn is_busy(&self) -> bool {
        self.stream.state.is_transitioning()
    }

    pub fn start_enabled(&self) -> bool {
        self.stream.state == StreamState::Idle && self.health.healthy
    }

    pub fn stop_enabled(&self) -> bool {
        self.is_streaming()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.health.healthy {
            let _ = writeln!(out, "!! {}", HEALTH_BANNER);
        }

        let state = match self.stream.state {
            StreamState::Idle => "idle",
            StreamState::Starting => "starting...",
            StreamState::Live => "live",
            StreamState::Stopping => "stopping...",
        };
        let _ = writeln!(out, "Stream:   {}", state);
        if let Some(locator) = &self.stream.locator {
            let _ = writeln!(out, "Feed:     {}", locator);
        }

        let channel = match self.channel.state {
            ConnectionState::Disconnected => "disconnected".to_string(),
            ConnectionState::Connecting => "connecting".to_string(),
            ConnectionState::Connected => "connected".to_string(),
            ConnectionState::Reconnecting => {
                format!("reconnecting (attempt {})", self.channel.reconnect_attempts)
            }
        };
        let _ = writeln!(out, "Channel:  {}", channel);

        if self.is_streaming() {
            let names = self
                .detected_persons
                .iter()
                .map(Identity::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "Detected: {}", names);
        }

        let health = match self.health.last_checked_at {
            Some(at) => format!(
                "{} (checked {})",
                if self.health.healthy { "healthy" } else { "unhealthy" },
                at.format("%Y-%m-%d %H:%M:%S UTC")
            ),
            None => "not checked yet".to_string(),
        };
        let _ = writeln!(out, "Health:   {}", health);

        let mut actions = Vec::new();
        if self.start_enabled() {
            actions.push("start");
        }
        if self.stop_enabled() {
            actions.push("stop");
        }
        actions.extend(["reset", "status", "quit"]);
        let _ = writeln!(out, "Actions:  {}", actions.join(" | "));

        if let Some(alert) = &self.alert {
            let _ = writeln!(out, ">> {}", alert);
        }
        out
    }
}
