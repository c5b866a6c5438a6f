//! The recognition push channel: a Socket.IO connection whose events are
//! routed into recognition updates for the session.

use async_trait::async_trait;
use facewatch_core::{
    MalformedEvent, RecognitionEvent, event::PERSONS_RECOGNIZED, stream::PushChannel,
};
use socketio_client::{ChannelConfig, ChannelEvent, ChannelStatus, ConnectionManager};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Socket.IO connection dedicated to `persons_recognized` events.
///
/// Every handle opened through [`PushChannel::open`] delivers into the same
/// inbox, so the receiver returned by [`RecognitionChannel::new`] outlives
/// individual connections.
pub struct RecognitionChannel {
    manager: ConnectionManager,
    listener: mpsc::UnboundedSender<ChannelEvent>,
}

impl RecognitionChannel {
    pub fn new(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (listener, inbox) = mpsc::unbounded_channel();
        let channel = Self {
            manager: ConnectionManager::new(config),
            listener,
        };
        (channel, inbox)
    }

    pub fn status(&self) -> ChannelStatus {
        self.manager.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.manager.subscribe()
    }
}

#[async_trait]
impl PushChannel for RecognitionChannel {
    async fn open(&self) -> bool {
        self.manager.open(self.listener.clone()).await
    }

    async fn close(&self) {
        self.manager.close().await;
    }
}

/// What a channel notification means for the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Recognized(RecognitionEvent),
    Malformed(MalformedEvent),
    /// A connection lifecycle change worth showing to the operator.
    Notice(String),
    Ignored,
}

/// Classifies one notification, logging lifecycle changes on the way.
pub fn route(event: ChannelEvent) -> Inbound {
    match event {
        ChannelEvent::Event { name, payload } if name == PERSONS_RECOGNIZED => {
            match RecognitionEvent::from_payload(&payload) {
                Ok(event) => Inbound::Recognized(event),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed recognition event");
                    Inbound::Malformed(e)
                }
            }
        }
        ChannelEvent::Event { name, .. } => {
            debug!(%name, "Ignoring unrelated event");
            Inbound::Ignored
        }
        ChannelEvent::Connected { sid } => {
            info!(%sid, "Push channel connected");
            Inbound::Notice("Connected to recognition server.".to_string())
        }
        ChannelEvent::Reconnected { attempts } => {
            info!(attempts, "Push channel reconnected");
            Inbound::Notice(format!("Reconnected after {} attempt(s).", attempts))
        }
        ChannelEvent::Disconnected { reason } => {
            Inbound::Notice(format!("Disconnected from recognition server: {}", reason))
        }
        ChannelEvent::Reconnecting { attempt } => {
            debug!(attempt, "Push channel reconnecting");
            Inbound::Ignored
        }
        ChannelEvent::ConnectError { attempt, message } => {
            Inbound::Notice(format!("Connection attempt {} failed: {}", attempt, message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facewatch_core::Identity;
    use serde_json::json;
    use socketio_client::ConnectionState;

    #[test]
    fn test_routes_recognition_events() {
        let routed = route(ChannelEvent::Event {
            name: "persons_recognized".to_string(),
            payload: json!({"names": ["Unknown", "A. Samuvel"]}),
        });
        assert_eq!(
            routed,
            Inbound::Recognized(RecognitionEvent {
                names: vec![Identity::unknown(), Identity::from("A. Samuvel")],
            })
        );
    }

    #[test]
    fn test_malformed_payload_is_reported_not_applied() {
        let routed = route(ChannelEvent::Event {
            name: "persons_recognized".to_string(),
            payload: json!({"names": "A. Samuvel"}),
        });
        assert!(matches!(routed, Inbound::Malformed(_)));
    }

    #[test]
    fn test_unrelated_events_are_ignored() {
        let routed = route(ChannelEvent::Event {
            name: "frame_stats".to_string(),
            payload: json!({"fps": 12}),
        });
        assert_eq!(routed, Inbound::Ignored);
        assert_eq!(
            route(ChannelEvent::Reconnecting { attempt: 3 }),
            Inbound::Ignored
        );
    }

    #[test]
    fn test_lifecycle_changes_become_notices() {
        assert!(matches!(
            route(ChannelEvent::Disconnected {
                reason: "ping timeout".to_string()
            }),
            Inbound::Notice(msg) if msg.contains("ping timeout")
        ));
        assert!(matches!(
            route(ChannelEvent::ConnectError {
                attempt: 2,
                message: "refused".to_string()
            }),
            Inbound::Notice(msg) if msg.contains("attempt 2")
        ));
    }

    #[tokio::test]
    async fn test_close_without_open_keeps_channel_disconnected() {
        let (channel, _inbox) = RecognitionChannel::new(ChannelConfig::new("http://127.0.0.1:1"));
        channel.close().await;
        assert_eq!(channel.status().state, ConnectionState::Disconnected);
    }
}
