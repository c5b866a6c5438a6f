//! Lifecycle of the push channel: connect, reconnect, teardown.

use crate::{
    ChannelError,
    connection::{Connection, Exit},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, info, warn};

const ENGINE_IO_PATH: &str = "/socket.io/?EIO=4&transport=websocket";

/// How long `close()` waits for the connection task to say goodbye before
/// aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const SERVER_DISCONNECT: &str = "io server disconnect";

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Base URL of the server, `http(s)://` or `ws(s)://`.
    pub url: String,
    /// Fixed delay between reconnection attempts.
    pub reconnect_delay: Duration,
    /// Extra time allowed past the server's ping interval before the
    /// connection is considered dead.
    pub ping_timeout: Duration,
    /// Upper bound on one connection attempt, including handshakes.
    pub handshake_timeout: Duration,
}

impl ChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect_delay: Duration::from_secs(1),
            ping_timeout: Duration::from_secs(24 * 60 * 60),
            handshake_timeout: Duration::from_secs(20),
        }
    }

    /// The WebSocket endpoint derived from [`ChannelConfig::url`].
    pub fn endpoint(&self) -> Result<String, ChannelError> {
        let base = self.url.trim().trim_end_matches('/');
        let ws_base = if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if base.starts_with("ws://") || base.starts_with("wss://") {
            base.to_string()
        } else {
            return Err(ChannelError::InvalidUrl(self.url.clone()));
        };
        Ok(format!("{}{}", ws_base, ENGINE_IO_PATH))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelStatus {
    pub state: ConnectionState,
    /// Consecutive failed or lost connections since the last successful
    /// handshake.
    pub reconnect_attempts: u32,
}

/// Notifications delivered to the listener registered with
/// [`ConnectionManager::open`], in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connected { sid: String },
    /// Emitted just before `Connected` when the connection was re-established.
    Reconnected { attempts: u32 },
    Disconnected { reason: String },
    Reconnecting { attempt: u32 },
    ConnectError { attempt: u32, message: String },
    /// A Socket.IO event. `payload` is the first event argument, or `null`.
    Event { name: String, payload: Value },
}

struct ConnectionHandle {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns at most one live connection handle.
///
/// `open()` spawns a task that connects and keeps reconnecting with a fixed
/// delay until `close()` is called or the server disconnects the namespace.
pub struct ConnectionManager {
    config: ChannelConfig,
    handle: Mutex<Option<ConnectionHandle>>,
    status_tx: Arc<watch::Sender<ChannelStatus>>,
}

impl ConnectionManager {
    pub fn new(config: ChannelConfig) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::default());
        Self {
            config,
            handle: Mutex::new(None),
            status_tx: Arc::new(status_tx),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    /// Whether a handle exists whose connection loop is still running.
    pub async fn is_open(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    /// Starts connecting, delivering events to `listener`.
    ///
    /// Returns `false` without touching the existing handle if one is already
    /// open. A handle whose loop has ended, after a server disconnect, is
    /// replaced. The listener is dropped when the handle is closed.
    pub async fn open(&self, listener: mpsc::UnboundedSender<ChannelEvent>) -> bool {
        let mut slot = self.handle.lock().await;
        if slot.as_ref().is_some_and(|h| !h.task.is_finished()) {
            debug!("Push channel already open.");
            return false;
        }

        info!(url = %self.config.url, "Initializing socket connection...");
        self.status_tx.send_replace(ChannelStatus {
            state: ConnectionState::Connecting,
            reconnect_attempts: 0,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(
            drive(
                self.config.clone(),
                listener,
                self.status_tx.clone(),
                shutdown_rx,
            )
            .instrument(tracing::info_span!("push_channel")),
        );
        *slot = Some(ConnectionHandle {
            shutdown: shutdown_tx,
            task,
        });
        true
    }

    /// Disconnects and releases the handle. A no-op when nothing is open.
    pub async fn close(&self) {
        let Some(handle) = self.handle.lock().await.take() else {
            return;
        };
        let _ = handle.shutdown.send(());
        let mut task = handle.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!("Socket task did not stop in time; aborting it.");
            task.abort();
            let _ = task.await;
        }
        self.status_tx.send_replace(ChannelStatus::default());
        info!("Socket cleanup done.");
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.task.abort();
        }
    }
}

/// Connection loop for one handle. Runs until `shutdown` fires (or its
/// sender is dropped) or the server sends a namespace disconnect.
async fn drive(
    config: ChannelConfig,
    listener: mpsc::UnboundedSender<ChannelEvent>,
    status_tx: Arc<watch::Sender<ChannelStatus>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let endpoint = match config.endpoint() {
        Ok(endpoint) => endpoint,
        Err(e) => {
            warn!(error = %e, "Cannot open push channel.");
            let _ = listener.send(ChannelEvent::ConnectError {
                attempt: 1,
                message: e.to_string(),
            });
            return;
        }
    };

    let mut attempts: u32 = 0;
    loop {
        let attempt = tokio::select! {
            _ = &mut shutdown => return,
            result = tokio::time::timeout(config.handshake_timeout, Connection::establish(&endpoint)) => {
                result.unwrap_or(Err(ChannelError::Timeout))
            }
        };

        match attempt {
            Ok(connection) => {
                if attempts > 0 {
                    info!(attempts, "Reconnected to server.");
                    let _ = listener.send(ChannelEvent::Reconnected { attempts });
                }
                attempts = 0;
                status_tx.send_replace(ChannelStatus {
                    state: ConnectionState::Connected,
                    reconnect_attempts: 0,
                });
                info!(sid = %connection.sid, "Connected to WebSocket.");
                let _ = listener.send(ChannelEvent::Connected {
                    sid: connection.sid.clone(),
                });

                match connection
                    .run(&listener, &mut shutdown, config.ping_timeout)
                    .await
                {
                    Exit::Shutdown => return,
                    Exit::Kicked => {
                        info!("Server disconnected the socket; not reconnecting.");
                        status_tx.send_replace(ChannelStatus::default());
                        let _ = listener.send(ChannelEvent::Disconnected {
                            reason: SERVER_DISCONNECT.to_string(),
                        });
                        return;
                    }
                    Exit::Lost(reason) => {
                        warn!(%reason, "WebSocket disconnected.");
                        let _ = listener.send(ChannelEvent::Disconnected { reason });
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, attempt = attempts + 1, "Socket connection error.");
                let _ = listener.send(ChannelEvent::ConnectError {
                    attempt: attempts + 1,
                    message: e.to_string(),
                });
            }
        }

        attempts = attempts.saturating_add(1);
        status_tx.send_replace(ChannelStatus {
            state: ConnectionState::Reconnecting,
            reconnect_attempts: attempts,
        });
        let _ = listener.send(ChannelEvent::Reconnecting { attempt: attempts });

        tokio::select! {
            _ = &mut shutdown => return,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_from_http_url() {
        let config = ChannelConfig::new("http://127.0.0.1:8000/");
        assert_eq!(
            config.endpoint().unwrap(),
            "ws://127.0.0.1:8000/socket.io/?EIO=4&transport=websocket"
        );
    }

    #[test]
    fn test_endpoint_from_https_and_ws_urls() {
        assert_eq!(
            ChannelConfig::new("https://faces.example.org")
                .endpoint()
                .unwrap(),
            "wss://faces.example.org/socket.io/?EIO=4&transport=websocket"
        );
        assert_eq!(
            ChannelConfig::new("ws://10.0.0.5:8000").endpoint().unwrap(),
            "ws://10.0.0.5:8000/socket.io/?EIO=4&transport=websocket"
        );
        assert!(matches!(
            ChannelConfig::new("ftp://nope").endpoint(),
            Err(ChannelError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_default_config_values() {
        let config = ChannelConfig::new("http://127.0.0.1:8000");
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.ping_timeout, Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_close_without_open_is_noop() {
        let manager = ConnectionManager::new(ChannelConfig::new("http://127.0.0.1:1"));
        manager.close().await;
        manager.close().await;
        assert_eq!(manager.status(), ChannelStatus::default());
        assert!(!manager.is_open().await);
    }

    #[tokio::test]
    async fn test_open_twice_keeps_single_handle() {
        let mut config = ChannelConfig::new("http://127.0.0.1:1");
        config.reconnect_delay = Duration::from_millis(10);
        let manager = ConnectionManager::new(config);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(manager.open(tx.clone()).await);
        assert!(!manager.open(tx).await);
        assert!(manager.is_open().await);

        // Nothing listens on port 1, so the first attempt fails and a retry is scheduled.
        match rx.recv().await {
            Some(ChannelEvent::ConnectError { attempt, .. }) => assert_eq!(attempt, 1),
            other => panic!("expected connect error, got {:?}", other),
        }
        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Reconnecting { attempt: 1 })
        );

        manager.close().await;
        assert!(!manager.is_open().await);
        assert_eq!(manager.status().state, ConnectionState::Disconnected);
        // The listener was released together with the handle.
        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, ChannelEvent::Event { .. }));
        }
    }
}
