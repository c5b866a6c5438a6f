//! A single Socket.IO connection over WebSocket.

use crate::{
    ChannelError,
    manager::ChannelEvent,
    packet::{DEFAULT_NAMESPACE, EnginePacket, Handshake, SocketPacket},
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why [`Connection::run`] returned.
pub(crate) enum Exit {
    /// `close()` was requested; the socket has been shut down cleanly.
    Shutdown,
    /// The server disconnected the namespace on purpose.
    Kicked,
    /// The connection dropped for the given reason.
    Lost(String),
}

/// An established connection that has completed the namespace handshake.
pub(crate) struct Connection {
    ws: WsStream,
    handshake: Handshake,
    pub(crate) sid: String,
}

impl Connection {
    /// Opens the WebSocket and completes the Engine.IO and Socket.IO
    /// handshakes for the default namespace.
    pub(crate) async fn establish(endpoint: &str) -> Result<Self, ChannelError> {
        let (mut ws, _) = connect_async(endpoint).await?;

        let handshake = match next_packet(&mut ws).await? {
            EnginePacket::Open(handshake) => handshake,
            other => {
                return Err(ChannelError::Handshake(format!(
                    "expected open packet, got {:?}",
                    other
                )));
            }
        };
        debug!(sid = %handshake.sid, ping_interval = handshake.ping_interval, "Engine.IO session opened");

        send(
            &mut ws,
            EnginePacket::Message(SocketPacket::connect(DEFAULT_NAMESPACE).encode()),
        )
        .await?;

        loop {
            match next_packet(&mut ws).await? {
                EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
                    SocketPacket::Connect { data, .. } => {
                        let sid = data
                            .as_ref()
                            .and_then(|d| d.get("sid"))
                            .and_then(Value::as_str)
                            .unwrap_or(handshake.sid.as_str())
                            .to_string();
                        return Ok(Self { ws, handshake, sid });
                    }
                    SocketPacket::ConnectError { data, .. } => {
                        return Err(ChannelError::Handshake(format!(
                            "namespace connect refused: {}",
                            data.unwrap_or(Value::Null)
                        )));
                    }
                    other => debug!(packet = ?other, "Ignoring packet before namespace connect"),
                },
                EnginePacket::Ping(data) => send(&mut ws, EnginePacket::Pong(data)).await?,
                EnginePacket::Close => return Err(ChannelError::Closed),
                _ => {}
            }
        }
    }

    /// Pumps the connection until it is lost or `shutdown` fires.
    ///
    /// Server pings are answered immediately. If no ping arrives within the
    /// server's ping interval plus `ping_timeout`, the connection is treated
    /// as lost.
    pub(crate) async fn run(
        mut self,
        listener: &mpsc::UnboundedSender<ChannelEvent>,
        shutdown: &mut oneshot::Receiver<()>,
        ping_timeout: Duration,
    ) -> Exit {
        let heartbeat = Duration::from_millis(self.handshake.ping_interval) + ping_timeout;
        let deadline = tokio::time::sleep(heartbeat);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut *shutdown => {
                    self.close().await;
                    return Exit::Shutdown;
                }
                _ = &mut deadline => {
                    return Exit::Lost("ping timeout".to_string());
                }
                frame = self.ws.next() => {
                    let text = match frame {
                        None => return Exit::Lost("transport close".to_string()),
                        Some(Err(e)) => return Exit::Lost(format!("transport error: {}", e)),
                        Some(Ok(WsMessage::Close(_))) => return Exit::Lost("transport close".to_string()),
                        Some(Ok(WsMessage::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    match EnginePacket::decode(text.as_str()) {
                        Ok(EnginePacket::Ping(data)) => {
                            deadline.as_mut().reset(Instant::now() + heartbeat);
                            if let Err(e) = send(&mut self.ws, EnginePacket::Pong(data)).await {
                                return Exit::Lost(format!("transport error: {}", e));
                            }
                        }
                        Ok(EnginePacket::Message(body)) => match SocketPacket::decode(&body) {
                            Ok(SocketPacket::Event { name, args, .. }) => {
                                let payload = args.into_iter().next().unwrap_or(Value::Null);
                                let _ = listener.send(ChannelEvent::Event { name, payload });
                            }
                            Ok(SocketPacket::Disconnect { .. }) => {
                                let _ = self.ws.close(None).await;
                                return Exit::Kicked;
                            }
                            Ok(other) => debug!(packet = ?other, "Ignoring packet"),
                            Err(e) => warn!(error = %e, "Dropping undecodable packet"),
                        },
                        Ok(EnginePacket::Close) => return Exit::Lost("transport close".to_string()),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Dropping undecodable frame"),
                    }
                }
            }
        }
    }

    /// Leaves the namespace and closes the WebSocket. Errors are ignored: the
    /// peer may already be gone.
    async fn close(&mut self) {
        let _ = send(
            &mut self.ws,
            EnginePacket::Message(SocketPacket::disconnect(DEFAULT_NAMESPACE).encode()),
        )
        .await;
        let _ = self.ws.close(None).await;
        info!(sid = %self.sid, "Socket connection closed.");
    }
}

async fn send(ws: &mut WsStream, packet: EnginePacket) -> Result<(), ChannelError> {
    ws.send(WsMessage::Text(packet.encode().into())).await?;
    Ok(())
}

async fn next_packet(ws: &mut WsStream) -> Result<EnginePacket, ChannelError> {
    loop {
        match ws.next().await {
            None | Some(Ok(WsMessage::Close(_))) => return Err(ChannelError::Closed),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(WsMessage::Text(text))) => return Ok(EnginePacket::decode(text.as_str())?),
            Some(Ok(_)) => continue,
        }
    }
}
