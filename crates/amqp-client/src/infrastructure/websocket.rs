//! WebSocket transport.
//!
//! Each AMQP write becomes one binary WebSocket message.  Incoming binary
//! messages are fed to the reassembler exactly like TCP chunks; message
//! boundaries carry no meaning for the protocol.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::application::connection::Connection;
use crate::application::error::ClientError;
use crate::domain::config::ConnectionConfig;
use crate::infrastructure::transport::{ChannelTransport, Connector, WriterCommand};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects through a WebSocket endpoint (for example a broker's
/// web-STOMP/AMQP plugin or a TCP-to-WebSocket bridge).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, ClientError> {
        let url = config.websocket_url();
        let (ws, _response) = connect_async(url.as_str())
            .await
            .map_err(|e| ClientError::Transport(format!("WebSocket connect to {url} failed: {e}")))?;
        info!(%url, "WebSocket connection established");

        let (sink, stream) = ws.split();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(config.clone(), Arc::new(ChannelTransport::new(tx)))?;

        tokio::spawn(write_loop(sink, rx));
        tokio::spawn(read_loop(stream, conn.clone()));

        conn.start().await?;
        Ok(conn)
    }
}

async fn write_loop(mut sink: SplitSink<WsStream, WsMessage>, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Data(bytes) => {
                if let Err(e) = sink.send(WsMessage::Binary(bytes)).await {
                    warn!(error = %e, "WebSocket send failed");
                    break;
                }
            }
            WriterCommand::Close => {
                if let Err(e) = sink.close().await {
                    debug!(error = %e, "WebSocket close failed");
                }
                break;
            }
        }
    }
    debug!("WebSocket writer stopped");
}

async fn read_loop(mut stream: SplitStream<WsStream>, conn: Connection) {
    while let Some(message) = stream.next().await {
        match message {
            Ok(WsMessage::Binary(data)) => conn.handle_data(&data),
            Ok(WsMessage::Close(frame)) => {
                debug!(?frame, "WebSocket closed by peer");
                break;
            }
            // tungstenite answers pings itself
            Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) | Ok(WsMessage::Frame(_)) => {}
            Ok(WsMessage::Text(text)) => {
                warn!(len = text.len(), "unexpected text message ignored");
            }
            Err(e) => {
                warn!(error = %e, "WebSocket read failed");
                break;
            }
        }
    }
    conn.on_transport_closed();
}
