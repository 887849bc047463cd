//! Plain TCP transport.
//!
//! TCP is a stream: one `read()` may return part of a frame or several
//! frames.  The reader task does not care; it hands every chunk to
//! [`Connection::handle_data`], whose reassembler rebuilds the frames.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::application::connection::Connection;
use crate::application::error::ClientError;
use crate::domain::config::ConnectionConfig;
use crate::infrastructure::transport::{ChannelTransport, Connector, WriterCommand};

/// Size of each socket read.
const READ_CHUNK: usize = 16 * 1024;

/// Connects over `tokio::net::TcpStream`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Connection, ClientError> {
        let addr = format!("{}:{}", config.host, config.port);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ClientError::Transport(format!("failed to connect to {addr}: {e}")))?;
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "could not disable Nagle's algorithm");
        }
        info!(%addr, "TCP connection established");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Connection::new(config.clone(), Arc::new(ChannelTransport::new(tx)))?;

        tokio::spawn(write_loop(write_half, rx));
        tokio::spawn(read_loop(read_half, conn.clone()));

        conn.start().await?;
        Ok(conn)
    }
}

async fn write_loop(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<WriterCommand>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriterCommand::Data(bytes) => {
                // `write_all` loops until the OS has taken every byte.
                if let Err(e) = write_half.write_all(&bytes).await {
                    warn!(error = %e, "TCP write failed");
                    break;
                }
            }
            WriterCommand::Close => {
                if let Err(e) = write_half.shutdown().await {
                    debug!(error = %e, "TCP shutdown failed");
                }
                break;
            }
        }
    }
    debug!("TCP writer stopped");
}

async fn read_loop(mut read_half: OwnedReadHalf, conn: Connection) {
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => {
                debug!("TCP connection closed by peer (EOF)");
                break;
            }
            Ok(n) => conn.handle_data(&buf[..n]),
            Err(e) => {
                warn!(error = %e, "TCP read failed");
                break;
            }
        }
    }
    conn.on_transport_closed();
}
