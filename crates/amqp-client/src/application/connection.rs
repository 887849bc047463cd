//! The connection state machine and frame dispatch.
//!
//! # Threading model
//!
//! All protocol state lives in one [`ConnectionInner`] behind a mutex.  Two
//! kinds of code take the lock:
//!
//! - the transport's reader task, through [`Connection::handle_data`],
//!   which reassembles frames and dispatches every one of them under a
//!   single lock acquisition, and
//! - API calls on [`Connection`] and [`Channel`], which lock just long
//!   enough to check state, queue a reply slot and write their frames.
//!
//! No frame is ever dispatched concurrently with another, and user
//! callbacks never run under the lock (they run on their own tasks).

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use amqp_wire::protocol::frame::{write_method_frame, HEARTBEAT_FRAME, PROTOCOL_HEADER};
use amqp_wire::{decode_method, FieldTable, FieldValue, FrameReassembler, FrameType, FrameView, Method};

use crate::application::channel::{Channel, ChannelInner, Reply, ReplyReceiver, SlotAction};
use crate::application::error::ClientError;
use crate::application::transport::Transport;
use crate::domain::config::ConnectionConfig;
use crate::domain::types::{ChannelState, ConnectionState};

/// Capabilities announced in `start-ok`.
const CAPABILITIES: [&str; 7] = [
    "authentication_failure_close",
    "basic.nack",
    "connection.blocked",
    "consumer_cancel_notify",
    "exchange_exchange_bindings",
    "per_consumer_qos",
    "publisher_confirms",
];

type Waiter = oneshot::Sender<Result<(), ClientError>>;

/// The lock and the transport, shared by the connection and every handle.
pub(crate) struct Shared {
    inner: Mutex<ConnectionInner>,
    pub(crate) transport: Arc<dyn Transport>,
}

impl Shared {
    /// Locks the state.  A panic while holding the lock cannot leave the
    /// protocol state half-updated in a way later frames depend on, so a
    /// poisoned lock is recovered rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Connection-wide protocol state.
pub(crate) struct ConnectionInner {
    state: ConnectionState,
    config: ConnectionConfig,
    tuned: bool,
    channel_max: u16,
    frame_max: u32,
    heartbeat: u16,
    /// Indexed by channel id; slot 0 is the connection itself and stays empty.
    channels: Vec<Option<ChannelInner>>,
    next_epoch: u64,
    reassembler: FrameReassembler,
    control_buf: Vec<u8>,
    blocked: Option<String>,
    connect_waiter: Option<Waiter>,
    close_waiter: Option<Waiter>,
    /// Code and text of a close the client sent.
    closing: Option<(u16, String)>,
    close_error: Option<ClientError>,
}

impl ConnectionInner {
    fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            config,
            tuned: false,
            channel_max: 0,
            frame_max: 0,
            heartbeat: 0,
            channels: vec![None],
            next_epoch: 0,
            reassembler: FrameReassembler::default(),
            control_buf: Vec::with_capacity(512),
            blocked: None,
            connect_waiter: None,
            close_waiter: None,
            closing: None,
            close_error: None,
        }
    }

    /// Fails unless the handshake has completed and no close has started.
    pub(crate) fn ensure_open(&self) -> Result<(), ClientError> {
        match self.state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(self
                .close_error
                .clone()
                .unwrap_or(ClientError::ConnectionNotOpen)),
            _ => Err(ClientError::ConnectionNotOpen),
        }
    }

    pub(crate) fn blocked_reason(&self) -> Option<&str> {
        self.blocked.as_deref()
    }

    /// The live channel `id` if it is still the one created at `epoch`.
    pub(crate) fn channel(&self, id: u16, epoch: u64) -> Option<&ChannelInner> {
        self.channels
            .get(id as usize)
            .and_then(Option::as_ref)
            .filter(|ch| ch.epoch == epoch)
    }

    /// The channel for an API call: connection open, channel open.
    pub(crate) fn open_channel(&mut self, id: u16, epoch: u64) -> Result<&mut ChannelInner, ClientError> {
        self.ensure_open()?;
        self.channels
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .filter(|ch| ch.epoch == epoch && ch.state == ChannelState::Open)
            .ok_or(ClientError::ChannelNotOpen(id))
    }

    /// Lowest free id, or one past the highest slot.
    fn free_slot(&self) -> usize {
        self.channels
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, slot)| slot.is_none())
            .map(|(i, _)| i)
            .unwrap_or_else(|| self.channels.len().max(1))
    }

    fn send_control(&mut self, transport: &dyn Transport, methods: &[Method]) -> Result<(), ClientError> {
        self.control_buf.clear();
        for method in methods {
            write_method_frame(&mut self.control_buf, 0, method)?;
            debug!(channel = 0, method = method.name(), "sending");
        }
        transport.send(&self.control_buf)
    }

    /// Closes every channel with `err`, fails the connect waiter and marks
    /// the connection closed.
    fn shutdown(&mut self, err: &ClientError, clean: bool) {
        for slot in self.channels.iter_mut() {
            if let Some(mut channel) = slot.take() {
                channel.teardown(err, clean);
            }
        }
        if let Some(waiter) = self.connect_waiter.take() {
            let _ = waiter.send(Err(err.clone()));
        }
        self.reassembler.reset();
        self.state = ConnectionState::Closed;
        self.close_error = Some(err.clone());
    }

    // ── Frame dispatch ────────────────────────────────────────────────────────

    fn dispatch(&mut self, frame: FrameView<'_>, shared: &Arc<Shared>) {
        if self.state == ConnectionState::Closed {
            return;
        }
        let transport = &*shared.transport;
        let kind = match frame.kind() {
            Ok(kind) => kind,
            Err(e) => {
                error!(channel = frame.channel, error = %e, "frame skipped");
                return;
            }
        };

        if kind == FrameType::Heartbeat {
            debug!("heartbeat received, echoing");
            if let Err(e) = transport.send(&HEARTBEAT_FRAME) {
                warn!(error = %e, "could not echo heartbeat");
            }
            return;
        }

        if frame.channel == 0 {
            if kind != FrameType::Method {
                warn!(frame_type = frame.frame_type, "content frame on channel 0 skipped");
                return;
            }
            match decode_method(frame.payload) {
                Ok(method) => {
                    debug!(channel = 0, method = method.name(), "received");
                    self.on_connection_method(method, transport);
                }
                Err(e) => error!(channel = 0, error = %e, "method could not be decoded, skipped"),
            }
            return;
        }

        let id = frame.channel;
        let Some(channel) = self.channels.get_mut(id as usize).and_then(Option::as_mut) else {
            warn!(
                channel = id,
                frame_type = frame.frame_type,
                size = frame.payload.len(),
                "frame for unknown channel skipped"
            );
            return;
        };
        let action = match kind {
            FrameType::Method => match decode_method(frame.payload) {
                Ok(method) => {
                    debug!(channel = id, method = method.name(), "received");
                    channel.on_method(method, transport, shared)
                }
                Err(e) => {
                    error!(channel = id, error = %e, "method could not be decoded, skipped");
                    SlotAction::Keep
                }
            },
            FrameType::Header => {
                channel.on_header(frame.payload);
                SlotAction::Keep
            }
            FrameType::Body => {
                channel.on_body(frame.payload);
                SlotAction::Keep
            }
            FrameType::Heartbeat => SlotAction::Keep,
        };
        if action == SlotAction::Release {
            self.channels[id as usize] = None;
            debug!(channel = id, "channel released");
        }
    }

    fn on_connection_method(&mut self, method: Method, transport: &dyn Transport) {
        match method {
            Method::ConnectionStart {
                version_major,
                version_minor,
                mechanisms,
                ..
            } => {
                info!(version_major, version_minor, "connection.start received");
                if !mechanisms.split(' ').any(|m| m == "PLAIN") {
                    warn!(mechanisms = %mechanisms, "broker does not list PLAIN");
                }
                let start_ok = Method::ConnectionStartOk {
                    client_properties: client_properties(self.config.name.as_deref()),
                    mechanism: "PLAIN".to_string(),
                    response: plain_response(&self.config.username, &self.config.password),
                    locale: String::new(),
                };
                self.state = ConnectionState::Authenticating;
                if let Err(e) = self.send_control(transport, &[start_ok]) {
                    self.fail(e, transport);
                }
            }
            Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            } => {
                self.channel_max = negotiate(self.config.channel_max as u32, channel_max as u32) as u16;
                self.frame_max = negotiate(self.config.frame_max, frame_max);
                self.heartbeat = if self.config.heartbeat == 0 || heartbeat == 0 {
                    0
                } else {
                    self.config.heartbeat.min(heartbeat)
                };
                self.tuned = true;
                info!(
                    channel_max = self.channel_max,
                    frame_max = self.frame_max,
                    heartbeat = self.heartbeat,
                    "connection tuned"
                );
                let tune_ok = Method::ConnectionTuneOk {
                    channel_max: self.channel_max,
                    frame_max: self.frame_max,
                    heartbeat: self.heartbeat,
                };
                let open = Method::ConnectionOpen {
                    virtual_host: self.config.vhost.clone(),
                };
                self.state = ConnectionState::Tuning;
                if let Err(e) = self.send_control(transport, &[tune_ok, open]) {
                    self.fail(e, transport);
                }
            }
            Method::ConnectionOpenOk => {
                self.state = ConnectionState::Open;
                info!(vhost = %self.config.vhost, "connection open");
                if let Some(waiter) = self.connect_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
            }
            Method::ConnectionClose {
                reply_code,
                reply_text,
                class_id,
                method_id,
            } => {
                warn!(
                    code = reply_code,
                    reason = %reply_text,
                    class_id,
                    method_id,
                    "connection closed by broker"
                );
                let err = ClientError::ConnectionClosed {
                    code: reply_code,
                    reason: reply_text,
                };
                self.shutdown(&err, false);
                if let Err(e) = self.send_control(transport, &[Method::ConnectionCloseOk]) {
                    warn!(error = %e, "could not send connection.close-ok");
                }
                if let Some(waiter) = self.close_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
                transport.close();
            }
            Method::ConnectionCloseOk => {
                let (code, reason) = self
                    .closing
                    .take()
                    .unwrap_or_else(|| (200, "connection closed".to_string()));
                info!(code, reason = %reason, "connection closed");
                self.shutdown(&ClientError::ConnectionClosed { code, reason }, true);
                if let Some(waiter) = self.close_waiter.take() {
                    let _ = waiter.send(Ok(()));
                }
                transport.close();
            }
            Method::ConnectionBlocked { reason } => {
                warn!(reason = %reason, "connection blocked by broker");
                self.blocked = Some(reason);
            }
            Method::ConnectionUnblocked => {
                info!("connection unblocked");
                self.blocked = None;
            }
            Method::ConnectionSecure { .. } => {
                error!("broker sent connection.secure; only PLAIN authentication is supported");
                self.fail(
                    ClientError::UnexpectedReply("connection.secure"),
                    transport,
                );
            }
            other => warn!(method = other.name(), "unexpected method on channel 0 ignored"),
        }
    }

    /// Gives up on the connection after a local failure.
    fn fail(&mut self, err: ClientError, transport: &dyn Transport) {
        error!(error = %err, "connection failed");
        self.shutdown(&err, false);
        if let Some(waiter) = self.close_waiter.take() {
            let _ = waiter.send(Err(err));
        }
        transport.close();
    }
}

/// `min` of two limits, where 0 on one side means "whatever the other says".
fn negotiate(client: u32, server: u32) -> u32 {
    if client == 0 || server == 0 {
        client.max(server)
    } else {
        client.min(server)
    }
}

/// SASL PLAIN response: `\0username\0password`.
fn plain_response(username: &str, password: &str) -> Vec<u8> {
    let mut response = Vec::with_capacity(username.len() + password.len() + 2);
    response.push(0);
    response.extend_from_slice(username.as_bytes());
    response.push(0);
    response.extend_from_slice(password.as_bytes());
    response
}

fn client_properties(connection_name: Option<&str>) -> FieldTable {
    let capabilities: FieldTable = CAPABILITIES
        .iter()
        .map(|name| (name.to_string(), FieldValue::Bool(true)))
        .collect();
    let mut props = FieldTable::new();
    props.insert("product".into(), FieldValue::Str(env!("CARGO_PKG_NAME").into()));
    props.insert("version".into(), FieldValue::Str(env!("CARGO_PKG_VERSION").into()));
    props.insert(
        "platform".into(),
        FieldValue::Str(format!("Rust {} {}", std::env::consts::OS, std::env::consts::ARCH)),
    );
    props.insert("capabilities".into(), FieldValue::Table(capabilities));
    if let Some(name) = connection_name {
        props.insert("connection_name".into(), FieldValue::Str(name.into()));
    }
    props
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// One AMQP connection over a caller-supplied [`Transport`].
///
/// # Lifecycle (for beginners)
///
/// ```text
/// let conn = Connection::new(config, transport)?;
/// conn.start().await?;                 // protocol header → start/tune/open
/// let ch = conn.channel(None).await?;  // lowest free channel id
/// ...
/// conn.close(200, "bye").await?;
/// ```
///
/// The transport adapter must feed every received chunk to
/// [`Connection::handle_data`] and call [`Connection::on_transport_closed`]
/// at end of stream; [`crate::infrastructure`] has TCP and WebSocket
/// adapters that do this.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Result of looking up or allocating a channel slot.
enum ChannelSlot {
    Existing(Channel),
    Opening(Channel, ReplyReceiver),
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    /// Creates a connection in the `Disconnected` state.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidConfig`] if the configuration fails validation
    /// (for example `frame_max` between 1 and 4095).
    pub fn new(config: ConnectionConfig, transport: Arc<dyn Transport>) -> Result<Self, ClientError> {
        config
            .validate()
            .map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(ConnectionInner::new(config)),
                transport,
            }),
        })
    }

    /// Sends the protocol header and resolves once the broker's
    /// `connection.open-ok` arrives.
    ///
    /// The header is sent before this returns; the future only waits.
    pub fn start(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let rx = self.begin_start();
        async move { rx?.await.map_err(|_| ClientError::ConnectionNotOpen)? }
    }

    fn begin_start(&self) -> Result<oneshot::Receiver<Result<(), ClientError>>, ClientError> {
        let mut inner = self.shared.lock();
        if inner.state != ConnectionState::Disconnected {
            return Err(ClientError::ConnectionNotOpen);
        }
        let (tx, rx) = oneshot::channel();
        inner.connect_waiter = Some(tx);
        inner.state = ConnectionState::Negotiating;
        if let Err(e) = self.shared.transport.send(&PROTOCOL_HEADER) {
            inner.connect_waiter = None;
            inner.state = ConnectionState::Closed;
            inner.close_error = Some(e.clone());
            return Err(e);
        }
        debug!("protocol header sent");
        Ok(rx)
    }

    /// Opens a channel.
    ///
    /// With `Some(id)` of an open channel, returns that channel.  With
    /// `Some(id)` of a free id, opens that id.  With `None` (or `Some(0)`),
    /// opens the lowest free id.
    ///
    /// # Errors
    ///
    /// [`ClientError::ChannelLimit`] when the id would exceed the
    /// negotiated `channel_max`.
    pub fn channel(&self, id: Option<u16>) -> impl Future<Output = Result<Channel, ClientError>> + Send + 'static {
        let slot = self.allocate_channel(id);
        async move {
            match slot? {
                ChannelSlot::Existing(channel) => Ok(channel),
                ChannelSlot::Opening(channel, rx) => {
                    match rx.await.map_err(|_| ClientError::ConnectionNotOpen)?? {
                        Reply::Method(Method::ChannelOpenOk) => Ok(channel),
                        _ => Err(ClientError::UnexpectedReply("channel.open-ok")),
                    }
                }
            }
        }
    }

    fn allocate_channel(&self, requested: Option<u16>) -> Result<ChannelSlot, ClientError> {
        let mut inner = self.shared.lock();
        inner.ensure_open()?;
        let requested = requested.filter(|&id| id != 0);

        if let Some(id) = requested {
            if let Some(existing) = inner.channels.get(id as usize).and_then(Option::as_ref) {
                if existing.state != ChannelState::Open {
                    return Err(ClientError::ChannelNotOpen(id));
                }
                return Ok(ChannelSlot::Existing(Channel::handle(
                    Arc::clone(&self.shared),
                    id,
                    existing.epoch,
                )));
            }
        }

        let index = requested.map(usize::from).unwrap_or_else(|| inner.free_slot());
        let limit = if inner.channel_max == 0 {
            u16::MAX
        } else {
            inner.channel_max
        };
        if index > limit as usize {
            return Err(ClientError::ChannelLimit(limit));
        }
        let id = index as u16;

        let epoch = inner.next_epoch;
        inner.next_epoch += 1;
        let mut channel = ChannelInner::new(id, epoch, inner.frame_max);
        let rx = channel.call(&*self.shared.transport, &Method::ChannelOpen)?;
        if inner.channels.len() <= index {
            inner.channels.resize_with(index + 1, || None);
        }
        inner.channels[index] = Some(channel);
        debug!(channel = id, "opening channel");
        Ok(ChannelSlot::Opening(
            Channel::handle(Arc::clone(&self.shared), id, epoch),
            rx,
        ))
    }

    /// Sends `connection.close` and resolves once the broker answers.
    ///
    /// From this call on every new operation is rejected.  Closing an
    /// already closed connection resolves immediately.
    pub fn close(&self, reply_code: u16, reason: &str) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let rx = self.begin_close(reply_code, reason);
        async move {
            match rx? {
                Some(rx) => rx.await.map_err(|_| ClientError::ConnectionNotOpen)?,
                None => Ok(()),
            }
        }
    }

    fn begin_close(
        &self,
        reply_code: u16,
        reason: &str,
    ) -> Result<Option<oneshot::Receiver<Result<(), ClientError>>>, ClientError> {
        let mut inner = self.shared.lock();
        let transport = &*self.shared.transport;
        match inner.state {
            ConnectionState::Closed => return Ok(None),
            ConnectionState::Closing => return Err(ClientError::ConnectionNotOpen),
            ConnectionState::Disconnected => {
                inner.state = ConnectionState::Closed;
                transport.close();
                return Ok(None);
            }
            _ => {}
        }
        let close = Method::ConnectionClose {
            reply_code,
            reply_text: reason.to_string(),
            class_id: 0,
            method_id: 0,
        };
        inner.send_control(transport, &[close])?;
        let (tx, rx) = oneshot::channel();
        inner.close_waiter = Some(tx);
        inner.closing = Some((reply_code, reason.to_string()));
        inner.state = ConnectionState::Closing;
        info!(code = reply_code, reason, "closing connection");
        Ok(Some(rx))
    }

    /// Feeds bytes received from the transport.
    ///
    /// Chunks may split frames anywhere.  Every completed frame is handled
    /// before this returns.  A frame larger than the negotiated maximum
    /// closes the connection.
    pub fn handle_data(&self, chunk: &[u8]) {
        let mut guard = self.shared.lock();
        let inner = &mut *guard;
        if inner.state == ConnectionState::Closed {
            debug!(bytes = chunk.len(), "data after close ignored");
            return;
        }
        let mut reassembler = std::mem::take(&mut inner.reassembler);
        // The negotiated limit covers every frame after connection.tune,
        // including the rest of this chunk.
        let result = reassembler.push_with_limits(chunk, |frame| {
            let was_tuned = inner.tuned;
            inner.dispatch(frame, &self.shared);
            (inner.tuned && !was_tuned).then_some(inner.frame_max as usize)
        });
        inner.reassembler = reassembler;
        if let Err(e) = result {
            inner.fail(ClientError::Protocol(e), &*self.shared.transport);
        }
    }

    /// Reports that the transport has reached end of stream or failed.
    ///
    /// Everything outstanding is rejected.  A close the client started is
    /// treated as complete.
    pub fn on_transport_closed(&self) {
        let mut inner = self.shared.lock();
        if inner.state == ConnectionState::Closed {
            return;
        }
        warn!(state = ?inner.state, "transport closed");
        let err = ClientError::Transport("connection lost".to_string());
        let was_closing = inner.state == ConnectionState::Closing;
        inner.shutdown(&err, was_closing);
        if let Some(waiter) = inner.close_waiter.take() {
            let _ = waiter.send(if was_closing { Ok(()) } else { Err(err) });
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    /// The broker's reason while it blocks publishing, else `None`.
    pub fn blocked_reason(&self) -> Option<String> {
        self.shared.lock().blocked.clone()
    }

    /// Negotiated highest channel id (0 = no limit).
    pub fn channel_max(&self) -> u16 {
        self.shared.lock().channel_max
    }

    /// Negotiated largest frame in bytes (0 = no limit).
    pub fn frame_max(&self) -> u32 {
        self.shared.lock().frame_max
    }

    /// Negotiated heartbeat interval in seconds (0 = disabled).
    pub fn heartbeat(&self) -> u16 {
        self.shared.lock().heartbeat
    }

    /// The error the connection was closed with, once closed.
    pub fn close_error(&self) -> Option<ClientError> {
        self.shared.lock().close_error.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::MockTransport;
    use crate::infrastructure::mock::RecordingTransport;
    use amqp_wire::ProtocolError;

    fn method_frame(channel: u16, method: &Method) -> Vec<u8> {
        let mut buf = Vec::new();
        write_method_frame(&mut buf, channel, method).unwrap();
        buf
    }

    fn tune(channel_max: u16, frame_max: u32, heartbeat: u16) -> Vec<u8> {
        method_frame(
            0,
            &Method::ConnectionTune {
                channel_max,
                frame_max,
                heartbeat,
            },
        )
    }

    #[test]
    fn test_negotiate_takes_minimum_or_other_side_when_zero() {
        assert_eq!(negotiate(4096, 131_072), 4096);
        assert_eq!(negotiate(0, 131_072), 131_072);
        assert_eq!(negotiate(8192, 0), 8192);
        assert_eq!(negotiate(0, 0), 0);
    }

    #[test]
    fn test_plain_response_layout() {
        assert_eq!(plain_response("guest", "secret"), b"\0guest\0secret".to_vec());
    }

    #[test]
    fn test_client_properties_announce_capabilities_and_name() {
        // Arrange / Act
        let props = client_properties(Some("worker-1"));

        // Assert
        assert_eq!(props["connection_name"], FieldValue::Str("worker-1".into()));
        let FieldValue::Table(caps) = &props["capabilities"] else {
            panic!("capabilities must be a table");
        };
        assert_eq!(caps.len(), CAPABILITIES.len());
        assert_eq!(caps["publisher_confirms"], FieldValue::Bool(true));
    }

    #[test]
    fn test_tune_applies_heartbeat_zero_rule() {
        // Arrange
        let transport = Arc::new(RecordingTransport::new());
        let config = ConnectionConfig {
            heartbeat: 30,
            ..Default::default()
        };
        let conn = Connection::new(config, transport.clone()).unwrap();
        let _start = conn.start();

        // Act: broker proposes no heartbeat
        conn.handle_data(&tune(2047, 131_072, 0));

        // Assert
        assert_eq!(conn.heartbeat(), 0);
        assert_eq!(conn.channel_max(), 2047);
        assert_eq!(conn.frame_max(), 4096);
        assert_eq!(conn.state(), ConnectionState::Tuning);
    }

    #[test]
    fn test_negotiated_frame_max_applies_to_frames_after_tune_in_same_chunk() {
        // Arrange: tune and an oversized body frame arrive together
        let transport = Arc::new(RecordingTransport::new());
        let conn = Connection::new(ConnectionConfig::default(), transport.clone()).unwrap();
        let _start = conn.start();
        let mut chunk = tune(2047, 131_072, 0);
        amqp_wire::protocol::frame::write_body_frame(&mut chunk, 1, &[0u8; 5000]);

        // Act
        conn.handle_data(&chunk);

        // Assert
        assert_eq!(conn.frame_max(), 4096);
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(
            conn.close_error(),
            Some(ClientError::Protocol(ProtocolError::FrameTooLarge { size: 5008, max: 4096 }))
        );
        assert!(transport.is_closed());
    }

    #[test]
    fn test_small_frame_max_is_rejected_before_connecting() {
        let config = ConnectionConfig {
            frame_max: 1000,
            ..Default::default()
        };
        let result = Connection::new(config, Arc::new(RecordingTransport::new()));
        assert!(matches!(result, Err(ClientError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_start_fails_when_transport_cannot_send_header() {
        // Arrange
        let mut mock = MockTransport::new();
        mock.expect_send()
            .times(1)
            .returning(|_| Err(ClientError::Transport("refused".into())));
        let conn = Connection::new(ConnectionConfig::default(), Arc::new(mock)).unwrap();

        // Act
        let result = conn.start().await;

        // Assert
        assert_eq!(result, Err(ClientError::Transport("refused".into())));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_failed_start_ok_send_rejects_connect_and_closes_transport() {
        // Arrange: header goes out, start-ok does not
        let mut mock = MockTransport::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        mock.expect_send()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ClientError::Transport("broken pipe".into())));
        mock.expect_close().times(1).return_const(());
        let conn = Connection::new(ConnectionConfig::default(), Arc::new(mock)).unwrap();
        let started = conn.start();

        // Act
        conn.handle_data(&method_frame(
            0,
            &Method::ConnectionStart {
                version_major: 0,
                version_minor: 9,
                server_properties: FieldTable::new(),
                mechanisms: "PLAIN AMQPLAIN".into(),
                locales: "en_US".into(),
            },
        ));

        // Assert
        assert_eq!(started.await, Err(ClientError::Transport("broken pipe".into())));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_channel_before_open_is_rejected_without_io() {
        // Arrange
        let transport = Arc::new(RecordingTransport::new());
        let conn = Connection::new(ConnectionConfig::default(), transport.clone()).unwrap();

        // Act
        let result = conn.allocate_channel(None);

        // Assert
        assert!(matches!(result, Err(ClientError::ConnectionNotOpen)));
        assert_eq!(transport.write_count(), 0);
    }

    #[test]
    fn test_free_slot_prefers_lowest_gap() {
        let mut inner = ConnectionInner::new(ConnectionConfig::default());
        assert_eq!(inner.free_slot(), 1);
        inner.channels = vec![None, Some(ChannelInner::new(1, 0, 4096)), None, Some(ChannelInner::new(3, 1, 4096))];
        assert_eq!(inner.free_slot(), 2);
        inner.channels[2] = Some(ChannelInner::new(2, 2, 4096));
        assert_eq!(inner.free_slot(), 4);
    }
}
