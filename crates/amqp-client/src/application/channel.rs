//! Channels: RPC correlation, consumers, publisher confirms, publish framing
//! and message assembly.
//!
//! # How a call works (for beginners)
//!
//! AMQP answers synchronous methods in order, per channel.  So a channel
//! does not need request ids: it keeps a FIFO of reply slots.
//!
//! 1. A public method such as [`Channel::queue_declare`] locks the
//!    connection state, pushes a `oneshot` sender onto the channel's
//!    `pending` queue and writes the method frame, all before returning.
//! 2. The returned future only awaits the `oneshot` receiver.
//! 3. When a reply frame arrives, the frame loop pops the *oldest* sender
//!    and completes it.
//!
//! Because step 1 happens eagerly, calling two methods back to back and
//! then awaiting both still pairs each reply with the right caller.
//!
//! # Scratch buffer
//!
//! Each channel owns one write buffer reused by every outbound frame.  It
//! is only touched while the connection lock is held, so a frame sequence
//! (publish method, header and body frames) is always written without
//! another call interleaving.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, warn};

use amqp_wire::protocol::frame::{
    decode_content_header, write_body_frame, write_content_header_frame, write_method_frame,
    DEFAULT_FRAME_MAX, FRAME_OVERHEAD,
};
use amqp_wire::{BasicProperties, FieldTable, Method, ProtocolError};

use crate::application::connection::Shared;
use crate::application::consumer::{Consumer, ConsumerStatus};
use crate::application::error::ClientError;
use crate::application::message::Message;
use crate::application::queue::Queue;
use crate::application::transport::Transport;
use crate::domain::types::{
    ChannelState, ConsumeOptions, ExchangeDeclareOptions, PublishOptions, QueueDeclareOptions,
    QueueInfo,
};

/// Upper bound on the body buffer reserved up front from a content header.
const MAX_BODY_PREALLOC: u64 = 1 << 20;

// ── Reply plumbing ────────────────────────────────────────────────────────────

/// What a pending call is completed with.
#[derive(Debug)]
pub(crate) enum Reply {
    Method(Method),
    /// `basic.get-ok` (with the assembled message) or `basic.get-empty`.
    Message(Option<Message>),
}

type ReplySender = oneshot::Sender<Result<Reply, ClientError>>;
pub(crate) type ReplyReceiver = oneshot::Receiver<Result<Reply, ClientError>>;
type ConfirmSender = oneshot::Sender<Result<u64, ClientError>>;

/// One queued reply slot.
struct PendingRpc {
    reply: ReplySender,
    /// Set for `basic.consume`: registered when `consume-ok` arrives.
    consumer: Option<ConsumerEntry>,
}

/// The frame loop's side of a consumer.
struct ConsumerEntry {
    deliveries: mpsc::UnboundedSender<Message>,
    status: watch::Sender<ConsumerStatus>,
}

impl ConsumerEntry {
    fn close(self, err: Option<ClientError>) {
        // No receiver left means nobody is waiting on the consumer.
        let _ = self.status.send(ConsumerStatus::Closed(err));
    }
}

/// How a message stub was started, and where it goes once complete.
enum Incoming {
    Deliver,
    Get(ReplySender),
    Return,
}

struct PendingMessage {
    kind: Incoming,
    message: Message,
    header_seen: bool,
}

/// What the connection must do with a channel slot after a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SlotAction {
    Keep,
    Release,
}

/// Turns a reply of the wrong kind into an error naming what arrived.
fn unexpected(reply: &Reply) -> ClientError {
    let name = match reply {
        Reply::Method(m) => m.name(),
        Reply::Message(Some(_)) => "basic.get-ok",
        Reply::Message(None) => "basic.get-empty",
    };
    warn!(reply = name, "unexpected reply to synchronous call");
    ClientError::UnexpectedReply(name)
}

async fn await_reply(rx: Result<ReplyReceiver, ClientError>) -> Result<Reply, ClientError> {
    rx?.await.map_err(|_| ClientError::ConnectionNotOpen)?
}

/// Feeds messages to a user callback, one at a time, off the frame loop.
async fn run_callback<F>(mut rx: mpsc::UnboundedReceiver<Message>, mut callback: F)
where
    F: FnMut(Message),
{
    while let Some(message) = rx.recv().await {
        callback(message);
    }
}

// ── Channel state (owned by the connection) ───────────────────────────────────

/// Per-channel state, stored in the connection's slot table.
pub(crate) struct ChannelInner {
    pub(crate) id: u16,
    /// Distinguishes this channel from earlier channels that used the same id.
    pub(crate) epoch: u64,
    pub(crate) state: ChannelState,
    frame_max: u32,
    pending: VecDeque<PendingRpc>,
    consumers: HashMap<String, ConsumerEntry>,
    /// Ordered by tag.
    unconfirmed: VecDeque<(u64, ConfirmSender)>,
    /// Next publish tag in confirm mode; 0 while confirm mode is off.
    confirm_id: u64,
    scratch: Vec<u8>,
    incoming: Option<PendingMessage>,
    returns: Option<mpsc::UnboundedSender<Message>>,
    flow_active: bool,
}

impl ChannelInner {
    pub(crate) fn new(id: u16, epoch: u64, frame_max: u32) -> Self {
        let mut inner = Self {
            id,
            epoch,
            state: ChannelState::Opening,
            frame_max,
            pending: VecDeque::new(),
            consumers: HashMap::new(),
            unconfirmed: VecDeque::new(),
            confirm_id: 0,
            scratch: Vec::new(),
            incoming: None,
            returns: None,
            flow_active: true,
        };
        inner.scratch.reserve(inner.frame_limit());
        inner
    }

    /// Largest frame this channel writes.  A negotiated 0 means "no limit",
    /// in which case body frames are cut at the default size.
    fn frame_limit(&self) -> usize {
        if self.frame_max == 0 {
            DEFAULT_FRAME_MAX as usize
        } else {
            self.frame_max as usize
        }
    }

    fn check_frame(&self, size: usize) -> Result<(), ClientError> {
        if self.frame_max != 0 && size > self.frame_max as usize {
            return Err(ClientError::FrameTooLarge {
                size,
                max: self.frame_max as usize,
            });
        }
        Ok(())
    }

    /// Encodes and sends one method frame without expecting a reply.
    pub(crate) fn send_method(
        &mut self,
        transport: &dyn Transport,
        method: &Method,
    ) -> Result<(), ClientError> {
        self.scratch.clear();
        write_method_frame(&mut self.scratch, self.id, method)?;
        self.check_frame(self.scratch.len())?;
        debug!(channel = self.id, method = method.name(), "sending");
        transport.send(&self.scratch)
    }

    /// Queues a reply slot and sends a synchronous method.
    pub(crate) fn call(
        &mut self,
        transport: &dyn Transport,
        method: &Method,
    ) -> Result<ReplyReceiver, ClientError> {
        self.call_with(transport, method, None)
    }

    fn call_with(
        &mut self,
        transport: &dyn Transport,
        method: &Method,
        consumer: Option<ConsumerEntry>,
    ) -> Result<ReplyReceiver, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.pending.push_back(PendingRpc { reply, consumer });
        if let Err(e) = self.send_method(transport, method) {
            self.pending.pop_back();
            return Err(e);
        }
        Ok(rx)
    }

    /// Writes `basic.publish`, the content header and the body frames.
    ///
    /// Nothing is sent if the method or header frame would exceed the
    /// negotiated frame size.  Returns the confirm receiver in confirm mode.
    fn publish(
        &mut self,
        transport: &dyn Transport,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &BasicProperties,
        options: PublishOptions,
    ) -> Result<Option<oneshot::Receiver<Result<u64, ClientError>>>, ClientError> {
        let limit = self.frame_limit();
        let method = Method::BasicPublish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            mandatory: options.mandatory,
            immediate: options.immediate,
        };

        self.scratch.clear();
        write_method_frame(&mut self.scratch, self.id, &method)?;
        self.check_frame(self.scratch.len())?;
        let header_start = self.scratch.len();
        write_content_header_frame(&mut self.scratch, self.id, body.len() as u64, properties)?;
        self.check_frame(self.scratch.len() - header_start)?;

        if self.scratch.len() > limit {
            transport.send(&self.scratch[..header_start])?;
            self.scratch.drain(..header_start);
        }

        let chunk_size = limit - FRAME_OVERHEAD;
        let mut body_frames = 0usize;
        for chunk in body.chunks(chunk_size) {
            if self.scratch.len() + chunk.len() + FRAME_OVERHEAD > limit {
                transport.send(&self.scratch)?;
                self.scratch.clear();
            }
            write_body_frame(&mut self.scratch, self.id, chunk);
            body_frames += 1;
        }
        transport.send(&self.scratch)?;
        debug!(
            channel = self.id,
            exchange,
            routing_key,
            body_size = body.len(),
            body_frames,
            "published"
        );

        if self.confirm_id == 0 {
            return Ok(None);
        }
        let tag = self.confirm_id;
        self.confirm_id += 1;
        let (tx, rx) = oneshot::channel();
        self.unconfirmed.push_back((tag, tx));
        Ok(Some(rx))
    }

    // ── Inbound frames ────────────────────────────────────────────────────────

    pub(crate) fn on_method(
        &mut self,
        method: Method,
        transport: &dyn Transport,
        shared: &Arc<Shared>,
    ) -> SlotAction {
        match method {
            Method::ChannelOpenOk => {
                self.state = ChannelState::Open;
                debug!(channel = self.id, "channel open");
                self.resolve(Reply::Method(method));
            }
            Method::ChannelClose {
                reply_code,
                ref reply_text,
                class_id,
                method_id,
            } => {
                warn!(
                    channel = self.id,
                    code = reply_code,
                    reason = %reply_text,
                    class_id,
                    method_id,
                    "channel closed by broker"
                );
                let err = ClientError::ChannelClosed {
                    channel: self.id,
                    code: reply_code,
                    reason: reply_text.clone(),
                };
                if let Err(e) = self.send_method(transport, &Method::ChannelCloseOk) {
                    warn!(channel = self.id, error = %e, "could not send channel.close-ok");
                }
                self.teardown(&err, false);
                return SlotAction::Release;
            }
            Method::ChannelCloseOk => {
                self.resolve(Reply::Method(method));
                self.teardown(&ClientError::ChannelNotOpen(self.id), true);
                return SlotAction::Release;
            }
            Method::ChannelFlow { active } => {
                debug!(channel = self.id, active, "flow control from broker");
                self.flow_active = active;
                if let Err(e) = self.send_method(transport, &Method::ChannelFlowOk { active }) {
                    warn!(channel = self.id, error = %e, "could not send channel.flow-ok");
                }
            }
            Method::BasicConsumeOk { ref consumer_tag } => match self.pending.pop_front() {
                Some(rpc) => {
                    if let Some(entry) = rpc.consumer {
                        if self.consumers.insert(consumer_tag.clone(), entry).is_some() {
                            warn!(channel = self.id, consumer_tag = %consumer_tag, "consumer tag reused");
                        }
                    }
                    let _ = rpc.reply.send(Ok(Reply::Method(method)));
                }
                None => warn!(channel = self.id, "consume-ok with no pending call"),
            },
            Method::BasicCancelOk { ref consumer_tag } => {
                if let Some(entry) = self.consumers.remove(consumer_tag) {
                    entry.close(None);
                }
                self.resolve(Reply::Method(method));
            }
            Method::BasicCancel {
                consumer_tag,
                no_wait,
            } => {
                warn!(channel = self.id, consumer_tag = %consumer_tag, "consumer cancelled by broker");
                if let Some(entry) = self.consumers.remove(&consumer_tag) {
                    entry.close(Some(ClientError::ConsumerCancelled(consumer_tag.clone())));
                }
                if !no_wait {
                    let ok = Method::BasicCancelOk { consumer_tag };
                    if let Err(e) = self.send_method(transport, &ok) {
                        warn!(channel = self.id, error = %e, "could not send basic.cancel-ok");
                    }
                }
            }
            Method::BasicAck {
                delivery_tag,
                multiple,
            } => self.settle(delivery_tag, multiple, true),
            Method::BasicNack {
                delivery_tag,
                multiple,
                ..
            } => self.settle(delivery_tag, multiple, false),
            Method::BasicDeliver {
                consumer_tag,
                delivery_tag,
                redelivered,
                exchange,
                routing_key,
            } => {
                let mut message = Message::stub(self.handle(shared), exchange, routing_key);
                message.consumer_tag = Some(consumer_tag);
                message.delivery_tag = delivery_tag;
                message.redelivered = redelivered;
                self.begin_message(Incoming::Deliver, message);
            }
            Method::BasicGetOk {
                delivery_tag,
                redelivered,
                exchange,
                routing_key,
                message_count,
            } => match self.pending.pop_front() {
                Some(rpc) => {
                    let mut message = Message::stub(self.handle(shared), exchange, routing_key);
                    message.delivery_tag = delivery_tag;
                    message.redelivered = redelivered;
                    message.message_count = Some(message_count);
                    self.begin_message(Incoming::Get(rpc.reply), message);
                }
                None => warn!(channel = self.id, "get-ok with no pending call"),
            },
            Method::BasicGetEmpty => self.resolve(Reply::Message(None)),
            Method::BasicReturn {
                reply_code,
                reply_text,
                exchange,
                routing_key,
            } => {
                let mut message = Message::stub(self.handle(shared), exchange, routing_key);
                message.reply_code = Some(reply_code);
                message.reply_text = Some(reply_text);
                self.begin_message(Incoming::Return, message);
            }
            Method::ExchangeDeclareOk
            | Method::ExchangeDeleteOk
            | Method::ExchangeBindOk
            | Method::ExchangeUnbindOk
            | Method::QueueDeclareOk { .. }
            | Method::QueueBindOk
            | Method::QueuePurgeOk { .. }
            | Method::QueueDeleteOk { .. }
            | Method::QueueUnbindOk
            | Method::BasicQosOk
            | Method::BasicRecoverOk
            | Method::ChannelFlowOk { .. }
            | Method::ConfirmSelectOk
            | Method::TxSelectOk
            | Method::TxCommitOk
            | Method::TxRollbackOk => self.resolve(Reply::Method(method)),
            other => {
                warn!(channel = self.id, method = other.name(), "unexpected method ignored");
            }
        }
        SlotAction::Keep
    }

    pub(crate) fn on_header(&mut self, payload: &[u8]) {
        let Some(pending) = self.incoming.as_mut() else {
            warn!(channel = self.id, "content header without a message, skipped");
            return;
        };
        match decode_content_header(payload) {
            Ok(header) => {
                pending.message.properties = header.properties;
                pending.message.body_size = header.body_size;
                pending.message.body =
                    Vec::with_capacity(header.body_size.min(MAX_BODY_PREALLOC) as usize);
                pending.header_seen = true;
                if header.body_size == 0 {
                    self.complete_message();
                }
            }
            Err(e) => {
                error!(channel = self.id, error = %e, "content header could not be decoded");
                self.discard_message(ClientError::Protocol(e));
            }
        }
    }

    pub(crate) fn on_body(&mut self, payload: &[u8]) {
        let Some(pending) = self.incoming.as_mut().filter(|p| p.header_seen) else {
            warn!(channel = self.id, size = payload.len(), "body frame without a message, skipped");
            return;
        };
        pending.message.body.extend_from_slice(payload);
        let received = pending.message.body.len() as u64;
        let expected = pending.message.body_size;
        if received > expected {
            error!(
                channel = self.id,
                received,
                expected,
                "body frames exceed the announced size, message dropped"
            );
            self.discard_message(ClientError::Protocol(ProtocolError::MalformedPayload(
                format!("body of {received} bytes exceeds announced {expected}"),
            )));
        } else if received == expected {
            self.complete_message();
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn handle(&self, shared: &Arc<Shared>) -> Channel {
        Channel::handle(Arc::clone(shared), self.id, self.epoch)
    }

    /// Completes the oldest pending call.
    fn resolve(&mut self, reply: Reply) {
        match self.pending.pop_front() {
            Some(rpc) => {
                let _ = rpc.reply.send(Ok(reply));
            }
            None => warn!(channel = self.id, "reply with no pending call ignored"),
        }
    }

    fn settle(&mut self, tag: u64, multiple: bool, ack: bool) {
        let outcome = |t: u64| {
            if ack {
                Ok(t)
            } else {
                Err(ClientError::PublishNacked(t))
            }
        };
        let mut settled = 0usize;
        if multiple {
            // Tag 0 with `multiple` covers everything outstanding.
            while let Some((t, _)) = self.unconfirmed.front() {
                if tag != 0 && *t > tag {
                    break;
                }
                if let Some((t, tx)) = self.unconfirmed.pop_front() {
                    let _ = tx.send(outcome(t));
                    settled += 1;
                }
            }
        } else if let Some(pos) = self.unconfirmed.iter().position(|(t, _)| *t == tag) {
            if let Some((t, tx)) = self.unconfirmed.remove(pos) {
                let _ = tx.send(outcome(t));
                settled += 1;
            }
        }
        if settled == 0 {
            warn!(channel = self.id, tag, multiple, ack, "confirm for unknown delivery tag");
        }
    }

    fn begin_message(&mut self, kind: Incoming, message: Message) {
        if self.incoming.is_some() {
            warn!(channel = self.id, "incomplete message replaced by a new one");
            self.discard_message(ClientError::UnexpectedReply("incomplete message"));
        }
        self.incoming = Some(PendingMessage {
            kind,
            message,
            header_seen: false,
        });
    }

    fn discard_message(&mut self, err: ClientError) {
        if let Some(PendingMessage {
            kind: Incoming::Get(reply),
            ..
        }) = self.incoming.take()
        {
            let _ = reply.send(Err(err));
        }
    }

    fn complete_message(&mut self) {
        let Some(PendingMessage { kind, message, .. }) = self.incoming.take() else {
            return;
        };
        match kind {
            Incoming::Deliver => {
                let tag = message.consumer_tag.clone().unwrap_or_default();
                match self.consumers.get(&tag) {
                    Some(consumer) => {
                        if consumer.deliveries.send(message).is_err() {
                            debug!(channel = self.id, consumer_tag = %tag, "consumer task gone, delivery dropped");
                        }
                    }
                    None => {
                        warn!(channel = self.id, consumer_tag = %tag, "delivery for unknown consumer dropped");
                    }
                }
            }
            Incoming::Get(reply) => {
                let _ = reply.send(Ok(Reply::Message(Some(message))));
            }
            Incoming::Return => match &self.returns {
                Some(tx) => {
                    if tx.send(message).is_err() {
                        debug!(channel = self.id, "return handler gone, message dropped");
                    }
                }
                None => {
                    warn!(
                        channel = self.id,
                        exchange = %message.exchange,
                        routing_key = %message.routing_key,
                        code = message.reply_code.unwrap_or_default(),
                        "message returned by broker and no return handler set"
                    );
                }
            },
        }
    }

    /// Rejects everything outstanding on this channel with `err`.
    ///
    /// Consumers are closed with `err` too, unless `clean` (a close the
    /// client asked for), in which case they close without an error.
    pub(crate) fn teardown(&mut self, err: &ClientError, clean: bool) {
        self.state = ChannelState::Closed;
        for rpc in self.pending.drain(..) {
            if let Some(consumer) = rpc.consumer {
                consumer.close(Some(err.clone()));
            }
            let _ = rpc.reply.send(Err(err.clone()));
        }
        self.discard_message(err.clone());
        for (_, consumer) in self.consumers.drain() {
            consumer.close(if clean { None } else { Some(err.clone()) });
        }
        for (_, tx) in self.unconfirmed.drain(..) {
            let _ = tx.send(Err(err.clone()));
        }
        self.returns = None;
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

/// A channel on an open [`crate::Connection`].
///
/// Handles are cheap to clone.  Every method sends its frame before
/// returning; the returned future only waits for the broker's reply.  A
/// handle whose channel has been closed fails every call with
/// [`ClientError::ChannelNotOpen`], even if the id has since been reused.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
    id: u16,
    epoch: u64,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Must not lock: channels are formatted from inside the frame loop.
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}

impl Channel {
    pub(crate) fn handle(shared: Arc<Shared>, id: u16, epoch: u64) -> Self {
        Self { shared, id, epoch }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        let inner = self.shared.lock();
        inner
            .channel(self.id, self.epoch)
            .map(|ch| ch.state)
            .unwrap_or(ChannelState::Closed)
    }

    /// False while the broker has paused deliveries with `channel.flow`.
    pub fn flow_active(&self) -> bool {
        let inner = self.shared.lock();
        inner
            .channel(self.id, self.epoch)
            .map(|ch| ch.flow_active)
            .unwrap_or(false)
    }

    fn with_channel<T>(
        &self,
        f: impl FnOnce(&mut ChannelInner, &dyn Transport) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let mut inner = self.shared.lock();
        let channel = inner.open_channel(self.id, self.epoch)?;
        f(channel, &*self.shared.transport)
    }

    fn rpc(&self, method: Method) -> impl Future<Output = Result<Reply, ClientError>> + Send + 'static {
        await_reply(self.with_channel(|ch, t| ch.call(t, &method)))
    }

    /// A call whose reply carries nothing the caller needs.
    fn rpc_ok(
        &self,
        method: Method,
        is_ok: fn(&Method) -> bool,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let reply = self.rpc(method);
        async move {
            match reply.await? {
                Reply::Method(m) if is_ok(&m) => Ok(()),
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Closes the channel and releases its id.
    ///
    /// Everything still pending on the channel is rejected and consumers
    /// are closed without an error.
    pub fn close(
        &self,
        reply_code: u16,
        reason: &str,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let method = Method::ChannelClose {
            reply_code,
            reply_text: reason.to_string(),
            class_id: 0,
            method_id: 0,
        };
        let rx = self.with_channel(|ch, t| {
            let rx = ch.call(t, &method)?;
            ch.state = ChannelState::Closing;
            Ok(rx)
        });
        async move {
            match await_reply(rx).await? {
                Reply::Method(Method::ChannelCloseOk) => Ok(()),
                other => Err(unexpected(&other)),
            }
        }
    }

    // ── queue ─────────────────────────────────────────────────────────────────

    /// Declares a queue.  An empty name asks the broker to generate one.
    pub fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
    ) -> impl Future<Output = Result<QueueInfo, ClientError>> + Send + 'static {
        let o = options.resolve(name);
        let reply = self.rpc(Method::QueueDeclare {
            queue: name.to_string(),
            passive: o.passive,
            durable: o.durable,
            exclusive: o.exclusive,
            auto_delete: o.auto_delete,
            no_wait: false,
            arguments: o.arguments,
        });
        async move {
            match reply.await? {
                Reply::Method(Method::QueueDeclareOk {
                    queue,
                    message_count,
                    consumer_count,
                }) => Ok(QueueInfo {
                    queue,
                    message_count,
                    consumer_count,
                }),
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Declares a queue and returns a [`Queue`] helper bound to this channel.
    pub fn queue(
        &self,
        name: &str,
        options: QueueDeclareOptions,
    ) -> impl Future<Output = Result<Queue, ClientError>> + Send + 'static {
        let declare = self.queue_declare(name, options);
        let channel = self.clone();
        async move {
            let info = declare.await?;
            Ok(Queue::new(channel, info.queue))
        }
    }

    pub fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::QueueBind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                no_wait: false,
                arguments,
            },
            |m| matches!(m, Method::QueueBindOk),
        )
    }

    pub fn queue_unbind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::QueueUnbind {
                queue: queue.to_string(),
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                arguments,
            },
            |m| matches!(m, Method::QueueUnbindOk),
        )
    }

    /// Removes every ready message; resolves to the number removed.
    pub fn queue_purge(&self, queue: &str) -> impl Future<Output = Result<u32, ClientError>> + Send + 'static {
        let reply = self.rpc(Method::QueuePurge {
            queue: queue.to_string(),
            no_wait: false,
        });
        async move {
            match reply.await? {
                Reply::Method(Method::QueuePurgeOk { message_count }) => Ok(message_count),
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Deletes a queue; resolves to the number of messages it held.
    pub fn queue_delete(
        &self,
        queue: &str,
        if_unused: bool,
        if_empty: bool,
    ) -> impl Future<Output = Result<u32, ClientError>> + Send + 'static {
        let reply = self.rpc(Method::QueueDelete {
            queue: queue.to_string(),
            if_unused,
            if_empty,
            no_wait: false,
        });
        async move {
            match reply.await? {
                Reply::Method(Method::QueueDeleteOk { message_count }) => Ok(message_count),
                other => Err(unexpected(&other)),
            }
        }
    }

    // ── exchange ──────────────────────────────────────────────────────────────

    /// Declares an exchange of `kind` (`"direct"`, `"fanout"`, `"topic"`,
    /// `"headers"` or a plugin type).
    pub fn exchange_declare(
        &self,
        name: &str,
        kind: &str,
        options: ExchangeDeclareOptions,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::ExchangeDeclare {
                exchange: name.to_string(),
                kind: kind.to_string(),
                passive: options.passive,
                durable: options.durable,
                auto_delete: options.auto_delete,
                internal: options.internal,
                no_wait: false,
                arguments: options.arguments,
            },
            |m| matches!(m, Method::ExchangeDeclareOk),
        )
    }

    pub fn exchange_delete(
        &self,
        name: &str,
        if_unused: bool,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::ExchangeDelete {
                exchange: name.to_string(),
                if_unused,
                no_wait: false,
            },
            |m| matches!(m, Method::ExchangeDeleteOk),
        )
    }

    /// Binds `destination` to receive messages routed through `source`.
    pub fn exchange_bind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::ExchangeBind {
                destination: destination.to_string(),
                source: source.to_string(),
                routing_key: routing_key.to_string(),
                no_wait: false,
                arguments,
            },
            |m| matches!(m, Method::ExchangeBindOk),
        )
    }

    pub fn exchange_unbind(
        &self,
        destination: &str,
        source: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::ExchangeUnbind {
                destination: destination.to_string(),
                source: source.to_string(),
                routing_key: routing_key.to_string(),
                no_wait: false,
                arguments,
            },
            |m| matches!(m, Method::ExchangeUnbindOk),
        )
    }

    // ── basic ─────────────────────────────────────────────────────────────────

    pub fn basic_qos(
        &self,
        prefetch_count: u16,
        prefetch_size: u32,
        global: bool,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::BasicQos {
                prefetch_size,
                prefetch_count,
                global,
            },
            |m| matches!(m, Method::BasicQosOk),
        )
    }

    /// Limits unacknowledged deliveries per consumer on this channel.
    pub fn prefetch(&self, count: u16) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.basic_qos(count, 0, false)
    }

    /// Subscribes to `queue`; every delivery is passed to `callback`.
    ///
    /// The callback runs on a Tokio task, one message at a time, never
    /// inside the frame loop.  It may call back into the channel (to ack,
    /// for example).  Must be awaited inside a Tokio runtime.
    pub fn basic_consume<F>(
        &self,
        queue: &str,
        options: ConsumeOptions,
        callback: F,
    ) -> impl Future<Output = Result<Consumer, ClientError>> + Send + 'static
    where
        F: FnMut(Message) + Send + 'static,
    {
        let (deliveries, rx) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(ConsumerStatus::Active);
        let method = Method::BasicConsume {
            queue: queue.to_string(),
            consumer_tag: options.tag,
            no_local: options.no_local,
            no_ack: options.no_ack,
            exclusive: options.exclusive,
            no_wait: false,
            arguments: options.arguments,
        };
        let entry = ConsumerEntry { deliveries, status };
        let reply = self.with_channel(|ch, t| ch.call_with(t, &method, Some(entry)));
        let channel = self.clone();
        async move {
            match await_reply(reply).await? {
                Reply::Method(Method::BasicConsumeOk { consumer_tag }) => {
                    tokio::spawn(run_callback(rx, callback));
                    Ok(Consumer::new(consumer_tag, channel, status_rx))
                }
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Cancels a consumer; resolves once the broker confirms.
    pub fn basic_cancel(&self, consumer_tag: &str) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(
            Method::BasicCancel {
                consumer_tag: consumer_tag.to_string(),
                no_wait: false,
            },
            |m| matches!(m, Method::BasicCancelOk { .. }),
        )
    }

    /// Fetches one message, or `None` if the queue is empty.
    pub fn basic_get(
        &self,
        queue: &str,
        no_ack: bool,
    ) -> impl Future<Output = Result<Option<Message>, ClientError>> + Send + 'static {
        let reply = self.rpc(Method::BasicGet {
            queue: queue.to_string(),
            no_ack,
        });
        async move {
            match reply.await? {
                Reply::Message(message) => Ok(message),
                other => Err(unexpected(&other)),
            }
        }
    }

    pub fn basic_ack(&self, delivery_tag: u64, multiple: bool) -> Result<(), ClientError> {
        self.with_channel(|ch, t| {
            ch.send_method(
                t,
                &Method::BasicAck {
                    delivery_tag,
                    multiple,
                },
            )
        })
    }

    pub fn basic_nack(&self, delivery_tag: u64, requeue: bool, multiple: bool) -> Result<(), ClientError> {
        self.with_channel(|ch, t| {
            ch.send_method(
                t,
                &Method::BasicNack {
                    delivery_tag,
                    multiple,
                    requeue,
                },
            )
        })
    }

    pub fn basic_reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), ClientError> {
        self.with_channel(|ch, t| {
            ch.send_method(
                t,
                &Method::BasicReject {
                    delivery_tag,
                    requeue,
                },
            )
        })
    }

    /// Asks the broker to redeliver every unacknowledged message.
    pub fn basic_recover(&self, requeue: bool) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(Method::BasicRecover { requeue }, |m| {
            matches!(m, Method::BasicRecoverOk)
        })
    }

    /// Pauses (`false`) or resumes (`true`) deliveries on this channel.
    pub fn basic_flow(&self, active: bool) -> impl Future<Output = Result<bool, ClientError>> + Send + 'static {
        let reply = self.rpc(Method::ChannelFlow { active });
        async move {
            match reply.await? {
                Reply::Method(Method::ChannelFlowOk { active }) => Ok(active),
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Puts the channel in confirm mode.  Publishes from now on resolve
    /// only when the broker acks (or nacks) them.
    pub fn confirm_select(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let rx = self.with_channel(|ch, t| {
            let rx = ch.call(t, &Method::ConfirmSelect { no_wait: false })?;
            if ch.confirm_id == 0 {
                ch.confirm_id = 1;
            }
            Ok(rx)
        });
        async move {
            match await_reply(rx).await? {
                Reply::Method(Method::ConfirmSelectOk) => Ok(()),
                other => Err(unexpected(&other)),
            }
        }
    }

    /// Publishes a message.
    ///
    /// Outside confirm mode the future resolves to `None` as soon as the
    /// frames are handed to the transport.  In confirm mode it resolves to
    /// the publish's delivery tag once the broker acks it, or fails with
    /// [`ClientError::PublishNacked`].  While the connection is blocked the
    /// call fails with [`ClientError::Blocked`] and nothing is sent.
    pub fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &BasicProperties,
        options: PublishOptions,
    ) -> impl Future<Output = Result<Option<u64>, ClientError>> + Send + 'static {
        let confirm = self.start_publish(exchange, routing_key, body, properties, options);
        async move {
            match confirm? {
                None => Ok(None),
                Some(rx) => rx
                    .await
                    .map_err(|_| ClientError::ConnectionNotOpen)?
                    .map(Some),
            }
        }
    }

    fn start_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &BasicProperties,
        options: PublishOptions,
    ) -> Result<Option<oneshot::Receiver<Result<u64, ClientError>>>, ClientError> {
        let mut inner = self.shared.lock();
        inner.ensure_open()?;
        if let Some(reason) = inner.blocked_reason() {
            return Err(ClientError::Blocked(reason.to_string()));
        }
        let channel = inner.open_channel(self.id, self.epoch)?;
        channel.publish(
            &*self.shared.transport,
            exchange,
            routing_key,
            body,
            properties,
            options,
        )
    }

    pub fn tx_select(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(Method::TxSelect, |m| matches!(m, Method::TxSelectOk))
    }

    pub fn tx_commit(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(Method::TxCommit, |m| matches!(m, Method::TxCommitOk))
    }

    pub fn tx_rollback(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.rpc_ok(Method::TxRollback, |m| matches!(m, Method::TxRollbackOk))
    }

    /// Installs the handler for messages the broker returns as unroutable
    /// (published with `mandatory` or `immediate`).  Replaces any earlier
    /// handler.  Must be called inside a Tokio runtime.
    pub fn on_return<F>(&self, callback: F) -> Result<(), ClientError>
    where
        F: FnMut(Message) + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with_channel(|ch, _| {
            ch.returns = Some(tx);
            Ok(())
        })?;
        tokio::spawn(run_callback(rx, callback));
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
