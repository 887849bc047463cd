//! AMQP 0-9-1 methods: one enum variant per class/method pair.
//!
//! A method frame payload is `[class_id:2][method_id:2][arguments]`.
//! Consecutive boolean arguments are packed into a single octet, lowest bit
//! first.  Reserved arguments (`ticket`, `reserved-1`, ...) are not part of
//! the variants; they are written as zero or empty and skipped on decode.
//!
//! Both directions are implemented for every variant so that the same codec
//! can play the broker side in tests.

use serde::Serialize;

use crate::protocol::codec::{
    write_byte_array, write_long_string, write_short_string, write_table, ProtocolError, Reader,
};
use crate::protocol::field::FieldTable;

// ── Class ids ─────────────────────────────────────────────────────────────────

pub const CLASS_CONNECTION: u16 = 10;
pub const CLASS_CHANNEL: u16 = 20;
pub const CLASS_EXCHANGE: u16 = 40;
pub const CLASS_QUEUE: u16 = 50;
pub const CLASS_BASIC: u16 = 60;
pub const CLASS_CONFIRM: u16 = 85;
pub const CLASS_TX: u16 = 90;

/// Every method this client sends or receives.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Method {
    // connection (10)
    ConnectionStart {
        version_major: u8,
        version_minor: u8,
        server_properties: FieldTable,
        mechanisms: String,
        locales: String,
    },
    ConnectionStartOk {
        client_properties: FieldTable,
        mechanism: String,
        response: Vec<u8>,
        locale: String,
    },
    ConnectionSecure {
        challenge: Vec<u8>,
    },
    ConnectionSecureOk {
        response: Vec<u8>,
    },
    ConnectionTune {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionTuneOk {
        channel_max: u16,
        frame_max: u32,
        heartbeat: u16,
    },
    ConnectionOpen {
        virtual_host: String,
    },
    ConnectionOpenOk,
    ConnectionClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ConnectionCloseOk,
    ConnectionBlocked {
        reason: String,
    },
    ConnectionUnblocked,

    // channel (20)
    ChannelOpen,
    ChannelOpenOk,
    ChannelFlow {
        active: bool,
    },
    ChannelFlowOk {
        active: bool,
    },
    ChannelClose {
        reply_code: u16,
        reply_text: String,
        class_id: u16,
        method_id: u16,
    },
    ChannelCloseOk,

    // exchange (40)
    ExchangeDeclare {
        exchange: String,
        kind: String,
        passive: bool,
        durable: bool,
        auto_delete: bool,
        internal: bool,
        no_wait: bool,
        arguments: FieldTable,
    },
    ExchangeDeclareOk,
    ExchangeDelete {
        exchange: String,
        if_unused: bool,
        no_wait: bool,
    },
    ExchangeDeleteOk,
    ExchangeBind {
        destination: String,
        source: String,
        routing_key: String,
        no_wait: bool,
        arguments: FieldTable,
    },
    ExchangeBindOk,
    ExchangeUnbind {
        destination: String,
        source: String,
        routing_key: String,
        no_wait: bool,
        arguments: FieldTable,
    },
    ExchangeUnbindOk,

    // queue (50)
    QueueDeclare {
        queue: String,
        passive: bool,
        durable: bool,
        exclusive: bool,
        auto_delete: bool,
        no_wait: bool,
        arguments: FieldTable,
    },
    QueueDeclareOk {
        queue: String,
        message_count: u32,
        consumer_count: u32,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
        no_wait: bool,
        arguments: FieldTable,
    },
    QueueBindOk,
    QueuePurge {
        queue: String,
        no_wait: bool,
    },
    QueuePurgeOk {
        message_count: u32,
    },
    QueueDelete {
        queue: String,
        if_unused: bool,
        if_empty: bool,
        no_wait: bool,
    },
    QueueDeleteOk {
        message_count: u32,
    },
    QueueUnbind {
        queue: String,
        exchange: String,
        routing_key: String,
        arguments: FieldTable,
    },
    QueueUnbindOk,

    // basic (60)
    BasicQos {
        prefetch_size: u32,
        prefetch_count: u16,
        global: bool,
    },
    BasicQosOk,
    BasicConsume {
        queue: String,
        consumer_tag: String,
        no_local: bool,
        no_ack: bool,
        exclusive: bool,
        no_wait: bool,
        arguments: FieldTable,
    },
    BasicConsumeOk {
        consumer_tag: String,
    },
    BasicCancel {
        consumer_tag: String,
        no_wait: bool,
    },
    BasicCancelOk {
        consumer_tag: String,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
        mandatory: bool,
        immediate: bool,
    },
    BasicReturn {
        reply_code: u16,
        reply_text: String,
        exchange: String,
        routing_key: String,
    },
    BasicDeliver {
        consumer_tag: String,
        delivery_tag: u64,
        redelivered: bool,
        exchange: String,
        routing_key: String,
    },
    BasicGet {
        queue: String,
        no_ack: bool,
    },
    BasicGetOk {
        delivery_tag: u64,
        redelivered: bool,
        exchange: String,
        routing_key: String,
        message_count: u32,
    },
    BasicGetEmpty,
    BasicAck {
        delivery_tag: u64,
        multiple: bool,
    },
    BasicReject {
        delivery_tag: u64,
        requeue: bool,
    },
    BasicRecover {
        requeue: bool,
    },
    BasicRecoverOk,
    BasicNack {
        delivery_tag: u64,
        multiple: bool,
        requeue: bool,
    },

    // confirm (85)
    ConfirmSelect {
        no_wait: bool,
    },
    ConfirmSelectOk,

    // tx (90)
    TxSelect,
    TxSelectOk,
    TxCommit,
    TxCommitOk,
    TxRollback,
    TxRollbackOk,
}

impl Method {
    /// `(class_id, method_id)` of this method.
    pub fn ids(&self) -> (u16, u16) {
        use Method::*;
        match self {
            ConnectionStart { .. } => (CLASS_CONNECTION, 10),
            ConnectionStartOk { .. } => (CLASS_CONNECTION, 11),
            ConnectionSecure { .. } => (CLASS_CONNECTION, 20),
            ConnectionSecureOk { .. } => (CLASS_CONNECTION, 21),
            ConnectionTune { .. } => (CLASS_CONNECTION, 30),
            ConnectionTuneOk { .. } => (CLASS_CONNECTION, 31),
            ConnectionOpen { .. } => (CLASS_CONNECTION, 40),
            ConnectionOpenOk => (CLASS_CONNECTION, 41),
            ConnectionClose { .. } => (CLASS_CONNECTION, 50),
            ConnectionCloseOk => (CLASS_CONNECTION, 51),
            ConnectionBlocked { .. } => (CLASS_CONNECTION, 60),
            ConnectionUnblocked => (CLASS_CONNECTION, 61),

            ChannelOpen => (CLASS_CHANNEL, 10),
            ChannelOpenOk => (CLASS_CHANNEL, 11),
            ChannelFlow { .. } => (CLASS_CHANNEL, 20),
            ChannelFlowOk { .. } => (CLASS_CHANNEL, 21),
            ChannelClose { .. } => (CLASS_CHANNEL, 40),
            ChannelCloseOk => (CLASS_CHANNEL, 41),

            ExchangeDeclare { .. } => (CLASS_EXCHANGE, 10),
            ExchangeDeclareOk => (CLASS_EXCHANGE, 11),
            ExchangeDelete { .. } => (CLASS_EXCHANGE, 20),
            ExchangeDeleteOk => (CLASS_EXCHANGE, 21),
            ExchangeBind { .. } => (CLASS_EXCHANGE, 30),
            ExchangeBindOk => (CLASS_EXCHANGE, 31),
            ExchangeUnbind { .. } => (CLASS_EXCHANGE, 40),
            ExchangeUnbindOk => (CLASS_EXCHANGE, 51),

            QueueDeclare { .. } => (CLASS_QUEUE, 10),
            QueueDeclareOk { .. } => (CLASS_QUEUE, 11),
            QueueBind { .. } => (CLASS_QUEUE, 20),
            QueueBindOk => (CLASS_QUEUE, 21),
            QueuePurge { .. } => (CLASS_QUEUE, 30),
            QueuePurgeOk { .. } => (CLASS_QUEUE, 31),
            QueueDelete { .. } => (CLASS_QUEUE, 40),
            QueueDeleteOk { .. } => (CLASS_QUEUE, 41),
            QueueUnbind { .. } => (CLASS_QUEUE, 50),
            QueueUnbindOk => (CLASS_QUEUE, 51),

            BasicQos { .. } => (CLASS_BASIC, 10),
            BasicQosOk => (CLASS_BASIC, 11),
            BasicConsume { .. } => (CLASS_BASIC, 20),
            BasicConsumeOk { .. } => (CLASS_BASIC, 21),
            BasicCancel { .. } => (CLASS_BASIC, 30),
            BasicCancelOk { .. } => (CLASS_BASIC, 31),
            BasicPublish { .. } => (CLASS_BASIC, 40),
            BasicReturn { .. } => (CLASS_BASIC, 50),
            BasicDeliver { .. } => (CLASS_BASIC, 60),
            BasicGet { .. } => (CLASS_BASIC, 70),
            BasicGetOk { .. } => (CLASS_BASIC, 71),
            BasicGetEmpty => (CLASS_BASIC, 72),
            BasicAck { .. } => (CLASS_BASIC, 80),
            BasicReject { .. } => (CLASS_BASIC, 90),
            BasicRecover { .. } => (CLASS_BASIC, 110),
            BasicRecoverOk => (CLASS_BASIC, 111),
            BasicNack { .. } => (CLASS_BASIC, 120),

            ConfirmSelect { .. } => (CLASS_CONFIRM, 10),
            ConfirmSelectOk => (CLASS_CONFIRM, 11),

            TxSelect => (CLASS_TX, 10),
            TxSelectOk => (CLASS_TX, 11),
            TxCommit => (CLASS_TX, 20),
            TxCommitOk => (CLASS_TX, 21),
            TxRollback => (CLASS_TX, 30),
            TxRollbackOk => (CLASS_TX, 31),
        }
    }

    pub fn class_id(&self) -> u16 {
        self.ids().0
    }

    pub fn method_id(&self) -> u16 {
        self.ids().1
    }

    /// Dotted name for logs, e.g. `queue.declare-ok`.
    pub fn name(&self) -> &'static str {
        use Method::*;
        match self {
            ConnectionStart { .. } => "connection.start",
            ConnectionStartOk { .. } => "connection.start-ok",
            ConnectionSecure { .. } => "connection.secure",
            ConnectionSecureOk { .. } => "connection.secure-ok",
            ConnectionTune { .. } => "connection.tune",
            ConnectionTuneOk { .. } => "connection.tune-ok",
            ConnectionOpen { .. } => "connection.open",
            ConnectionOpenOk => "connection.open-ok",
            ConnectionClose { .. } => "connection.close",
            ConnectionCloseOk => "connection.close-ok",
            ConnectionBlocked { .. } => "connection.blocked",
            ConnectionUnblocked => "connection.unblocked",
            ChannelOpen => "channel.open",
            ChannelOpenOk => "channel.open-ok",
            ChannelFlow { .. } => "channel.flow",
            ChannelFlowOk { .. } => "channel.flow-ok",
            ChannelClose { .. } => "channel.close",
            ChannelCloseOk => "channel.close-ok",
            ExchangeDeclare { .. } => "exchange.declare",
            ExchangeDeclareOk => "exchange.declare-ok",
            ExchangeDelete { .. } => "exchange.delete",
            ExchangeDeleteOk => "exchange.delete-ok",
            ExchangeBind { .. } => "exchange.bind",
            ExchangeBindOk => "exchange.bind-ok",
            ExchangeUnbind { .. } => "exchange.unbind",
            ExchangeUnbindOk => "exchange.unbind-ok",
            QueueDeclare { .. } => "queue.declare",
            QueueDeclareOk { .. } => "queue.declare-ok",
            QueueBind { .. } => "queue.bind",
            QueueBindOk => "queue.bind-ok",
            QueuePurge { .. } => "queue.purge",
            QueuePurgeOk { .. } => "queue.purge-ok",
            QueueDelete { .. } => "queue.delete",
            QueueDeleteOk { .. } => "queue.delete-ok",
            QueueUnbind { .. } => "queue.unbind",
            QueueUnbindOk => "queue.unbind-ok",
            BasicQos { .. } => "basic.qos",
            BasicQosOk => "basic.qos-ok",
            BasicConsume { .. } => "basic.consume",
            BasicConsumeOk { .. } => "basic.consume-ok",
            BasicCancel { .. } => "basic.cancel",
            BasicCancelOk { .. } => "basic.cancel-ok",
            BasicPublish { .. } => "basic.publish",
            BasicReturn { .. } => "basic.return",
            BasicDeliver { .. } => "basic.deliver",
            BasicGet { .. } => "basic.get",
            BasicGetOk { .. } => "basic.get-ok",
            BasicGetEmpty => "basic.get-empty",
            BasicAck { .. } => "basic.ack",
            BasicReject { .. } => "basic.reject",
            BasicRecover { .. } => "basic.recover",
            BasicRecoverOk => "basic.recover-ok",
            BasicNack { .. } => "basic.nack",
            ConfirmSelect { .. } => "confirm.select",
            ConfirmSelectOk => "confirm.select-ok",
            TxSelect => "tx.select",
            TxSelectOk => "tx.select-ok",
            TxCommit => "tx.commit",
            TxCommitOk => "tx.commit-ok",
            TxRollback => "tx.rollback",
            TxRollbackOk => "tx.rollback-ok",
        }
    }

    /// True for methods that are followed by a content header and body.
    pub fn has_content(&self) -> bool {
        matches!(
            self,
            Method::BasicPublish { .. }
                | Method::BasicReturn { .. }
                | Method::BasicDeliver { .. }
                | Method::BasicGetOk { .. }
        )
    }
}

// ── Encoding ──────────────────────────────────────────────────────────────────

/// Packs booleans into one octet, first flag in bit 0.
fn bits(flags: &[bool]) -> u8 {
    flags
        .iter()
        .enumerate()
        .fold(0u8, |acc, (i, &f)| if f { acc | (1 << i) } else { acc })
}

fn put_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

/// Appends `[class_id][method_id][arguments]` for `method`.
///
/// Returns the number of bytes written.  On error some bytes may already be
/// in `buf`; [`crate::protocol::frame::write_method_frame`] truncates them.
pub fn encode_method(buf: &mut Vec<u8>, method: &Method) -> Result<usize, ProtocolError> {
    use Method::*;

    let start = buf.len();
    let (class_id, method_id) = method.ids();
    put_u16(buf, class_id);
    put_u16(buf, method_id);

    match method {
        ConnectionStart {
            version_major,
            version_minor,
            server_properties,
            mechanisms,
            locales,
        } => {
            buf.push(*version_major);
            buf.push(*version_minor);
            write_table(buf, server_properties)?;
            write_long_string(buf, mechanisms);
            write_long_string(buf, locales);
        }
        ConnectionStartOk {
            client_properties,
            mechanism,
            response,
            locale,
        } => {
            write_table(buf, client_properties)?;
            write_short_string(buf, mechanism)?;
            write_byte_array(buf, response);
            write_short_string(buf, locale)?;
        }
        ConnectionSecure { challenge } => {
            write_byte_array(buf, challenge);
        }
        ConnectionSecureOk { response } => {
            write_byte_array(buf, response);
        }
        ConnectionTune {
            channel_max,
            frame_max,
            heartbeat,
        }
        | ConnectionTuneOk {
            channel_max,
            frame_max,
            heartbeat,
        } => {
            put_u16(buf, *channel_max);
            put_u32(buf, *frame_max);
            put_u16(buf, *heartbeat);
        }
        ConnectionOpen { virtual_host } => {
            write_short_string(buf, virtual_host)?;
            write_short_string(buf, "")?;
            buf.push(0);
        }
        ConnectionOpenOk => {
            write_short_string(buf, "")?;
        }
        ConnectionClose {
            reply_code,
            reply_text,
            class_id,
            method_id,
        }
        | ChannelClose {
            reply_code,
            reply_text,
            class_id,
            method_id,
        } => {
            put_u16(buf, *reply_code);
            write_short_string(buf, reply_text)?;
            put_u16(buf, *class_id);
            put_u16(buf, *method_id);
        }
        ConnectionBlocked { reason } => {
            write_short_string(buf, reason)?;
        }

        ChannelOpen => {
            write_short_string(buf, "")?;
        }
        ChannelOpenOk => {
            write_long_string(buf, "");
        }
        ChannelFlow { active } | ChannelFlowOk { active } => {
            buf.push(bits(&[*active]));
        }

        ExchangeDeclare {
            exchange,
            kind,
            passive,
            durable,
            auto_delete,
            internal,
            no_wait,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, exchange)?;
            write_short_string(buf, kind)?;
            buf.push(bits(&[*passive, *durable, *auto_delete, *internal, *no_wait]));
            write_table(buf, arguments)?;
        }
        ExchangeDelete {
            exchange,
            if_unused,
            no_wait,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, exchange)?;
            buf.push(bits(&[*if_unused, *no_wait]));
        }
        ExchangeBind {
            destination,
            source,
            routing_key,
            no_wait,
            arguments,
        }
        | ExchangeUnbind {
            destination,
            source,
            routing_key,
            no_wait,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, destination)?;
            write_short_string(buf, source)?;
            write_short_string(buf, routing_key)?;
            buf.push(bits(&[*no_wait]));
            write_table(buf, arguments)?;
        }

        QueueDeclare {
            queue,
            passive,
            durable,
            exclusive,
            auto_delete,
            no_wait,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            buf.push(bits(&[*passive, *durable, *exclusive, *auto_delete, *no_wait]));
            write_table(buf, arguments)?;
        }
        QueueDeclareOk {
            queue,
            message_count,
            consumer_count,
        } => {
            write_short_string(buf, queue)?;
            put_u32(buf, *message_count);
            put_u32(buf, *consumer_count);
        }
        QueueBind {
            queue,
            exchange,
            routing_key,
            no_wait,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
            buf.push(bits(&[*no_wait]));
            write_table(buf, arguments)?;
        }
        QueuePurge { queue, no_wait } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            buf.push(bits(&[*no_wait]));
        }
        QueuePurgeOk { message_count } | QueueDeleteOk { message_count } => {
            put_u32(buf, *message_count);
        }
        QueueDelete {
            queue,
            if_unused,
            if_empty,
            no_wait,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            buf.push(bits(&[*if_unused, *if_empty, *no_wait]));
        }
        QueueUnbind {
            queue,
            exchange,
            routing_key,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
            write_table(buf, arguments)?;
        }

        BasicQos {
            prefetch_size,
            prefetch_count,
            global,
        } => {
            put_u32(buf, *prefetch_size);
            put_u16(buf, *prefetch_count);
            buf.push(bits(&[*global]));
        }
        BasicConsume {
            queue,
            consumer_tag,
            no_local,
            no_ack,
            exclusive,
            no_wait,
            arguments,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            write_short_string(buf, consumer_tag)?;
            buf.push(bits(&[*no_local, *no_ack, *exclusive, *no_wait]));
            write_table(buf, arguments)?;
        }
        BasicConsumeOk { consumer_tag } | BasicCancelOk { consumer_tag } => {
            write_short_string(buf, consumer_tag)?;
        }
        BasicCancel {
            consumer_tag,
            no_wait,
        } => {
            write_short_string(buf, consumer_tag)?;
            buf.push(bits(&[*no_wait]));
        }
        BasicPublish {
            exchange,
            routing_key,
            mandatory,
            immediate,
        } => {
            put_u16(buf, 0);
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
            buf.push(bits(&[*mandatory, *immediate]));
        }
        BasicReturn {
            reply_code,
            reply_text,
            exchange,
            routing_key,
        } => {
            put_u16(buf, *reply_code);
            write_short_string(buf, reply_text)?;
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
        }
        BasicDeliver {
            consumer_tag,
            delivery_tag,
            redelivered,
            exchange,
            routing_key,
        } => {
            write_short_string(buf, consumer_tag)?;
            put_u64(buf, *delivery_tag);
            buf.push(bits(&[*redelivered]));
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
        }
        BasicGet { queue, no_ack } => {
            put_u16(buf, 0);
            write_short_string(buf, queue)?;
            buf.push(bits(&[*no_ack]));
        }
        BasicGetOk {
            delivery_tag,
            redelivered,
            exchange,
            routing_key,
            message_count,
        } => {
            put_u64(buf, *delivery_tag);
            buf.push(bits(&[*redelivered]));
            write_short_string(buf, exchange)?;
            write_short_string(buf, routing_key)?;
            put_u32(buf, *message_count);
        }
        BasicGetEmpty => {
            write_short_string(buf, "")?;
        }
        BasicAck {
            delivery_tag,
            multiple,
        } => {
            put_u64(buf, *delivery_tag);
            buf.push(bits(&[*multiple]));
        }
        BasicReject {
            delivery_tag,
            requeue,
        } => {
            put_u64(buf, *delivery_tag);
            buf.push(bits(&[*requeue]));
        }
        BasicRecover { requeue } => {
            buf.push(bits(&[*requeue]));
        }
        BasicNack {
            delivery_tag,
            multiple,
            requeue,
        } => {
            put_u64(buf, *delivery_tag);
            buf.push(bits(&[*multiple, *requeue]));
        }

        ConfirmSelect { no_wait } => {
            buf.push(bits(&[*no_wait]));
        }

        ConnectionCloseOk | ConnectionUnblocked | ChannelCloseOk | ExchangeDeclareOk
        | ExchangeDeleteOk | ExchangeBindOk | ExchangeUnbindOk | QueueBindOk | QueueUnbindOk
        | BasicQosOk | BasicRecoverOk | ConfirmSelectOk | TxSelect | TxSelectOk | TxCommit
        | TxCommitOk | TxRollback | TxRollbackOk => {}
    }

    Ok(buf.len() - start)
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn bit(octet: u8, index: u8) -> bool {
    octet & (1 << index) != 0
}

/// Decodes a method frame payload.
///
/// # Errors
///
/// - [`ProtocolError::UnknownMethod`] for a class/method pair not listed in
///   [`Method`].
/// - [`ProtocolError::InsufficientData`] / [`ProtocolError::MalformedPayload`]
///   for truncated or invalid arguments.
pub fn decode_method(payload: &[u8]) -> Result<Method, ProtocolError> {
    use Method::*;

    let mut r = Reader::new(payload);
    let class_id = r.u16()?;
    let method_id = r.u16()?;

    let method = match (class_id, method_id) {
        (CLASS_CONNECTION, 10) => ConnectionStart {
            version_major: r.u8()?,
            version_minor: r.u8()?,
            server_properties: r.table()?,
            mechanisms: r.long_string()?,
            locales: r.long_string()?,
        },
        (CLASS_CONNECTION, 11) => ConnectionStartOk {
            client_properties: r.table()?,
            mechanism: r.short_string()?,
            response: r.long_bytes()?,
            locale: r.short_string()?,
        },
        (CLASS_CONNECTION, 20) => ConnectionSecure {
            challenge: r.long_bytes()?,
        },
        (CLASS_CONNECTION, 21) => ConnectionSecureOk {
            response: r.long_bytes()?,
        },
        (CLASS_CONNECTION, 30) => ConnectionTune {
            channel_max: r.u16()?,
            frame_max: r.u32()?,
            heartbeat: r.u16()?,
        },
        (CLASS_CONNECTION, 31) => ConnectionTuneOk {
            channel_max: r.u16()?,
            frame_max: r.u32()?,
            heartbeat: r.u16()?,
        },
        (CLASS_CONNECTION, 40) => {
            let virtual_host = r.short_string()?;
            r.short_string()?;
            r.u8()?;
            ConnectionOpen { virtual_host }
        }
        (CLASS_CONNECTION, 41) => {
            r.short_string()?;
            ConnectionOpenOk
        }
        (CLASS_CONNECTION, 50) => ConnectionClose {
            reply_code: r.u16()?,
            reply_text: r.short_string()?,
            class_id: r.u16()?,
            method_id: r.u16()?,
        },
        (CLASS_CONNECTION, 51) => ConnectionCloseOk,
        (CLASS_CONNECTION, 60) => ConnectionBlocked {
            reason: r.short_string()?,
        },
        (CLASS_CONNECTION, 61) => ConnectionUnblocked,

        (CLASS_CHANNEL, 10) => {
            r.short_string()?;
            ChannelOpen
        }
        (CLASS_CHANNEL, 11) => {
            r.long_bytes()?;
            ChannelOpenOk
        }
        (CLASS_CHANNEL, 20) => ChannelFlow { active: r.bool()? },
        (CLASS_CHANNEL, 21) => ChannelFlowOk { active: r.bool()? },
        (CLASS_CHANNEL, 40) => ChannelClose {
            reply_code: r.u16()?,
            reply_text: r.short_string()?,
            class_id: r.u16()?,
            method_id: r.u16()?,
        },
        (CLASS_CHANNEL, 41) => ChannelCloseOk,

        (CLASS_EXCHANGE, 10) => {
            r.u16()?;
            let exchange = r.short_string()?;
            let kind = r.short_string()?;
            let flags = r.u8()?;
            ExchangeDeclare {
                exchange,
                kind,
                passive: bit(flags, 0),
                durable: bit(flags, 1),
                auto_delete: bit(flags, 2),
                internal: bit(flags, 3),
                no_wait: bit(flags, 4),
                arguments: r.table()?,
            }
        }
        (CLASS_EXCHANGE, 11) => ExchangeDeclareOk,
        (CLASS_EXCHANGE, 20) => {
            r.u16()?;
            let exchange = r.short_string()?;
            let flags = r.u8()?;
            ExchangeDelete {
                exchange,
                if_unused: bit(flags, 0),
                no_wait: bit(flags, 1),
            }
        }
        (CLASS_EXCHANGE, 21) => ExchangeDeleteOk,
        (CLASS_EXCHANGE, 30) | (CLASS_EXCHANGE, 40) => {
            r.u16()?;
            let destination = r.short_string()?;
            let source = r.short_string()?;
            let routing_key = r.short_string()?;
            let no_wait = r.bool()?;
            let arguments = r.table()?;
            if method_id == 30 {
                ExchangeBind {
                    destination,
                    source,
                    routing_key,
                    no_wait,
                    arguments,
                }
            } else {
                ExchangeUnbind {
                    destination,
                    source,
                    routing_key,
                    no_wait,
                    arguments,
                }
            }
        }
        (CLASS_EXCHANGE, 31) => ExchangeBindOk,
        (CLASS_EXCHANGE, 51) => ExchangeUnbindOk,

        (CLASS_QUEUE, 10) => {
            r.u16()?;
            let queue = r.short_string()?;
            let flags = r.u8()?;
            QueueDeclare {
                queue,
                passive: bit(flags, 0),
                durable: bit(flags, 1),
                exclusive: bit(flags, 2),
                auto_delete: bit(flags, 3),
                no_wait: bit(flags, 4),
                arguments: r.table()?,
            }
        }
        (CLASS_QUEUE, 11) => QueueDeclareOk {
            queue: r.short_string()?,
            message_count: r.u32()?,
            consumer_count: r.u32()?,
        },
        (CLASS_QUEUE, 20) => {
            r.u16()?;
            QueueBind {
                queue: r.short_string()?,
                exchange: r.short_string()?,
                routing_key: r.short_string()?,
                no_wait: r.bool()?,
                arguments: r.table()?,
            }
        }
        (CLASS_QUEUE, 21) => QueueBindOk,
        (CLASS_QUEUE, 30) => {
            r.u16()?;
            QueuePurge {
                queue: r.short_string()?,
                no_wait: r.bool()?,
            }
        }
        (CLASS_QUEUE, 31) => QueuePurgeOk {
            message_count: r.u32()?,
        },
        (CLASS_QUEUE, 40) => {
            r.u16()?;
            let queue = r.short_string()?;
            let flags = r.u8()?;
            QueueDelete {
                queue,
                if_unused: bit(flags, 0),
                if_empty: bit(flags, 1),
                no_wait: bit(flags, 2),
            }
        }
        (CLASS_QUEUE, 41) => QueueDeleteOk {
            message_count: r.u32()?,
        },
        (CLASS_QUEUE, 50) => {
            r.u16()?;
            QueueUnbind {
                queue: r.short_string()?,
                exchange: r.short_string()?,
                routing_key: r.short_string()?,
                arguments: r.table()?,
            }
        }
        (CLASS_QUEUE, 51) => QueueUnbindOk,

        (CLASS_BASIC, 10) => BasicQos {
            prefetch_size: r.u32()?,
            prefetch_count: r.u16()?,
            global: r.bool()?,
        },
        (CLASS_BASIC, 11) => BasicQosOk,
        (CLASS_BASIC, 20) => {
            r.u16()?;
            let queue = r.short_string()?;
            let consumer_tag = r.short_string()?;
            let flags = r.u8()?;
            BasicConsume {
                queue,
                consumer_tag,
                no_local: bit(flags, 0),
                no_ack: bit(flags, 1),
                exclusive: bit(flags, 2),
                no_wait: bit(flags, 3),
                arguments: r.table()?,
            }
        }
        (CLASS_BASIC, 21) => BasicConsumeOk {
            consumer_tag: r.short_string()?,
        },
        (CLASS_BASIC, 30) => BasicCancel {
            consumer_tag: r.short_string()?,
            no_wait: r.bool()?,
        },
        (CLASS_BASIC, 31) => BasicCancelOk {
            consumer_tag: r.short_string()?,
        },
        (CLASS_BASIC, 40) => {
            r.u16()?;
            let exchange = r.short_string()?;
            let routing_key = r.short_string()?;
            let flags = r.u8()?;
            BasicPublish {
                exchange,
                routing_key,
                mandatory: bit(flags, 0),
                immediate: bit(flags, 1),
            }
        }
        (CLASS_BASIC, 50) => BasicReturn {
            reply_code: r.u16()?,
            reply_text: r.short_string()?,
            exchange: r.short_string()?,
            routing_key: r.short_string()?,
        },
        (CLASS_BASIC, 60) => BasicDeliver {
            consumer_tag: r.short_string()?,
            delivery_tag: r.u64()?,
            redelivered: r.bool()?,
            exchange: r.short_string()?,
            routing_key: r.short_string()?,
        },
        (CLASS_BASIC, 70) => {
            r.u16()?;
            BasicGet {
                queue: r.short_string()?,
                no_ack: r.bool()?,
            }
        }
        (CLASS_BASIC, 71) => BasicGetOk {
            delivery_tag: r.u64()?,
            redelivered: r.bool()?,
            exchange: r.short_string()?,
            routing_key: r.short_string()?,
            message_count: r.u32()?,
        },
        (CLASS_BASIC, 72) => {
            r.short_string()?;
            BasicGetEmpty
        }
        (CLASS_BASIC, 80) => BasicAck {
            delivery_tag: r.u64()?,
            multiple: r.bool()?,
        },
        (CLASS_BASIC, 90) => BasicReject {
            delivery_tag: r.u64()?,
            requeue: r.bool()?,
        },
        (CLASS_BASIC, 110) => BasicRecover {
            requeue: r.bool()?,
        },
        (CLASS_BASIC, 111) => BasicRecoverOk,
        (CLASS_BASIC, 120) => {
            let delivery_tag = r.u64()?;
            let flags = r.u8()?;
            BasicNack {
                delivery_tag,
                multiple: bit(flags, 0),
                requeue: bit(flags, 1),
            }
        }

        (CLASS_CONFIRM, 10) => ConfirmSelect {
            no_wait: r.bool()?,
        },
        (CLASS_CONFIRM, 11) => ConfirmSelectOk,

        (CLASS_TX, 10) => TxSelect,
        (CLASS_TX, 11) => TxSelectOk,
        (CLASS_TX, 20) => TxCommit,
        (CLASS_TX, 21) => TxCommitOk,
        (CLASS_TX, 30) => TxRollback,
        (CLASS_TX, 31) => TxRollbackOk,

        (class_id, method_id) => {
            return Err(ProtocolError::UnknownMethod {
                class_id,
                method_id,
            })
        }
    };
    Ok(method)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::field::FieldValue;

    fn round_trip(method: &Method) -> Method {
        let mut buf = Vec::new();
        let written = encode_method(&mut buf, method).expect("encode failed");
        assert_eq!(written, buf.len());
        decode_method(&buf).expect("decode failed")
    }

    #[test]
    fn test_ids_match_protocol_numbers() {
        assert_eq!(Method::ConnectionTuneOk { channel_max: 0, frame_max: 0, heartbeat: 0 }.ids(), (10, 31));
        assert_eq!(Method::BasicNack { delivery_tag: 1, multiple: false, requeue: true }.ids(), (60, 120));
        assert_eq!(Method::ConfirmSelectOk.ids(), (85, 11));
        assert_eq!(Method::TxRollback.ids(), (90, 30));
        assert_eq!(Method::ExchangeUnbindOk.ids(), (40, 51));
    }

    #[test]
    fn test_consume_flag_bits() {
        // Arrange
        let method = Method::BasicConsume {
            queue: "q".into(),
            consumer_tag: "".into(),
            no_local: false,
            no_ack: true,
            exclusive: true,
            no_wait: false,
            arguments: FieldTable::new(),
        };

        // Act
        let mut buf = Vec::new();
        encode_method(&mut buf, &method).unwrap();

        // Assert: ids(4) + reserved(2) + "q"(2) + ""(1) then the flag octet
        assert_eq!(buf[9], 0b0000_0110);
    }

    #[test]
    fn test_nack_flag_bits() {
        let mut buf = Vec::new();
        encode_method(
            &mut buf,
            &Method::BasicNack {
                delivery_tag: 7,
                multiple: true,
                requeue: true,
            },
        )
        .unwrap();
        assert_eq!(buf.last(), Some(&0b11));
    }

    #[test]
    fn test_queue_declare_round_trip_preserves_flags_and_arguments() {
        // Arrange
        let mut arguments = FieldTable::new();
        arguments.insert("x-message-ttl".into(), FieldValue::I32(60_000));
        let method = Method::QueueDeclare {
            queue: "orders".into(),
            passive: false,
            durable: true,
            exclusive: false,
            auto_delete: true,
            no_wait: false,
            arguments,
        };

        // Act / Assert
        assert_eq!(round_trip(&method), method);
    }

    #[test]
    fn test_start_ok_round_trip_with_binary_response() {
        let method = Method::ConnectionStartOk {
            client_properties: FieldTable::new(),
            mechanism: "PLAIN".into(),
            response: b"\0guest\0guest".to_vec(),
            locale: "en_US".into(),
        };
        assert_eq!(round_trip(&method), method);
    }

    #[test]
    fn test_deliver_and_get_ok_round_trip() {
        let deliver = Method::BasicDeliver {
            consumer_tag: "ctag-1".into(),
            delivery_tag: 1 << 40,
            redelivered: true,
            exchange: "".into(),
            routing_key: "rk".into(),
        };
        let get_ok = Method::BasicGetOk {
            delivery_tag: 3,
            redelivered: false,
            exchange: "ex".into(),
            routing_key: "rk".into(),
            message_count: 12,
        };
        assert_eq!(round_trip(&deliver), deliver);
        assert_eq!(round_trip(&get_ok), get_ok);
    }

    #[test]
    fn test_connection_close_round_trip() {
        let method = Method::ConnectionClose {
            reply_code: 320,
            reply_text: "CONNECTION_FORCED".into(),
            class_id: 0,
            method_id: 0,
        };
        assert_eq!(round_trip(&method), method);
    }

    #[test]
    fn test_unknown_method_is_rejected() {
        let payload = [0, 60, 0, 100];
        assert_eq!(
            decode_method(&payload),
            Err(ProtocolError::UnknownMethod {
                class_id: 60,
                method_id: 100
            })
        );
    }

    #[test]
    fn test_truncated_arguments_are_insufficient_data() {
        // basic.ack with only half a delivery tag
        let payload = [0, 60, 0, 80, 0, 0, 0, 1];
        assert!(matches!(
            decode_method(&payload),
            Err(ProtocolError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_has_content_only_for_content_methods() {
        assert!(Method::BasicGetOk {
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: String::new(),
            message_count: 0
        }
        .has_content());
        assert!(!Method::BasicGetEmpty.has_content());
    }
}
