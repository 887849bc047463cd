//! Delivered, fetched and returned messages.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;

use amqp_wire::BasicProperties;

use crate::application::channel::Channel;
use crate::application::error::ClientError;

/// A complete message received from the broker.
///
/// The same type carries all three ways a message can arrive:
///
/// | Arrived via    | `consumer_tag` | `message_count` | `reply_code` / `reply_text` |
/// |----------------|----------------|-----------------|-----------------------------|
/// | `basic.deliver`| set            | `None`          | `None`                      |
/// | `basic.get-ok` | `None`         | set             | `None`                      |
/// | `basic.return` | `None`         | `None`          | set                         |
#[derive(Clone)]
pub struct Message {
    pub(crate) channel: Channel,
    pub exchange: String,
    pub routing_key: String,
    pub properties: BasicProperties,
    pub body: Vec<u8>,
    /// Size announced by the content header; equals `body.len()` once complete.
    pub body_size: u64,
    /// Zero for returned messages, which have no delivery tag.
    pub delivery_tag: u64,
    pub consumer_tag: Option<String>,
    pub redelivered: bool,
    /// Messages left in the queue after a `basic.get`.
    pub message_count: Option<u32>,
    pub reply_code: Option<u16>,
    pub reply_text: Option<String>,
}

impl Message {
    /// A message stub waiting for its content header and body.
    pub(crate) fn stub(channel: Channel, exchange: String, routing_key: String) -> Self {
        Self {
            channel,
            exchange,
            routing_key,
            properties: BasicProperties::default(),
            body: Vec::new(),
            body_size: 0,
            delivery_tag: 0,
            consumer_tag: None,
            redelivered: false,
            message_count: None,
            reply_code: None,
            reply_text: None,
        }
    }

    /// The channel the message arrived on.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// The body decoded as UTF-8, with invalid sequences replaced.
    pub fn body_string(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    /// Acknowledges this delivery (and every earlier one if `multiple`).
    pub fn ack(&self, multiple: bool) -> Result<(), ClientError> {
        self.channel.basic_ack(self.delivery_tag, multiple)
    }

    /// Negatively acknowledges this delivery.
    pub fn nack(&self, requeue: bool, multiple: bool) -> Result<(), ClientError> {
        self.channel.basic_nack(self.delivery_tag, requeue, multiple)
    }

    /// Rejects this delivery.
    pub fn reject(&self, requeue: bool) -> Result<(), ClientError> {
        self.channel.basic_reject(self.delivery_tag, requeue)
    }

    /// Cancels the consumer that received this message.
    ///
    /// Resolves immediately if the message did not come from a consumer.
    pub fn cancel_consumer(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        let cancel = self
            .consumer_tag
            .as_deref()
            .map(|tag| self.channel.basic_cancel(tag));
        async move {
            match cancel {
                Some(fut) => fut.await,
                None => Ok(()),
            }
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("channel", &self.channel.id())
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("delivery_tag", &self.delivery_tag)
            .field("consumer_tag", &self.consumer_tag)
            .field("body_size", &self.body_size)
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}
