//! Convenience wrapper around one queue on one channel.

use std::future::Future;

use amqp_wire::{BasicProperties, FieldTable};

use crate::application::channel::Channel;
use crate::application::consumer::Consumer;
use crate::application::error::ClientError;
use crate::application::message::Message;
use crate::domain::types::{ConsumeOptions, PublishOptions};

/// A declared queue, as returned by [`Channel::queue`].
///
/// Every method forwards to the channel with this queue's name filled in.
#[derive(Debug, Clone)]
pub struct Queue {
    channel: Channel,
    name: String,
}

impl Queue {
    pub(crate) fn new(channel: Channel, name: String) -> Self {
        Self { channel, name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn bind(
        &self,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.channel
            .queue_bind(&self.name, exchange, routing_key, arguments)
    }

    pub fn unbind(
        &self,
        exchange: &str,
        routing_key: &str,
        arguments: FieldTable,
    ) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.channel
            .queue_unbind(&self.name, exchange, routing_key, arguments)
    }

    /// Publishes straight to this queue through the default exchange.
    pub fn publish(
        &self,
        body: &[u8],
        properties: &BasicProperties,
    ) -> impl Future<Output = Result<Option<u64>, ClientError>> + Send + 'static {
        self.channel
            .basic_publish("", &self.name, body, properties, PublishOptions::default())
    }

    pub fn subscribe<F>(
        &self,
        options: ConsumeOptions,
        callback: F,
    ) -> impl Future<Output = Result<Consumer, ClientError>> + Send + 'static
    where
        F: FnMut(Message) + Send + 'static,
    {
        self.channel.basic_consume(&self.name, options, callback)
    }

    pub fn unsubscribe(&self, consumer_tag: &str) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.channel.basic_cancel(consumer_tag)
    }

    pub fn get(&self, no_ack: bool) -> impl Future<Output = Result<Option<Message>, ClientError>> + Send + 'static {
        self.channel.basic_get(&self.name, no_ack)
    }

    pub fn purge(&self) -> impl Future<Output = Result<u32, ClientError>> + Send + 'static {
        self.channel.queue_purge(&self.name)
    }

    pub fn delete(
        &self,
        if_unused: bool,
        if_empty: bool,
    ) -> impl Future<Output = Result<u32, ClientError>> + Send + 'static {
        self.channel.queue_delete(&self.name, if_unused, if_empty)
    }
}
