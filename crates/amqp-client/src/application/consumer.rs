//! A registered subscription.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::application::channel::Channel;
use crate::application::error::ClientError;

/// Whether a consumer is still receiving deliveries.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumerStatus {
    Active,
    /// Closed by a client cancel (`None`) or with an error: a server cancel,
    /// a channel close or a connection close.
    Closed(Option<ClientError>),
}

/// Handle to a consumer created by [`Channel::basic_consume`].
///
/// Dropping the handle does not cancel the subscription; deliveries keep
/// flowing to the callback until [`Consumer::cancel`] succeeds or the
/// broker cancels it.
#[derive(Debug, Clone)]
pub struct Consumer {
    tag: String,
    channel: Channel,
    status: watch::Receiver<ConsumerStatus>,
}

impl Consumer {
    pub(crate) fn new(tag: String, channel: Channel, status: watch::Receiver<ConsumerStatus>) -> Self {
        Self {
            tag,
            channel,
            status,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        matches!(*self.status.borrow(), ConsumerStatus::Closed(_))
    }

    /// The error the consumer was closed with, if any.
    pub fn close_error(&self) -> Option<ClientError> {
        match &*self.status.borrow() {
            ConsumerStatus::Closed(err) => err.clone(),
            ConsumerStatus::Active => None,
        }
    }

    /// Sends `basic.cancel` and resolves once the broker confirms.
    pub fn cancel(&self) -> impl Future<Output = Result<(), ClientError>> + Send + 'static {
        self.channel.basic_cancel(&self.tag)
    }

    /// Waits until the consumer is closed.
    ///
    /// Resolves `Ok` after a client cancel, or with the close error after a
    /// server cancel or a channel/connection close.  With a timeout, fails
    /// with [`ClientError::Timeout`] when it expires; the subscription itself
    /// stays open.
    pub async fn wait(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        let mut status = self.status.clone();
        let closed = async move {
            loop {
                let current = status.borrow_and_update().clone();
                if let ConsumerStatus::Closed(err) = current {
                    return match err {
                        None => Ok(()),
                        Some(e) => Err(e),
                    };
                }
                if status.changed().await.is_err() {
                    // Connection state dropped without closing the consumer.
                    return Err(ClientError::ConnectionNotOpen);
                }
            }
        };
        match timeout {
            Some(limit) => tokio::time::timeout(limit, closed)
                .await
                .map_err(|_| ClientError::Timeout)?,
            None => closed.await,
        }
    }
}
