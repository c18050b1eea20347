//! Requesting side of the RPC pattern.
//!
//! The client declares a private callback queue, publishes each request with
//! `reply_to` pointing at it and a fresh correlation id, and waits for the
//! reply carrying that id. Replies with other ids are stale and dropped.
//!
//! # Example
//!
//! ```ignore
//! let channel = RetryPolicy::default().connect(&AmqpConnector::new(uri)).await?;
//! let mut client = RpcClient::new(channel, RpcClientConfig::new("request")).await?;
//! let reply = client.call(r#"{"action": "get_branches"}"#).await?;
//! ```

mod config;

pub use config::RpcClientConfig;

use bytes::Bytes;
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::RpcClientError;
use crate::transport::{BrokerChannel, OutboundMessage, QueueKind};

/// An RPC client bound to one broker channel.
pub struct RpcClient<C: BrokerChannel> {
    channel: C,
    replies: C::Deliveries,
    callback_queue: String,
    config: RpcClientConfig,
}

impl<C: BrokerChannel> RpcClient<C> {
    /// Declare the callback queue and start listening on it.
    pub async fn new(channel: C, config: RpcClientConfig) -> Result<Self, RpcClientError> {
        let client_id = Uuid::new_v4().to_string();
        let callback_queue = config.callback_queue(&client_id);

        channel
            .declare_queue(&callback_queue, QueueKind::Exclusive)
            .await?;
        let replies = channel.consume(&callback_queue, &client_id).await?;

        debug!(callback_queue = %callback_queue, "RPC client ready");

        Ok(Self {
            channel,
            replies,
            callback_queue,
            config,
        })
    }

    pub fn callback_queue(&self) -> &str {
        &self.callback_queue
    }

    /// Publish `body` to the request queue and wait for the correlated reply.
    pub async fn call(&mut self, body: impl Into<Bytes>) -> Result<Bytes, RpcClientError> {
        let correlation_id = Uuid::new_v4().to_string();
        let request = OutboundMessage::new(self.config.request_queue.clone(), body)
            .with_reply_to(self.callback_queue.clone())
            .with_correlation_id(correlation_id.clone());

        self.channel.publish(request).await?;
        debug!(
            correlation_id = %correlation_id,
            queue = %self.config.request_queue,
            "Sent request"
        );

        let wait_for_reply =
            Self::wait_for_reply(&self.channel, &mut self.replies, &correlation_id);
        tokio::time::timeout(self.config.timeout, wait_for_reply).await?
    }

    async fn wait_for_reply(
        channel: &C,
        replies: &mut C::Deliveries,
        correlation_id: &str,
    ) -> Result<Bytes, RpcClientError> {
        while let Some(delivery) = replies.next().await {
            let delivery = delivery?;
            channel.ack(delivery.delivery_tag).await?;

            if delivery.correlation_id.as_deref() == Some(correlation_id) {
                return Ok(delivery.body);
            }
            debug!(
                expected = %correlation_id,
                received = ?delivery.correlation_id,
                "Dropping reply with unexpected correlation id"
            );
        }
        Err(RpcClientError::ConnectionClosed)
    }
}
