//! Broker abstraction used by the dispatcher and the client.
//!
//! [`BrokerConnector`] opens a channel; [`BrokerChannel`] is the small set of
//! AMQP operations the RPC pattern needs. `amqp` implements them on top of
//! `lapin`, `memory` implements them in-process for tests and local runs.

use std::future::Future;

use bytes::Bytes;
use futures::Stream;

use crate::error::TransportError;

pub mod amqp;
pub mod memory;

/// A message received from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Channel-scoped tag used to acknowledge this delivery.
    pub delivery_tag: u64,
    /// Set by the broker when the message was delivered before.
    pub redelivered: bool,
    /// Queue the sender expects the reply on.
    pub reply_to: Option<String>,
    /// Opaque token the sender uses to match the reply.
    pub correlation_id: Option<String>,
    pub body: Bytes,
}

/// A message to publish through the default exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination queue name.
    pub routing_key: String,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub payload: Bytes,
}

impl OutboundMessage {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            routing_key: routing_key.into(),
            reply_to: None,
            correlation_id: None,
            payload: payload.into(),
        }
    }

    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// How a queue is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueKind {
    /// Plain named queue, shared by anyone who declares it.
    #[default]
    Shared,
    /// Private to this connection and deleted with it (reply queues).
    Exclusive,
}

/// Opens channels to a broker.
pub trait BrokerConnector: Send + Sync {
    type Channel: BrokerChannel;

    /// Make a single connection attempt.
    fn connect(&self) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;
}

/// The AMQP operations used by the RPC dispatcher and client.
///
/// Channels are cheap handles; clones share the same underlying channel.
pub trait BrokerChannel: Clone + Send + Sync + 'static {
    type Deliveries: Stream<Item = Result<Delivery, TransportError>> + Send + Unpin + 'static;

    /// Declare a queue. Declaring an existing queue is a no-op.
    fn declare_queue(
        &self,
        queue: &str,
        kind: QueueKind,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Start consuming with manual acknowledgment.
    fn consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> impl Future<Output = Result<Self::Deliveries, TransportError>> + Send;

    fn publish(
        &self,
        message: OutboundMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn ack(&self, delivery_tag: u64) -> impl Future<Output = Result<(), TransportError>> + Send;
}
