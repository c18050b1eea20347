//! In-process broker with AMQP-like routing through the default exchange.
//!
//! Used by tests to script deliveries, inject connection and publish failures,
//! and inspect what the dispatcher published and acknowledged, in order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_stream::stream;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::transport::{BrokerChannel, BrokerConnector, Delivery, OutboundMessage, QueueKind};

/// Something observable that happened on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    Declared(String),
    Published(OutboundMessage),
    Acked(u64),
}

#[derive(Debug)]
struct QueueFeed {
    // `None` once the broker is closed
    tx: Option<mpsc::UnboundedSender<Result<Delivery, TransportError>>>,
    // Taken by the single consumer
    rx: Option<mpsc::UnboundedReceiver<Result<Delivery, TransportError>>>,
}

impl QueueFeed {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, QueueFeed>,
    events: Vec<BrokerEvent>,
    next_tag: u64,
    failing_connects: u32,
    connect_attempts: u32,
    fail_publishes: bool,
    fail_acks: bool,
    closed: bool,
}

impl State {
    fn feed(&mut self, queue: &str) -> &mut QueueFeed {
        let closed = self.closed;
        self.queues.entry(queue.to_owned()).or_insert_with(|| {
            let mut feed = QueueFeed::new();
            if closed {
                feed.tx = None;
            }
            feed
        })
    }

    fn enqueue(&mut self, queue: &str, mut delivery: Delivery, assign_tag: bool) -> u64 {
        if assign_tag {
            self.next_tag += 1;
            delivery.delivery_tag = self.next_tag;
        }
        let tag = delivery.delivery_tag;
        if let Some(tx) = &self.feed(queue).tx {
            // The receiver only disappears when the consumer stream is dropped
            let _ = tx.send(Ok(delivery));
        }
        tag
    }
}

/// Shared handle to an in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            broker: self.clone(),
        }
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.state().failing_connects = count;
    }

    /// Make every publish fail until called again with `false`.
    pub fn fail_publishes(&self, fail: bool) {
        self.state().fail_publishes = fail;
    }

    /// Make every ack fail until called again with `false`.
    pub fn fail_acks(&self, fail: bool) {
        self.state().fail_acks = fail;
    }

    /// Put a stream error on `queue`, after anything already queued.
    pub fn fail_receive(&self, queue: &str, reason: &str) {
        if let Some(tx) = &self.state().feed(queue).tx {
            let _ = tx.send(Err(TransportError::Receive(reason.to_owned())));
        }
    }

    pub fn connect_attempts(&self) -> u32 {
        self.state().connect_attempts
    }

    /// Put a new message on `queue` and return its delivery tag.
    pub fn send(
        &self,
        queue: &str,
        body: impl Into<Bytes>,
        reply_to: Option<&str>,
        correlation_id: Option<&str>,
    ) -> u64 {
        let delivery = Delivery {
            delivery_tag: 0,
            redelivered: false,
            reply_to: reply_to.map(str::to_owned),
            correlation_id: correlation_id.map(str::to_owned),
            body: body.into(),
        };
        self.state().enqueue(queue, delivery, true)
    }

    /// Deliver `delivery` again with its original tag.
    pub fn redeliver(&self, queue: &str, delivery: Delivery) {
        let delivery = Delivery {
            redelivered: true,
            ..delivery
        };
        self.state().enqueue(queue, delivery, false);
    }

    /// Stop accepting messages. Consumers see the end of their stream once
    /// they have drained what is already queued.
    pub fn close(&self) {
        let mut state = self.state();
        state.closed = true;
        for feed in state.queues.values_mut() {
            feed.tx = None;
        }
    }

    pub fn events(&self) -> Vec<BrokerEvent> {
        self.state().events.clone()
    }

    pub fn published(&self) -> Vec<OutboundMessage> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Published(message) => Some(message.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn acked(&self) -> Vec<u64> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Acked(tag) => Some(*tag),
                _ => None,
            })
            .collect()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.state()
            .events
            .iter()
            .filter_map(|event| match event {
                BrokerEvent::Declared(queue) => Some(queue.clone()),
                _ => None,
            })
            .collect()
    }
}

/// [`BrokerConnector`] for a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl BrokerConnector for MemoryConnector {
    type Channel = MemoryChannel;

    async fn connect(&self) -> Result<MemoryChannel, TransportError> {
        let mut state = self.broker.state();
        state.connect_attempts += 1;
        if state.failing_connects > 0 {
            state.failing_connects -= 1;
            return Err(TransportError::Connect("broker unavailable".to_owned()));
        }

        Ok(MemoryChannel {
            broker: self.broker.clone(),
        })
    }
}

/// [`BrokerChannel`] for a [`MemoryBroker`].
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    broker: MemoryBroker,
}

impl BrokerChannel for MemoryChannel {
    type Deliveries = BoxStream<'static, Result<Delivery, TransportError>>;

    async fn declare_queue(&self, queue: &str, _kind: QueueKind) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        state.feed(queue);
        state.events.push(BrokerEvent::Declared(queue.to_owned()));
        Ok(())
    }

    async fn consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<Self::Deliveries, TransportError> {
        let mut rx = self
            .broker
            .state()
            .feed(queue)
            .rx
            .take()
            .ok_or_else(|| TransportError::Consume {
                queue: queue.to_owned(),
                reason: "queue already has a consumer".to_owned(),
            })?;

        let deliveries = stream! {
            while let Some(delivery) = rx.recv().await {
                yield delivery;
            }
        };
        Ok(deliveries.boxed())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.fail_publishes {
            return Err(TransportError::Publish {
                routing_key: message.routing_key,
                reason: "publish rejected".to_owned(),
            });
        }

        state.events.push(BrokerEvent::Published(message.clone()));

        // The default exchange drops messages for queues nobody declared
        if state.queues.contains_key(&message.routing_key) {
            let delivery = Delivery {
                delivery_tag: 0,
                redelivered: false,
                reply_to: message.reply_to,
                correlation_id: message.correlation_id,
                body: message.payload,
            };
            state.enqueue(&message.routing_key, delivery, true);
        }
        Ok(())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<(), TransportError> {
        let mut state = self.broker.state();
        if state.fail_acks {
            return Err(TransportError::Ack {
                delivery_tag,
                reason: "channel closed".to_owned(),
            });
        }

        state.events.push(BrokerEvent::Acked(delivery_tag));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_failures_are_counted() {
        let broker = MemoryBroker::new();
        broker.fail_next_connects(2);
        let connector = broker.connector();

        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_err());
        assert!(connector.connect().await.is_ok());
        assert_eq!(broker.connect_attempts(), 3);
    }

    #[tokio::test]
    async fn test_send_then_consume_until_closed() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();

        let first = broker.send("request", "a", Some("response"), Some("c-1"));
        let second = broker.send("request", "b", None, None);
        assert!(second > first);

        let mut deliveries = channel.consume("request", "test").await.unwrap();
        broker.close();

        let d1 = deliveries.next().await.unwrap().unwrap();
        assert_eq!(d1.delivery_tag, first);
        assert_eq!(d1.reply_to.as_deref(), Some("response"));
        assert_eq!(d1.correlation_id.as_deref(), Some("c-1"));

        let d2 = deliveries.next().await.unwrap().unwrap();
        assert_eq!(d2.body, Bytes::from_static(b"b"));

        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_second_consumer_rejected() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();

        let _deliveries = channel.consume("request", "one").await.unwrap();
        let result = channel.consume("request", "two").await;
        assert!(matches!(result, Err(TransportError::Consume { .. })));
    }

    #[tokio::test]
    async fn test_publish_routes_only_to_known_queues() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();
        channel
            .declare_queue("response", QueueKind::Shared)
            .await
            .unwrap();

        channel
            .publish(OutboundMessage::new("response", "x").with_correlation_id("c-9"))
            .await
            .unwrap();
        channel
            .publish(OutboundMessage::new("nowhere", "y"))
            .await
            .unwrap();

        assert_eq!(broker.published().len(), 2);

        let mut deliveries = channel.consume("response", "reader").await.unwrap();
        broker.close();
        let routed = deliveries.next().await.unwrap().unwrap();
        assert_eq!(routed.correlation_id.as_deref(), Some("c-9"));
        assert!(deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn test_receive_error_follows_queued_deliveries() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();

        broker.send("request", "a", None, None);
        broker.fail_receive("request", "connection reset");
        let mut deliveries = channel.consume("request", "reader").await.unwrap();

        assert!(deliveries.next().await.unwrap().is_ok());
        assert!(matches!(
            deliveries.next().await,
            Some(Err(TransportError::Receive(_)))
        ));
    }

    #[tokio::test]
    async fn test_failing_ack_is_not_recorded() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();
        broker.fail_acks(true);

        assert!(matches!(
            channel.ack(4).await,
            Err(TransportError::Ack { delivery_tag: 4, .. })
        ));
        assert!(broker.acked().is_empty());
    }

    #[tokio::test]
    async fn test_failing_publish_is_not_recorded() {
        let broker = MemoryBroker::new();
        let channel = broker.connector().connect().await.unwrap();
        broker.fail_publishes(true);

        let result = channel.publish(OutboundMessage::new("response", "x")).await;
        assert!(matches!(result, Err(TransportError::Publish { .. })));
        assert!(broker.published().is_empty());
    }
}
