use bytes::Bytes;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{RpcFailure, RpcServerError};
use crate::reply::{HandlerOutcome, ReplyPayload};
use crate::server::config::RpcDispatcherConfig;
use crate::server::handler::RequestHandler;
use crate::server::ledger::DeliveryLedger;
use crate::transport::{BrokerChannel, BrokerConnector, Delivery, OutboundMessage, QueueKind};

/// The RPC dispatcher: consumes requests, runs them through the handler and
/// publishes one correlated reply per request.
pub struct RpcDispatcher<C, H> {
    channel: C,
    handler: Arc<H>,
    ledger: Arc<DeliveryLedger>,
    config: RpcDispatcherConfig,
}

impl<C, H> RpcDispatcher<C, H>
where
    C: BrokerChannel,
    H: RequestHandler + 'static,
{
    /// Connect under the configured retry policy and declare the request and
    /// response queues.
    ///
    /// Fails without declaring anything when the broker stays unreachable.
    pub async fn connect<K>(
        connector: &K,
        handler: H,
        config: RpcDispatcherConfig,
    ) -> Result<Self, RpcServerError>
    where
        K: BrokerConnector<Channel = C>,
    {
        let channel = config.retry.connect(connector).await?;
        Self::with_channel(channel, handler, config).await
    }

    /// Build a dispatcher on an already connected channel.
    pub async fn with_channel(
        channel: C,
        handler: H,
        config: RpcDispatcherConfig,
    ) -> Result<Self, RpcServerError> {
        channel
            .declare_queue(&config.request_queue, QueueKind::Shared)
            .await?;
        channel
            .declare_queue(&config.response_queue, QueueKind::Shared)
            .await?;

        info!(
            request_queue = %config.request_queue,
            response_queue = %config.response_queue,
            "Declared RPC queues"
        );

        Ok(Self {
            channel,
            handler: Arc::new(handler),
            ledger: Arc::new(DeliveryLedger::new(config.retain_settled)),
            config,
        })
    }

    pub fn ledger(&self) -> &Arc<DeliveryLedger> {
        &self.ledger
    }

    /// Run until the delivery stream closes or a transport error occurs.
    pub async fn run(self) -> Result<(), RpcServerError> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Run until the delivery stream closes, a transport error occurs, or
    /// `shutdown` resolves. In-flight requests are finished before returning.
    pub async fn run_until<S>(self, shutdown: S) -> Result<(), RpcServerError>
    where
        S: Future<Output = ()>,
    {
        let mut deliveries = self
            .channel
            .consume(&self.config.request_queue, &self.config.consumer_tag)
            .await?;

        let max_in_flight = self.config.max_in_flight.max(1);
        let pooled = max_in_flight > 1;
        let worker = Arc::new(DeliveryWorker {
            channel: self.channel,
            handler: self.handler,
            ledger: self.ledger,
            response_queue: self.config.response_queue,
            handler_timeout: self.config.handler_timeout,
        });
        let permits = Arc::new(Semaphore::new(max_in_flight));
        let mut tasks: JoinSet<Result<(), RpcServerError>> = JoinSet::new();

        info!(
            queue = %self.config.request_queue,
            max_in_flight,
            "RPC dispatcher started, waiting for requests"
        );

        tokio::pin!(shutdown);

        // Held before the next delivery is taken, so a full pool stops intake
        let mut permit: Option<OwnedSemaphorePermit> = None;

        let mut outcome = loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("Shutdown requested, dispatcher stopping");
                    break Ok(());
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = flatten(joined) {
                        break Err(e);
                    }
                }

                acquired = Arc::clone(&permits).acquire_owned(), if pooled && permit.is_none() => {
                    match acquired {
                        Ok(acquired) => permit = Some(acquired),
                        Err(e) => break Err(RpcServerError::Worker(e.to_string())),
                    }
                }

                next = deliveries.next(), if !pooled || permit.is_some() => match next {
                    Some(Ok(delivery)) => match permit.take() {
                        Some(permit) => {
                            let worker = Arc::clone(&worker);
                            tasks.spawn(async move {
                                let _permit = permit;
                                worker.process(delivery).await
                            });
                        }
                        None => {
                            if let Err(e) = worker.process(delivery).await {
                                break Err(e);
                            }
                        }
                    },

                    Some(Err(e)) => {
                        error!(error = %e, "Delivery stream failed");
                        break Err(e.into());
                    }

                    None => {
                        info!("Delivery stream closed, dispatcher shutting down");
                        break Ok(());
                    }
                }
            }
        };

        // Let in-flight requests reply and ack before returning
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = flatten(joined) {
                warn!(error = %e, "Dispatch worker failed while draining");
                outcome = outcome.and(Err(e));
            }
        }

        outcome
    }
}

fn flatten(joined: Result<Result<(), RpcServerError>, JoinError>) -> Result<(), RpcServerError> {
    joined.map_err(|e| RpcServerError::Worker(e.to_string()))?
}

/// Everything needed to take one delivery from receipt to acknowledgment.
struct DeliveryWorker<C, H> {
    channel: C,
    handler: Arc<H>,
    ledger: Arc<DeliveryLedger>,
    response_queue: String,
    handler_timeout: Option<Duration>,
}

impl<C, H> DeliveryWorker<C, H>
where
    C: BrokerChannel,
    H: RequestHandler,
{
    /// Handle, reply, then acknowledge.
    ///
    /// Only transport failures are returned; request failures become the
    /// reply payload.
    async fn process(&self, delivery: Delivery) -> Result<(), RpcServerError> {
        let Delivery {
            delivery_tag,
            redelivered,
            reply_to,
            correlation_id,
            body,
        } = delivery;

        let claim = match self.ledger.try_claim(delivery_tag) {
            Ok(claim) => claim,
            Err(e) => {
                warn!(delivery_tag, redelivered, error = %e, "Skipping duplicate delivery");
                return Ok(());
            }
        };

        debug!(
            delivery_tag,
            redelivered,
            correlation_id = ?correlation_id,
            bytes = body.len(),
            "Received request"
        );

        let payload = ReplyPayload::from(self.invoke(body).await);
        if let ReplyPayload::Failure { error } = &payload {
            warn!(
                delivery_tag,
                correlation_id = ?correlation_id,
                kind = %error.kind,
                error = %error.message,
                "Request failed"
            );
        }

        let destination = match reply_to {
            Some(queue) => queue,
            None => {
                warn!(
                    delivery_tag,
                    fallback = %self.response_queue,
                    "Request has no reply_to, using the default response queue"
                );
                self.response_queue.clone()
            }
        };
        if correlation_id.is_none() {
            warn!(delivery_tag, "Request has no correlation_id");
        }

        let mut message = OutboundMessage::new(destination, payload.encode());
        message.correlation_id = correlation_id;

        let published = self.channel.publish(message).await;
        if let Err(e) = &published {
            error!(delivery_tag, error = %e, "Failed to publish reply");
        }

        // Acknowledge after the publish attempt, whatever its outcome
        let acked = self.channel.ack(delivery_tag).await;
        claim.settle();

        published?;
        acked?;

        debug!(delivery_tag, "Reply sent and request acknowledged");
        Ok(())
    }

    async fn invoke(&self, body: Bytes) -> HandlerOutcome {
        let handled = AssertUnwindSafe(self.handler.handle(body)).catch_unwind();

        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, handled).await {
                Ok(result) => result,
                Err(_) => return Err(RpcFailure::timeout(limit)),
            },
            None => handled.await,
        };

        result.unwrap_or_else(|_| {
            error!("Request handler panicked");
            Err(RpcFailure::internal("handler panicked"))
        })
    }
}
