//! RPC over AMQP, the lightweight way.
//!
//! A request/reply layer on top of a message broker: callers publish a
//! request with `reply_to` and `correlation_id` properties, the
//! [`RpcDispatcher`](server::RpcDispatcher) runs it through a
//! [`RequestHandler`](server::RequestHandler) and publishes exactly one reply
//! carrying the same correlation id, then acknowledges the request.

pub mod client;
pub mod error;
pub mod reply;
pub mod retry;
pub mod server;
pub mod transport;

pub use error::{FailureKind, RpcClientError, RpcFailure, RpcServerError, TransportError};
pub use reply::{HandlerOutcome, ReplyPayload};
pub use retry::RetryPolicy;
