//! Server-side types for rpcamqp_lite.
//!
//! This module contains the `RpcDispatcher` and related types for serving
//! requests that arrive on a broker queue.

mod config;
mod dispatcher;
mod handler;
mod ledger;

pub use config::{
    DEFAULT_CONSUMER_TAG, DEFAULT_REQUEST_QUEUE, DEFAULT_RESPONSE_QUEUE, RpcDispatcherConfig,
};
pub use dispatcher::RpcDispatcher;
pub use handler::{HandlerFn, RequestHandler, handler_fn};
pub use ledger::{DEFAULT_RETAIN_SETTLED, DeliveryClaim, DeliveryLedger};
