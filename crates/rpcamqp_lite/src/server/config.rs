use std::time::Duration;

use bon::Builder;

use crate::retry::RetryPolicy;
use crate::server::ledger::DEFAULT_RETAIN_SETTLED;

pub const DEFAULT_REQUEST_QUEUE: &str = "request";
pub const DEFAULT_RESPONSE_QUEUE: &str = "response";
pub const DEFAULT_CONSUMER_TAG: &str = "rpcamqp-dispatcher";

/// Configuration for the RPC dispatcher.
#[derive(Debug, Clone, Builder)]
pub struct RpcDispatcherConfig {
    /// Queue the dispatcher consumes requests from.
    #[builder(into, default = String::from(DEFAULT_REQUEST_QUEUE))]
    pub request_queue: String,

    /// Queue replies go to when a request carries no `reply_to`.
    #[builder(into, default = String::from(DEFAULT_RESPONSE_QUEUE))]
    pub response_queue: String,

    #[builder(into, default = String::from(DEFAULT_CONSUMER_TAG))]
    pub consumer_tag: String,

    /// Policy for the initial broker connection.
    #[builder(default)]
    pub retry: RetryPolicy,

    /// Upper bound on a single handler invocation. `None` waits forever.
    pub handler_timeout: Option<Duration>,

    /// Deliveries processed concurrently. `1` processes strictly in arrival order.
    #[builder(default = 1)]
    pub max_in_flight: usize,

    /// Settled delivery tags remembered for duplicate detection.
    #[builder(default = DEFAULT_RETAIN_SETTLED)]
    pub retain_settled: usize,
}

impl Default for RpcDispatcherConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
