use std::time::Duration;

use crate::server::DEFAULT_REQUEST_QUEUE;

/// Configuration for the RPC client.
#[derive(Debug, Clone)]
pub struct RpcClientConfig {
    /// Queue requests are published to.
    pub request_queue: String,

    /// Prefix for the private callback queue. The full name is
    /// `{callback_prefix}.{uuid}`.
    pub callback_prefix: String,

    /// Timeout for waiting for the correlated reply.
    pub timeout: Duration,
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        Self {
            request_queue: DEFAULT_REQUEST_QUEUE.to_string(),
            callback_prefix: "rpc.callback".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl RpcClientConfig {
    pub fn new(request_queue: impl Into<String>) -> Self {
        Self {
            request_queue: request_queue.into(),
            ..Default::default()
        }
    }

    /// Set the callback queue prefix.
    pub fn with_callback_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.callback_prefix = prefix.into();
        self
    }

    /// Set the timeout for waiting for a reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub(crate) fn callback_queue(&self, client_id: &str) -> String {
        format!("{}.{}", self.callback_prefix, client_id)
    }
}
