//! Command-line and environment configuration for the binaries.

use std::time::Duration;

use clap::{Args, Parser};
use rpcamqp_lite::RetryPolicy;
use rpcamqp_lite::client::RpcClientConfig;
use rpcamqp_lite::server::{DEFAULT_REQUEST_QUEUE, DEFAULT_RESPONSE_QUEUE, RpcDispatcherConfig};
use serde_json::{Map, Value};
use url::Url;

use crate::adapter::{GITHUB_API_URL, GITLAB_API_URL, UpstreamSettings};
use crate::telemetry::LogFormat;

pub const DEFAULT_AMQP_URI: &str = "amqp://127.0.0.1:5672/%2f";

/// Broker location and retry behaviour shared by both binaries.
#[derive(Args, Debug, Clone)]
pub struct BrokerArgs {
    /// AMQP URI of the broker.
    #[arg(long, env = "AMQP_URI", default_value = DEFAULT_AMQP_URI)]
    pub amqp_uri: String,

    /// Queue requests are published to and consumed from.
    #[arg(long, env = "REQUEST_QUEUE", default_value = DEFAULT_REQUEST_QUEUE)]
    pub request_queue: String,

    /// Connection retries after the first failed attempt.
    #[arg(long, env = "CONNECT_RETRIES", default_value_t = 30)]
    pub connect_retries: u32,

    /// Pause between connection attempts, in milliseconds.
    #[arg(long, env = "CONNECT_BACKOFF_MS", default_value_t = 1000)]
    pub connect_backoff_ms: u64,
}

impl BrokerArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(self.connect_retries)
            .backoff(Duration::from_millis(self.connect_backoff_ms))
            .build()
    }

    /// The broker URI with any password masked, for logging.
    pub fn redacted_uri(&self) -> String {
        redact_uri(&self.amqp_uri)
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpstreamArgs {
    /// Base URL of the GitHub REST API.
    #[arg(long, env = "GITHUB_API_URL", default_value = GITHUB_API_URL)]
    pub github_api_url: String,

    /// Base URL of the GitLab projects API.
    #[arg(long, env = "GITLAB_API_URL", default_value = GITLAB_API_URL)]
    pub gitlab_api_url: String,

    /// Timeout for a single upstream HTTP call, in seconds.
    #[arg(long, env = "UPSTREAM_TIMEOUT_SECS", default_value_t = 30)]
    pub upstream_timeout_secs: u64,
}

impl UpstreamArgs {
    pub fn settings(&self) -> UpstreamSettings {
        UpstreamSettings::builder()
            .github_url(self.github_api_url.as_str())
            .gitlab_url(self.gitlab_api_url.as_str())
            .request_timeout(Duration::from_secs(self.upstream_timeout_secs))
            .build()
    }
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    /// Log output format.
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Serve VCS hosting data over an AMQP request queue.
#[derive(Parser, Debug, Clone)]
#[command(name = "consumer", version)]
pub struct ConsumerConfig {
    #[command(flatten)]
    pub broker: BrokerArgs,

    /// Default queue for replies to requests without `reply_to`.
    #[arg(long, env = "RESPONSE_QUEUE", default_value = DEFAULT_RESPONSE_QUEUE)]
    pub response_queue: String,

    /// Upper bound on one request, in seconds. Unset means no limit.
    #[arg(long, env = "HANDLER_TIMEOUT_SECS")]
    pub handler_timeout_secs: Option<u64>,

    /// Requests processed concurrently. `1` keeps strict arrival order.
    #[arg(long, env = "MAX_IN_FLIGHT", default_value_t = 1)]
    pub max_in_flight: usize,

    #[command(flatten)]
    pub upstream: UpstreamArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl ConsumerConfig {
    pub fn dispatcher_config(&self) -> RpcDispatcherConfig {
        RpcDispatcherConfig::builder()
            .request_queue(self.broker.request_queue.as_str())
            .response_queue(self.response_queue.as_str())
            .retry(self.broker.retry_policy())
            .maybe_handler_timeout(self.handler_timeout_secs.map(Duration::from_secs))
            .max_in_flight(self.max_in_flight.max(1))
            .build()
    }
}

/// Send one request to the consumer and print the reply.
#[derive(Parser, Debug, Clone)]
#[command(name = "request", version)]
pub struct RequestConfig {
    /// Operation to run, e.g. `get_branches`.
    pub action: String,

    /// Repository owner or namespace.
    #[arg(long)]
    pub owner: Option<String>,

    /// Repository name.
    #[arg(long)]
    pub repo: Option<String>,

    /// Hosting service: `github` or `gitlab`.
    #[arg(long)]
    pub source: Option<String>,

    /// API token passed through to the hosting service.
    #[arg(long, env = "VCS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[arg(long)]
    pub hash: Option<String>,

    #[arg(long)]
    pub branch: Option<String>,

    /// Seconds to wait for the reply.
    #[arg(long, env = "REPLY_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    #[command(flatten)]
    pub broker: BrokerArgs,

    #[command(flatten)]
    pub log: LogArgs,
}

impl RequestConfig {
    /// JSON body of the request message. Unset options are left out.
    pub fn request_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("action".to_owned(), Value::from(self.action.as_str()));

        let optional = [
            ("owner", &self.owner),
            ("repo", &self.repo),
            ("source", &self.source),
            ("token", &self.token),
            ("hash", &self.hash),
            ("branch", &self.branch),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                body.insert(key.to_owned(), Value::from(value.as_str()));
            }
        }

        Value::Object(body)
    }

    pub fn client_config(&self) -> RpcClientConfig {
        RpcClientConfig::new(self.broker.request_queue.as_str())
            .with_timeout(Duration::from_secs(self.timeout_secs))
    }
}

fn redact_uri(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                // set_password only fails for cannot-be-a-base URLs
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid uri>".to_owned(),
    }
}
