use anyhow::{Context, Result};
use clap::Parser;
use rpcamqp_lite::client::RpcClient;
use rpcamqp_lite::transport::amqp::AmqpConnector;
use tracing::debug;
use vcs_rpc::config::RequestConfig;
use vcs_rpc::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = RequestConfig::parse();
    telemetry::init(config.log.log_format)?;

    debug!(broker = %config.broker.redacted_uri(), "Connecting to broker");
    let connector = AmqpConnector::new(config.broker.amqp_uri.as_str());
    let channel = config
        .broker
        .retry_policy()
        .connect(&connector)
        .await
        .context("broker unreachable")?;

    let mut client = RpcClient::new(channel, config.client_config()).await?;
    let body = serde_json::to_vec(&config.request_body())?;
    let reply = client.call(body).await.context("request failed")?;

    let reply: serde_json::Value =
        serde_json::from_slice(&reply).context("reply is not valid JSON")?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}
