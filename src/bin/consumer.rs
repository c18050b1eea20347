use anyhow::{Context, Result};
use clap::Parser;
use rpcamqp_lite::server::RpcDispatcher;
use rpcamqp_lite::transport::amqp::AmqpConnector;
use tracing::{error, info};
use vcs_rpc::adapter::HttpAdapterFactory;
use vcs_rpc::config::ConsumerConfig;
use vcs_rpc::service::VcsService;
use vcs_rpc::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ConsumerConfig::parse();
    telemetry::init(config.log.log_format)?;

    let factory = HttpAdapterFactory::new(config.upstream.settings())
        .context("failed to build upstream HTTP client")?;
    let service = VcsService::new(factory);

    info!(
        broker = %config.broker.redacted_uri(),
        queue = %config.broker.request_queue,
        "Consumer connecting to broker"
    );

    let connector = AmqpConnector::new(config.broker.amqp_uri.as_str());
    let dispatcher = RpcDispatcher::connect(&connector, service, config.dispatcher_config())
        .await
        .context("failed to start dispatcher")?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    dispatcher.run_until(shutdown).await?;
    info!("Consumer stopped");
    Ok(())
}
