use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::signal;
use tracing::info;

use super::CliContext;
use dslink_broker::Broker;
use dslink_broker::config::BrokerConfig;
use dslink_broker::logger::init_tracing;
use dslink_broker::transport::serve_stdio;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Write logs to daily files in this directory instead of stderr
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// OpenTelemetry logs endpoint (e.g. http://localhost:4318/v1/logs)
    #[arg(long)]
    pub otel_endpoint: Option<String>,

    /// Name of the node link nodes are created under
    #[arg(long)]
    pub downstream: Option<String>,
}

impl RunArgs {
    pub fn default_runtime() -> Self {
        Self {
            log_level: None,
            log_dir: None,
            otel_endpoint: None,
            downstream: None,
        }
    }
}

pub async fn execute(args: RunArgs, context: &CliContext) -> anyhow::Result<()> {
    let config = BrokerConfig::load(&context.config_manager)
        .await
        .with_overrides(args.downstream, args.log_level, args.log_dir, args.otel_endpoint);

    let (logger, telemetry) = init_tracing(&config.log)?;
    info!(downstream = %config.downstream, "starting broker");
    let broker = Arc::new(Broker::new(config, logger)?);

    let result = tokio::select! {
        res = serve_stdio(broker) => res,
        _ = signal::ctrl_c() => {
            info!("interrupted, shutting down");
            Ok(())
        }
    };
    telemetry.shutdown();
    result
}
