//! hs - baseline system entry point

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use hobbitcore::logging::setup_logging;
use hobbitcore::{AmqpConnector, Config, ExperimentConfig};
use hobbitsys::SystemAdapter;
use hobbitsys::cli::Cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let experiment = ExperimentConfig::from_env().context("Failed to read experiment configuration")?;
    info!(session = %experiment.session_id, broker = %experiment.broker_address(), "Starting system");

    let adapter = SystemAdapter::new(experiment, config, Arc::new(AmqpConnector::new()));
    tokio::select! {
        result = adapter.run() => result.context("System crashed")?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, exiting"),
    }

    info!("Exiting");
    Ok(())
}
