//! hb - benchmark controller entry point

use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use hobbitbench::cli::Cli;
use hobbitbench::{BenchmarkController, Dataset, DatasetSource};
use hobbitcore::logging::setup_logging;
use hobbitcore::{AmqpConnector, Config, ExperimentConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let experiment = ExperimentConfig::from_env().context("Failed to read experiment configuration")?;
    info!(session = %experiment.session_id, broker = %experiment.broker_address(), "Starting benchmark");

    let source = DatasetSource::resolve(
        &experiment.benchmark_parameters,
        &config.benchmark.namespace,
        &config.benchmark.data_dir,
        cli.dataset.as_deref(),
        cli.seed,
    )
    .context("Failed to read benchmark parameters")?;
    let dataset = Dataset::load(&source.path, source.seed).context("Failed to load dataset")?;
    info!(train = dataset.train().len(), test = dataset.test().len(), "Dataset split");

    let controller = BenchmarkController::new(experiment, config, dataset, Arc::new(AmqpConnector::new()));
    tokio::select! {
        result = controller.run() => {
            let evaluation = result.context("Benchmark crashed")?;
            info!(errors = evaluation.error_count, runtime_avg = evaluation.runtime_avg, "Benchmark finished");
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted, exiting"),
    }

    info!("Exiting");
    Ok(())
}
