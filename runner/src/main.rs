mod aggregate;
mod config;
mod database;
mod executors;
mod ingest;
mod matrix;
mod report;

use crate::{
    aggregate::aggregate,
    config::SweepConfig,
    database::{OutcomeStatus, RunRecord},
    executors::{local::LocalExecutor, Executor},
    matrix::ConfigurationMatrix,
};
use clap::Parser;
use itertools::Itertools;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Build every variant of a configuration matrix, run its benchmark binaries repeatedly and
/// summarise the reported metrics
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// sweep configuration
    #[arg(short, long, default_value = "sweep.yaml")]
    config: PathBuf,
    /// override runs.count
    #[arg(long)]
    runs: Option<u32>,
    /// override executor.workers, 0 uses every CPU
    #[arg(long)]
    workers: Option<usize>,
    /// override output.directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// stored with the sweep in the database
    #[arg(long)]
    comment: Option<String>,
    /// print the configuration matrix and exit
    #[arg(long)]
    list: bool,
    /// log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn apply(&self, config: &mut SweepConfig) {
        if let Some(runs) = self.runs {
            config.runs.count = runs;
        }

        if let Some(workers) = self.workers {
            config.executor.workers = workers;
        }

        if let Some(output) = self.output.as_ref() {
            config.output.directory = output.clone();
        }
    }
}

#[cfg(feature = "sqlite")]
fn store(
    config: &SweepConfig,
    matrix: &ConfigurationMatrix,
    records: &[RunRecord],
    comment: Option<String>,
) -> Result<(), database::ConnectionError> {
    let Some(database) = config.database.as_ref() else {
        return Ok(());
    };

    let connection = database::sqlite::SharedConnection::load(database)?;
    connection.init(matrix, comment)?;
    connection.store_iter(records.iter())?;

    connection.close()
}

#[cfg(not(feature = "sqlite"))]
fn store(
    config: &SweepConfig,
    _matrix: &ConfigurationMatrix,
    _records: &[RunRecord],
    _comment: Option<String>,
) -> Result<(), database::ConnectionError> {
    if config.database.is_some() {
        warn!("A database is configured, but SQLite support was not compiled in");
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match SweepConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");

            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    let matrix = match ConfigurationMatrix::from_config(&config) {
        Ok(matrix) => matrix,
        Err(e) => {
            error!("Invalid configuration matrix: {e}");

            return ExitCode::FAILURE;
        }
    };

    if cli.list {
        for configuration in matrix.iter() {
            println!("{configuration}: {}", configuration.describe_toggles());
        }

        return ExitCode::SUCCESS;
    }

    if config.preflight_checks() {
        error!("Configuration failed preflight checks, nothing was built");

        return ExitCode::FAILURE;
    }

    let ingestors = config.load_ingestors();
    let executor = match LocalExecutor::load(&config, matrix.clone(), ingestors) {
        Ok(executor) => executor,
        Err(e) => {
            error!("Failed to set up the sweep: {e}");

            return ExitCode::FAILURE;
        }
    };

    info!(
        "Sweeping {} configurations with {} runs per binary",
        matrix.len(),
        config.runs.count
    );

    let records = match executor.execute() {
        Ok(log) => log.close(&matrix.names()),
        Err(e) => {
            error!("Sweep failed: {e}");

            return ExitCode::FAILURE;
        }
    };

    let aggregates = aggregate(&records, |binary| config.role_of(binary));

    let failed = report::emit_all(&config, &matrix, &records, &aggregates);
    if failed > 0 {
        warn!("{failed} report artifacts could not be written");
    }

    if let Err(e) = store(&config, &matrix, &records, cli.comment.clone()) {
        error!("Failed to store run records: {e}");
    }

    let counts = records.iter().counts_by(|record| record.status);
    for status in OutcomeStatus::ALL {
        if let Some(count) = counts.get(&status) {
            info!("{status}: {count}");
        }
    }

    ExitCode::SUCCESS
}
