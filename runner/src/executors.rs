pub mod build;
pub mod local;
pub mod process;
pub mod run;

use crate::{
    config::SweepConfig, database::RunLog, ingest::IngestorMap, matrix::ConfigurationMatrix,
};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("Failed to start thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("Target {target} uses ingestor {ingestor}, which is not loaded")]
    MissingIngestor { target: String, ingestor: String },
}

/// Drives a whole sweep: every configuration of the matrix is built and its binaries are run
pub trait Executor: Sized {
    fn load(
        config: &SweepConfig,
        matrix: ConfigurationMatrix,
        ingestors: IngestorMap,
    ) -> Result<Self, ExecutorError>;

    /// Process every configuration, returning the log holding all produced records
    fn execute(&self) -> Result<RunLog, ExecutorError>;
}
