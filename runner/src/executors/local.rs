use super::{build::BuildDriver, run::ExecutionDriver, Executor, ExecutorError};
use crate::{
    config::SweepConfig,
    database::RunLog,
    ingest::{IngestorMap, Ingestors},
    matrix::{BuildConfiguration, ConfigurationMatrix},
};
use itertools::Itertools;
use rayon::{prelude::*, ThreadPoolBuilder};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, instrument};

/// Executor that works on a local thread pool, one task per configuration
#[derive(Debug)]
pub struct LocalExecutor {
    matrix: ConfigurationMatrix,
    // (binary, ingestor) in target order
    targets: Vec<(String, Ingestors)>,
    build: BuildDriver,
    execution: ExecutionDriver,
    threads: usize,
}

impl LocalExecutor {
    /// Build one configuration and run all of its binaries, appending every record to `log`
    #[instrument(skip_all, fields(configuration = %configuration.name))]
    fn process(&self, configuration: &BuildConfiguration, log: &RunLog) {
        let workspace = match self.build.build(configuration) {
            Ok(workspace) => workspace,
            Err(failure) => {
                log.append(failure.into_record(configuration));

                return;
            }
        };

        for (binary, ingestor) in self.targets.iter() {
            log.extend(
                self.execution
                    .run_binary(configuration, &workspace, binary, ingestor),
            );
        }
    }
}

impl Executor for LocalExecutor {
    fn load(
        config: &SweepConfig,
        matrix: ConfigurationMatrix,
        ingestors: IngestorMap,
    ) -> Result<Self, ExecutorError> {
        let targets = config
            .targets
            .iter()
            .map(|target| match ingestors.get(&target.ingest) {
                Some(ingestor) => Ok((target.name.clone(), ingestor.clone())),
                None => Err(ExecutorError::MissingIngestor {
                    target: target.name.clone(),
                    ingestor: target.ingest.clone(),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            matrix,
            targets,
            build: BuildDriver::from_config(config),
            execution: ExecutionDriver::new(&config.runs),
            threads: config.executor.threads(),
        })
    }

    /// execute configurations concurrently with a thread pool
    #[instrument(skip(self), level = "info")]
    fn execute(&self) -> Result<RunLog, ExecutorError> {
        debug!("Starting thread pool with {} threads", self.threads);

        // a local pool keeps the worker bound independent of anything else using rayon
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("sweep-{index}"))
            .build()?;

        // general counters to provide progress
        let total = self.matrix.len() as u64;
        let processed = AtomicU64::new(0);
        let log = RunLog::new();
        let configurations = self.matrix.iter().collect_vec();

        pool.install(|| {
            configurations.par_iter().for_each(|configuration| {
                self.process(configuration, &log);

                info!(
                    "Done with {}/{total} configurations",
                    processed.fetch_add(1, Ordering::SeqCst) + 1
                );
            })
        });

        info!("Done with processing, {} records collected", log.len());

        Ok(log)
    }
}
