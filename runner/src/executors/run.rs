use super::{
    build::Workspace,
    process::{run_with_timeout, ProcessError},
};
use crate::{
    config::RunConfig,
    database::{excerpt, OutcomeStatus, RunRecord, NOT_APPLICABLE},
    ingest::{Ingestors, RunOutput},
    matrix::BuildConfiguration,
};
use std::{process::Command, time::Duration};
use tracing::{debug, info, instrument, warn};

/// test case recorded when nothing could be extracted from a run
pub const PARSE_FAILED_CASE: &str = "Unknown (Parse Failed)";

/// Executes built test binaries and turns every run into `RunRecord`s
#[derive(Debug, Clone)]
pub struct ExecutionDriver {
    count: u32,
    timeout: Duration,
}

impl ExecutionDriver {
    pub fn new(config: &RunConfig) -> Self {
        Self {
            count: config.count,
            timeout: config.timeout(),
        }
    }

    /// single invocation of `binary` inside `workspace`, without arguments
    pub fn run_once(&self, workspace: &Workspace, binary: &str) -> Result<RunOutput, ProcessError> {
        let mut command = Command::new(workspace.binary(binary));
        command.current_dir(&workspace.path);

        run_with_timeout(&mut command, self.timeout)
    }

    /// Run `binary` the configured number of times, sequentially
    #[instrument(skip_all, fields(configuration = %configuration.name, binary = binary))]
    pub fn run_binary(
        &self,
        configuration: &BuildConfiguration,
        workspace: &Workspace,
        binary: &str,
        ingestor: &Ingestors,
    ) -> Vec<RunRecord> {
        if !workspace.binary(binary).is_file() {
            warn!(
                "Test binary not found: {}",
                workspace.binary(binary).to_string_lossy()
            );

            return vec![RunRecord::binary_not_found(
                &configuration.name,
                configuration.segment_bits,
                binary,
            )];
        }

        let mut records = Vec::new();

        for run in 1..=self.count {
            debug!("Run #{run}/{}", self.count);

            match self.run_once(workspace, binary) {
                Ok(output) => records.extend(classify(configuration, binary, run, &output, ingestor)),
                Err(error) => records.push(aborted(configuration, binary, run, &error)),
            }
        }

        info!(
            "Finished {} runs, {} passed records",
            self.count,
            records.iter().filter(|record| record.is_passed()).count()
        );

        records
    }
}

fn base_record(configuration: &BuildConfiguration, binary: &str, run: u32) -> RunRecord {
    RunRecord {
        configuration: configuration.name.clone(),
        segment_bits: configuration.segment_bits,
        binary: binary.to_owned(),
        test_case: NOT_APPLICABLE.to_owned(),
        run,
        status: OutcomeStatus::TestFailed,
        metrics: None,
        failure: None,
    }
}

/// A run that never produced a complete output, because it timed out or could not be started
pub fn aborted(
    configuration: &BuildConfiguration,
    binary: &str,
    run: u32,
    error: &ProcessError,
) -> RunRecord {
    warn!("Run #{run} of {binary} aborted: {error}");

    let failure = match error {
        ProcessError::Timeout { output, .. } => format!("{error}\n{}", output.combined()),
        _ => error.to_string(),
    };

    RunRecord {
        failure: Some(excerpt(&failure)),
        ..base_record(configuration, binary, run)
    }
}

/// Turn the output of one completed run into records: a single PARSE_ERROR if nothing could be
/// extracted, otherwise one record per test case. A failed run marks all of its test cases as
/// failed, regardless of what could be parsed.
pub fn classify(
    configuration: &BuildConfiguration,
    binary: &str,
    run: u32,
    output: &RunOutput,
    ingestor: &Ingestors,
) -> Vec<RunRecord> {
    let combined = output.combined();
    let failed = ingestor.run_failed(output, &combined);
    let parsed = ingestor.ingest(&combined);

    if parsed.is_empty() {
        warn!("Run #{run} of {binary} produced no recognisable test case");

        return vec![RunRecord {
            test_case: PARSE_FAILED_CASE.to_owned(),
            status: OutcomeStatus::ParseError,
            failure: Some(excerpt(&combined)),
            ..base_record(configuration, binary, run)
        }];
    }

    parsed
        .into_iter()
        .map(|record| {
            let (status, failure) = if failed {
                (OutcomeStatus::TestFailed, Some(excerpt(&combined)))
            } else if let Some(error) = record.error {
                (OutcomeStatus::ParseError, Some(excerpt(&error)))
            } else {
                (OutcomeStatus::Passed, None)
            };

            debug!(test_case = %record.test_case, status = %status, "Classified test case");

            RunRecord {
                test_case: record.test_case,
                status,
                metrics: Some(record.metrics),
                failure,
                ..base_record(configuration, binary, run)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::WorkspaceConfig,
        ingest::{gtest::BLOCK_DELIMITER, IngestorConfig},
    };
    use std::{env, fs, os::unix::fs::PermissionsExt, path::Path};

    fn configuration() -> BuildConfiguration {
        BuildConfiguration {
            name: "NoResizer_SegHashTable".to_owned(),
            variant: "NoResizer_SegHashTable".to_owned(),
            toggles: Vec::new(),
            segment_bits: 3,
        }
    }

    fn gtest() -> Ingestors {
        Ingestors::load(&IngestorConfig::GTest)
    }

    fn output(stdout: &str, status: i32) -> RunOutput {
        RunOutput {
            stdout: stdout.to_owned(),
            status: Some(status),
            ..RunOutput::default()
        }
    }

    fn report(name: &str, throughput: &str) -> String {
        format!("{BLOCK_DELIMITER}\nTest: {name}\nThroughput: {throughput} ops/sec\n{BLOCK_DELIMITER}\n")
    }

    #[test]
    fn passing_run_yields_one_record_per_case() {
        let stdout = format!("{}{}", report("first", "100"), report("second", "200"));
        let records = classify(&configuration(), "bin", 2, &output(&stdout, 0), &gtest());

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(RunRecord::is_passed));
        assert_eq!(records[1].test_case, "second");
        assert_eq!(records[1].run, 2);
        assert_eq!(records[1].segments(), 8);
        assert_eq!(records[1].metrics.unwrap().throughput, Some(200.0));
        assert_eq!(records[1].failure, None);
    }

    #[test]
    fn failure_marker_fails_every_case() {
        let stdout = format!("{}[  FAILED  ] Suite.Case (3 ms)\n", report("first", "100"));
        let records = classify(&configuration(), "bin", 1, &output(&stdout, 0), &gtest());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::TestFailed);
        assert!(records[0].failure.as_ref().unwrap().contains("FAILED"));
    }

    #[test]
    fn failed_run_takes_precedence_over_parse_error() {
        let stdout = report("first", "1.2.3");

        let records = classify(&configuration(), "bin", 1, &output(&stdout, 0), &gtest());
        assert_eq!(records[0].status, OutcomeStatus::ParseError);

        let records = classify(&configuration(), "bin", 1, &output(&stdout, 1), &gtest());
        assert_eq!(records[0].status, OutcomeStatus::TestFailed);
    }

    #[test]
    fn unrecognisable_output_is_single_parse_error() {
        let records = classify(
            &configuration(),
            "bin",
            4,
            &output("Segmentation fault\n", 139),
            &gtest(),
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::ParseError);
        assert_eq!(records[0].test_case, PARSE_FAILED_CASE);
        assert_eq!(records[0].run, 4);
        assert_eq!(records[0].failure.as_deref(), Some("Segmentation fault\n"));
    }

    fn executable(path: &Path, body: &str) {
        fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn missing_binary_is_recorded_once() {
        let scratch = tempfile::tempdir().unwrap();
        let workspace = Workspace {
            path: scratch.path().to_path_buf(),
        };
        let driver = ExecutionDriver::new(&RunConfig {
            count: 3,
            timeout: 5,
        });

        let records = driver.run_binary(&configuration(), &workspace, "absent", &gtest());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::BinaryNotFound);
        assert_eq!(records[0].run, 0);
    }

    #[test]
    fn runs_binary_repeatedly_in_its_workspace() {
        let scratch = tempfile::tempdir().unwrap();
        let workspace = Workspace {
            path: scratch.path().to_path_buf(),
        };
        fs::write(scratch.path().join("marker"), "42").unwrap();
        executable(
            &workspace.binary("bench"),
            &format!(
                "printf '%s\\nTest: cwd\\nThroughput: %s ops/sec\\n%s\\n' '{BLOCK_DELIMITER}' \"$(cat marker)\" '{BLOCK_DELIMITER}'"
            ),
        );

        let driver = ExecutionDriver::new(&RunConfig {
            count: 3,
            timeout: 5,
        });
        let records = driver.run_binary(&configuration(), &workspace, "bench", &gtest());

        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().map(|record| record.run).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(records
            .iter()
            .all(|record| record.is_passed() && record.metrics.unwrap().throughput == Some(42.0)));
    }

    #[test]
    fn timed_out_run_is_test_failure() {
        let scratch = tempfile::tempdir().unwrap();
        let workspace = Workspace {
            path: scratch.path().to_path_buf(),
        };
        executable(&workspace.binary("hang"), "echo warming up; exec sleep 30");

        let driver = ExecutionDriver::new(&RunConfig {
            count: 1,
            timeout: 1,
        });
        let records = driver.run_binary(&configuration(), &workspace, "hang", &gtest());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::TestFailed);
        assert_eq!(records[0].test_case, NOT_APPLICABLE);
        let failure = records[0].failure.as_ref().unwrap();
        assert!(failure.contains("timed out after 1s"));
        assert!(failure.contains("warming up"));
    }

    #[test]
    fn binary_in_workspace_under_relative_root_is_started() {
        let scratch = tempfile::tempdir_in(".").unwrap();
        let relative = scratch
            .path()
            .strip_prefix(env::current_dir().unwrap())
            .unwrap()
            .to_path_buf();
        assert!(relative.is_relative());

        let config = WorkspaceConfig {
            root: relative,
            prefix: "build_scenario".to_owned(),
        };
        let workspace = Workspace::for_configuration(&config, "Seg").unwrap();
        workspace.recreate().unwrap();
        executable(
            &workspace.binary("bench"),
            &format!("printf '%s\\nTest: relative\\nThroughput: 7 ops/sec\\n%s\\n' '{BLOCK_DELIMITER}' '{BLOCK_DELIMITER}'"),
        );

        let driver = ExecutionDriver::new(&RunConfig {
            count: 1,
            timeout: 5,
        });
        let records = driver.run_binary(&configuration(), &workspace, "bench", &gtest());

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::Passed, "{:?}", records[0].failure);
        assert_eq!(records[0].metrics.unwrap().throughput, Some(7.0));
    }
}
