pub mod gtest;

use crate::database::MetricSet;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("Failed to deserialize report: {0}")]
    DeserializeReport(#[from] serde_yaml::Error),
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "snake_case", tag = "kind")]
pub enum IngestorConfig {
    // blocks delimited by dashes, as printed by the gtest based benchmark binaries
    #[serde(rename = "gtest", alias = "googletest")]
    GTest,
    // the binary prints a YAML list of test cases with their metrics
    Yaml,
}

#[derive(Debug, Clone, Default)]
/// container for information extracted from running a test binary
/// supposed to be interpreted by ingestors
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    // None if the process was killed by a signal
    pub status: Option<i32>,
}

impl RunOutput {
    /// stdout followed by stderr, the text every dialect is parsed from
    pub fn combined(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len());
        combined.push_str(&self.stdout);
        combined.push_str(&self.stderr);

        combined
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Metrics of one test case as found in a report
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRecord {
    pub test_case: String,
    pub metrics: MetricSet,
    // set when a metric was present but could not be converted
    pub error: Option<String>,
}

pub type IngestorMap = BTreeMap<String, Ingestors>;

#[derive(Clone, Debug)]
pub enum Ingestors {
    GTest(gtest::GTestIngestor),
    Yaml,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct YamlCase {
    name: String,
    #[serde(default)]
    throughput: Option<f64>,
    #[serde(default)]
    hit_ratio: Option<f64>,
    #[serde(default)]
    elapsed: Option<f64>,
}

impl Ingestors {
    pub fn load(config: &IngestorConfig) -> Self {
        match config {
            IngestorConfig::GTest => Self::GTest(gtest::GTestIngestor::new()),
            IngestorConfig::Yaml => Self::Yaml,
        }
    }

    /// marker that fails a run even if the binary exited successfully
    pub fn failure_marker(&self) -> Option<&'static str> {
        match self {
            Self::GTest(_) => Some(gtest::FAILURE_MARKER),
            Self::Yaml => None,
        }
    }

    /// A run failed if the binary exited unsuccessfully or reported a failure in its output
    pub fn run_failed(&self, output: &RunOutput, combined: &str) -> bool {
        !output.success()
            || self
                .failure_marker()
                .map_or(false, |marker| combined.contains(marker))
    }

    /// Extract all test cases from `output`. An empty result means nothing at all could be
    /// recognised.
    #[tracing::instrument(level = "debug", skip(output))]
    pub fn ingest(&self, output: &str) -> Vec<MetricRecord> {
        match self {
            Self::GTest(ingestor) => ingestor.parse(output),
            Self::Yaml => match Self::ingest_yaml(output) {
                Ok(records) => records,
                Err(error) => {
                    warn!(error = %error, "Failed to deserialize metrics for yaml ingestor");

                    Vec::new()
                }
            },
        }
    }

    fn ingest_yaml(output: &str) -> Result<Vec<MetricRecord>, IngestorError> {
        let cases: Vec<YamlCase> = serde_yaml::from_str(output)?;
        debug!("Deserialized {} test cases", cases.len());

        Ok(cases
            .into_iter()
            .map(|case| MetricRecord {
                test_case: case.name,
                metrics: MetricSet {
                    throughput: case.throughput,
                    hit_ratio: case.hit_ratio,
                    elapsed: case.elapsed,
                },
                error: None,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_dialect_reads_case_list() {
        let ingestor = Ingestors::load(&IngestorConfig::Yaml);
        let records = ingestor.ingest(
            "- name: Randomized Mixed Operations Test (SegLRUCache)\n  throughput: 1.5e6\n  hit_ratio: 42.0\n- name: empty\n",
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].metrics.throughput, Some(1.5e6));
        assert_eq!(records[0].metrics.elapsed, None);
        assert!(records[1].metrics.is_empty());
    }

    #[test]
    fn yaml_dialect_yields_nothing_for_other_text() {
        let ingestor = Ingestors::load(&IngestorConfig::Yaml);

        assert!(ingestor.ingest("[ RUN      ] Suite.Case\nsegfault").is_empty());
    }

    #[test]
    fn run_failure_overrides_zero_exit_code() {
        let ingestor = Ingestors::load(&IngestorConfig::GTest);
        let mut output = RunOutput::default();
        output.status = Some(0);
        output.stdout = "[  FAILED  ] Suite.Case (12 ms)\n".to_owned();

        assert!(ingestor.run_failed(&output, &output.combined()));

        output.stdout = "[       OK ] Suite.Case (12 ms)\n".to_owned();
        assert!(!ingestor.run_failed(&output, &output.combined()));

        output.status = Some(1);
        assert!(ingestor.run_failed(&output, &output.combined()));

        output.status = None;
        assert!(Ingestors::Yaml.run_failed(&output, ""));
    }

    #[test]
    fn ingestor_config_uses_kind_tag() {
        let config: IngestorConfig = serde_yaml::from_str("kind: gtest").unwrap();
        assert_eq!(config, IngestorConfig::GTest);

        let config: IngestorConfig = serde_yaml::from_str("kind: yaml").unwrap();
        assert_eq!(config, IngestorConfig::Yaml);
    }
}
