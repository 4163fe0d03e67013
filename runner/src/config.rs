use crate::{
    database::Metric,
    ingest::{IngestorConfig, IngestorMap, Ingestors},
    matrix::BinaryRole,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    env, fs,
    io::Error,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound(path.to_path_buf()))
    } else {
        match fs::metadata(path) {
            Ok(metadata) => Ok((metadata.mode() & 0o111) != 0),
            Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

/// Resolve a program the way a shell would: paths containing a separator are taken as is,
/// bare names are looked up in `PATH`
pub fn resolve_program(program: &Path) -> Option<PathBuf> {
    if program.components().count() > 1 {
        return program.is_file().then(|| program.to_path_buf());
    }

    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    })
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read configuration {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: Error,
    },
    #[error("Configuration is not valid YAML for a sweep: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("File not found: {0:?}")]
    FileNotFound(PathBuf),
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // project root handed to the build system as its source directory
    pub source: PathBuf,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub runs: RunConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    // structural parameter, every variant is built once per value
    #[serde(default = "default_segment_bits")]
    pub segment_bits: Vec<u32>,
    pub targets: Vec<TargetBinary>,
    #[serde(default = "default_ingestors")]
    pub ingest: BTreeMap<String, IngestorConfig>,
    pub variants: Vec<VariantConfig>,
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(alias = "db")]
    pub database: Option<DatabaseConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    pub prefix: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            prefix: "build_scenario".to_owned(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct BuildConfig {
    pub program: PathBuf,
    pub build_type: String,
    // build system variable receiving the segment bit-width
    pub parameter_variable: String,
    // entries that must exist below `source` before anything is built
    pub required: Vec<PathBuf>,
    // timeouts in seconds
    pub configure_timeout: u64,
    pub compile_timeout: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("cmake"),
            build_type: "Release".to_owned(),
            parameter_variable: "K_NUM_SEG_BITS_FROM_CMAKE".to_owned(),
            required: vec![PathBuf::from("CMakeLists.txt")],
            configure_timeout: 300,
            compile_timeout: 1800,
        }
    }
}

impl BuildConfig {
    pub fn configure_timeout(&self) -> Duration {
        Duration::from_secs(self.configure_timeout)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct RunConfig {
    // repetitions per (configuration, binary)
    pub count: u32,
    // per invocation, in seconds
    pub timeout: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            count: 10,
            timeout: 600,
        }
    }
}

impl RunConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct ExecutorConfig {
    // number of configurations processed at once, 0 selects the number of CPUs
    pub workers: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

impl ExecutorConfig {
    pub fn threads(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TargetBinary {
    pub name: String,
    pub role: BinaryRole,
    #[serde(default = "default_ingestor_name")]
    pub ingest: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct VariantConfig {
    pub name: String,
    // binary name -> feature toggles, joined with `;` for the build system
    #[serde(default)]
    pub toggles: BTreeMap<String, Vec<String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub csv: PathBuf,
    pub table: PathBuf,
    pub chart: Option<ChartConfig>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("results"),
            csv: PathBuf::from("benchmark_results.csv"),
            table: PathBuf::from("performance_results.txt"),
            chart: None,
        }
    }
}

impl OutputConfig {
    pub fn csv_path(&self) -> PathBuf {
        self.directory.join(&self.csv)
    }

    pub fn table_path(&self) -> PathBuf {
        self.directory.join(&self.table)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct ChartConfig {
    #[serde(default = "default_chart_file")]
    pub file: PathBuf,
    #[serde(default)]
    pub metric: Metric,
    // variant plotted over the segment counts, defaults to the first one
    pub variant: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_str(&raw)?)
    }

    /// every configured ingestor by name
    pub fn load_ingestors(&self) -> IngestorMap {
        self.ingest
            .iter()
            .map(|(name, config)| (name.clone(), Ingestors::load(config)))
            .collect()
    }

    pub fn role_of(&self, binary: &str) -> Option<BinaryRole> {
        self.targets
            .iter()
            .find(|target| target.name == binary)
            .map(|target| target.role)
    }

    /// Validate everything that can be checked before the first build. Returns true if any
    /// error was found; every problem is logged instead of stopping at the first one.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.targets.is_empty() {
            error!("No target binary was defined, nothing would be executed");
            contains_error = true;
        }

        if self.variants.is_empty() {
            error!("No variant was defined, unable to build a configuration matrix");
            contains_error = true;
        }

        if !self.source.is_dir() {
            error!(
                "source ({}) is not a directory",
                self.source.to_string_lossy()
            );
            contains_error = true;
        } else {
            for entry in self.build.required.iter() {
                if !self.source.join(entry).exists() {
                    error!(
                        "build.required entry {} is missing from {}, this does not look like the project root",
                        entry.to_string_lossy(),
                        self.source.to_string_lossy()
                    );
                    contains_error = true;
                }
            }
        }

        match resolve_program(&self.build.program) {
            Some(program) => match check_executable(&program) {
                Ok(true) => {}
                Ok(false) => {
                    error!(
                        "build.program {} is not executable",
                        program.to_string_lossy()
                    );
                    contains_error = true;
                }
                Err(e) => {
                    error!(
                        "Failed to determine if build.program ({}) is an executable: {e}",
                        program.to_string_lossy()
                    );
                    contains_error = true;
                }
            },
            None => {
                error!(
                    "build.program {} was not found",
                    self.build.program.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if !self.workspace.root.is_dir() {
            warn!(
                "workspace.root {} does not exist and will be created",
                self.workspace.root.to_string_lossy()
            );
        }

        if self.build.configure_timeout == 0 || self.build.compile_timeout == 0 {
            error!("build timeouts cannot be 0, every build step would time out immediately");
            contains_error = true;
        }

        if self.runs.timeout == 0 {
            error!("runs.timeout cannot be 0, every run would time out immediately");
            contains_error = true;
        }

        if self.runs.count == 0 {
            error!("runs.count cannot be 0, binaries would be built but never executed");
            contains_error = true;
        }

        let known_ingestors = self.ingest.keys().sorted().cloned().collect_vec();

        for target in self.targets.iter() {
            if known_ingestors.binary_search(&target.ingest).is_err() {
                error!(
                    "targets.{}.ingest '{}' is not defined in ingest",
                    target.name, target.ingest
                );
                contains_error = true;
            }
        }

        for (name, count) in self.targets.iter().map(|target| &target.name).counts() {
            if count > 1 {
                error!("Target {name} is defined {count} times");
                contains_error = true;
            }
        }

        if let Some(variant) = self
            .output
            .chart
            .as_ref()
            .and_then(|chart| chart.variant.as_ref())
        {
            if !self.variants.iter().any(|config| &config.name == variant) {
                error!("output.chart.variant references {variant} but {variant} is not defined");
                contains_error = true;
            }
        }

        contains_error
    }
}

fn default_segment_bits() -> Vec<u32> {
    vec![4]
}

fn default_ingestor_name() -> String {
    "gtest".to_owned()
}

fn default_ingestors() -> BTreeMap<String, IngestorConfig> {
    BTreeMap::from([(default_ingestor_name(), IngestorConfig::GTest)])
}

fn default_chart_file() -> PathBuf {
    PathBuf::from("throughput_chart.json")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("cachesweep.db")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub const MINIMAL: &str = r#"
source: /nonexistent/project
targets:
  - name: mylru_tests_mt
    role: baseline
  - name: mylru_tests_mt_ht
    role: table_variant
variants:
  - name: NoResizer_MyHashTable
    toggles:
      mylru_tests_mt: [PRE_ALLOCATE, USE_MY_HASH_TABLE]
      mylru_tests_mt_ht: [PRE_ALLOCATE, USE_MY_HASH_TABLE, USE_HHVM]
"#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: SweepConfig = serde_yaml::from_str(MINIMAL).unwrap();

        assert_eq!(config.segment_bits, vec![4]);
        assert_eq!(config.runs.count, 10);
        assert_eq!(config.runs.timeout(), Duration::from_secs(600));
        assert_eq!(config.build.program, PathBuf::from("cmake"));
        assert_eq!(config.executor.threads(), 1);
        assert!(matches!(
            config.ingest.get("gtest"),
            Some(IngestorConfig::GTest)
        ));
        assert_eq!(config.role_of("mylru_tests_mt_ht"), Some(BinaryRole::TableVariant));
        assert_eq!(config.role_of("unknown"), None);
        assert!(config.database.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = format!("{MINIMAL}\nnum_runs: 3\n");

        assert!(serde_yaml::from_str::<SweepConfig>(&raw).is_err());
    }

    #[test]
    fn every_configured_ingestor_is_loaded() {
        let raw = format!("{MINIMAL}ingest:\n  gtest:\n    kind: gtest\n  reports:\n    kind: yaml\n");
        let config: SweepConfig = serde_yaml::from_str(&raw).unwrap();

        let ingestors = config.load_ingestors();

        assert_eq!(ingestors.len(), 2);
        assert!(matches!(ingestors["gtest"], Ingestors::GTest(_)));
        assert!(matches!(ingestors["reports"], Ingestors::Yaml));
    }

    #[test]
    fn preflight_reports_missing_source() {
        let config: SweepConfig = serde_yaml::from_str(MINIMAL).unwrap();

        assert!(config.preflight_checks());
    }

    #[test]
    fn preflight_accepts_valid_project() {
        let project = tempfile::tempdir().unwrap();
        fs::File::create(project.path().join("CMakeLists.txt"))
            .unwrap()
            .write_all(b"project(x)")
            .unwrap();

        let mut config: SweepConfig = serde_yaml::from_str(MINIMAL).unwrap();
        config.source = project.path().to_path_buf();
        config.build.program = PathBuf::from("sh");

        assert!(!config.preflight_checks());

        config.targets[0].ingest = "junit".to_owned();
        assert!(config.preflight_checks());
    }

    #[test]
    fn resolve_program_searches_path() {
        assert!(resolve_program(Path::new("sh")).is_some());
        assert!(resolve_program(Path::new("definitely-not-a-real-build-tool")).is_none());
        assert!(resolve_program(Path::new("/definitely/not/here")).is_none());
    }
}
