use super::process::{run_with_timeout, ProcessError};
use crate::{
    config::{BuildConfig, SweepConfig, WorkspaceConfig},
    database::{OutcomeStatus, RunRecord},
    matrix::BuildConfiguration,
};
use std::{
    ffi::OsString,
    fs, io,
    path::{self, PathBuf},
    process::Command,
    time::Duration,
};
use tracing::{debug, info, instrument, warn};

/// Directory owned by exactly one configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
}

impl Workspace {
    /// The path is made absolute, binaries are started with the workspace as working directory
    pub fn for_configuration(config: &WorkspaceConfig, configuration: &str) -> io::Result<Self> {
        let root = path::absolute(&config.root)?;

        Ok(Self {
            path: root.join(format!("{}_{configuration}", config.prefix)),
        })
    }

    /// remove whatever a previous sweep left behind and start from an empty directory
    pub fn recreate(&self) -> io::Result<()> {
        if self.path.exists() {
            fs::remove_dir_all(&self.path)?;
        }

        fs::create_dir_all(&self.path)
    }

    pub fn binary(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    // CONFIG_ERROR or BUILD_ERROR
    pub status: OutcomeStatus,
    pub detail: String,
}

impl BuildFailure {
    pub fn into_record(self, configuration: &BuildConfiguration) -> RunRecord {
        RunRecord::build_failure(
            &configuration.name,
            configuration.segment_bits,
            self.status,
            &self.detail,
        )
    }
}

#[derive(Debug, Clone)]
pub struct BuildDriver {
    source: PathBuf,
    workspace: WorkspaceConfig,
    build: BuildConfig,
}

impl BuildDriver {
    pub fn new(source: PathBuf, workspace: WorkspaceConfig, build: BuildConfig) -> Self {
        Self {
            source,
            workspace,
            build,
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        Self::new(
            config.source.clone(),
            config.workspace.clone(),
            config.build.clone(),
        )
    }

    pub fn workspace(&self, configuration: &BuildConfiguration) -> io::Result<Workspace> {
        Workspace::for_configuration(&self.workspace, &configuration.name)
    }

    /// arguments of the configure step, one `<BINARY>_FEATURES` definition per target
    pub fn configure_args(
        &self,
        configuration: &BuildConfiguration,
        workspace: &Workspace,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            format!("-DCMAKE_BUILD_TYPE={}", self.build.build_type).into(),
            format!(
                "-D{}={}",
                self.build.parameter_variable, configuration.segment_bits
            )
            .into(),
        ];

        args.extend(configuration.toggles.iter().map(|(binary, toggles)| {
            OsString::from(format!(
                "-D{}_FEATURES={}",
                binary.to_uppercase(),
                toggles.join(";")
            ))
        }));

        args.extend([
            "-S".into(),
            self.source.clone().into_os_string(),
            "-B".into(),
            workspace.path.clone().into_os_string(),
        ]);

        args
    }

    pub fn compile_args(&self, workspace: &Workspace) -> Vec<OsString> {
        vec![
            "--build".into(),
            workspace.path.clone().into_os_string(),
            "--parallel".into(),
        ]
    }

    /// Configure and compile `configuration` into its freshly recreated workspace
    #[instrument(skip_all, fields(configuration = %configuration.name))]
    pub fn build(&self, configuration: &BuildConfiguration) -> Result<Workspace, BuildFailure> {
        let workspace = self.workspace(configuration).map_err(|e| {
            warn!("Failed to resolve workspace root: {e}");

            BuildFailure {
                status: OutcomeStatus::ConfigError,
                detail: format!(
                    "Failed to resolve workspace root {}: {e}",
                    self.workspace.root.to_string_lossy()
                ),
            }
        })?;
        info!("Building {configuration} in {}", workspace.path.to_string_lossy());

        workspace.recreate().map_err(|e| {
            warn!("Failed to recreate workspace: {e}");

            BuildFailure {
                status: OutcomeStatus::ConfigError,
                detail: format!(
                    "Failed to recreate workspace {}: {e}",
                    workspace.path.to_string_lossy()
                ),
            }
        })?;

        debug!(toggles = %configuration.describe_toggles(), "Configuring");
        self.step(
            "configure",
            self.configure_args(configuration, &workspace),
            self.build.configure_timeout(),
            OutcomeStatus::ConfigError,
        )?;

        self.step(
            "compile",
            self.compile_args(&workspace),
            self.build.compile_timeout(),
            OutcomeStatus::BuildError,
        )?;

        info!("Built {}", configuration.name);

        Ok(workspace)
    }

    fn step(
        &self,
        name: &str,
        args: Vec<OsString>,
        timeout: Duration,
        status: OutcomeStatus,
    ) -> Result<(), BuildFailure> {
        let mut command = Command::new(&self.build.program);
        command.args(args);

        let failure = |detail: String| {
            warn!("{name} step failed with {status}");

            Err(BuildFailure { status, detail })
        };

        match run_with_timeout(&mut command, timeout) {
            Ok(output) if output.success() => {
                debug!("{name} step finished in {} ms", output.runtime.as_millis());

                Ok(())
            }
            Ok(output) => failure(output.combined()),
            Err(ProcessError::Timeout { after, output, .. }) => failure(format!(
                "{name} step timed out after {}s\n{}",
                after.as_secs(),
                output.combined()
            )),
            Err(e) => failure(e.to_string()),
        }
    }
}
