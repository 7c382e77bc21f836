pub mod dry_run;
pub mod local;
pub mod process;

use crate::{
    config::{ConfigErrors, ExecutorConfig},
    deck::JobConfig,
    ram::EstimateError,
    sweep::SweepError,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    #[error("Failed to start solver for {deck}: {source}")]
    Spawn {
        deck: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Deck {deck} needs {required:.3} GB of RAM but the budget is {budget:.3} GB")]
    Oversized {
        deck: String,
        required: f64,
        budget: f64,
    },
    #[error("{pending} pending jobs can't be admitted while nothing is running")]
    Stalled { pending: usize },
}

impl From<SweepError> for ExecutorError {
    fn from(error: SweepError) -> Self {
        match error {
            SweepError::Config(error) => Self::Config(error),
            SweepError::Estimate(error) => Self::Estimate(error),
        }
    }
}

#[derive(Debug, Clone)]
/// container for information extracted from running a solver
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    /// exit code, `None` if the solver was killed by a signal
    pub status: Option<i32>,
}

impl RunOutput {
    pub fn new() -> Self {
        Self {
            runtime: Duration::ZERO,
            stdout: String::new(),
            stderr: String::new(),
            status: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

impl Default for RunOutput {
    fn default() -> Self {
        Self::new()
    }
}

/// Final state of a launched solver, as reported by its handle.
#[derive(Debug, Clone)]
pub struct Completion {
    pub deck: String,
    pub output: RunOutput,
    pub finished_at: chrono::DateTime<chrono::Local>,
}

/// A running solver that can be polled without blocking.
pub trait ProcessHandle: std::fmt::Debug {
    fn deck(&self) -> &str;

    /// `Some` once the process has terminated, `None` while it is running
    fn poll(&mut self) -> Option<Completion>;
}

/// Starts jobs, the seam between the scheduler and real processes.
pub trait Launcher: std::fmt::Debug {
    type Handle: ProcessHandle;

    fn launch(&mut self, job: JobConfig) -> Result<Self::Handle, ExecutorError>;
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub total: usize,
    pub launched: usize,
    pub launch_failures: usize,
    pub completed: usize,
    /// completed with a non-zero or missing exit code
    pub failed: usize,
    pub decks_written: usize,
    pub peak_running: usize,
    pub peak_reserved: f64,
}

#[derive(Debug)]
pub enum Executors {
    Local(local::LocalExecutor<process::ProcessLauncher>),
    DryRun(dry_run::DryRunExecutor),
}

impl Executors {
    pub fn load(config: &ExecutorConfig) -> Result<Self, ConfigErrors> {
        let settings = config.settings()?;

        match config.name.as_str() {
            "local" => Ok(Self::Local(local::LocalExecutor::new(
                settings,
                process::ProcessLauncher::new(config.show_output),
            ))),
            "dry-run" | "dry_run" => Ok(Self::DryRun(dry_run::DryRunExecutor::new(settings))),
            _ => Err(ConfigErrors::InvalidSetting(format!(
                "executor '{}' is not supported, use 'local' or 'dry-run'",
                config.name
            ))),
        }
    }

    pub fn execute(&mut self, jobs: Vec<JobConfig>) -> Result<RunSummary, ExecutorError> {
        match self {
            Self::Local(executor) => {
                executor.preflight_checks(&jobs)?;
                executor.execute(jobs)
            }
            Self::DryRun(executor) => executor.execute(jobs),
        }
    }
}

