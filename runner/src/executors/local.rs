use super::{Completion, ExecutorError, Launcher, ProcessHandle, RunSummary};
use crate::{
    config::{check_executable, locate_executable, ConfigErrors, SchedulerSettings},
    deck::JobConfig,
};
use std::{collections::BTreeSet, thread};
use tracing::{debug, error, info, instrument, warn};

/// a launched job together with the RAM it reserves
#[derive(Debug)]
struct RunningJob<H> {
    handle: H,
    ram: f64,
}

/// Executor that runs solvers on the local machine, bounded by a CPU count and
/// a RAM budget.
#[derive(Debug)]
pub struct LocalExecutor<L: Launcher> {
    settings: SchedulerSettings,
    launcher: L,
    running: Vec<RunningJob<L::Handle>>,
    reserved: f64,
    summary: RunSummary,
}

impl<L: Launcher> LocalExecutor<L> {
    pub fn new(settings: SchedulerSettings, launcher: L) -> Self {
        Self {
            settings,
            launcher,
            running: Vec::new(),
            reserved: 0.0,
            summary: RunSummary::default(),
        }
    }

    /// RAM currently reserved by running jobs
    pub fn reserved(&self) -> f64 {
        self.reserved
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    /// Check the solver of every job can be found before anything is launched.
    pub fn preflight_checks(&self, jobs: &[JobConfig]) -> Result<(), ExecutorError> {
        let executables = jobs.iter().map(JobConfig::executable).collect::<BTreeSet<_>>();

        for exec in executables {
            match locate_executable(&exec) {
                Some(path) => {
                    if !check_executable(&path)? {
                        warn!(
                            "Solver {} is not executable, this might cause problems",
                            path.to_string_lossy()
                        );
                    }
                }
                None => return Err(ConfigErrors::MissingExecutable(exec).into()),
            }
        }

        Ok(())
    }

    /// Run all jobs to completion. Jobs are admitted first-fit in list order
    /// whenever a CPU slot is free and their RAM fits the remaining budget.
    #[instrument(skip_all, fields(jobs = jobs.len()), level = "info")]
    pub fn execute(&mut self, jobs: Vec<JobConfig>) -> Result<RunSummary, ExecutorError> {
        for job in &jobs {
            if job.ram_requirement() > self.settings.ram_budget {
                return Err(ExecutorError::Oversized {
                    deck: job.name(),
                    required: job.ram_requirement(),
                    budget: self.settings.ram_budget,
                });
            }
        }

        self.summary = RunSummary {
            total: jobs.len(),
            ..Default::default()
        };
        let mut pending = jobs;
        let mut blocked = false;

        info!(
            cpus = self.settings.cpu_limit,
            ram = self.settings.ram_budget,
            "Starting {} jobs",
            pending.len()
        );

        while !pending.is_empty() || !self.running.is_empty() {
            // once nothing is pending or nothing fits, only a completion can make progress
            self.wait_for_slot(blocked || pending.is_empty());

            let admitted = self.admit(&mut pending);
            blocked = admitted == 0 && !pending.is_empty();

            if blocked && self.running.is_empty() {
                return Err(ExecutorError::Stalled {
                    pending: pending.len(),
                });
            }
        }

        info!(
            launched = self.summary.launched,
            failed = self.summary.failed,
            launch_failures = self.summary.launch_failures,
            "Done with processing"
        );

        Ok(self.summary.clone())
    }

    /// Completion scan. Releases the first terminated job found, sleeping
    /// between passes until a job terminated or, unless `wait_for_completion`
    /// is set, a CPU slot is already free.
    fn wait_for_slot(&mut self, wait_for_completion: bool) {
        loop {
            if self.running.is_empty() {
                return;
            }

            let finished = self
                .running
                .iter_mut()
                .enumerate()
                .find_map(|(index, job)| job.handle.poll().map(|completion| (index, completion)));

            if let Some((index, completion)) = finished {
                let job = self.running.remove(index);
                self.release(job.ram, completion);

                return;
            }

            if !wait_for_completion && self.running.len() < self.settings.cpu_limit {
                return;
            }

            thread::sleep(self.settings.retest_delay);
        }
    }

    fn release(&mut self, ram: f64, completion: Completion) {
        self.reserved = if self.running.is_empty() {
            0.0
        } else {
            (self.reserved - ram).max(0.0)
        };
        self.summary.completed += 1;

        if !completion.output.success() {
            self.summary.failed += 1;
            warn!(
                deck = %completion.deck,
                code = ?completion.output.status,
                "Solver exited unsuccessfully"
            );
        }

        debug!(
            deck = %completion.deck,
            finished_at = %completion.finished_at,
            reserved = self.reserved,
            "Released {ram:.3} GB"
        );
    }

    /// Admission scan, returns the number of jobs taken from `pending`.
    fn admit(&mut self, pending: &mut Vec<JobConfig>) -> usize {
        let mut admitted = 0;

        while self.running.len() < self.settings.cpu_limit {
            let free = self.settings.ram_budget - self.reserved;
            let Some(index) = pending
                .iter()
                .position(|job| job.ram_requirement() <= free)
            else {
                break;
            };

            let job = pending.remove(index);
            let ram = job.ram_requirement();
            let deck = job.name();
            admitted += 1;

            match self.launcher.launch(job) {
                Ok(handle) => {
                    self.reserved += ram;
                    self.running.push(RunningJob { handle, ram });
                    self.summary.launched += 1;
                    self.summary.peak_running = self.summary.peak_running.max(self.running.len());
                    self.summary.peak_reserved = self.summary.peak_reserved.max(self.reserved);

                    info!(
                        deck = %deck,
                        ram,
                        running = self.running.len(),
                        pending = pending.len(),
                        "Started solver"
                    );

                    thread::sleep(self.settings.spawn_delay);
                }
                Err(error) => {
                    self.summary.launch_failures += 1;
                    error!(deck = %deck, error = %error, "Failed to launch solver, dropping job");
                }
            }
        }

        admitted
    }
}
