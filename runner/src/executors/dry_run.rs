use super::{ExecutorError, RunSummary};
use crate::{config::SchedulerSettings, deck::JobConfig};
use tracing::{info, instrument, warn};

/// Executor that renders and writes every deck but never starts a solver.
#[derive(Debug)]
pub struct DryRunExecutor {
    settings: SchedulerSettings,
}

impl DryRunExecutor {
    pub fn new(settings: SchedulerSettings) -> Self {
        Self { settings }
    }

    #[instrument(skip_all, fields(jobs = jobs.len()), level = "info")]
    pub fn execute(&mut self, jobs: Vec<JobConfig>) -> Result<RunSummary, ExecutorError> {
        let mut summary = RunSummary {
            total: jobs.len(),
            ..Default::default()
        };

        for mut job in jobs {
            let path = job.write(true)?;
            let ram = job.ram_requirement();

            if ram > self.settings.ram_budget {
                warn!(
                    deck = ?path,
                    ram,
                    budget = self.settings.ram_budget,
                    "Deck would never be started"
                );
            }

            info!(deck = ?path, ram, exec = ?job.executable(), "Wrote deck");
            summary.decks_written += 1;
        }

        info!(
            decks = summary.decks_written,
            cpus = self.settings.cpu_limit,
            ram = self.settings.ram_budget,
            "Dry run finished, no solver was started"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::FilenameFormats;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(ram_budget: f64) -> SchedulerSettings {
        SchedulerSettings {
            cpu_limit: 1,
            ram_budget,
            spawn_delay: Duration::ZERO,
            retest_delay: Duration::ZERO,
        }
    }

    fn job(dir: &TempDir, pressure: &str, ram: f64) -> JobConfig {
        let mut job = JobConfig::from_content("OUTLET-PRESS: 100 PSI\n");
        job.set_filename_formats(FilenameFormats::from([(
            "input_file".to_string(),
            dir.path()
                .join("decks/deck-{OUTLET-PRESS}.inp")
                .to_string_lossy()
                .into_owned(),
        )]));
        job.apply_parameters(&[("OUTLET-PRESS".to_string(), pressure.to_string())].into());
        job.set_ram_requirement(ram);

        job
    }

    #[test]
    fn writes_every_deck() {
        let dir = TempDir::new().unwrap();
        let jobs = vec![job(&dir, "100", 1.0), job(&dir, "200", 2.0)];

        let summary = DryRunExecutor::new(settings(4.0)).execute(jobs).unwrap();

        assert_eq!(summary.total, 2);
        assert_eq!(summary.decks_written, 2);
        assert_eq!(summary.launched, 0);
        assert_eq!(summary.peak_reserved, 0.0);
        assert_eq!(summary.peak_running, 0);

        let written = std::fs::read_to_string(dir.path().join("decks/deck-200.inp")).unwrap();
        assert!(written.starts_with("OUTLET-PRESS: 200 PSI"));
    }

    #[test]
    fn oversized_decks_are_still_written() {
        let dir = TempDir::new().unwrap();

        let summary = DryRunExecutor::new(settings(1.0))
            .execute(vec![job(&dir, "100", 8.0)])
            .unwrap();

        assert_eq!(summary.decks_written, 1);
        assert!(dir.path().join("decks/deck-100.inp").is_file());
    }
}
