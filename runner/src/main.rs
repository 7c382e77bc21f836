use clap::Parser;
use fracflow_runner::{
    config::SweepConfig,
    deck::JobConfig,
    executors::{ExecutorError, Executors, RunSummary},
    sweep::plan_jobs,
};
use std::{path::PathBuf, process};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Run a parameter sweep of the fracture flow solver.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// sweep file describing the template, maps and parameters
    sweep: PathBuf,
    /// write every deck but start no solver
    #[arg(long)]
    dry_run: bool,
    /// maximum number of concurrently running solvers
    #[arg(long)]
    cpus: Option<usize>,
    /// RAM budget in GB
    #[arg(long)]
    ram: Option<f64>,
    /// seconds to wait after each launch
    #[arg(long)]
    spawn_delay: Option<f64>,
    /// seconds between two completion scans
    #[arg(long)]
    retest_delay: Option<f64>,
    /// pass solver output through to the terminal
    #[arg(long)]
    show_output: bool,
    /// keep jobs whose RAM estimate exceeds the budget
    #[arg(long)]
    suppress_ram_errors: bool,
    /// more log output, repeat for more detail
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn apply(&self, config: &mut SweepConfig) {
        let executor = &mut config.executor;

        if self.dry_run {
            executor.name = "dry-run".to_string();
        }
        if let Some(cpus) = self.cpus {
            executor.cpus = Some(cpus);
        }
        if let Some(ram) = self.ram {
            executor.ram = Some(ram);
        }
        if let Some(delay) = self.spawn_delay {
            executor.spawn_delay = delay;
        }
        if let Some(delay) = self.retest_delay {
            executor.retest_delay = delay;
        }
        executor.show_output |= self.show_output;
        executor.suppress_ram_errors |= self.suppress_ram_errors;
    }

    fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

fn run(cli: &Cli) -> Result<RunSummary, ExecutorError> {
    let mut config = SweepConfig::load(&cli.sweep)?;
    cli.apply(&mut config);

    if config.preflight_checks() {
        return Err(fracflow_runner::config::ConfigErrors::InvalidSetting(format!(
            "sweep file {} failed the preflight checks",
            cli.sweep.to_string_lossy()
        ))
        .into());
    }

    let settings = config.executor.settings()?;
    let template = JobConfig::parse(&config.template_path())?;
    let jobs = plan_jobs(&config, &template, settings.ram_budget)?;

    if jobs.is_empty() {
        warn!("The sweep produced no jobs");
    }

    Executors::load(&config.executor)?.execute(jobs)
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level())),
        )
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(summary) => {
            info!(
                total = summary.total,
                launched = summary.launched,
                failed = summary.failed,
                decks_written = summary.decks_written,
                peak_running = summary.peak_running,
                peak_ram = summary.peak_reserved,
                "Sweep finished"
            );

            if summary.failed > 0 || summary.launch_failures > 0 {
                process::exit(2);
            }
        }
        Err(err) => {
            error!("{err}");
            process::exit(1);
        }
    }
}
