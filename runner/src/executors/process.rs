use super::{Completion, ExecutorError, Launcher, ProcessHandle, RunOutput};
use crate::deck::JobConfig;
use crossbeam::channel::{bounded, Receiver, TryRecvError};
use std::{
    process::{Command, Stdio},
    thread,
    time::Instant,
};
use tracing::{debug, error, info, trace, warn};

/// Launches the solver as a child process. Output is drained on a dedicated
/// thread per child so the scheduler never blocks on full pipes.
#[derive(Debug, Clone, Default)]
pub struct ProcessLauncher {
    show_output: bool,
}

impl ProcessLauncher {
    pub fn new(show_output: bool) -> Self {
        Self { show_output }
    }

    fn stdio(&self) -> Stdio {
        if self.show_output {
            Stdio::inherit()
        } else {
            Stdio::piped()
        }
    }
}

/// handle to a solver whose output is drained in the background
#[derive(Debug)]
pub struct SolverProcess {
    deck: String,
    pid: u32,
    receiver: Receiver<Completion>,
}

impl Launcher for ProcessLauncher {
    type Handle = SolverProcess;

    fn launch(&mut self, mut job: JobConfig) -> Result<SolverProcess, ExecutorError> {
        let path = job.write(true)?;
        let deck = job.name();
        let exec = job.executable();

        debug!(deck = %deck, exec = ?exec, "Starting solver");

        let start = Instant::now();
        let child = Command::new(&exec)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(self.stdio())
            .stderr(self.stdio())
            .spawn()
            .map_err(|source| ExecutorError::Spawn {
                deck: deck.clone(),
                source,
            })?;
        let pid = child.id();

        // a single completion is ever sent, the receiver stays with the scheduler
        let (sender, receiver) = bounded(1);
        let drain_deck = deck.clone();

        thread::Builder::new()
            .name(format!("drain-{pid}"))
            .spawn(move || {
                let mut output = RunOutput::new();

                match child.wait_with_output() {
                    Ok(result) => {
                        output.status = result.status.code();
                        output.stdout = String::from_utf8_lossy(&result.stdout).into_owned();
                        output.stderr = String::from_utf8_lossy(&result.stderr).into_owned();
                    }
                    Err(error) => {
                        error!(deck = %drain_deck, error = ?error, "Failed to wait for solver");
                    }
                }
                output.runtime = start.elapsed();

                info!(
                    deck = %drain_deck,
                    minutes = output.runtime.as_secs_f64() / 60.0,
                    code = ?output.status,
                    "Solver finished"
                );
                trace!(deck = %drain_deck, "Output: {}", output.stdout);
                if !output.stderr.is_empty() {
                    debug!(deck = %drain_deck, "Error output: {}", output.stderr);
                }

                let completion = Completion {
                    deck: drain_deck,
                    output,
                    finished_at: chrono::Local::now(),
                };

                if sender.send(completion).is_err() {
                    warn!("Scheduler dropped the completion channel");
                }
            })
            .map_err(|source| ExecutorError::Spawn {
                deck: deck.clone(),
                source,
            })?;

        Ok(SolverProcess { deck, pid, receiver })
    }
}

impl ProcessHandle for SolverProcess {
    fn deck(&self) -> &str {
        &self.deck
    }

    fn poll(&mut self) -> Option<Completion> {
        match self.receiver.try_recv() {
            Ok(completion) => Some(completion),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // drain thread died without reporting, treat the solver as gone
                error!(deck = %self.deck, pid = self.pid, "Lost track of solver");

                Some(Completion {
                    deck: self.deck.clone(),
                    output: RunOutput::new(),
                    finished_at: chrono::Local::now(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deck::FilenameFormats;
    use std::{fs, os::unix::fs::PermissionsExt, time::Duration};
    use tempfile::TempDir;

    fn script(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("solver.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        path
    }

    fn job(dir: &TempDir, exec: &std::path::Path) -> JobConfig {
        let mut job = JobConfig::from_content(&format!(
            "EXE-FILE: {}\nOUTLET-PRESS: 100 PSI\n",
            exec.display()
        ));
        job.set_filename_formats(FilenameFormats::from([(
            "input_file".to_string(),
            dir.path().join("decks/run.inp").to_string_lossy().into_owned(),
        )]));

        job
    }

    fn wait(handle: &mut SolverProcess) -> Completion {
        for _ in 0..500 {
            if let Some(completion) = handle.poll() {
                return completion;
            }
            thread::sleep(Duration::from_millis(10));
        }

        panic!("solver did not finish in time");
    }

    #[test]
    fn captures_output_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let exec = script(&dir, "echo \"deck $1\"\necho oops >&2\nexit 3");
        let mut launcher = ProcessLauncher::new(false);

        let mut handle = launcher.launch(job(&dir, &exec)).unwrap();
        let completion = wait(&mut handle);

        assert_eq!(handle.deck(), "run.inp");
        assert_eq!(completion.output.status, Some(3));
        assert!(!completion.output.success());
        assert!(completion.output.stdout.contains("decks/run.inp"));
        assert_eq!(completion.output.stderr.trim(), "oops");
        assert!(dir.path().join("decks/run.inp").is_file());
    }

    #[test]
    fn large_output_does_not_block() {
        let dir = TempDir::new().unwrap();
        // well past the default pipe buffer
        let exec = script(&dir, "i=0\nwhile [ $i -lt 5000 ]; do echo 0123456789012345678901234567890123456789; i=$((i+1)); done");
        let mut launcher = ProcessLauncher::new(false);

        let mut handle = launcher.launch(job(&dir, &exec)).unwrap();
        let completion = wait(&mut handle);

        assert!(completion.output.success());
        assert_eq!(completion.output.stdout.lines().count(), 5000);
    }

    #[test]
    fn unexecutable_solver_is_a_spawn_error() {
        let dir = TempDir::new().unwrap();
        let exec = dir.path().join("not-executable.sh");
        fs::write(&exec, "#!/bin/sh\n").unwrap();
        let mut launcher = ProcessLauncher::new(false);

        assert!(matches!(
            launcher.launch(job(&dir, &exec)),
            Err(ExecutorError::Spawn { deck, .. }) if deck == "run.inp"
        ));
    }
}
