//! Job execution.
//!
//! An executor turns a job into a [`JobResult`]. It never returns an error:
//! anything that goes wrong while running a job is a failed attempt, which
//! the worker feeds into the retry policy.

use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use queuectl_core::{Config, Job};

/// Outcome of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    /// Job completed successfully
    Success,
    /// Job failed with an error
    Failure(String),
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JobResult::Success)
    }
}

/// Runs jobs.
pub trait JobExecutor: Send + Sync {
    fn execute(&self, job: &Job) -> JobResult;
}

impl<F> JobExecutor for F
where
    F: Fn(&Job) -> JobResult + Send + Sync,
{
    fn execute(&self, job: &Job) -> JobResult {
        self(job)
    }
}

/// Runs `job.command` through the platform shell; exit status 0 is success.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellExecutor;

impl JobExecutor for ShellExecutor {
    fn execute(&self, job: &Job) -> JobResult {
        let command = platform_command(&job.command);
        debug!(job_id = %job.id, command = %command, "running command");

        match shell(&command).stdin(Stdio::null()).status() {
            Ok(status) if status.success() => JobResult::Success,
            Ok(status) => JobResult::Failure(format!("command failed: {status}")),
            Err(err) => JobResult::Failure(format!("failed to start command: {err}")),
        }
    }
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn platform_command(command: &str) -> std::borrow::Cow<'_, str> {
    command.into()
}

/// `cmd` has no `sleep`; `timeout` takes the same argument.
#[cfg(windows)]
fn platform_command(command: &str) -> std::borrow::Cow<'_, str> {
    match command.strip_prefix("sleep") {
        Some(rest) => format!("timeout{rest}").into(),
        None => command.into(),
    }
}

/// Load-testing executor: waits, then fails with a fixed probability.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    failure_rate: f64,
    delay: Duration,
}

impl SimulatedExecutor {
    pub fn new(failure_rate: f64, delay: Duration) -> Self {
        Self {
            failure_rate: if failure_rate.is_nan() {
                0.0
            } else {
                failure_rate.clamp(0.0, 1.0)
            },
            delay,
        }
    }
}

impl JobExecutor for SimulatedExecutor {
    fn execute(&self, job: &Job) -> JobResult {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        if rand::thread_rng().gen_bool(self.failure_rate) {
            debug!(job_id = %job.id, "simulated failure");
            JobResult::Failure("simulated failure".to_string())
        } else {
            JobResult::Success
        }
    }
}

/// Which executor a pool runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutorMode {
    #[default]
    Shell,
    Simulated,
}

/// Executor selected at pool start.
#[derive(Debug, Clone)]
pub enum CommandExecutor {
    Shell(ShellExecutor),
    Simulated(SimulatedExecutor),
}

impl CommandExecutor {
    pub fn new(mode: ExecutorMode, config: &Config, simulated_delay: Duration) -> Self {
        match mode {
            ExecutorMode::Shell => Self::Shell(ShellExecutor),
            ExecutorMode::Simulated => Self::Simulated(SimulatedExecutor::new(
                config.failure_rate,
                simulated_delay,
            )),
        }
    }
}

impl JobExecutor for CommandExecutor {
    fn execute(&self, job: &Job) -> JobResult {
        match self {
            CommandExecutor::Shell(e) => e.execute(job),
            CommandExecutor::Simulated(e) => e.execute(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn shell_exit_status_decides_outcome() {
        assert!(ShellExecutor.execute(&Job::new("a", "true")).is_success());
        assert!(ShellExecutor.execute(&Job::new("b", "exit 0")).is_success());

        let failed = ShellExecutor.execute(&Job::new("c", "exit 3"));
        assert!(matches!(failed, JobResult::Failure(ref msg) if msg.contains('3')));
    }

    #[cfg(unix)]
    #[test]
    fn unknown_command_is_a_failure_not_a_panic() {
        let result = ShellExecutor.execute(&Job::new("a", "definitely-not-a-real-binary-xyz"));
        assert!(!result.is_success());
    }

    #[test]
    fn simulated_extremes_are_deterministic() {
        let never = SimulatedExecutor::new(0.0, Duration::ZERO);
        let always = SimulatedExecutor::new(1.0, Duration::ZERO);
        let job = Job::new("a", "anything");

        for _ in 0..50 {
            assert!(never.execute(&job).is_success());
            assert!(!always.execute(&job).is_success());
        }
    }

    #[test]
    fn simulated_rate_is_clamped() {
        let job = Job::new("a", "anything");
        assert!(!SimulatedExecutor::new(7.0, Duration::ZERO).execute(&job).is_success());
        assert!(SimulatedExecutor::new(f64::NAN, Duration::ZERO).execute(&job).is_success());
    }

    #[test]
    fn closures_are_executors() {
        let executor = |job: &Job| {
            if job.command == "ok" {
                JobResult::Success
            } else {
                JobResult::Failure("nope".into())
            }
        };
        assert!(executor.execute(&Job::new("a", "ok")).is_success());
        assert!(!executor.execute(&Job::new("b", "bad")).is_success());
    }

    #[test]
    fn mode_selects_executor() {
        let config = Config {
            failure_rate: 1.0,
            ..Config::default()
        };
        let executor = CommandExecutor::new(ExecutorMode::Simulated, &config, Duration::ZERO);
        assert!(!executor.execute(&Job::new("a", "true")).is_success());
    }
}
