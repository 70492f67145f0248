//! Bounded subprocess execution.
//!
//! Every external command the daemon runs (session-bus queries,
//! notification delivery) goes through [`run_with_deadline`], which
//! enforces a wall-clock timeout with SIGTERM → SIGKILL escalation so
//! a wedged helper can never stall the tick loop.

use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::WorkerError;

/// Poll interval while waiting for a child to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Grace between SIGTERM and SIGKILL for an overrunning child.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Captured output of a completed command.
#[derive(Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Run `command`, killing it if it exceeds `deadline`.
///
/// # Errors
/// [`WorkerError::Timeout`] on deadline expiry,
/// [`WorkerError::ScanFailed`] if the command cannot be spawned or its
/// output collected. Non-zero exit is not an error here; callers check
/// [`CommandOutput::success`].
pub fn run_with_deadline(
    mut command: Command,
    deadline: Duration,
    label: &str,
) -> Result<CommandOutput, WorkerError> {
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|e| WorkerError::ScanFailed {
        worker: label.to_string(),
        message: format!("spawn failed: {e}"),
    })?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) => {
                if started.elapsed() >= deadline {
                    terminate_child(&mut child);
                    return Err(WorkerError::Timeout {
                        worker: label.to_string(),
                        seconds: deadline.as_secs(),
                    });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                return Err(WorkerError::ScanFailed {
                    worker: label.to_string(),
                    message: format!("wait failed: {e}"),
                })
            }
        }
    }

    let output = child
        .wait_with_output()
        .map_err(|e| WorkerError::ScanFailed {
            worker: label.to_string(),
            message: format!("output collection failed: {e}"),
        })?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        status: output.status.code().unwrap_or(-1),
    })
}

fn terminate_child(child: &mut std::process::Child) {
    let pid = child.id() as i32;
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    std::thread::sleep(TERM_GRACE);
    // Reap if it obeyed; otherwise force it down.
    if matches!(child.try_wait(), Ok(None)) {
        let _ = child.kill();
    }
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_command_completes() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = run_with_deadline(cmd, Duration::from_secs(5), "echo").unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn overrunning_command_times_out() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let started = Instant::now();
        let err = run_with_deadline(cmd, Duration::from_millis(200), "sleep").unwrap_err();
        assert!(matches!(err, WorkerError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn missing_binary_reports_spawn_failure() {
        let cmd = Command::new("/nonexistent/definitely-not-here");
        let err = run_with_deadline(cmd, Duration::from_secs(1), "ghost").unwrap_err();
        assert!(matches!(err, WorkerError::ScanFailed { .. }));
    }
}
