//! Running commands inside containers.
//!
//! The resource subsystem never execs into containers. This exists for
//! callers that want to look at a container from the inside, for example to
//! read the limits its cgroup reports.

use std::process::Command;

use retune_common::error::{Result, RetuneError};
use retune_common::types::ContainerId;

/// Output from an exec command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    /// Standard output from the command.
    pub stdout: String,
    /// Standard error from the command.
    pub stderr: String,
    /// Exit code returned by the command.
    pub exit_code: i32,
}

impl ExecOutput {
    /// Returns `true` if the command exited with status 0.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Joins the namespaces of a running container and executes a command.
///
/// Uses `nsenter` to enter the target's mount, UTS, IPC, network, and PID
/// namespaces.
///
/// # Errors
///
/// Returns an error if the command is empty, `nsenter` is not installed, or
/// the invocation fails.
pub fn exec_in_container(container_id: &ContainerId, pid: u32, command: &[String]) -> Result<ExecOutput> {
    tracing::info!(id = %container_id, pid, cmd = ?command, "exec into container");
    check_command(command)?;

    let nsenter = which::which("nsenter").map_err(|e| RetuneError::Config {
        message: format!("nsenter is required for exec: {e}"),
    })?;
    let mut cmd = Command::new(&nsenter);
    let _ = cmd
        .args(["--target", &pid.to_string(), "--mount", "--uts", "--ipc", "--net", "--pid", "--"])
        .args(command);
    run(cmd, &nsenter.display().to_string())
}

/// Executes a command directly on the host, without entering any namespace.
///
/// # Errors
///
/// Returns an error if the command is empty or cannot be launched.
pub fn exec_on_host(container_id: &ContainerId, command: &[String]) -> Result<ExecOutput> {
    tracing::debug!(id = %container_id, cmd = ?command, "exec on host");
    check_command(command)?;
    let (program, args) = command.split_first().ok_or_else(empty_command)?;
    let mut cmd = Command::new(program);
    let _ = cmd.args(args);
    run(cmd, program)
}

fn check_command(command: &[String]) -> Result<()> {
    if command.is_empty() {
        Err(empty_command())
    } else {
        Ok(())
    }
}

fn empty_command() -> RetuneError {
    RetuneError::Config {
        message: "exec command is empty".into(),
    }
}

fn run(mut cmd: Command, program: &str) -> Result<ExecOutput> {
    let output = cmd.output().map_err(|e| RetuneError::Io {
        path: program.into(),
        source: e,
    })?;
    Ok(ExecOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}
