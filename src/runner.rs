//! Process execution and cleanup.
//!
//! `ChildRegistry` spawns external programs and remembers the pid of every
//! child still running, so that a termination signal can take them all down
//! before the tool exits.

use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use tokio::process::Command;
use tracing::debug;

use crate::error::CliError;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpawnOptions {
    /// Discard the child's output and report a non-zero exit as success.
    pub ignore_fail: bool,
}

impl SpawnOptions {
    pub fn ignore_fail() -> Self {
        Self { ignore_fail: true }
    }
}

/// Tracks running children for the lifetime of the process.
#[derive(Debug, Default)]
pub struct ChildRegistry {
    pids: Mutex<Vec<u32>>,
}

impl ChildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `argv` to completion and returns its exit code (`None` when the
    /// child was killed by a signal).
    pub async fn spawn(&self, argv: &[String], options: SpawnOptions) -> Result<Option<i32>> {
        let Some((program, args)) = argv.split_first() else {
            bail!("cannot spawn an empty command line");
        };
        debug!("<spawn> {}", shell_words::join(argv));

        let mut command = Command::new(program);
        command.args(args);
        if options.ignore_fail {
            command
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
        } else {
            command
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit());
        }
        command.kill_on_drop(true);

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to spawn {}", program))?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.track(pid);
        }
        let status = child.wait().await;
        if let Some(pid) = pid {
            self.untrack(pid);
        }
        let status = status.with_context(|| format!("failed to wait for {}", program))?;

        match status.code() {
            Some(code) if code != 0 && !options.ignore_fail => Err(CliError::ProcessExited {
                program: program.clone(),
                code,
            }
            .into()),
            Some(code) if code != 0 => {
                debug!("{} exited with code {} (ignored)", program, code);
                Ok(Some(code))
            }
            code => Ok(code),
        }
    }

    /// Number of children currently running.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Kills every tracked child. Returns how many were signalled.
    pub fn terminate_all(&self) -> usize {
        let pids: Vec<u32> = self.lock().drain(..).collect();
        for pid in &pids {
            send_kill(*pid);
        }
        pids.len()
    }

    fn track(&self, pid: u32) {
        self.lock().push(pid);
    }

    fn untrack(&self, pid: u32) {
        self.lock().retain(|tracked| *tracked != pid);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<u32>> {
        self.pids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(unix)]
fn send_kill(pid: u32) {
    unsafe {
        let _ = libc::kill(pid as i32, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn send_kill(pid: u32) {
    // Children are spawned with kill_on_drop; dropping the command future
    // takes care of them.
    let _ = pid;
}

/// Runs a shell command line and returns its trimmed standard output.
///
/// Fails on a non-zero exit status or when anything was written to stderr;
/// the error carries the stderr text. Nothing is logged above debug level.
pub async fn exec_shell(command_line: &str) -> Result<String> {
    exec_shell_with_timeout(command_line, None).await
}

pub async fn exec_shell_with_timeout(command_line: &str, timeout: Option<Duration>) -> Result<String> {
    debug!("<exec> {}", command_line);
    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(command_line)
        .stdin(Stdio::null())
        .kill_on_drop(true);
    let output = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| anyhow!("`{}` timed out after {:?}", command_line, timeout))?,
        None => command.output().await,
    }
    .with_context(|| format!("failed to run `{}`", command_line))?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if !output.status.success() || !stderr.is_empty() {
        let code = output.status.code().unwrap_or(-1);
        if stderr.is_empty() {
            bail!("`{}` failed with code {}", command_line, code);
        }
        bail!("`{}` failed with code {}: {}", command_line, code, stderr);
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
