//! Shell command execution for local sessions.
//!
//! Commands run as `<shell> -c <command>` in their own process group. A
//! timeout, or dropping the in-flight future, kills the whole group so no
//! grandchildren outlive the call.

use crate::PROVIDER_NAME;
use sandlot_core::{Operation, Result, SandboxError};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, trace, warn};

/// Appended to a stream cut at the capture cap.
const TRUNCATION_MARKER: &str = "\n... [output truncated]";

/// Raw outcome of one command.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Spawns shell commands with a capture cap and an optional timeout.
#[derive(Debug, Clone)]
pub(crate) struct ProcessSupervisor {
    shell: String,
    max_output_bytes: usize,
}

impl ProcessSupervisor {
    pub fn new(shell: impl Into<String>, max_output_bytes: usize) -> Self {
        Self {
            shell: shell.into(),
            max_output_bytes,
        }
    }

    /// Run `command` in `cwd` to completion.
    ///
    /// `env` is layered over the inherited environment. A non-zero exit is
    /// returned as output; only spawn failure and timeout are errors.
    pub async fn run(
        &self,
        command: &str,
        cwd: &Path,
        env: &BTreeMap<String, String>,
        timeout: Option<Duration>,
    ) -> Result<ProcessOutput> {
        debug!(cmd = %command, cwd = %cwd.display(), timeout = ?timeout, "executing shell command");
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            warn!(error = %e, shell = %self.shell, "failed to spawn command");
            SandboxError::provider_with(
                PROVIDER_NAME,
                Operation::Execute,
                format!("failed to spawn '{}'", self.shell),
                e,
            )
        })?;
        let mut group = ProcessGroupGuard::new(child.id());

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let completion = async {
            let (out, err, status) = tokio::join!(
                read_capped(stdout, limit),
                read_capped(stderr, limit),
                child.wait()
            );
            Ok::<_, std::io::Error>((out?, err?, status?))
        };

        let outcome = match timeout {
            Some(after) => tokio::time::timeout(after, completion).await,
            None => Ok(completion.await),
        };

        let (stdout, stderr, status) = match outcome {
            Ok(Ok(done)) => {
                group.disarm();
                done
            }
            Ok(Err(e)) => {
                group.kill();
                return Err(SandboxError::provider_with(
                    PROVIDER_NAME,
                    Operation::Execute,
                    "failed to collect command output",
                    e,
                ));
            }
            Err(_) => {
                group.kill();
                // Reap the direct child so it does not linger as a zombie
                let _ = child.kill().await;
                let after = timeout.unwrap_or_default();
                warn!(
                    cmd = %command,
                    timeout_secs = after.as_secs_f64(),
                    "command timed out, process group killed"
                );
                return Err(SandboxError::timeout(PROVIDER_NAME, Operation::Execute, after));
            }
        };

        let return_code = status.code().unwrap_or(-1);
        let stdout = truncate_output(stdout, limit);
        let stderr = truncate_output(stderr, limit);
        let duration = start.elapsed();
        debug!(
            exit_code = return_code,
            stdout_len = stdout.len(),
            stderr_len = stderr.len(),
            elapsed_ms = duration.as_millis() as u64,
            "command completed"
        );
        trace!(stdout = %stdout, stderr = %stderr, "command output");

        Ok(ProcessOutput {
            return_code,
            stdout,
            stderr,
            duration,
        })
    }
}

/// Read a stream to EOF, keeping at most `limit + 1` bytes.
///
/// The rest is drained so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut reader) = reader {
        (&mut reader)
            .take((limit as u64).saturating_add(1))
            .read_to_end(&mut buf)
            .await?;
        tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    }
    Ok(buf)
}

/// Decode lossily and cut to `max_bytes`, marking the cut.
fn truncate_output(mut bytes: Vec<u8>, max_bytes: usize) -> String {
    if bytes.len() <= max_bytes {
        return String::from_utf8_lossy(&bytes).into_owned();
    }
    bytes.truncate(max_bytes);
    let mut truncated = String::from_utf8_lossy(&bytes).into_owned();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Kills the child's process group unless disarmed.
struct ProcessGroupGuard {
    pgid: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pgid: pid }
    }

    fn disarm(&mut self) {
        self.pgid = None;
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            kill_group(pgid);
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

#[cfg(unix)]
fn kill_group(pgid: u32) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pgid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        // ESRCH: the group is already gone
        if e != nix::errno::Errno::ESRCH {
            warn!(pgid = pgid, error = %e, "failed to kill process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}
