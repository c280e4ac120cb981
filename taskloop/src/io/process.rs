//! Helpers for running child processes with timeouts and full output capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured child process output.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

/// Limits applied to a single child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunLimits {
    /// Wall-clock bound; `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Per-stream cap on stored bytes; `None` keeps everything.
    pub output_limit_bytes: Option<usize>,
}

/// Spawn `cmd` in its own process group.
///
/// Spawn failures are returned as-is so callers can tell a launch error from a
/// failure while waiting.
pub fn spawn_isolated(mut cmd: Command) -> std::io::Result<Child> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    debug!("spawning child process");
    cmd.spawn()
}

/// Wait for a spawned child with an optional timeout and capture stdout/stderr
/// without risking pipe deadlocks.
///
/// Output is read concurrently while the child runs. On timeout the child's
/// whole process group is killed. Once the leader has exited, any process still
/// left in its group is killed as well, so no descendant outlives the
/// invocation or keeps the pipes open.
#[instrument(skip_all, fields(pid = child.id(), timeout_secs = limits.timeout.map(|t| t.as_secs())))]
pub fn wait_with_limits(mut child: Child, limits: RunLimits) -> Result<CommandOutput> {
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        abandon(&mut child);
        return Err(anyhow!("stdout and stderr must be piped"));
    };

    let limit = limits.output_limit_bytes.unwrap_or(usize::MAX);
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let (status, timed_out) = match wait_child(&mut child, limits.timeout) {
        Ok(waited) => waited,
        Err(err) => {
            // Readers only finish once every holder of the pipes is gone.
            abandon(&mut child);
            for handle in [stdout_handle, stderr_handle] {
                if let Err(join_err) = join_output(handle) {
                    debug!(err = %join_err, "discarding output after failed wait");
                }
            }
            return Err(err);
        }
    };
    if !timed_out {
        reap_group(&child);
    }

    let (stdout, stdout_truncated) = join_output(stdout_handle).context("join stdout")?;
    let (stderr, stderr_truncated) = join_output(stderr_handle).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

/// Returns the exit status and whether the timeout fired.
fn wait_child(child: &mut Child, timeout: Option<Duration>) -> Result<(ExitStatus, bool)> {
    let Some(timeout) = timeout else {
        return Ok((child.wait().context("wait for command")?, false));
    };
    if let Some(status) = child.wait_timeout(timeout).context("wait for command")? {
        return Ok((status, false));
    }
    warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
    kill_group(child).context("kill command")?;
    let status = child.wait().context("wait command after kill")?;
    Ok((status, true))
}

/// Best-effort teardown after waiting failed: kill the group and reap the leader.
fn abandon(child: &mut Child) {
    if let Err(err) = kill_group(child) {
        warn!(err = %err, "failed to kill worker process group");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap worker process");
    }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    // The child was spawned with `process_group(0)`, so its pid is the pgid.
    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(std::io::Error::from(errno)),
    }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) -> std::io::Result<()> {
    child.kill()
}

#[cfg(unix)]
fn reap_group(child: &Child) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) => debug!("killed leftover processes in worker group"),
        Err(Errno::ESRCH) => {}
        Err(errno) => warn!(err = %errno, "failed to signal worker process group"),
    }
}

#[cfg(not(unix))]
fn reap_group(_child: &Child) {}

fn join_output(handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>) -> Result<(Vec<u8>, usize)> {
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            buf.extend_from_slice(&chunk[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((buf, truncated))
}
