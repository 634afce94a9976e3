//! Child process execution with a hard deadline and bounded output capture.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{Signal, killpg};
#[cfg(unix)]
use nix::unistd::Pid;
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// Captured result of a finished (or killed) child process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// Bytes drained from stdout but not kept.
    pub stdout_truncated: usize,
    /// Bytes drained from stderr but not kept.
    pub stderr_truncated: usize,
    /// The deadline expired and the child was killed.
    pub timed_out: bool,
    /// A pipe stayed open past the grace period and its output was abandoned.
    pub streams_detached: bool,
}

impl ProcessOutput {
    /// Human-readable dump of both streams for an attempt log.
    pub fn render_log(&self, label: &str) -> String {
        let mut buf = String::new();
        buf.push_str("=== stdout ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stdout));
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        buf.push_str("\n=== stderr ===\n");
        buf.push_str(&String::from_utf8_lossy(&self.stderr));
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[{label} stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str(&format!("\n[{label} timed out]\n"));
        }
        if self.streams_detached {
            buf.push_str(&format!("\n[{label} output pipes left open, capture abandoned]\n"));
        }
        buf
    }
}

/// How long to wait for the output readers once the child has exited.
const READER_GRACE: Duration = Duration::from_secs(2);

type ReaderResult = Result<(Vec<u8>, usize)>;

/// Run `cmd` to completion or until `timeout`, whichever comes first.
///
/// stdout and stderr are drained on helper threads while the child runs so a
/// chatty child can never block on a full pipe. At most `output_limit_bytes`
/// of each stream is kept; the rest is counted and discarded.
///
/// On unix the child leads its own process group. The whole group is killed
/// on timeout and once more after the child exits, so nothing the child
/// spawned outlives the call or keeps the pipes open.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes = output_limit_bytes))]
pub fn run_with_deadline(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<ProcessOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!("spawning child process");
    let mut child = cmd.spawn().context("spawn command")?;
    let pid = child.id();

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let stdout_rx = spawn_reader(stdout, output_limit_bytes);
    let stderr_rx = spawn_reader(stderr, output_limit_bytes);

    let mut timed_out = false;
    let status = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            if !kill_process_group(pid) {
                child.kill().context("kill command")?;
            }
            child.wait().context("wait command after kill")?
        }
    };
    kill_process_group(pid);

    let (stdout, stdout_truncated, stdout_detached) = collect_reader(&stdout_rx, "stdout")?;
    let (stderr, stderr_truncated, stderr_detached) = collect_reader(&stderr_rx, "stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
        streams_detached: stdout_detached || stderr_detached,
    })
}

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<ReaderResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the reader was detached.
        let _ = tx.send(read_limited(reader, limit));
    });
    rx
}

/// Wait up to [`READER_GRACE`] for a reader. A pipe still held open by a
/// process outside the group is abandoned rather than waited on.
fn collect_reader(rx: &Receiver<ReaderResult>, stream: &str) -> Result<(Vec<u8>, usize, bool)> {
    match rx.recv_timeout(READER_GRACE) {
        Ok(result) => {
            let (buf, truncated) = result.with_context(|| format!("read {stream}"))?;
            Ok((buf, truncated, false))
        }
        Err(RecvTimeoutError::Timeout) => {
            warn!(stream, "pipe still open after exit, detaching reader");
            Ok((Vec::new(), 0, true))
        }
        Err(RecvTimeoutError::Disconnected) => Err(anyhow!("{stream} reader thread panicked")),
    }
}

/// SIGKILL every process in the group led by `pid`. Returns false when the
/// signal could not be delivered to anything.
#[cfg(unix)]
fn kill_process_group(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => {
            debug!(pgid = raw, "killed process group");
            true
        }
        Err(Errno::ESRCH) => false,
        Err(err) => {
            warn!(pgid = raw, %err, "failed to kill process group");
            false
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> bool {
    false
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let remaining = limit.saturating_sub(buf.len());
        let keep = n.min(remaining);
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
