//! Child process execution with a wall-clock limit and bounded capture.

use std::io::Read;
#[cfg(unix)]
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
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

impl CommandOutput {
    /// Exit code, or `None` when the child was killed by a signal.
    pub fn exit_code(&self) -> Option<i32> {
        self.status.code()
    }

    /// Stdout as text, with a trailing note when bytes were dropped.
    pub fn stdout_text(&self) -> String {
        lossy_with_notice(&self.stdout, self.stdout_truncated, "stdout")
    }

    /// Stderr as text, with a trailing note when bytes were dropped.
    pub fn stderr_text(&self) -> String {
        lossy_with_notice(&self.stderr, self.stderr_truncated, "stderr")
    }
}

fn lossy_with_notice(bytes: &[u8], truncated: usize, label: &str) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// Time allowed for the output readers to drain after the child is gone.
const READER_GRACE: Duration = Duration::from_secs(2);

const ABANDONED_NOTICE: &str = "\n[output pipe held open by a leftover process; capture abandoned]\n";

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Capture = Result<(Vec<u8>, usize)>;

/// Run `cmd` with stdin closed, killing it after `timeout`.
///
/// Both pipes are drained on reader threads while the child runs, so a chatty
/// child cannot block on a full pipe. At most `output_limit_bytes` per stream
/// are kept; the rest is counted and discarded.
///
/// On unix the child leads its own process group and a timeout kills the
/// whole group. Readers still blocked [`READER_GRACE`] after the child is
/// reaped are abandoned, so the call returns within `timeout` plus the grace.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command_with_timeout(
    mut cmd: Command,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    cmd.process_group(0);

    debug!(program = ?cmd.get_program(), "spawning child process");
    let mut child = cmd.spawn().map_err(|e| {
        error!(err = %e, "failed to spawn command");
        anyhow!(e).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;
    let (tx, rx) = mpsc::channel::<(Stream, Capture)>();
    spawn_reader(Stream::Stdout, stdout, output_limit_bytes, tx.clone());
    spawn_reader(Stream::Stderr, stderr, output_limit_bytes, tx);

    let (status, timed_out) = match child.wait_timeout(timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            kill_tree(&mut child)?;
            (child.wait().context("wait command after kill")?, true)
        }
    };

    let mut stdout = None;
    let mut stderr = None;
    let deadline = Instant::now() + READER_GRACE;
    while stdout.is_none() || stderr.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, capture)) => stdout = Some(capture.context("read stdout")?),
            Ok((Stream::Stderr, capture)) => stderr = Some(capture.context("read stderr")?),
            Err(err) => {
                warn!(%err, "output readers did not finish, abandoning them");
                break;
            }
        }
    }
    let abandoned = stdout.is_none() || stderr.is_none();
    let (stdout, stdout_truncated) = stdout.unwrap_or_default();
    let (mut stderr, stderr_truncated) = stderr.unwrap_or_default();
    if abandoned {
        stderr.extend_from_slice(ABANDONED_NOTICE.as_bytes());
    }
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

fn spawn_reader<R: Read + Send + 'static>(
    stream: Stream,
    reader: R,
    limit: usize,
    tx: mpsc::Sender<(Stream, Capture)>,
) {
    thread::spawn(move || {
        // The receiver is gone once the caller has abandoned this reader.
        let _ = tx.send((stream, read_limited(reader, limit)));
    });
}

/// Kill the child's process group, then the child itself.
#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    let pgid = child.id().to_string();
    let group_kill = Command::new("sh")
        .args(["-c", "kill -KILL -- -\"$1\"", "sh", &pgid])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match group_kill {
        Ok(status) if status.success() => debug!(%pgid, "killed process group"),
        other => warn!(%pgid, ?other, "process group kill failed, killing child only"),
    }
    child.kill().context("kill command")
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill command")
}

fn read_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut kept = Vec::new();
    let mut dropped = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        let keep = n.min(room);
        kept.extend_from_slice(&chunk[..keep]);
        dropped += n - keep;
    }

    Ok((kept, dropped))
}
