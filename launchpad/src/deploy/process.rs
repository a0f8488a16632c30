//! External command execution with timeout and cancellation
//!
//! Every blocking call to the container runtime or to git goes through
//! [`run_command`]. The per-call deadline is composed with the deployment's
//! cancellation token, so "the user stopped this", "this is slow" and "this
//! is broken" surface as three different errors.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::deploy::buildlog::BuildLog;
use crate::errors::PlatformError;

/// Captured output of a finished command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim()
    }
}

/// Run `cmd` to completion.
///
/// Output lines are mirrored into `log` when given. The child is killed if
/// the token fires or the timeout elapses.
pub async fn run_command(
    mut cmd: Command,
    what: &str,
    timeout: Duration,
    token: &CancellationToken,
    log: Option<&BuildLog>,
) -> Result<CommandOutput, PlatformError> {
    if token.is_cancelled() {
        return Err(PlatformError::Canceled(what.to_string()));
    }

    // arguments may carry credentials
    debug!("Running {} ({:?})", what, cmd.as_std().get_program());
    let mut child = cmd
        .kill_on_drop(true)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PlatformError::CommandFailed(format!("failed to run {}: {}", what, e)))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let work = async {
        let (out, err) = tokio::try_join!(drain(stdout, log), drain(stderr, log))?;
        let status = child.wait().await?;
        Ok::<(ExitStatus, String, String), std::io::Error>((status, out, err))
    };

    let finished = tokio::select! {
        biased;
        _ = token.cancelled() => {
            return Err(PlatformError::Canceled(what.to_string()));
        }
        res = tokio::time::timeout(timeout, work) => res,
    };

    let (status, stdout, stderr) = match finished {
        Err(_) => return Err(PlatformError::Timeout(what.to_string(), timeout)),
        Ok(Err(e)) => {
            return Err(PlatformError::CommandFailed(format!("{} failed: {}", what, e)));
        }
        Ok(Ok(done)) => done,
    };

    if !status.success() {
        return Err(PlatformError::CommandFailed(format!(
            "{} failed ({}): {}",
            what,
            status,
            tail(&stderr, &stdout)
        )));
    }

    Ok(CommandOutput { stdout, stderr })
}

/// Run a command that is not tied to a deployment (no cancellation, no log)
pub async fn run_simple(
    cmd: Command,
    what: &str,
    timeout: Duration,
) -> Result<CommandOutput, PlatformError> {
    run_command(cmd, what, timeout, &CancellationToken::new(), None).await
}

async fn drain<R>(reader: Option<R>, log: Option<&BuildLog>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut collected = String::new();
    let Some(reader) = reader else {
        return Ok(collected);
    };

    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    while let Some(line) = next_line_lossy(&mut reader, &mut buf).await? {
        if let Some(log) = log {
            log.line(&line).await;
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

/// Read one line, replacing invalid UTF-8 instead of failing on it.
///
/// Returns `None` at end of stream. The trailing newline is stripped.
pub async fn next_line_lossy<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

/// Last few meaningful lines of a failed command, for the error message
fn tail(stderr: &str, stdout: &str) -> String {
    let source = if stderr.trim().is_empty() { stdout } else { stderr };
    let lines: Vec<&str> = source
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    let start = lines.len().saturating_sub(3);
    let joined = lines[start..].join(" | ");
    if joined.is_empty() {
        "no output".to_string()
    } else {
        joined
    }
}
