//! External command execution
//!
//! The workflow shells out to the system's bootloader tooling through
//! the [`CommandRunner`] trait, so tests can substitute a scripted
//! runner instead of spawning real processes. The real implementation
//! wraps tokio's process support with a hard timeout: on expiry the
//! child is killed, never left running.

use super::error::ApplyError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Child;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

/// Captured result of one command invocation.
///
/// A nonzero exit is not an error at this layer; callers decide whether
/// the exit code matters for their stage.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Runs external commands with a time budget.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Spawn `program` with `args`, wait up to `timeout`, capture output.
    ///
    /// Errors only on spawn failure or timeout. A command that ran to
    /// completion comes back as `Ok` regardless of its exit code.
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ApplyError>;
}

/// Production runner backed by real child processes.
#[derive(Debug, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ApplyError> {
        debug!(program, ?args, ?timeout, "running command");

        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ApplyError::io(format!("spawning {program}"), e))?;

        match tokio::time::timeout(timeout, wait_for_child_output(&mut child)).await {
            Ok(Ok((stdout, stderr, status))) => {
                let exit_code = exit_status_code(&status);
                debug!(program, ?exit_code, "command finished");
                Ok(CommandOutput {
                    exit_code,
                    stdout,
                    stderr,
                })
            }
            Ok(Err(e)) => Err(ApplyError::io(format!("waiting for {program}"), e)),
            Err(_) => {
                warn!(program, ?timeout, "command timed out, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
                Err(ApplyError::Timeout {
                    command: program.to_string(),
                    limit: timeout,
                })
            }
        }
    }
}

/// Read stdout and stderr concurrently to avoid pipe deadlock, then wait.
async fn wait_for_child_output(
    child: &mut Child,
) -> Result<(String, String, std::process::ExitStatus), std::io::Error> {
    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let stdout_fut = async move {
        let mut buf = String::new();
        if let Some(mut out) = stdout_pipe {
            out.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let stderr_fut = async move {
        let mut buf = String::new();
        if let Some(mut err) = stderr_pipe {
            err.read_to_string(&mut buf).await?;
        }
        Ok::<_, std::io::Error>(buf)
    };

    let (stdout, stderr) = tokio::try_join!(stdout_fut, stderr_fut)?;
    let status = child.wait().await?;
    Ok((stdout, stderr, status))
}

/// Extract exit code, using 128+signal for signal-terminated processes on Unix.
fn exit_status_code(status: &std::process::ExitStatus) -> Option<i32> {
    if let Some(code) = status.code() {
        return Some(code);
    }
    #[cfg(unix)]
    {
        if let Some(signal) = status.signal() {
            return Some(128 + signal);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = SystemRunner;
        let output = runner
            .run(
                "sh",
                &["-c", "printf 'out'; printf 'err' >&2"],
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout, "out");
        assert_eq!(output.stderr, "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let runner = SystemRunner;
        let output = runner
            .run("sh", &["-c", "exit 42"], Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.exit_code, Some(42));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = SystemRunner;
        let result = runner
            .run("sleep", &["30"], Duration::from_millis(100))
            .await;

        assert!(matches!(result, Err(ApplyError::Timeout { .. })));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = SystemRunner;
        let result = runner
            .run(
                "definitely-not-a-real-command-xyz",
                &[],
                Duration::from_secs(1),
            )
            .await;

        assert!(result.is_err());
    }
}
