//! Error taxonomy for the apply pipeline
//!
//! A closed set of error kinds. Each stage produces only the kinds it
//! declares; the workflow boundary converts every failure into a
//! populated `ApplyResult` and decides whether rollback is required.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the apply pipeline
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The desired configuration itself is malformed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Backup creation or verification failed (nothing was mutated)
    #[error("backup failed: {0}")]
    Backup(String),

    /// Written or generated content failed validation
    #[error("validation failed: {0}")]
    Validation(String),

    /// An external command exited nonzero
    #[error("command '{command}' failed (exit code {exit_code:?}): {stderr}")]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// An external command exceeded its time budget and was killed
    #[error("command '{command}' timed out after {limit:?}")]
    Timeout { command: String, limit: Duration },

    /// Restoration from backup failed; manual intervention required
    #[error("rollback failed: {0}")]
    Rollback(String),

    /// Insufficient privilege for a file or command operation
    #[error("permission denied: {0}")]
    Permission(String),

    /// Any other filesystem failure
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl ApplyError {
    /// Wrap an io error, surfacing permission problems as their own kind.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        let context = context.into();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            Self::Permission(format!("{context}: {source}"))
        } else {
            Self::Io { context, source }
        }
    }

    /// Build a command failure from captured output, keeping stderr short
    /// enough for a result message.
    pub fn command(command: impl Into<String>, exit_code: Option<i32>, stderr: &str) -> Self {
        Self::Command {
            command: command.into(),
            exit_code,
            stderr: truncate(stderr, 200),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    let mut end = max;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
