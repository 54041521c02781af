//! Configuration file validation
//!
//! Read-only inspection of a candidate file. Never fails with an error:
//! a missing, empty, too-short or unreadable file all come back as
//! `is_valid == false` with a message saying which, so callers branch on
//! a single flag.

use std::path::Path;

/// Outcome of validating one file. Produced fresh on every check.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub error_message: Option<String>,
    pub file_size: u64,
    pub meaningful_lines: usize,
}

impl ValidationResult {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error_message: Some(message.into()),
            file_size: 0,
            meaningful_lines: 0,
        }
    }

    fn valid(file_size: u64, meaningful_lines: usize) -> Self {
        Self {
            is_valid: true,
            error_message: None,
            file_size,
            meaningful_lines,
        }
    }

    /// The message, or a generic fallback for valid results.
    pub fn message(&self) -> &str {
        self.error_message.as_deref().unwrap_or("ok")
    }
}

/// Count lines carrying configuration: non-blank and not comments.
pub fn meaningful_line_count(content: &str) -> usize {
    content
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !trimmed.starts_with('#')
        })
        .count()
}

/// Validate that a file exists and contains at least `min_lines`
/// meaningful lines.
pub fn validate_file(path: &Path, min_lines: usize) -> ValidationResult {
    if !path.exists() {
        return ValidationResult::invalid(format!("file missing: {}", path.display()));
    }

    let file_size = match std::fs::metadata(path) {
        Ok(meta) => meta.len(),
        Err(e) => {
            return ValidationResult::invalid(format!("cannot stat {}: {e}", path.display()));
        }
    };
    if file_size == 0 {
        return ValidationResult::invalid(format!("file is empty: {}", path.display()));
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return ValidationResult::invalid(format!("cannot read {}: {e}", path.display()));
        }
    };

    let meaningful_lines = meaningful_line_count(&content);
    if meaningful_lines < min_lines {
        return ValidationResult::invalid(format!(
            "too few meaningful lines in {}: {meaningful_lines} < {min_lines}",
            path.display()
        ));
    }

    ValidationResult::valid(file_size, meaningful_lines)
}
