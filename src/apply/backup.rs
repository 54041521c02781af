//! Timestamped backups of the live configuration file
//!
//! Backups live next to the configuration file (or in a configured
//! directory) and are named `<stem>.backup.<kind>.<timestamp>` so a
//! directory listing reads chronologically. Automatic backups are
//! taken at the start of every apply; manual backups are user-driven
//! and pruned separately.

use super::error::ApplyError;
use super::validator;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Why the backup was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    /// Taken automatically at the start of an apply
    Auto,
    /// Requested explicitly by the user
    Manual,
}

impl BackupKind {
    fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Manual => "manual",
        }
    }

    fn parse(label: &str) -> Option<Self> {
        match label {
            "auto" => Some(Self::Auto),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// One backup on disk.
#[derive(Debug, Clone)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: DateTime<Local>,
    pub kind: BackupKind,
}

/// Backup directory for a single configuration file.
pub struct BackupStore {
    dir: PathBuf,
    file_stem: String,
}

impl BackupStore {
    pub fn new(dir: impl Into<PathBuf>, source: &Path) -> Self {
        let file_stem = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "grub".to_string());
        Self {
            dir: dir.into(),
            file_stem,
        }
    }

    /// Copy `source` into the store and verify the copy.
    ///
    /// The source must exist with at least one meaningful line; an
    /// apply must never "back up" a file that is already broken and
    /// later restore it as if it were good.
    pub fn create(&self, source: &Path, kind: BackupKind) -> Result<BackupRecord, ApplyError> {
        let check = validator::validate_file(source, 1);
        if !check.is_valid {
            return Err(ApplyError::Backup(format!(
                "refusing to back up {}: {}",
                source.display(),
                check.message()
            )));
        }

        std::fs::create_dir_all(&self.dir)
            .map_err(|e| ApplyError::io(format!("creating {}", self.dir.display()), e))?;

        let created_at = Local::now();
        let path = self.unique_path(kind, created_at);
        std::fs::copy(source, &path).map_err(|e| {
            ApplyError::io(
                format!("copying {} to {}", source.display(), path.display()),
                e,
            )
        })?;

        // Verify the copy before trusting it as a restore point.
        let copied = validator::validate_file(&path, 1);
        if !copied.is_valid || copied.file_size != check.file_size {
            let _ = std::fs::remove_file(&path);
            return Err(ApplyError::Backup(format!(
                "backup verification failed for {}",
                path.display()
            )));
        }

        info!(path = %path.display(), kind = kind.label(), "backup created");
        Ok(BackupRecord {
            path,
            created_at,
            kind,
        })
    }

    /// All backups in the store, most recent first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, ApplyError> {
        let prefix = format!("{}.backup.", self.file_stem);
        let mut records = Vec::new();

        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(ApplyError::io(format!("listing {}", self.dir.display()), e)),
        };

        for entry in entries {
            let entry =
                entry.map_err(|e| ApplyError::io(format!("listing {}", self.dir.display()), e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            let Some(record) = parse_backup_name(entry.path(), suffix) else {
                debug!(name, "skipping unrecognized backup name");
                continue;
            };
            records.push(record);
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Most recent backup of the given kind, if any.
    pub fn latest(&self, kind: BackupKind) -> Result<Option<BackupRecord>, ApplyError> {
        Ok(self.list()?.into_iter().find(|r| r.kind == kind))
    }

    /// Copy a backup over `dest` and verify the result.
    ///
    /// Failure here is a rollback failure: the live file may be in an
    /// unknown state and the caller must tell the user so.
    pub fn restore(&self, record: &BackupRecord, dest: &Path) -> Result<(), ApplyError> {
        let check = validator::validate_file(&record.path, 1);
        if !check.is_valid {
            return Err(ApplyError::Rollback(format!(
                "backup {} is unusable: {}",
                record.path.display(),
                check.message()
            )));
        }

        std::fs::copy(&record.path, dest).map_err(|e| {
            ApplyError::Rollback(format!(
                "restoring {} to {}: {e}",
                record.path.display(),
                dest.display()
            ))
        })?;

        let restored = validator::validate_file(dest, 1);
        if !restored.is_valid {
            return Err(ApplyError::Rollback(format!(
                "restored file failed validation: {}",
                restored.message()
            )));
        }

        info!(from = %record.path.display(), to = %dest.display(), "backup restored");
        Ok(())
    }

    /// Delete old backups, keeping `keep_manual` manual backups and the
    /// most recent automatic backup.
    pub fn prune(&self, keep_manual: usize) -> Result<usize, ApplyError> {
        let records = self.list()?;
        let mut manual_seen = 0;
        let mut auto_seen = 0;
        let mut removed = 0;

        for record in &records {
            let keep = match record.kind {
                BackupKind::Manual => {
                    manual_seen += 1;
                    manual_seen <= keep_manual
                }
                BackupKind::Auto => {
                    auto_seen += 1;
                    auto_seen <= 1
                }
            };
            if keep {
                continue;
            }
            std::fs::remove_file(&record.path)
                .map_err(|e| ApplyError::io(format!("removing {}", record.path.display()), e))?;
            debug!(path = %record.path.display(), "pruned backup");
            removed += 1;
        }

        Ok(removed)
    }

    fn unique_path(&self, kind: BackupKind, created_at: DateTime<Local>) -> PathBuf {
        let base = format!(
            "{}.backup.{}.{}",
            self.file_stem,
            kind.label(),
            created_at.format(TIMESTAMP_FORMAT)
        );
        let mut candidate = self.dir.join(&base);
        let mut counter = 1;
        while candidate.exists() {
            candidate = self.dir.join(format!("{base}.{counter}"));
            counter += 1;
        }
        candidate
    }
}

fn parse_backup_name(path: PathBuf, suffix: &str) -> Option<BackupRecord> {
    // suffix is "<kind>.<timestamp>" with an optional ".<n>" uniqueness tail
    let (kind_label, rest) = suffix.split_once('.')?;
    let kind = BackupKind::parse(kind_label)?;
    let timestamp = rest.split('.').next()?;

    let created_at = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .ok()
        .and_then(|naive| Local.from_local_datetime(&naive).single())
        .or_else(|| file_mtime(&path))?;

    Some(BackupRecord {
        path,
        created_at,
        kind,
    })
}

fn file_mtime(path: &Path) -> Option<DateTime<Local>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified))
}
