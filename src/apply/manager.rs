//! Long-lived entry point for apply and restore operations
//!
//! Owns the tool configuration and the command runner, and serializes
//! workflow runs behind an async mutex so two applies can never race on
//! the live file. Each call constructs a fresh workflow and discards it
//! with its result.

use super::backup::{BackupKind, BackupRecord, BackupStore};
use super::error::ApplyError;
use super::runner::{CommandRunner, SystemRunner};
use super::workflow::{self, ApplyResult, ApplyStage, ApplyWorkflow, WorkflowPaths};
use crate::config::{AppConfig, GrubSettings};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

pub struct ApplyManager {
    config: AppConfig,
    runner: Arc<dyn CommandRunner>,
    lock: Mutex<()>,
}

impl ApplyManager {
    pub fn new(config: AppConfig) -> Self {
        Self::with_runner(config, Arc::new(SystemRunner))
    }

    pub fn with_runner(config: AppConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            lock: Mutex::new(()),
        }
    }

    fn store(&self) -> BackupStore {
        BackupStore::new(self.config.backup_dir(), &self.config.paths.config_file)
    }

    /// Apply `settings` through the full workflow. `commit: false` runs
    /// every check but skips the final promotion and regeneration.
    pub async fn apply(&self, settings: &GrubSettings, commit: bool) -> ApplyResult {
        let _guard = self.lock.lock().await;
        info!(commit, "starting apply");

        let workflow = ApplyWorkflow::new(
            WorkflowPaths::from_config(&self.config),
            &self.config.commands,
            &self.config.limits,
            settings,
            self.runner.as_ref(),
            commit,
        );
        workflow.run().await
    }

    /// Restore a specific backup over the live file and regenerate.
    ///
    /// Unlike workflow rollback this does not quarantine anything: the
    /// current live file is presumed good, the user just wants an older
    /// configuration back.
    pub async fn restore_backup(&self, record: &BackupRecord) -> ApplyResult {
        let _guard = self.lock.lock().await;
        info!(backup = %record.path.display(), "restoring backup");

        let paths = WorkflowPaths::from_config(&self.config);
        let outcome = workflow::restore_and_regenerate(
            &self.store(),
            record,
            &paths.config_file,
            &paths.artifact,
            &self.config.commands,
            &self.config.limits,
            self.runner.as_ref(),
        )
        .await;

        match outcome {
            Ok(()) => ApplyResult {
                success: true,
                stage: ApplyStage::Success,
                message: format!("restored {}", record.path.display()),
                error: None,
                rollback_error: None,
            },
            Err(e) => ApplyResult {
                success: false,
                stage: ApplyStage::Error,
                message: format!("restore failed: {e}"),
                error: Some(e.to_string()),
                rollback_error: None,
            },
        }
    }

    /// All backups for the configured file, most recent first.
    pub fn list_backups(&self) -> Result<Vec<BackupRecord>, ApplyError> {
        self.store().list()
    }

    /// Take a user-requested backup of the live file.
    pub fn create_manual_backup(&self) -> Result<BackupRecord, ApplyError> {
        self.store()
            .create(&self.config.paths.config_file, BackupKind::Manual)
    }

    /// Delete old backups, keeping `keep` manual copies.
    pub fn prune_backups(&self, keep: usize) -> Result<usize, ApplyError> {
        self.store().prune(keep)
    }
}
