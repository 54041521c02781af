//! The apply state machine
//!
//! One workflow instance per apply request. Stages run strictly in
//! order; any failure after the backup was taken routes through
//! Rollback before terminating in Error. The workflow never retries a
//! stage and never retries a failed rollback.

use super::backup::{BackupKind, BackupRecord, BackupStore};
use super::error::ApplyError;
use super::fileio;
use super::runner::CommandRunner;
use super::validator;
use crate::config::paths as config_paths;
use crate::config::{AppConfig, Commands, GrubDefaults, GrubSettings, Limits, MANDATORY_KEYS};
use crate::menu;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Where the workflow currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyStage {
    Idle,
    Backup,
    WriteTemp,
    GenerateTest,
    Validate,
    Apply,
    Success,
    Rollback,
    Error,
}

impl ApplyStage {
    /// Stages whose failure requires restoring the backup. Backup
    /// itself fails before anything was mutated.
    fn needs_rollback(self) -> bool {
        matches!(
            self,
            Self::WriteTemp | Self::GenerateTest | Self::Validate | Self::Apply
        )
    }
}

impl fmt::Display for ApplyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Backup => "backup",
            Self::WriteTemp => "write",
            Self::GenerateTest => "generate",
            Self::Validate => "validate",
            Self::Apply => "apply",
            Self::Success => "success",
            Self::Rollback => "rollback",
            Self::Error => "error",
        };
        write!(f, "{name}")
    }
}

/// Terminal outcome of one workflow run.
#[derive(Debug)]
pub struct ApplyResult {
    pub success: bool,
    pub stage: ApplyStage,
    pub message: String,
    pub error: Option<String>,
    pub rollback_error: Option<String>,
}

impl ApplyResult {
    fn ok(stage: ApplyStage, message: impl Into<String>) -> Self {
        Self {
            success: true,
            stage,
            message: message.into(),
            error: None,
            rollback_error: None,
        }
    }

    fn failed(message: impl Into<String>, error: &ApplyError) -> Self {
        Self {
            success: false,
            stage: ApplyStage::Error,
            message: message.into(),
            error: Some(error.to_string()),
            rollback_error: None,
        }
    }
}

/// Filesystem locations one workflow operates on.
#[derive(Debug, Clone)]
pub struct WorkflowPaths {
    pub config_file: PathBuf,
    pub artifact: PathBuf,
    pub test_artifact: PathBuf,
    pub quarantine: PathBuf,
    pub backup_dir: PathBuf,
}

impl WorkflowPaths {
    pub fn from_config(config: &AppConfig) -> Self {
        let config_file = config.paths.config_file.clone();
        let artifact = config.artifact_path();
        Self {
            test_artifact: config_paths::test_artifact_path(&artifact),
            quarantine: config_paths::quarantine_path(&config_file),
            backup_dir: config.backup_dir(),
            config_file,
            artifact,
        }
    }
}

/// One apply run. Constructed per request, consumed by [`run`](Self::run).
pub struct ApplyWorkflow<'a> {
    paths: WorkflowPaths,
    commands: &'a Commands,
    limits: &'a Limits,
    settings: &'a GrubSettings,
    runner: &'a dyn CommandRunner,
    commit: bool,
    store: BackupStore,
    backup: Option<BackupRecord>,
    stage: ApplyStage,
}

impl<'a> ApplyWorkflow<'a> {
    pub fn new(
        paths: WorkflowPaths,
        commands: &'a Commands,
        limits: &'a Limits,
        settings: &'a GrubSettings,
        runner: &'a dyn CommandRunner,
        commit: bool,
    ) -> Self {
        let store = BackupStore::new(paths.backup_dir.clone(), &paths.config_file);
        Self {
            paths,
            commands,
            limits,
            settings,
            runner,
            commit,
            store,
            backup: None,
            stage: ApplyStage::Idle,
        }
    }

    /// Drive the state machine to a terminal stage.
    pub async fn run(mut self) -> ApplyResult {
        if let Err(reason) = self.settings.validate() {
            let err = ApplyError::Config(reason);
            return ApplyResult::failed(format!("nothing applied: {err}"), &err);
        }

        self.stage = ApplyStage::Backup;
        loop {
            info!(stage = %self.stage, "entering stage");
            let step = match self.stage {
                ApplyStage::Backup => self.backup_stage(),
                ApplyStage::WriteTemp => self.write_stage(),
                ApplyStage::GenerateTest => self.generate_stage().await,
                ApplyStage::Validate => self.validate_stage().await,
                ApplyStage::Apply => self.apply_stage().await,
                ApplyStage::Success => return self.finish(),
                ApplyStage::Idle | ApplyStage::Rollback | ApplyStage::Error => {
                    // Terminal stages are handled before dispatch.
                    let err = ApplyError::Config(format!("unexpected stage {}", self.stage));
                    return ApplyResult::failed("internal stage error", &err);
                }
            };

            match step {
                Ok(next) => self.stage = next,
                Err(e) => return self.fail(e).await,
            }
        }
    }

    fn backup_stage(&mut self) -> Result<ApplyStage, ApplyError> {
        let record = self.store.create(&self.paths.config_file, BackupKind::Auto)?;
        self.backup = Some(record);
        Ok(ApplyStage::WriteTemp)
    }

    fn write_stage(&mut self) -> Result<ApplyStage, ApplyError> {
        let current = fileio::read_to_string(&self.paths.config_file)?;
        let base = GrubDefaults::parse(&current);
        let merged = self.settings.merge_into(&base);
        let content = merged.format();

        fileio::write_atomic(&self.paths.config_file, &content)?;

        // Read back and verify the write landed intact.
        let written = fileio::read_to_string(&self.paths.config_file)?;
        if written.len() != content.len() {
            return Err(ApplyError::Validation(format!(
                "written size mismatch: {} != {}",
                written.len(),
                content.len()
            )));
        }
        let reparsed = GrubDefaults::parse(&written);
        if reparsed.is_empty() {
            return Err(ApplyError::Validation(
                "written configuration parses to nothing".to_string(),
            ));
        }
        for key in MANDATORY_KEYS {
            if !reparsed.contains(key) {
                return Err(ApplyError::Validation(format!(
                    "mandatory key {key} missing after write"
                )));
            }
        }

        Ok(ApplyStage::GenerateTest)
    }

    async fn generate_stage(&mut self) -> Result<ApplyStage, ApplyError> {
        let test = self.paths.test_artifact.to_string_lossy().into_owned();
        let output = self
            .runner
            .run(
                &self.commands.generate,
                &["-o", &test],
                self.limits.command_timeout(),
            )
            .await?;
        if !output.success() {
            return Err(ApplyError::command(
                &self.commands.generate,
                output.exit_code,
                &output.stderr,
            ));
        }

        self.check_artifact(&self.paths.test_artifact, "test artifact")?;
        Ok(ApplyStage::Validate)
    }

    async fn validate_stage(&mut self) -> Result<ApplyStage, ApplyError> {
        let test = self.paths.test_artifact.to_string_lossy().into_owned();
        let output = self
            .runner
            .run(&self.commands.check, &[&test], self.limits.command_timeout())
            .await?;
        if !output.success() {
            return Err(ApplyError::command(
                &self.commands.check,
                output.exit_code,
                &output.stderr,
            ));
        }

        let check = validator::validate_file(&self.paths.test_artifact, self.limits.min_artifact_lines);
        if !check.is_valid {
            return Err(ApplyError::Validation(check.message().to_string()));
        }

        let content = fileio::read_to_string(&self.paths.test_artifact)?;
        if !content.contains("### BEGIN") || !content.contains("### END") {
            return Err(ApplyError::Validation(
                "test artifact is missing structural markers".to_string(),
            ));
        }
        if menu::count_entries(&content) == 0 {
            return Err(ApplyError::Validation(
                "test artifact contains no boot entries".to_string(),
            ));
        }
        for line in content.lines() {
            if let Some(title) = menu::extract_entry_title(line) {
                debug!(title, id = ?menu::extract_entry_id(line), "boot entry");
            }
        }

        Ok(ApplyStage::Apply)
    }

    async fn apply_stage(&mut self) -> Result<ApplyStage, ApplyError> {
        if !self.commit {
            info!("check-only run, skipping final apply");
            return Ok(ApplyStage::Success);
        }

        fileio::promote(&self.paths.test_artifact, &self.paths.artifact)?;

        let output = self
            .runner
            .run(&self.commands.update, &[], self.limits.command_timeout())
            .await?;
        if !output.success() {
            return Err(ApplyError::command(
                &self.commands.update,
                output.exit_code,
                &output.stderr,
            ));
        }

        self.check_artifact(&self.paths.artifact, "final artifact")?;
        Ok(ApplyStage::Success)
    }

    fn check_artifact(&self, path: &Path, what: &str) -> Result<(), ApplyError> {
        verify_artifact(path, self.limits.min_artifact_bytes, what)
    }

    fn finish(mut self) -> ApplyResult {
        self.cleanup();
        let message = if self.commit {
            "configuration applied".to_string()
        } else {
            "check passed, final apply skipped".to_string()
        };
        ApplyResult::ok(ApplyStage::Success, message)
    }

    /// Remove the test artifact and prune old backups. Failures here are
    /// logged, never fatal.
    fn cleanup(&mut self) {
        if self.paths.test_artifact.exists() {
            if let Err(e) = std::fs::remove_file(&self.paths.test_artifact) {
                warn!(error = %e, "failed to remove test artifact");
            }
        }
        if let Err(e) = self.store.prune(self.limits.keep_manual_backups) {
            warn!(error = %e, "failed to prune backups");
        }
    }

    async fn fail(mut self, cause: ApplyError) -> ApplyResult {
        error!(stage = %self.stage, error = %cause, "stage failed");

        if !self.stage.needs_rollback() {
            return ApplyResult::failed(
                format!("nothing applied, no changes were made: {cause}"),
                &cause,
            );
        }

        self.stage = ApplyStage::Rollback;
        match self.rollback().await {
            Ok(()) => ApplyResult::failed(
                format!("change rejected, original configuration restored, reason: {cause}"),
                &cause,
            ),
            Err(rollback_err) => {
                error!(error = %rollback_err, "rollback failed");
                let mut result = ApplyResult::failed(
                    format!(
                        "change rejected AND rollback failed, manual intervention required: {cause}"
                    ),
                    &cause,
                );
                result.rollback_error = Some(rollback_err.to_string());
                result
            }
        }
    }

    async fn rollback(&mut self) -> Result<(), ApplyError> {
        // Quarantine the rejected live file for inspection. A repeated
        // failure overwrites the previous quarantine.
        if let Err(e) = std::fs::copy(&self.paths.config_file, &self.paths.quarantine) {
            warn!(error = %e, "could not quarantine rejected file");
        }
        if self.paths.test_artifact.exists() {
            let _ = std::fs::remove_file(&self.paths.test_artifact);
        }

        let record = self.backup.as_ref().ok_or_else(|| {
            ApplyError::Rollback("no backup was recorded for this run".to_string())
        })?;

        restore_and_regenerate(
            &self.store,
            record,
            &self.paths.config_file,
            &self.paths.artifact,
            self.commands,
            self.limits,
            self.runner,
        )
        .await
    }
}

/// Size and entry-marker checks shared by the generate, apply and
/// rollback paths.
fn verify_artifact(path: &Path, min_bytes: u64, what: &str) -> Result<(), ApplyError> {
    let size = std::fs::metadata(path)
        .map_err(|e| ApplyError::io(format!("checking {what} {}", path.display()), e))?
        .len();
    if size <= min_bytes {
        return Err(ApplyError::Validation(format!(
            "{what} is suspiciously small: {size} bytes <= {min_bytes}"
        )));
    }

    let content = fileio::read_to_string(path)?;
    if menu::count_entries(&content) == 0 {
        return Err(ApplyError::Validation(format!(
            "{what} contains no boot entries"
        )));
    }
    Ok(())
}

/// Restore a backup over the live file and rebuild the artifact.
///
/// Shared by workflow rollback and user-invoked restores. Every failure
/// surfaces as `ApplyError::Rollback`: past this point the live file may
/// not match any artifact on disk.
pub(crate) async fn restore_and_regenerate(
    store: &BackupStore,
    record: &BackupRecord,
    config_file: &Path,
    artifact: &Path,
    commands: &Commands,
    limits: &Limits,
    runner: &dyn CommandRunner,
) -> Result<(), ApplyError> {
    store.restore(record, config_file)?;

    let output = runner
        .run(&commands.update, &[], limits.command_timeout())
        .await
        .map_err(|e| ApplyError::Rollback(format!("regeneration after restore failed: {e}")))?;
    if !output.success() {
        return Err(ApplyError::Rollback(format!(
            "regeneration after restore exited with {:?}: {}",
            output.exit_code,
            output.stderr.trim()
        )));
    }

    verify_artifact(artifact, limits.min_artifact_bytes, "rebuilt artifact")
        .map_err(|e| ApplyError::Rollback(e.to_string()))?;

    info!(from = %record.path.display(), "restore and regeneration complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::runner::CommandOutput;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    const LIVE_CONTENT: &str = "GRUB_TIMEOUT=5\nGRUB_DEFAULT=0\nGRUB_CMDLINE_LINUX=\"quiet\"\n";

    /// A canned response for one command invocation, with optional
    /// filesystem side effects applied before returning.
    #[derive(Default)]
    struct Scripted {
        exit_code: i32,
        stderr: String,
        write: Option<(PathBuf, String)>,
        remove: Option<PathBuf>,
        timeout: bool,
    }

    impl Scripted {
        fn ok() -> Self {
            Self::default()
        }

        fn ok_writing(path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
            Self {
                write: Some((path.into(), content.into())),
                ..Self::default()
            }
        }

        fn failing(exit_code: i32, stderr: &str) -> Self {
            Self {
                exit_code,
                stderr: stderr.to_string(),
                ..Self::default()
            }
        }
    }

    struct ScriptedRunner {
        responses: Mutex<HashMap<String, VecDeque<Scripted>>>,
    }

    impl ScriptedRunner {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
            }
        }

        fn script(self, program: &str, response: Scripted) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push_back(response);
            self
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(
            &self,
            program: &str,
            _args: &[&str],
            timeout: Duration,
        ) -> Result<CommandOutput, ApplyError> {
            let scripted = self
                .responses
                .lock()
                .unwrap()
                .get_mut(program)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| panic!("unscripted command: {program}"));

            if let Some((path, content)) = &scripted.write {
                std::fs::write(path, content).unwrap();
            }
            if let Some(path) = &scripted.remove {
                if path.is_dir() {
                    std::fs::remove_dir_all(path).unwrap();
                } else {
                    std::fs::remove_file(path).unwrap();
                }
            }
            if scripted.timeout {
                return Err(ApplyError::Timeout {
                    command: program.to_string(),
                    limit: timeout,
                });
            }

            Ok(CommandOutput {
                exit_code: Some(scripted.exit_code),
                stdout: String::new(),
                stderr: scripted.stderr.clone(),
            })
        }
    }

    struct Env {
        _dir: TempDir,
        paths: WorkflowPaths,
        commands: Commands,
        limits: Limits,
    }

    impl Env {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config_file = dir.path().join("grub");
            std::fs::write(&config_file, LIVE_CONTENT).unwrap();
            let artifact = dir.path().join("grub.cfg");

            let paths = WorkflowPaths {
                test_artifact: config_paths::test_artifact_path(&artifact),
                quarantine: config_paths::quarantine_path(&config_file),
                backup_dir: dir.path().join("backups"),
                config_file,
                artifact,
            };
            let limits = Limits {
                min_artifact_bytes: 50,
                min_artifact_lines: 3,
                ..Limits::default()
            };
            Self {
                _dir: dir,
                paths,
                commands: Commands::default(),
                limits,
            }
        }

        async fn apply(
            &self,
            settings: &GrubSettings,
            runner: &ScriptedRunner,
            commit: bool,
        ) -> ApplyResult {
            ApplyWorkflow::new(
                self.paths.clone(),
                &self.commands,
                &self.limits,
                settings,
                runner,
                commit,
            )
            .run()
            .await
        }

        fn live(&self) -> String {
            std::fs::read_to_string(&self.paths.config_file).unwrap()
        }
    }

    /// Plausible generated artifact: markers, entries, enough lines.
    fn good_artifact() -> String {
        let mut out = String::from("### BEGIN /etc/grub.d/10_linux ###\n");
        for i in 0..6 {
            out.push_str(&format!(
                "menuentry 'Linux {i}' --id 'linux-{i}' {{\n  linux /vmlinuz\n}}\n"
            ));
        }
        out.push_str("### END /etc/grub.d/10_linux ###\n");
        out
    }

    fn settings(timeout: u32) -> GrubSettings {
        GrubSettings {
            timeout,
            ..GrubSettings::default()
        }
    }

    #[tokio::test]
    async fn test_successful_apply_updates_live_file() {
        let env = Env::new();
        let runner = ScriptedRunner::new()
            .script(
                "grub-mkconfig",
                Scripted::ok_writing(&env.paths.test_artifact, good_artifact()),
            )
            .script("grub-script-check", Scripted::ok())
            .script("update-grub", Scripted::ok());

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(result.success, "unexpected failure: {:?}", result);
        assert_eq!(result.stage, ApplyStage::Success);
        assert!(env.live().contains("GRUB_TIMEOUT=10"));
        // Unmanaged keys survive the merge
        assert!(env.live().contains("GRUB_CMDLINE_LINUX"));
        // Test artifact was promoted and the temp copy removed
        assert!(env.paths.artifact.exists());
        assert!(!env.paths.test_artifact.exists());
    }

    #[tokio::test]
    async fn test_small_artifact_rolls_back() {
        let env = Env::new();
        let runner = ScriptedRunner::new()
            .script(
                "grub-mkconfig",
                Scripted::ok_writing(&env.paths.test_artifact, "menuentry 'x' {}\n"),
            )
            .script(
                "update-grub",
                Scripted::ok_writing(&env.paths.artifact, good_artifact()),
            );

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(!result.success);
        assert_eq!(result.stage, ApplyStage::Error);
        assert!(result.error.as_deref().unwrap().contains("small"));
        assert!(result.rollback_error.is_none());
        assert!(result.message.contains("original configuration restored"));
        assert_eq!(env.live(), LIVE_CONTENT);
    }

    #[tokio::test]
    async fn test_syntax_check_failure_rolls_back() {
        let env = Env::new();
        let runner = ScriptedRunner::new()
            .script(
                "grub-mkconfig",
                Scripted::ok_writing(&env.paths.test_artifact, good_artifact()),
            )
            .script("grub-script-check", Scripted::failing(1, "syntax error at line 3"))
            .script(
                "update-grub",
                Scripted::ok_writing(&env.paths.artifact, good_artifact()),
            );

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("syntax error"));
        assert!(result.rollback_error.is_none());
        assert_eq!(env.live(), LIVE_CONTENT);
        assert!(!env.paths.test_artifact.exists());
    }

    #[tokio::test]
    async fn test_failed_rollback_reports_both_errors() {
        let env = Env::new();
        // The generate step destroys the backup directory, so the
        // rollback's restore has nothing to copy back.
        let runner = ScriptedRunner::new().script(
            "grub-mkconfig",
            Scripted {
                exit_code: 1,
                stderr: "generation exploded".to_string(),
                remove: Some(env.paths.backup_dir.clone()),
                ..Scripted::default()
            },
        );

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("generation exploded"));
        assert!(result.rollback_error.is_some());
        assert!(result.message.contains("manual intervention"));
        assert!(env.paths.quarantine.exists());
    }

    #[tokio::test]
    async fn test_generate_timeout_quarantines_and_rolls_back() {
        let env = Env::new();
        let runner = ScriptedRunner::new()
            .script(
                "grub-mkconfig",
                Scripted {
                    timeout: true,
                    ..Scripted::default()
                },
            )
            .script(
                "update-grub",
                Scripted::ok_writing(&env.paths.artifact, good_artifact()),
            );

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timed out"));
        assert!(result.rollback_error.is_none());
        assert!(env.paths.quarantine.exists());
        assert_eq!(env.live(), LIVE_CONTENT);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let env = Env::new();

        for _ in 0..2 {
            let runner = ScriptedRunner::new()
                .script(
                    "grub-mkconfig",
                    Scripted::ok_writing(&env.paths.test_artifact, good_artifact()),
                )
                .script("grub-script-check", Scripted::ok())
                .script("update-grub", Scripted::ok());

            let result = env.apply(&settings(10), &runner, true).await;
            assert!(result.success, "{:?}", result);
            assert!(!env.paths.test_artifact.exists());
        }

        assert!(env.live().contains("GRUB_TIMEOUT=10"));
    }

    #[tokio::test]
    async fn test_check_only_skips_final_apply() {
        let env = Env::new();
        // No update-grub scripted: the runner panics if it gets called.
        let runner = ScriptedRunner::new()
            .script(
                "grub-mkconfig",
                Scripted::ok_writing(&env.paths.test_artifact, good_artifact()),
            )
            .script("grub-script-check", Scripted::ok());

        let result = env.apply(&settings(10), &runner, false).await;

        assert!(result.success, "{:?}", result);
        assert!(result.message.contains("skipped"));
        assert!(!env.paths.artifact.exists());
        assert!(!env.paths.test_artifact.exists());
    }

    #[tokio::test]
    async fn test_empty_live_file_aborts_before_mutation() {
        let env = Env::new();
        std::fs::write(&env.paths.config_file, "").unwrap();
        let runner = ScriptedRunner::new();

        let result = env.apply(&settings(10), &runner, true).await;

        assert!(!result.success);
        assert!(result.message.contains("no changes were made"));
        assert!(result.rollback_error.is_none());
        assert!(!env.paths.quarantine.exists());
        assert!(!env.paths.backup_dir.exists());
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected_up_front() {
        let env = Env::new();
        let runner = ScriptedRunner::new();
        let bad = GrubSettings {
            default_entry: String::new(),
            ..GrubSettings::default()
        };

        let result = env.apply(&bad, &runner, true).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("invalid configuration"));
        assert_eq!(env.live(), LIVE_CONTENT);
    }

    #[tokio::test]
    async fn test_repeated_failure_overwrites_quarantine() {
        let env = Env::new();

        for _ in 0..2 {
            let runner = ScriptedRunner::new()
                .script(
                    "grub-mkconfig",
                    Scripted::failing(1, "boom"),
                )
                .script(
                    "update-grub",
                    Scripted::ok_writing(&env.paths.artifact, good_artifact()),
                );
            let result = env.apply(&settings(10), &runner, true).await;
            assert!(!result.success);
        }

        assert!(env.paths.quarantine.exists());
        // Only the one quarantine file, no numbered siblings
        let siblings: Vec<_> = std::fs::read_dir(env.paths.config_file.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("corrupted"))
            .collect();
        assert_eq!(siblings.len(), 1);
    }
}
