//! Fail-safe apply pipeline for the bootloader configuration
//!
//! The pipeline is a strict sequence:
//! backup, write, test-generate, validate, apply, with rollback on any
//! failure after the backup. Components, leaf to root:
//!
//! - `validator`: read-only file inspection
//! - `backup`: timestamped backups with restore and prune
//! - `runner`: external command execution behind a trait
//! - `fileio`: atomic read/write/promote primitives
//! - `workflow`: the state machine (the interesting part)
//! - `manager`: serialized entry point owning config and runner

pub mod backup;
pub mod error;
pub mod fileio;
pub mod manager;
pub mod runner;
pub mod validator;
pub mod workflow;

pub use backup::{BackupKind, BackupRecord, BackupStore};
pub use error::ApplyError;
pub use manager::ApplyManager;
pub use runner::{CommandOutput, CommandRunner, SystemRunner};
pub use validator::ValidationResult;
pub use workflow::{ApplyResult, ApplyStage};
