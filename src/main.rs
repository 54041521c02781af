mod apply;
mod config;
mod logging;
mod menu;

use anyhow::{Context, Result};
use apply::{ApplyManager, ApplyResult, BackupKind};
use clap::{Parser, Subcommand};
use config::{AppConfig, GrubDefaults, GrubSettings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "safegrub")]
#[command(about = "Change bootloader defaults with backup, validation and rollback")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Tool configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Suppress normal output
    #[arg(long, global = true)]
    quiet: bool,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply changes to the bootloader defaults
    Apply {
        /// Menu timeout in seconds
        #[arg(long)]
        timeout: Option<u32>,

        /// Default boot entry (index, id, or "saved")
        #[arg(long)]
        default_entry: Option<String>,

        /// Hide the menu until a key is pressed
        #[arg(long)]
        hidden_timeout: Option<bool>,

        /// Remember the last booted entry
        #[arg(long)]
        save_default: Option<bool>,

        /// Flatten submenus into the top-level menu
        #[arg(long)]
        disable_submenu: Option<bool>,

        /// Skip recovery-mode entries
        #[arg(long)]
        disable_recovery: Option<bool>,

        /// Skip probing for other operating systems
        #[arg(long)]
        disable_os_prober: Option<bool>,

        /// Force console terminal output
        #[arg(long)]
        terminal_console: Option<bool>,

        /// Graphics mode, e.g. "1920x1080" or "auto"
        #[arg(long)]
        gfxmode: Option<String>,

        /// Run every check but skip the final promotion
        #[arg(long)]
        check_only: bool,
    },

    /// Show the current defaults file
    Show,

    /// Run the apply pipeline on the current settings without committing
    Check,

    /// List available backups
    Backups,

    /// Take a manual backup of the defaults file
    Backup,

    /// Restore a backup (most recent when no path is given)
    Restore {
        /// Backup file to restore
        path: Option<PathBuf>,
    },

    /// Delete old backups
    Prune {
        /// Manual backups to keep
        #[arg(long)]
        keep: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Debug runs keep a file log even when none was asked for.
    let log_file = match cli.log_file.clone() {
        Some(path) => Some(path),
        None if cli.debug => Some(logging::default_log_path()?),
        None => None,
    };
    let _log_guard = logging::init_logging(cli.debug, cli.quiet, log_file)?;

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Apply {
            timeout,
            default_entry,
            hidden_timeout,
            save_default,
            disable_submenu,
            disable_recovery,
            disable_os_prober,
            terminal_console,
            gfxmode,
            check_only,
        } => {
            let mut settings = current_settings(&config)?;
            if let Some(timeout) = timeout {
                settings.timeout = timeout;
            }
            if let Some(entry) = default_entry {
                settings.default_entry = entry;
            }
            if let Some(v) = hidden_timeout {
                settings.hidden_timeout = v;
            }
            if let Some(v) = save_default {
                settings.save_default = v;
            }
            if let Some(v) = disable_submenu {
                settings.disable_submenu = v;
            }
            if let Some(v) = disable_recovery {
                settings.disable_recovery = v;
            }
            if let Some(v) = disable_os_prober {
                settings.disable_os_prober = v;
            }
            if let Some(v) = terminal_console {
                settings.terminal_console = v;
            }
            if let Some(mode) = gfxmode {
                settings.gfxmode = mode;
            }

            let manager = ApplyManager::new(config);
            let result = manager.apply(&settings, !check_only).await;
            report(result);
        }

        Commands::Show => {
            let text = std::fs::read_to_string(&config.paths.config_file).with_context(|| {
                format!("failed to read {}", config.paths.config_file.display())
            })?;
            for (key, value) in GrubDefaults::parse(&text).iter() {
                println!("{key}={value}");
            }
        }

        Commands::Check => {
            let settings = current_settings(&config)?;
            let manager = ApplyManager::new(config);
            let result = manager.apply(&settings, false).await;
            report(result);
        }

        Commands::Backups => {
            let manager = ApplyManager::new(config);
            let backups = manager.list_backups()?;
            if backups.is_empty() {
                println!("(no backups)");
            }
            for record in backups {
                let kind = match record.kind {
                    BackupKind::Auto => "auto",
                    BackupKind::Manual => "manual",
                };
                println!(
                    "{}  {:6}  {}",
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    kind,
                    record.path.display()
                );
            }
        }

        Commands::Backup => {
            let manager = ApplyManager::new(config);
            let record = manager.create_manual_backup()?;
            println!("backup created: {}", record.path.display());
        }

        Commands::Restore { path } => {
            let manager = ApplyManager::new(config);
            let backups = manager.list_backups()?;
            let record = match path {
                Some(path) => backups
                    .into_iter()
                    .find(|r| r.path == path)
                    .with_context(|| format!("no such backup: {}", path.display()))?,
                None => backups
                    .into_iter()
                    .next()
                    .context("no backups available")?,
            };
            let result = manager.restore_backup(&record).await;
            report(result);
        }

        Commands::Prune { keep } => {
            let keep = keep.unwrap_or(config.limits.keep_manual_backups);
            let manager = ApplyManager::new(config);
            let removed = manager.prune_backups(keep)?;
            println!("removed {removed} backup(s)");
        }
    }

    Ok(())
}

/// Settings as currently written in the live defaults file.
fn current_settings(config: &AppConfig) -> Result<GrubSettings> {
    let text = std::fs::read_to_string(&config.paths.config_file)
        .with_context(|| format!("failed to read {}", config.paths.config_file.display()))?;
    Ok(GrubSettings::from_defaults(&GrubDefaults::parse(&text)))
}

/// Print the outcome and exit nonzero on failure.
fn report(result: ApplyResult) {
    if result.success {
        println!("✓ {}", result.message);
        return;
    }

    eprintln!("✗ {}", result.message);
    if let Some(rollback_error) = &result.rollback_error {
        eprintln!("  rollback: {rollback_error}");
    }
    std::process::exit(1);
}
