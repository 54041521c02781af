//! GRUB system paths and artifact discovery

use std::path::{Path, PathBuf};

/// Canonical location of the live configuration file
pub const GRUB_DEFAULT_PATH: &str = "/etc/default/grub";

/// Standard locations of the generated artifact. Some distributions use
/// `/boot/grub2` instead of `/boot/grub`.
pub const GRUB_CFG_PATHS: [&str; 2] = ["/boot/grub/grub.cfg", "/boot/grub2/grub.cfg"];

/// Discover candidate generated-artifact paths: the standard locations
/// plus any `/boot/efi/EFI/<vendor>/grub.cfg`, deduplicated in order.
pub fn discover_artifact_paths() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = GRUB_CFG_PATHS.iter().map(PathBuf::from).collect();

    if let Ok(entries) = std::fs::read_dir("/boot/efi/EFI") {
        let mut efi: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path().join("grub.cfg"))
            .filter(|p| p.is_file())
            .collect();
        efi.sort();
        candidates.extend(efi);
    }

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|p| seen.insert(p.clone()));
    candidates
}

/// The artifact path to use when none is configured: the first
/// discovered path that exists, else the primary standard location.
pub fn default_artifact_path() -> PathBuf {
    discover_artifact_paths()
        .into_iter()
        .find(|p| p.exists())
        .unwrap_or_else(|| PathBuf::from(GRUB_CFG_PATHS[0]))
}

/// Sibling path for the throwaway test artifact.
pub fn test_artifact_path(artifact: &Path) -> PathBuf {
    append_extension(artifact, "test")
}

/// Sibling path quarantining a config file that failed validation.
pub fn quarantine_path(config_file: &Path) -> PathBuf {
    append_extension(config_file, "corrupted")
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(ext);
    path.with_file_name(name)
}
