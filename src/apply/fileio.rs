//! Atomic file primitives
//!
//! All live-file and artifact writes go through here so the workflow
//! never leaves a partially written file behind: content lands in a
//! temporary sibling first and is renamed into place.

use super::error::ApplyError;
use std::path::{Path, PathBuf};

/// Read a file as UTF-8 (lossy on invalid bytes).
pub fn read_to_string(path: &Path) -> Result<String, ApplyError> {
    let bytes = std::fs::read(path)
        .map_err(|e| ApplyError::io(format!("reading {}", path.display()), e))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Atomically replace `path` with `content`.
///
/// Writes to a `.tmp` sibling in the same directory, then renames over
/// the destination. The rename is atomic on the same filesystem.
pub fn write_atomic(path: &Path, content: &str) -> Result<(), ApplyError> {
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, content)
        .map_err(|e| ApplyError::io(format!("writing {}", tmp.display()), e))?;

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(ApplyError::io(
            format!("replacing {}", path.display()),
            e,
        ));
    }
    Ok(())
}

/// Atomically promote `src` to `dest` (move, consuming `src`).
///
/// Falls back to copy-then-remove when rename fails (cross-device).
pub fn promote(src: &Path, dest: &Path) -> Result<(), ApplyError> {
    if std::fs::rename(src, dest).is_ok() {
        return Ok(());
    }
    std::fs::copy(src, dest).map_err(|e| {
        ApplyError::io(
            format!("promoting {} to {}", src.display(), dest.display()),
            e,
        )
    })?;
    let _ = std::fs::remove_file(src);
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grub");

        write_atomic(&path, "GRUB_TIMEOUT=5\n").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "GRUB_TIMEOUT=5\n");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("grub");
        std::fs::write(&path, "old").unwrap();

        write_atomic(&path, "new").unwrap();
        assert_eq!(read_to_string(&path).unwrap(), "new");
        // No temp file left behind
        assert!(!dir.path().join("grub.tmp").exists());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = read_to_string(&dir.path().join("absent"));
        assert!(matches!(result, Err(ApplyError::Io { .. })));
    }

    #[test]
    fn test_promote_moves_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("grub.cfg.test");
        let dest = dir.path().join("grub.cfg");
        std::fs::write(&src, "generated").unwrap();
        std::fs::write(&dest, "stale").unwrap();

        promote(&src, &dest).unwrap();
        assert!(!src.exists());
        assert_eq!(read_to_string(&dest).unwrap(), "generated");
    }
}
