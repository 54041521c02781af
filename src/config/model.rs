//! Desired-configuration model
//!
//! `GrubSettings` is the simplified value the CLI (or any caller) builds
//! and hands to the apply manager. It is deliberately decoupled from the
//! exact defaults-file format: merging it into a `GrubDefaults` rewrites
//! only the managed keys and leaves everything else untouched.

use super::defaults::GrubDefaults;

/// Keys owned by the model. Removed from the base config before merging
/// so that a disabled boolean option disappears from the file (GRUB
/// semantics: absent key == disabled).
const MANAGED_KEYS: [&str; 12] = [
    "GRUB_TIMEOUT",
    "GRUB_DEFAULT",
    "GRUB_TIMEOUT_STYLE",
    "GRUB_SAVEDEFAULT",
    "GRUB_DISABLE_SUBMENU",
    "GRUB_DISABLE_RECOVERY",
    "GRUB_DISABLE_OS_PROBER",
    "GRUB_GFXMODE",
    "GRUB_GFXPAYLOAD_LINUX",
    "GRUB_TERMINAL",
    "GRUB_COLOR_NORMAL",
    "GRUB_COLOR_HIGHLIGHT",
];

/// Immutable desired configuration. Owned by the caller; the workflow
/// only reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrubSettings {
    /// Menu timeout in seconds
    pub timeout: u32,

    /// Default entry: "0", "1", "saved" or a submenu path like "1>2"
    pub default_entry: String,

    /// Hide the menu during the timeout (GRUB_TIMEOUT_STYLE=hidden)
    pub hidden_timeout: bool,

    /// Remember the last booted entry (GRUB_SAVEDEFAULT)
    pub save_default: bool,

    pub disable_submenu: bool,
    pub disable_recovery: bool,
    pub disable_os_prober: bool,

    /// Force console terminal (enables menu colors)
    pub terminal_console: bool,

    /// Graphics mode, e.g. "1920x1080"; empty = unset
    pub gfxmode: String,
    pub gfxpayload_linux: String,

    /// Menu colors as "fg/bg"; empty = unset
    pub color_normal: String,
    pub color_highlight: String,
}

impl Default for GrubSettings {
    fn default() -> Self {
        Self {
            timeout: 5,
            default_entry: "0".to_string(),
            hidden_timeout: false,
            save_default: false,
            disable_submenu: false,
            disable_recovery: false,
            disable_os_prober: false,
            terminal_console: false,
            gfxmode: String::new(),
            gfxpayload_linux: String::new(),
            color_normal: String::new(),
            color_highlight: String::new(),
        }
    }
}

impl GrubSettings {
    /// Build settings from a parsed defaults file, falling back to
    /// defaults for missing or unparseable values.
    pub fn from_defaults(defaults: &GrubDefaults) -> Self {
        let timeout = defaults
            .get("GRUB_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);
        let default_entry = defaults
            .get("GRUB_DEFAULT")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or("0")
            .to_string();

        Self {
            timeout,
            default_entry,
            hidden_timeout: defaults.get("GRUB_TIMEOUT_STYLE") == Some("hidden"),
            save_default: defaults.get("GRUB_SAVEDEFAULT") == Some("true"),
            disable_submenu: defaults.get("GRUB_DISABLE_SUBMENU") == Some("y"),
            disable_recovery: defaults.get("GRUB_DISABLE_RECOVERY") == Some("true"),
            disable_os_prober: defaults.get("GRUB_DISABLE_OS_PROBER") == Some("true"),
            terminal_console: defaults
                .get("GRUB_TERMINAL")
                .is_some_and(|v| v.contains("console")),
            gfxmode: defaults.get("GRUB_GFXMODE").unwrap_or("").to_string(),
            gfxpayload_linux: defaults
                .get("GRUB_GFXPAYLOAD_LINUX")
                .unwrap_or("")
                .to_string(),
            color_normal: defaults.get("GRUB_COLOR_NORMAL").unwrap_or("").to_string(),
            color_highlight: defaults
                .get("GRUB_COLOR_HIGHLIGHT")
                .unwrap_or("")
                .to_string(),
        }
    }

    /// Check the model before anything touches the filesystem.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_entry.trim().is_empty() {
            return Err("default entry must not be empty".to_string());
        }
        Ok(())
    }

    /// Merge this model into `base`, preserving unmanaged keys.
    ///
    /// Managed keys are removed first and rewritten from the model.
    /// Boolean options are only written when enabled.
    pub fn merge_into(&self, base: &GrubDefaults) -> GrubDefaults {
        let mut cfg = base.clone();
        for key in MANAGED_KEYS {
            cfg.remove(key);
        }

        // Always present
        cfg.set("GRUB_TIMEOUT", &self.timeout.to_string());
        let default_entry = self.default_entry.trim();
        cfg.set(
            "GRUB_DEFAULT",
            if default_entry.is_empty() { "0" } else { default_entry },
        );
        cfg.set(
            "GRUB_TIMEOUT_STYLE",
            if self.hidden_timeout { "hidden" } else { "menu" },
        );

        // Present only when enabled
        if self.save_default || default_entry == "saved" {
            cfg.set("GRUB_SAVEDEFAULT", "true");
        }
        if self.disable_submenu {
            cfg.set("GRUB_DISABLE_SUBMENU", "y");
        }
        if self.disable_recovery {
            cfg.set("GRUB_DISABLE_RECOVERY", "true");
        }
        if self.disable_os_prober {
            cfg.set("GRUB_DISABLE_OS_PROBER", "true");
        }
        if self.terminal_console {
            cfg.set("GRUB_TERMINAL", "console");
        }

        // Present when non-empty
        if !self.gfxmode.trim().is_empty() {
            cfg.set("GRUB_GFXMODE", self.gfxmode.trim());
        }
        if !self.gfxpayload_linux.trim().is_empty() {
            cfg.set("GRUB_GFXPAYLOAD_LINUX", self.gfxpayload_linux.trim());
        }
        if !self.color_normal.trim().is_empty() {
            cfg.set("GRUB_COLOR_NORMAL", self.color_normal.trim());
        }
        if !self.color_highlight.trim().is_empty() {
            cfg.set("GRUB_COLOR_HIGHLIGHT", self.color_highlight.trim());
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> GrubDefaults {
        GrubDefaults::parse(
            "GRUB_DEFAULT=0\nGRUB_TIMEOUT=5\nGRUB_CMDLINE_LINUX_DEFAULT=\"quiet splash\"\nGRUB_DISABLE_RECOVERY=true\n",
        )
    }

    #[test]
    fn test_from_defaults() {
        let settings = GrubSettings::from_defaults(&base());
        assert_eq!(settings.timeout, 5);
        assert_eq!(settings.default_entry, "0");
        assert!(settings.disable_recovery);
        assert!(!settings.hidden_timeout);
    }

    #[test]
    fn test_from_defaults_bad_timeout_falls_back() {
        let defaults = GrubDefaults::parse("GRUB_TIMEOUT=abc\n");
        let settings = GrubSettings::from_defaults(&defaults);
        assert_eq!(settings.timeout, 5);
    }

    #[test]
    fn test_merge_preserves_unmanaged_keys() {
        let settings = GrubSettings {
            timeout: 10,
            ..Default::default()
        };
        let merged = settings.merge_into(&base());
        assert_eq!(merged.get("GRUB_TIMEOUT"), Some("10"));
        assert_eq!(merged.get("GRUB_CMDLINE_LINUX_DEFAULT"), Some("quiet splash"));
    }

    #[test]
    fn test_merge_drops_disabled_booleans() {
        // base has GRUB_DISABLE_RECOVERY=true; model disables it
        let settings = GrubSettings::default();
        let merged = settings.merge_into(&base());
        assert!(!merged.contains("GRUB_DISABLE_RECOVERY"));
        assert!(!merged.contains("GRUB_SAVEDEFAULT"));
    }

    #[test]
    fn test_merge_saved_default_implies_savedefault() {
        let settings = GrubSettings {
            default_entry: "saved".to_string(),
            ..Default::default()
        };
        let merged = settings.merge_into(&base());
        assert_eq!(merged.get("GRUB_DEFAULT"), Some("saved"));
        assert_eq!(merged.get("GRUB_SAVEDEFAULT"), Some("true"));
    }

    #[test]
    fn test_merge_timeout_style() {
        let settings = GrubSettings {
            hidden_timeout: true,
            ..Default::default()
        };
        let merged = settings.merge_into(&base());
        assert_eq!(merged.get("GRUB_TIMEOUT_STYLE"), Some("hidden"));
    }

    #[test]
    fn test_validate_rejects_empty_default() {
        let settings = GrubSettings {
            default_entry: "  ".to_string(),
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert!(GrubSettings::default().validate().is_ok());
    }

    #[test]
    fn test_round_trip_model() {
        let settings = GrubSettings {
            timeout: 30,
            default_entry: "1>2".to_string(),
            hidden_timeout: true,
            disable_os_prober: true,
            gfxmode: "1024x768".to_string(),
            color_normal: "white/black".to_string(),
            ..Default::default()
        };
        let merged = settings.merge_into(&GrubDefaults::default());
        let reread = GrubSettings::from_defaults(&merged);
        assert_eq!(settings, reread);
    }
}
