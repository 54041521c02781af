//! Menu entry parsing utilities
//!
//! Pure helpers for inspecting generated `grub.cfg` content. The apply
//! workflow only needs these as a read-only validator: counting boot
//! entries and pulling identifiers out of `menuentry` lines.

use regex::Regex;
use std::sync::OnceLock;

/// Marker that opens a boot entry in a generated config
pub const ENTRY_MARKER: &str = "menuentry ";

fn explicit_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // --id foo / --id=foo / --id 'foo' / --id "foo"
    RE.get_or_init(|| Regex::new(r#"--id(?:=|\s+)['"]?([^'"\s]+)"#).expect("valid regex"))
}

fn dynamic_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // $menuentry_id_option 'foo' (grub-mkconfig's generated form)
    RE.get_or_init(|| {
        Regex::new(r#"\$\{?menuentry_id_option\}?\s+['"]([^'"]+)['"]"#).expect("valid regex")
    })
}

fn title_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*menuentry\b[^'"]*['"]([^'"]+)['"]"#).expect("valid regex"))
}

/// Extract the identifier from a `menuentry` line.
///
/// Handles both the explicit `--id foo` form and the
/// `$menuentry_id_option 'foo'` form emitted by grub-mkconfig.
pub fn extract_entry_id(line: &str) -> Option<String> {
    if let Some(caps) = explicit_id_re().captures(line) {
        return Some(caps[1].to_string());
    }
    dynamic_id_re()
        .captures(line)
        .map(|caps| caps[1].to_string())
}

/// Extract the human-readable title from a `menuentry` line.
pub fn extract_entry_title(line: &str) -> Option<String> {
    title_re().captures(line).map(|caps| caps[1].to_string())
}

/// Count boot entries in generated config content.
pub fn count_entries(content: &str) -> usize {
    content.matches(ENTRY_MARKER).count()
}
