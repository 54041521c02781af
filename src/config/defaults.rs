//! Reading and writing the `/etc/default/grub` KEY=VALUE format

/// Keys that must be present in a written configuration file
pub const MANDATORY_KEYS: [&str; 2] = ["GRUB_TIMEOUT", "GRUB_DEFAULT"];

/// Ordered KEY=VALUE representation of a defaults file.
///
/// Key order and unknown keys are preserved across a parse/format round
/// trip so that applying a settings change never discards configuration
/// the tool does not manage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrubDefaults {
    entries: Vec<(String, String)>,
}

impl GrubDefaults {
    /// Parse raw defaults-file content.
    ///
    /// Blank lines, comments and lines without `=` are skipped. Matching
    /// surrounding quotes are stripped from values.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        for raw_line in text.lines() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            entries.push((key.to_string(), unquote(value.trim()).to_string()));
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Set a key, replacing the existing value in place or appending.
    pub fn set(&mut self, key: &str, value: &str) {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value.to_string();
        } else {
            self.entries.push((key.to_string(), value.to_string()));
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.entries.retain(|(k, _)| k != key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Render the file content, quoting values where the shell requires it.
    pub fn format(&self) -> String {
        let mut lines = vec![
            "# Managed by safegrub - managed keys are rewritten on apply".to_string(),
            String::new(),
        ];
        for (key, value) in &self.entries {
            let needs_quotes = value.chars().any(char::is_whitespace)
                || value.contains(['$', '`', '"', '\'']);
            if needs_quotes {
                let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                lines.push(format!("{key}=\"{escaped}\""));
            } else {
                lines.push(format!("{key}={value}"));
            }
        }
        lines.join("\n") + "\n"
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        if (first == b'"' || first == b'\'') && bytes[bytes.len() - 1] == first {
            return &value[1..value.len() - 1];
        }
    }
    value
}
