//! File-backed static deny list
//!
//! For deployments without a key/value store: one fingerprint per line,
//! loaded once at startup into a plain set. Orthogonal to the hot policy —
//! a hit here blocks regardless of any store-side flag.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

/// Immutable set of fingerprints loaded from a file at startup
#[derive(Debug, Default)]
pub struct StaticBlacklist {
    entries: HashSet<String>,
}

impl StaticBlacklist {
    /// Loads the list from a file: blank lines are skipped, surrounding
    /// whitespace is trimmed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read blacklist {}", path.display()))?;
        let entries: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect();
        info!(
            "loaded {} blacklist entries from {}",
            entries.len(),
            path.display()
        );
        Ok(Self { entries })
    }

    pub fn is_blacklisted(&self, fp: &str) -> bool {
        self.entries.contains(fp)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tls-sentry-test-{name}-{}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_trims_and_skips_blanks() {
        let path = write_temp(
            "basic",
            "abc123\n\n  def456  \n\t\nghi789\n",
        );
        let list = StaticBlacklist::load(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(list.len(), 3);
        assert!(list.is_blacklisted("abc123"));
        assert!(list.is_blacklisted("def456"));
        assert!(list.is_blacklisted("ghi789"));
        assert!(!list.is_blacklisted("  def456  "));
        assert!(!list.is_blacklisted("missing"));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let path = std::env::temp_dir().join("tls-sentry-test-definitely-absent");
        assert!(StaticBlacklist::load(&path).is_err());
    }

    #[test]
    fn test_default_is_empty() {
        let list = StaticBlacklist::default();
        assert!(list.is_empty());
        assert!(!list.is_blacklisted("anything"));
    }
}
