//! Cache key template rendering

use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("checksum source '{path}' unreadable: {source}")]
    UnreadableSource {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn checksum_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\{\{\s*checksum\s+"([^"]+)"\s*\}\}"#).unwrap())
}

/// Render a key template against a workspace, substituting every
/// `{{ checksum "file" }}` placeholder with the SHA-256 hex digest of
/// that file. An unreadable checksum source is an error: the key would
/// silently change meaning otherwise.
pub fn render_key(template: &str, workspace: &Path) -> Result<String, KeyError> {
    let re = checksum_placeholder();
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for captures in re.captures_iter(template) {
        let whole = captures.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        let path = captures.get(1).map(|m| m.as_str()).unwrap_or_default();

        rendered.push_str(&template[last..whole.0]);
        rendered.push_str(&checksum_file(&workspace.join(path), path)?);
        last = whole.1;
    }
    rendered.push_str(&template[last..]);

    Ok(rendered)
}

fn checksum_file(file: &Path, declared: &str) -> Result<String, KeyError> {
    let contents = std::fs::read(file).map_err(|source| KeyError::UnreadableSource {
        path: declared.to_string(),
        source,
    })?;
    let digest = Sha256::digest(&contents);
    Ok(format!("{:x}", digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_key_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(render_key("deps-v1", dir.path()).unwrap(), "deps-v1");
    }

    #[test]
    fn test_checksum_substitution() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("setup.py"), "install_requires = []").unwrap();

        let key = render_key("deps-{{ checksum \"setup.py\" }}", dir.path()).unwrap();
        assert!(key.starts_with("deps-"));
        assert_eq!(key.len(), "deps-".len() + 64);
    }

    #[test]
    fn test_same_manifest_same_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.txt"), "pinned").unwrap();

        let first = render_key("k-{{ checksum \"m.txt\" }}", dir.path()).unwrap();
        let second = render_key("k-{{ checksum \"m.txt\" }}", dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_changed_manifest_changes_key() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.txt"), "one").unwrap();
        let first = render_key("k-{{ checksum \"m.txt\" }}", dir.path()).unwrap();

        std::fs::write(dir.path().join("m.txt"), "two").unwrap();
        let second = render_key("k-{{ checksum \"m.txt\" }}", dir.path()).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_multiple_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), "a").unwrap();
        std::fs::write(dir.path().join("b"), "b").unwrap();

        let key = render_key(
            "deps-{{ checksum \"a\" }}-{{ checksum \"b\" }}",
            dir.path(),
        )
        .unwrap();
        assert_eq!(key.matches('-').count(), 2);
    }

    #[test]
    fn test_missing_manifest_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = render_key("deps-{{ checksum \"absent.txt\" }}", dir.path());
        assert!(matches!(result, Err(KeyError::UnreadableSource { .. })));
    }
}
