//! Captured file subtrees for cache entries

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

/// A captured set of files, keyed by path relative to the workspace
/// the snapshot was taken from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture the declared paths from a workspace. Each path may be a
    /// single file or a directory subtree. A declared path that does
    /// not exist is an error: saving a cache for paths the job never
    /// produced is a misconfiguration worth surfacing.
    pub fn capture(root: &Path, paths: &[String]) -> io::Result<Self> {
        let mut snapshot = Self::new();
        for declared in paths {
            let absolute = root.join(declared);
            if absolute.is_dir() {
                snapshot.capture_dir(root, &absolute)?;
            } else if absolute.is_file() {
                snapshot.capture_file(root, &absolute)?;
            } else {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("declared cache path '{}' does not exist", declared),
                ));
            }
        }
        Ok(snapshot)
    }

    fn capture_dir(&mut self, root: &Path, dir: &Path) -> io::Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                self.capture_dir(root, &path)?;
            } else if path.is_file() {
                self.capture_file(root, &path)?;
            }
        }
        Ok(())
    }

    fn capture_file(&mut self, root: &Path, file: &Path) -> io::Result<()> {
        let relative = file
            .strip_prefix(root)
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("cache path '{}' escapes the workspace", file.display()),
                )
            })?
            .to_path_buf();
        let contents = std::fs::read(file)?;
        self.files.insert(relative, contents);
        Ok(())
    }

    /// Materialize the captured files into a workspace, creating parent
    /// directories as needed.
    pub fn restore(&self, root: &Path) -> io::Result<()> {
        for (relative, contents) in &self.files {
            let target = root.join(relative);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(target, contents)?;
        }
        Ok(())
    }

    /// Iterate over (relative path, contents) pairs
    pub fn files(&self) -> impl Iterator<Item = (&PathBuf, &Vec<u8>)> {
        self.files.iter()
    }

    pub fn insert(&mut self, relative: PathBuf, contents: Vec<u8>) {
        self.files.insert(relative, contents);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_and_restore_round_trip() {
        let source = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(source.path().join("deps/sub")).unwrap();
        std::fs::write(source.path().join("deps/a.txt"), "alpha").unwrap();
        std::fs::write(source.path().join("deps/sub/b.txt"), "beta").unwrap();
        std::fs::write(source.path().join("unrelated.txt"), "nope").unwrap();

        let snapshot = Snapshot::capture(source.path(), &["deps".to_string()]).unwrap();
        assert_eq!(snapshot.len(), 2);

        let target = tempfile::tempdir().unwrap();
        snapshot.restore(target.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(target.path().join("deps/a.txt")).unwrap(),
            "alpha"
        );
        assert_eq!(
            std::fs::read_to_string(target.path().join("deps/sub/b.txt")).unwrap(),
            "beta"
        );
        assert!(!target.path().join("unrelated.txt").exists());
    }

    #[test]
    fn test_capture_single_file() {
        let source = tempfile::tempdir().unwrap();
        std::fs::write(source.path().join("lockfile"), "pinned").unwrap();

        let snapshot = Snapshot::capture(source.path(), &["lockfile".to_string()]).unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_capture_missing_path_fails() {
        let source = tempfile::tempdir().unwrap();
        let result = Snapshot::capture(source.path(), &["missing".to_string()]);
        assert!(result.is_err());
    }
}
