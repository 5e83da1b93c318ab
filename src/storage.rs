//! Blob storage boundary.
//!
//! Certificates, keys, documents and raw signatures are stored as opaque
//! blobs addressed by relative `/`-separated paths. [`FsBlobStore`] maps
//! them onto a directory.

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;

/// Opaque blob store.
pub trait BlobStore: Send + Sync {
    /// Write `bytes` at `path`, replacing any existing blob.
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;

    /// Read the blob at `path`.
    fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Whether a blob exists at `path`.
    fn exists(&self, path: &str) -> bool;

    /// Absolute filesystem location of `path`.
    fn path(&self, path: &str) -> Result<PathBuf>;

    /// Remove the blob at `path`. Missing blobs are not an error.
    fn delete(&self, path: &str) -> Result<()>;
}

/// Blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Use `root` as the store directory, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Store directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        if path.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::Storage(format!("invalid blob path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write then rename so readers never see a partial blob.
        let dir = target.parent().unwrap_or(self.root.as_path());
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(&target).map_err(|e| Error::Io(e.error))?;
        log::debug!("Stored blob {} ({} bytes)", path, bytes.len());
        Ok(())
    }

    fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        fs::read(&target).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("blob", path),
            _ => Error::Io(e),
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }

    fn path(&self, path: &str) -> Result<PathBuf> {
        self.resolve(path)
    }

    fn delete(&self, path: &str) -> Result<()> {
        match fs::remove_file(self.resolve(path)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(!store.exists("a/b.txt"));
        store.put("a/b.txt", b"hello").unwrap();
        assert!(store.exists("a/b.txt"));
        assert_eq!(store.get("a/b.txt").unwrap(), b"hello");
        assert_eq!(store.path("a/b.txt").unwrap(), dir.path().join("a/b.txt"));
    }

    #[test]
    fn test_put_replaces_without_leftovers() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        store.put("docs/x.pdf", b"first").unwrap();
        store.put("docs/x.pdf", b"second").unwrap();
        assert_eq!(store.get("docs/x.pdf").unwrap(), b"second");
        let entries: Vec<_> = fs::read_dir(dir.path().join("docs")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_overwrite_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        store.put("x.bin", b"one").unwrap();
        store.put("x.bin", b"two").unwrap();
        assert_eq!(store.get("x.bin").unwrap(), b"two");
        store.delete("x.bin").unwrap();
        store.delete("x.bin").unwrap();
        assert!(!store.exists("x.bin"));
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(matches!(store.get("nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();
        assert!(store.put("../evil", b"x").is_err());
        assert!(store.put("/etc/passwd", b"x").is_err());
        assert!(store.put("a/./b", b"x").is_ok());
        assert!(store.put("", b"x").is_err());
    }
}
