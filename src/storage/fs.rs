//! Directory-backed blob store.
//!
//! Each object is one file directly under the root directory. Writes land in a
//! temporary sibling first and are renamed over the target, so a concurrent
//! reader sees either the old object or the new one.

use super::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Open (and create if needed) the directory at `root`.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Object keys are flat names; anything that could escape the root is refused.
    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.contains('/')
            || key.contains('\\')
            || key == "."
            || key == ".."
        {
            return Err(StorageError::Backend(format!("invalid object key '{}'", key)));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: Vec<u8>, _content_type: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        let tmp = self.root.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));

        if let Err(e) = fs::write(&tmp, &data).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.path_for(key)?;
        Ok(fs::try_exists(&path).await?)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert_eq!(store.get("missing.wav").await.unwrap(), None);

        store.put("seg.wav", vec![7; 64], "audio/wav").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("seg.wav")).unwrap(), vec![7; 64]);
        assert!(store.exists("seg.wav").await.unwrap());

        store.put("seg.wav", vec![1, 2], "audio/wav").await.unwrap();
        assert_eq!(store.get("seg.wav").await.unwrap(), Some(vec![1, 2]));

        // Only the object itself remains; no temporary files are left behind.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        store.delete("seg.wav").await.unwrap();
        store.delete("seg.wav").await.unwrap();
        assert!(!store.exists("seg.wav").await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_escape() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path()).unwrap();

        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.put("a/b.wav", vec![], "audio/wav").await.is_err());
        assert!(store.exists("..").await.is_err());
    }

    #[test]
    fn test_creates_root_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("nested").join("segments");
        FsBlobStore::new(&root).unwrap();
        assert!(root.is_dir());
    }
}
