use super::{BlobStore, StorageError, StorageResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// In-process blob store.
///
/// Besides the objects themselves it remembers the content type of each write
/// and counts writes, which the engine tests use to assert that a failed step
/// issued no blob write.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    writes: Arc<AtomicU64>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_objects(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, HashMap<String, StoredObject>>> {
        self.objects
            .read()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))
    }
}

#[cfg(test)]
impl MemoryBlobStore {
    /// Number of successful `put` calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Content type recorded with the last write of `key`.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.read_objects()
            .ok()?
            .get(key)
            .map(|o| o.content_type.clone())
    }

    /// All object keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = match self.read_objects() {
            Ok(objects) => objects.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        keys.sort();
        keys
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.read_objects()?.get(key).map(|o| o.data.clone()))
    }

    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> StorageResult<()> {
        let mut objects = self
            .objects
            .write()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.read_objects()?.contains_key(key))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.objects
            .write()
            .map_err(|_| StorageError::Backend("memory store lock poisoned".to_string()))?
            .remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
