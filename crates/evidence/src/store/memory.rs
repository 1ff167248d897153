use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ObjectStore, PutOutcome, StoredObject};
use crate::error::{EvidenceError, Result};

/// In-memory backend for development and testing
#[derive(Default)]
pub struct MemoryObjectStore {
    containers: RwLock<HashSet<String>>,
    objects: RwLock<HashMap<(String, String), StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn object(&self, container: &str, key: &str) -> Option<StoredObject> {
        let objects = self.objects.read().await;
        objects
            .get(&(container.to_string(), key.to_string()))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<()> {
        self.containers.write().await.insert(container.to_string());
        Ok(())
    }

    async fn put_if_absent(
        &self,
        container: &str,
        key: &str,
        object: &StoredObject,
    ) -> Result<PutOutcome> {
        if !self.containers.read().await.contains(container) {
            return Err(EvidenceError::StorageUnavailable(format!(
                "container {container} does not exist"
            )));
        }

        let mut objects = self.objects.write().await;
        let slot = (container.to_string(), key.to_string());
        if objects.contains_key(&slot) {
            return Ok(PutOutcome::AlreadyPresent);
        }
        objects.insert(slot, object.clone());
        Ok(PutOutcome::Created)
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.object(container, key).await.map(|object| object.body))
    }

    fn object_url(&self, container: &str, key: &str) -> String {
        format!("memory://{container}/{key}")
    }
}
