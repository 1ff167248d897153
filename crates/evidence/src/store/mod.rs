mod blob;
mod memory;

pub use blob::BlobObjectStore;
pub use memory::MemoryObjectStore;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{EvidenceError, Result};
use crate::evidence::EvidenceRecord;
use crate::signing::SignatureEnvelope;

/// Container every evidence document is written to.
pub const EVIDENCE_CONTAINER: &str = "evidence";

const CONTENT_TYPE_JSON: &str = "application/json";

/// Object body plus the out-of-band attributes stored alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    /// An object with that key was already present; nothing was written.
    AlreadyPresent,
}

/// Minimal object storage surface the evidence store needs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates the container if it does not exist. Already existing is success.
    async fn ensure_container(&self, container: &str) -> Result<()>;

    /// Writes the object only if no object with that key exists.
    async fn put_if_absent(
        &self,
        container: &str,
        key: &str,
        object: &StoredObject,
    ) -> Result<PutOutcome>;

    async fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>>;

    /// Location clients can use to address the object.
    fn object_url(&self, container: &str, key: &str) -> String;
}

/// Evidence record together with its detached signature, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub evidence: EvidenceRecord,
    pub signature: String,
}

/// Persists signed evidence documents under `<evidence_id>.json`.
pub struct EvidenceStore {
    backend: Arc<dyn ObjectStore>,
    container: String,
}

impl EvidenceStore {
    pub fn new(backend: Arc<dyn ObjectStore>) -> Self {
        Self {
            backend,
            container: EVIDENCE_CONTAINER.to_string(),
        }
    }

    /// Writes the signed document and returns its location.
    ///
    /// Writes never overwrite. If the key is taken by a byte-identical
    /// document (a replayed write) this succeeds; any other content is
    /// reported as `AlreadyExists`.
    pub async fn store(&self, canonical: &[u8], envelope: &SignatureEnvelope) -> Result<String> {
        let evidence: EvidenceRecord = serde_json::from_slice(canonical)?;
        let key = evidence.storage_key();

        let document = StoredDocument {
            evidence,
            signature: envelope.signature.clone(),
        };
        let object = StoredObject {
            body: serde_json::to_vec(&document)?,
            content_type: CONTENT_TYPE_JSON.to_string(),
            metadata: BTreeMap::from([
                ("keyid".to_string(), envelope.keyid.clone()),
                ("signed".to_string(), "true".to_string()),
            ]),
        };

        self.backend.ensure_container(&self.container).await?;

        match self.backend.put_if_absent(&self.container, &key, &object).await? {
            PutOutcome::Created => {
                tracing::info!(%key, container = %self.container, "stored evidence");
            }
            PutOutcome::AlreadyPresent => {
                let existing = self
                    .backend
                    .get(&self.container, &key)
                    .await?
                    .ok_or_else(|| {
                        EvidenceError::StorageUnavailable(format!("{key} present but unreadable"))
                    })?;
                if existing != object.body {
                    return Err(EvidenceError::AlreadyExists(key));
                }
                tracing::debug!(%key, "evidence already stored with identical content");
            }
        }

        Ok(self.backend.object_url(&self.container, &key))
    }
}
