use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::encoding::CanonicalJson;
use crate::error::{EvidenceError, Result};
use crate::evidence::create_evidence;
use crate::signing::EvidenceSigner;
use crate::store::EvidenceStore;

/// Response body for a recorded piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceReceipt {
    pub evidence_id: String,
    /// Location of the stored document.
    pub blob: String,
    /// Key version that produced the signature.
    pub signed_by: String,
}

/// Where a request was when it finished or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Built,
    Signed,
    Stored,
    Responded,
}

/// Build, sign and store one evidence record per call.
pub struct EvidencePipeline {
    signer: EvidenceSigner,
    store: EvidenceStore,
    deadline: Duration,
}

impl EvidencePipeline {
    pub fn new(signer: EvidenceSigner, store: EvidenceStore, deadline: Duration) -> Self {
        Self {
            signer,
            store,
            deadline,
        }
    }

    /// Records `payload` under the pipeline deadline.
    pub async fn record(&self, payload: Value) -> Result<EvidenceReceipt> {
        let mut stage = Stage::Received;
        let outcome = tokio::time::timeout(self.deadline, self.run(payload, &mut stage)).await;

        match outcome {
            Ok(Ok(receipt)) => Ok(receipt),
            Ok(Err(err)) => {
                tracing::warn!(
                    ?stage,
                    key = self.signer.key_name(),
                    error_kind = err.kind(),
                    error = %err,
                    "evidence request failed"
                );
                Err(err)
            }
            Err(_) => {
                tracing::warn!(?stage, deadline = ?self.deadline, "evidence request timed out");
                Err(EvidenceError::Timeout(self.deadline))
            }
        }
    }

    async fn run(&self, payload: Value, stage: &mut Stage) -> Result<EvidenceReceipt> {
        let evidence = create_evidence(payload);
        let canonical = CanonicalJson::encode(&evidence)?;
        *stage = Stage::Built;

        let envelope = self.signer.sign(&canonical).await?;
        *stage = Stage::Signed;

        let blob = self.store.store(&canonical, &envelope).await?;
        *stage = Stage::Stored;

        tracing::info!(
            evidence_id = evidence.evidence_id(),
            keyid = %envelope.keyid,
            "evidence recorded"
        );
        *stage = Stage::Responded;

        Ok(EvidenceReceipt {
            evidence_id: evidence.evidence_id().to_string(),
            blob,
            signed_by: envelope.keyid,
        })
    }
}
