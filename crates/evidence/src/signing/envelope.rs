use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::signer::SigningAuthority;
use crate::error::Result;

/// Detached signature over a record's canonical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    /// base64 RS256 signature
    pub signature: String,
    pub keyid: String,
}

/// Signs canonical evidence bytes with a named key held by an authority.
pub struct EvidenceSigner {
    authority: Arc<dyn SigningAuthority>,
    key_name: String,
}

impl EvidenceSigner {
    pub fn new(authority: Arc<dyn SigningAuthority>, key_name: impl Into<String>) -> Self {
        Self {
            authority,
            key_name: key_name.into(),
        }
    }

    pub fn key_name(&self) -> &str {
        &self.key_name
    }

    /// Hashes `canonical` with SHA-256 and has the authority sign the digest.
    ///
    /// Not retried; transient failures surface as
    /// `SigningServiceUnavailable` for the caller to handle.
    pub async fn sign(&self, canonical: &[u8]) -> Result<SignatureEnvelope> {
        let digest: [u8; 32] = Sha256::digest(canonical).into();
        tracing::debug!(
            key = %self.key_name,
            algorithm = self.authority.algorithm(),
            digest = %hex::encode(digest),
            "requesting signature"
        );

        let signed = self.authority.sign_digest(&self.key_name, &digest).await?;
        Ok(SignatureEnvelope {
            signature: STANDARD.encode(&signed.signature),
            keyid: signed.key_id,
        })
    }
}
