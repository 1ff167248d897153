use async_trait::async_trait;

use crate::error::Result;

/// JWS name of the only algorithm evidence is signed with.
pub const RS256: &str = "RS256";

/// Raw signature returned by a signing authority.
#[derive(Debug, Clone)]
pub struct AuthoritySignature {
    pub signature: Vec<u8>,
    /// Fully-qualified identifier of the key version that signed.
    pub key_id: String,
}

/// Service that holds private keys and signs digests on the caller's behalf.
///
/// Only the 32-byte SHA-256 digest is handed over; key material never
/// enters this process for remote implementations.
#[async_trait]
pub trait SigningAuthority: Send + Sync {
    /// Sign a SHA-256 digest with the named key.
    async fn sign_digest(&self, key_name: &str, digest: &[u8; 32]) -> Result<AuthoritySignature>;

    /// Algorithm identifier string (e.g. "RS256").
    fn algorithm(&self) -> &str {
        RS256
    }
}
