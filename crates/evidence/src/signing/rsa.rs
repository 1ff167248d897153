use anyhow::{Context, Result};
use async_trait::async_trait;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::EncodePublicKey;
use rsa::signature::SignatureEncoding;
use rsa::signature::hazmat::PrehashSigner;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::signer::{AuthoritySignature, SigningAuthority};
use crate::error::EvidenceError;

const RSA_KEY_BITS: usize = 2048;

/// In-process RSA authority holding a single PKCS#1 v1.5 / SHA-256 key.
///
/// Created from a seed string — the SHA-256 hash of the seed
/// seeds a deterministic CSPRNG used for RSA key generation.
/// Meant for local development and tests.
pub struct LocalRsaAuthority {
    key_name: String,
    key_id: String,
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
}

impl LocalRsaAuthority {
    pub fn from_seed(key_name: &str, seed: &str) -> Result<Self> {
        let hash = Sha256::digest(seed.as_bytes());
        let mut rng = ChaCha20Rng::from_seed(hash.into());
        let private_key = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS)
            .context("generating RSA key from seed")?;
        let public_key = private_key.to_public_key();

        // Version is derived from the public key so a new seed reads as a rotation.
        let der = public_key
            .to_public_key_der()
            .context("encoding RSA public key to DER")?;
        let version = hex::encode(&Sha256::digest(der.as_bytes())[..16]);

        Ok(Self {
            key_name: key_name.to_string(),
            key_id: format!("local://keys/{key_name}/{version}"),
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Public half of the signing key, for verifiers.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }
}

#[async_trait]
impl SigningAuthority for LocalRsaAuthority {
    async fn sign_digest(
        &self,
        key_name: &str,
        digest: &[u8; 32],
    ) -> crate::error::Result<AuthoritySignature> {
        if key_name != self.key_name {
            return Err(EvidenceError::KeyNotFound(key_name.to_string()));
        }

        let signature = self.signing_key.sign_prehash(digest).map_err(|e| {
            EvidenceError::SigningServiceUnavailable(format!("RSA sign_prehash failed: {e}"))
        })?;

        Ok(AuthoritySignature {
            signature: signature.to_vec(),
            key_id: self.key_id.clone(),
        })
    }
}
