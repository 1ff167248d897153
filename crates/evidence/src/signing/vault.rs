use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::signer::{AuthoritySignature, RS256, SigningAuthority};
use crate::credential::{CredentialProvider, KEY_VAULT_RESOURCE};
use crate::error::{EvidenceError, Result};

const KEY_VAULT_API_VERSION: &str = "7.4";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const API_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SignRequest<'a> {
    alg: &'a str,
    /// base64url digest
    value: String,
}

#[derive(Deserialize)]
struct SignResponse {
    kid: String,
    /// base64url signature
    value: String,
}

/// Remote key-management service signing over REST.
///
/// Only the digest crosses the process boundary; the private key stays in
/// the vault.
pub struct KeyVaultAuthority {
    http: reqwest::Client,
    vault_url: String,
    credential: Arc<dyn CredentialProvider>,
}

impl KeyVaultAuthority {
    /// Client for `https://<vault_name>.vault.azure.net`.
    pub fn new(vault_name: &str, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_vault_url(&format!("https://{vault_name}.vault.azure.net"), credential)
    }

    /// Client for an explicit vault base URL (used by tests).
    pub fn with_vault_url(vault_url: &str, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                EvidenceError::SigningServiceUnavailable(format!("building vault client: {e}"))
            })?;
        Ok(Self {
            http,
            vault_url: vault_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    pub fn vault_url(&self) -> &str {
        &self.vault_url
    }
}

fn is_valid_key_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[async_trait]
impl SigningAuthority for KeyVaultAuthority {
    async fn sign_digest(&self, key_name: &str, digest: &[u8; 32]) -> Result<AuthoritySignature> {
        if !is_valid_key_name(key_name) {
            return Err(EvidenceError::KeyNotFound(key_name.to_string()));
        }

        let token = self.credential.token(KEY_VAULT_RESOURCE).await?;
        let url = format!("{}/keys/{key_name}/sign", self.vault_url);

        let resp = self
            .http
            .post(&url)
            .query(&[("api-version", KEY_VAULT_API_VERSION)])
            .bearer_auth(token)
            .json(&SignRequest {
                alg: RS256,
                value: URL_SAFE_NO_PAD.encode(digest),
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "vault sign request failed");
                EvidenceError::SigningServiceUnavailable("vault unreachable".into())
            })?;

        match resp.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => return Err(EvidenceError::KeyNotFound(key_name.to_string())),
            status @ (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => {
                // A revoked or expired token is not retried; drop it so the
                // next request fetches a new one.
                self.credential.invalidate().await;
                return Err(EvidenceError::Authorization(format!(
                    "vault rejected sign request for {key_name}: {status}"
                )));
            }
            status => {
                let body = resp.text().await.unwrap_or_default();
                tracing::warn!(%status, %body, "vault sign request rejected");
                return Err(EvidenceError::SigningServiceUnavailable(format!(
                    "vault returned {status}"
                )));
            }
        }

        let body: SignResponse = resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, "unreadable vault sign response");
            EvidenceError::SigningServiceUnavailable("malformed vault sign response".into())
        })?;
        let signature = URL_SAFE_NO_PAD.decode(body.value.trim_end_matches('=')).map_err(|e| {
            EvidenceError::SigningServiceUnavailable(format!("vault signature not base64url: {e}"))
        })?;

        tracing::debug!(kid = %body.kid, "vault signed digest");
        Ok(AuthoritySignature {
            signature,
            key_id: body.kid,
        })
    }
}
