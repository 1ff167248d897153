//! Access-token sources shared by the signing authority and the blob store.
//!
//! A provider is built once at startup and handed to each client as an
//! `Arc<dyn CredentialProvider>`. Tokens are cached per resource and
//! refreshed shortly before they expire.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::error::{EvidenceError, Result};

/// Instance metadata endpoint for managed identities on virtual machines.
const IMDS_TOKEN_URL: &str = "http://169.254.169.254/metadata/identity/oauth2/token";
const IMDS_API_VERSION: &str = "2018-02-01";

/// App Service and Functions expose the identity endpoint through
/// `IDENTITY_ENDPOINT` and guard it with `IDENTITY_HEADER`.
const APP_SERVICE_API_VERSION: &str = "2019-08-01";
const APP_SERVICE_SECRET_HEADER: &str = "X-IDENTITY-HEADER";

const AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Metadata endpoint is link-local, so this should be quick.
const IDENTITY_TIMEOUT: Duration = Duration::from_secs(5);
const AUTHORITY_TIMEOUT: Duration = Duration::from_secs(30);

/// Tokens are refreshed this many seconds before their stated expiry.
const REFRESH_MARGIN_SECS: i64 = 300;

/// Resource identifiers requested from the provider.
pub const KEY_VAULT_RESOURCE: &str = "https://vault.azure.net";
pub const STORAGE_RESOURCE: &str = "https://storage.azure.com";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(REFRESH_MARGIN_SECS) < self.expires_at
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Bearer token valid for `resource`.
    async fn token(&self, resource: &str) -> Result<String>;

    /// Drops any cached tokens so the next call fetches new ones.
    async fn invalidate(&self) {}
}

/// Per-resource token cache. The lock is held across a refresh so
/// concurrent callers wait for one fetch instead of racing.
#[derive(Default)]
struct TokenCache {
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl TokenCache {
    async fn get_or_fetch<F>(&self, resource: &str, fetch: F) -> Result<String>
    where
        F: Future<Output = Result<AccessToken>>,
    {
        let mut tokens = self.tokens.lock().await;
        if let Some(cached) = tokens.get(resource) {
            if cached.is_fresh(Utc::now()) {
                return Ok(cached.token.clone());
            }
        }

        tracing::debug!(resource, "refreshing access token");
        let fresh = fetch.await?;
        let token = fresh.token.clone();
        tokens.insert(resource.to_string(), fresh);
        Ok(token)
    }

    async fn clear(&self) {
        self.tokens.lock().await.clear();
    }
}

fn identity_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| EvidenceError::Authorization(format!("building token client: {e}")))
}

/// Status-only error for a failed token request; the body goes to the log.
async fn token_rejected(source: &str, resp: reqwest::Response) -> EvidenceError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(source, %status, %body, "token request rejected");
    EvidenceError::Authorization(format!("{source} returned {status}"))
}

fn token_unreachable(source: &str, e: reqwest::Error) -> EvidenceError {
    tracing::warn!(source, error = %e, "token request failed");
    EvidenceError::Authorization(format!("{source} unreachable"))
}

/// Fixed bearer token, e.g. injected through the environment.
pub struct StaticCredential {
    token: String,
}

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn token(&self, _resource: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EpochSeconds {
    Text(String),
    Number(i64),
}

impl EpochSeconds {
    fn to_datetime(&self) -> Result<DateTime<Utc>> {
        let secs = match self {
            EpochSeconds::Text(text) => text
                .parse()
                .map_err(|_| EvidenceError::Authorization("invalid expires_on in token".into()))?,
            EpochSeconds::Number(secs) => *secs,
        };
        DateTime::<Utc>::from_timestamp(secs, 0)
            .ok_or_else(|| EvidenceError::Authorization("token expiry out of range".into()))
    }
}

#[derive(Deserialize)]
struct IdentityTokenResponse {
    access_token: String,
    // Both identity endpoints report epoch seconds, usually as a string.
    expires_on: EpochSeconds,
}

enum IdentityEndpoint {
    /// VM instance metadata service, `Metadata: true`.
    Imds { url: String },
    /// App Service / Functions identity endpoint with its per-site secret.
    AppService { url: String, secret: String },
}

/// Managed identity credential backed by the platform's identity endpoint.
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: IdentityEndpoint,
    client_id: Option<String>,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    /// Instance metadata service on a virtual machine.
    pub fn new(client_id: Option<String>) -> Result<Self> {
        Self::with_endpoint(IMDS_TOKEN_URL, client_id)
    }

    /// Points the credential at a different metadata endpoint (used by tests).
    pub fn with_endpoint(endpoint: &str, client_id: Option<String>) -> Result<Self> {
        Self::build(
            IdentityEndpoint::Imds {
                url: endpoint.to_string(),
            },
            client_id,
        )
    }

    /// Identity endpoint injected into App Service and Functions hosts
    /// (`IDENTITY_ENDPOINT` / `IDENTITY_HEADER`).
    pub fn app_service(
        endpoint: &str,
        secret: impl Into<String>,
        client_id: Option<String>,
    ) -> Result<Self> {
        Self::build(
            IdentityEndpoint::AppService {
                url: endpoint.to_string(),
                secret: secret.into(),
            },
            client_id,
        )
    }

    fn build(endpoint: IdentityEndpoint, client_id: Option<String>) -> Result<Self> {
        Ok(Self {
            http: identity_client(IDENTITY_TIMEOUT)?,
            endpoint,
            client_id,
            cache: TokenCache::default(),
        })
    }

    async fn fetch(&self, resource: &str) -> Result<AccessToken> {
        let request = match &self.endpoint {
            IdentityEndpoint::Imds { url } => self
                .http
                .get(url)
                .header("Metadata", "true")
                .query(&[("api-version", IMDS_API_VERSION)]),
            IdentityEndpoint::AppService { url, secret } => self
                .http
                .get(url)
                .header(APP_SERVICE_SECRET_HEADER, secret)
                .query(&[("api-version", APP_SERVICE_API_VERSION)]),
        };
        let mut request = request.query(&[("resource", resource)]);
        if let Some(client_id) = &self.client_id {
            request = request.query(&[("client_id", client_id.as_str())]);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| token_unreachable("identity endpoint", e))?;
        if !resp.status().is_success() {
            return Err(token_rejected("identity endpoint", resp).await);
        }

        let body: IdentityTokenResponse = resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, "unreadable identity token response");
            EvidenceError::Authorization("malformed identity token response".into())
        })?;

        Ok(AccessToken {
            token: body.access_token,
            expires_at: body.expires_on.to_datetime()?,
        })
    }
}

#[async_trait]
impl CredentialProvider for ManagedIdentityCredential {
    async fn token(&self, resource: &str) -> Result<String> {
        self.cache.get_or_fetch(resource, self.fetch(resource)).await
    }

    async fn invalidate(&self) {
        self.cache.clear().await;
    }
}

#[derive(Deserialize)]
struct ClientCredentialsResponse {
    access_token: String,
    expires_in: i64,
}

/// Service principal credential using the OAuth2 client-credentials grant.
pub struct ClientSecretCredential {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        Self::with_authority_host(AUTHORITY_HOST, tenant_id, client_id, client_secret)
    }

    /// Uses a different identity authority (sovereign clouds, tests).
    pub fn with_authority_host(
        authority_host: &str,
        tenant_id: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            http: identity_client(AUTHORITY_TIMEOUT)?,
            token_url: format!(
                "{}/{tenant_id}/oauth2/v2.0/token",
                authority_host.trim_end_matches('/')
            ),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: TokenCache::default(),
        })
    }

    async fn fetch(&self, resource: &str) -> Result<AccessToken> {
        let scope = format!("{}/.default", resource.trim_end_matches('/'));
        let resp = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| token_unreachable("identity authority", e))?;
        if !resp.status().is_success() {
            return Err(token_rejected("identity authority", resp).await);
        }

        let body: ClientCredentialsResponse = resp.json().await.map_err(|e| {
            tracing::warn!(error = %e, "unreadable client credentials response");
            EvidenceError::Authorization("malformed client credentials response".into())
        })?;

        Ok(AccessToken {
            token: body.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        })
    }
}

#[async_trait]
impl CredentialProvider for ClientSecretCredential {
    async fn token(&self, resource: &str) -> Result<String> {
        self.cache.get_or_fetch(resource, self.fetch(resource)).await
    }

    async fn invalidate(&self) {
        self.cache.clear().await;
    }
}
