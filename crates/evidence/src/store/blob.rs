use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{RequestBuilder, StatusCode};

use super::{ObjectStore, PutOutcome, StoredObject};
use crate::credential::{CredentialProvider, STORAGE_RESOURCE};
use crate::error::{EvidenceError, Result};

const BLOB_API_VERSION: &str = "2021-08-06";
const METADATA_HEADER_PREFIX: &str = "x-ms-meta-";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const API_TIMEOUT: Duration = Duration::from_secs(30);

/// Blob storage REST client authenticated with bearer tokens.
pub struct BlobObjectStore {
    http: reqwest::Client,
    account_url: String,
    credential: Arc<dyn CredentialProvider>,
}

impl BlobObjectStore {
    /// Client for `https://<account>.blob.core.windows.net`.
    pub fn new(account: &str, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        Self::with_account_url(&format!("https://{account}.blob.core.windows.net"), credential)
    }

    /// Client for an explicit account base URL (used by tests).
    pub fn with_account_url(account_url: &str, credential: Arc<dyn CredentialProvider>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(API_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| EvidenceError::StorageUnavailable(format!("building blob client: {e}")))?;
        Ok(Self {
            http,
            account_url: account_url.trim_end_matches('/').to_string(),
            credential,
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.credential.token(STORAGE_RESOURCE).await?;
        Ok(request
            .bearer_auth(token)
            .header("x-ms-version", BLOB_API_VERSION)
            .header("x-ms-date", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()))
    }

    async fn rejected(&self, status: StatusCode, what: &str) -> EvidenceError {
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            self.credential.invalidate().await;
            EvidenceError::Authorization(format!("blob service rejected {what}: {status}"))
        } else {
            EvidenceError::StorageUnavailable(format!("blob service returned {status} for {what}"))
        }
    }
}

fn transport_error(e: reqwest::Error) -> EvidenceError {
    tracing::warn!(error = %e, "blob request failed");
    EvidenceError::StorageUnavailable("blob service unreachable".into())
}

#[async_trait]
impl ObjectStore for BlobObjectStore {
    async fn ensure_container(&self, container: &str) -> Result<()> {
        let request = self
            .http
            .put(format!("{}/{container}", self.account_url))
            .query(&[("restype", "container")]);
        let resp = self.authorized(request).await?.send().await.map_err(transport_error)?;

        match resp.status() {
            StatusCode::CREATED => {
                tracing::info!(container, "created container");
                Ok(())
            }
            // ContainerAlreadyExists
            StatusCode::CONFLICT => Ok(()),
            status => Err(self.rejected(status, "container creation").await),
        }
    }

    async fn put_if_absent(
        &self,
        container: &str,
        key: &str,
        object: &StoredObject,
    ) -> Result<PutOutcome> {
        let mut request = self
            .http
            .put(self.object_url(container, key))
            .header("x-ms-blob-type", "BlockBlob")
            .header(reqwest::header::CONTENT_TYPE, &object.content_type)
            .header(reqwest::header::IF_NONE_MATCH, "*")
            .body(object.body.clone());
        for (name, value) in &object.metadata {
            request = request.header(format!("{METADATA_HEADER_PREFIX}{name}"), value);
        }

        let resp = self.authorized(request).await?.send().await.map_err(transport_error)?;
        match resp.status() {
            StatusCode::CREATED => Ok(PutOutcome::Created),
            // BlobAlreadyExists / ConditionNotMet
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => Ok(PutOutcome::AlreadyPresent),
            status => Err(self.rejected(status, key).await),
        }
    }

    async fn get(&self, container: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let request = self.http.get(self.object_url(container, key));
        let resp = self.authorized(request).await?.send().await.map_err(transport_error)?;

        match resp.status() {
            StatusCode::OK => {
                let bytes = resp.bytes().await.map_err(transport_error)?;
                Ok(Some(bytes.to_vec()))
            }
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(self.rejected(status, key).await),
        }
    }

    fn object_url(&self, container: &str, key: &str) -> String {
        format!("{}/{container}/{key}", self.account_url)
    }
}
