use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use evidence_service::credential::{
    ClientSecretCredential, CredentialProvider, ManagedIdentityCredential, StaticCredential,
};
use evidence_service::{
    AppState, BlobObjectStore, EvidencePipeline, EvidenceSigner, EvidenceStore, KeyVaultAuthority,
    LocalRsaAuthority, MemoryObjectStore, ObjectStore, SigningAuthority, run,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, ValueEnum)]
enum Backend {
    /// Remote key vault for signing, blob storage for documents.
    Azure,
    /// Seeded in-process RSA key and in-memory storage.
    Local,
}

#[derive(Parser)]
#[command(name = "evidence-service", about = "Signs and stores tamper-evident evidence records")]
struct Args {
    #[clap(long, default_value = "127.0.0.1")]
    host: String,
    #[clap(long, default_value = "3000")]
    port: u16,
    #[clap(long, env = "EVIDENCE_BACKEND", default_value = "azure")]
    backend: Backend,

    #[clap(long, env = "KEY_VAULT_NAME")]
    key_vault_name: Option<String>,
    #[clap(long, env = "SIGNING_KEY_NAME", default_value = "evidence-signing-key")]
    signing_key_name: String,
    #[clap(long = "storage-account", env = "EVIDENCE_STORAGE_ACCOUNT")]
    evidence_storage_account: Option<String>,

    /// Fixed bearer token; takes precedence over every other credential.
    #[clap(long, env = "AZURE_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,
    /// Service principal (with the secret) or user-assigned identity.
    #[clap(long, env = "AZURE_CLIENT_ID")]
    client_id: Option<String>,
    #[clap(long, env = "AZURE_TENANT_ID")]
    tenant_id: Option<String>,
    #[clap(long, env = "AZURE_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,
    /// Set by App Service and Functions hosts.
    #[clap(long, env = "IDENTITY_ENDPOINT")]
    identity_endpoint: Option<String>,
    #[clap(long, env = "IDENTITY_HEADER", hide_env_values = true)]
    identity_header: Option<String>,

    #[clap(long, env = "LOCAL_SIGNING_SEED", hide_env_values = true)]
    local_signing_seed: Option<String>,

    #[clap(long, env = "REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let (authority, backend) = build_backend(&args)?;

    let pipeline = EvidencePipeline::new(
        EvidenceSigner::new(authority, args.signing_key_name),
        EvidenceStore::new(backend),
        Duration::from_secs(args.request_timeout_secs),
    );

    run(
        args.host,
        args.port,
        AppState {
            pipeline: Arc::new(pipeline),
        },
    )
    .await
}

fn build_backend(args: &Args) -> Result<(Arc<dyn SigningAuthority>, Arc<dyn ObjectStore>)> {
    match args.backend {
        Backend::Azure => {
            let vault = args
                .key_vault_name
                .as_deref()
                .context("KEY_VAULT_NAME is required for the azure backend")?;
            let account = args
                .evidence_storage_account
                .as_deref()
                .context("EVIDENCE_STORAGE_ACCOUNT is required for the azure backend")?;

            // One credential for the whole process, shared by both clients.
            let source = CredentialSource::from_args(args);
            let credential = source.build(args)?;

            tracing::info!(
                vault,
                account,
                key = %args.signing_key_name,
                credential = ?source,
                "using azure backend"
            );
            let authority: Arc<dyn SigningAuthority> =
                Arc::new(KeyVaultAuthority::new(vault, credential.clone())?);
            let backend: Arc<dyn ObjectStore> = Arc::new(BlobObjectStore::new(account, credential)?);
            Ok((authority, backend))
        }
        Backend::Local => {
            let seed = args
                .local_signing_seed
                .as_deref()
                .context("LOCAL_SIGNING_SEED is required for the local backend")?;
            let authority = LocalRsaAuthority::from_seed(&args.signing_key_name, seed)?;
            tracing::warn!(
                keyid = authority.key_id(),
                "using local backend; evidence is kept in memory only"
            );
            let authority: Arc<dyn SigningAuthority> = Arc::new(authority);
            let backend: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
            Ok((authority, backend))
        }
    }
}

/// Which credential the azure backend authenticates with, first match wins:
/// a fixed token, a service principal secret, the App Service identity
/// endpoint, then the VM metadata service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialSource {
    AccessToken,
    ClientSecret,
    AppServiceIdentity,
    InstanceIdentity,
}

impl CredentialSource {
    fn from_args(args: &Args) -> Self {
        if args.access_token.is_some() {
            CredentialSource::AccessToken
        } else if args.tenant_id.is_some() && args.client_id.is_some() && args.client_secret.is_some()
        {
            CredentialSource::ClientSecret
        } else if args.identity_endpoint.is_some() && args.identity_header.is_some() {
            CredentialSource::AppServiceIdentity
        } else {
            CredentialSource::InstanceIdentity
        }
    }

    fn build(self, args: &Args) -> Result<Arc<dyn CredentialProvider>> {
        let credential: Arc<dyn CredentialProvider> = match (
            self,
            &args.access_token,
            &args.tenant_id,
            &args.client_id,
            &args.client_secret,
            &args.identity_endpoint,
            &args.identity_header,
        ) {
            (CredentialSource::AccessToken, Some(token), ..) => {
                Arc::new(StaticCredential::new(token.clone()))
            }
            (CredentialSource::ClientSecret, _, Some(tenant), Some(client), Some(secret), ..) => {
                Arc::new(ClientSecretCredential::new(tenant, client.clone(), secret.clone())?)
            }
            (CredentialSource::AppServiceIdentity, .., Some(endpoint), Some(header)) => {
                Arc::new(ManagedIdentityCredential::app_service(
                    endpoint,
                    header.clone(),
                    args.client_id.clone(),
                )?)
            }
            _ => Arc::new(ManagedIdentityCredential::new(args.client_id.clone())?),
        };
        Ok(credential)
    }
}
