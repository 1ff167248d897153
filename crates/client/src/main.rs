use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

/// Submits a JSON payload to an evidence service and prints the receipt.
#[derive(Parser)]
#[command(name = "evidence-client")]
struct Args {
    #[clap(long, env = "EVIDENCE_SERVICE_URL", default_value = "http://127.0.0.1:3000")]
    url: String,
    /// Payload file; stdin when omitted.
    #[clap(long)]
    file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let raw = match &args.file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("reading payload from stdin")?;
            buf
        }
    };
    let payload = parse_payload(&raw)?;

    let receipt = submit(&args.url, &payload).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

fn parse_payload(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("payload is not valid JSON")
}

fn endpoint(base: &str) -> String {
    format!("{}/api/evidence", base.trim_end_matches('/'))
}

async fn submit(base: &str, payload: &Value) -> Result<Value> {
    let url = endpoint(base);
    tracing::info!(%url, "submitting evidence");

    let resp = reqwest::Client::new()
        .post(&url)
        .json(payload)
        .send()
        .await
        .with_context(|| format!("sending request to {url}"))?;

    let status = resp.status();
    let body = resp.text().await.context("reading response body")?;
    if !status.is_success() {
        bail!("evidence service returned {status}: {body}");
    }
    serde_json::from_str(&body).context("parsing receipt")
}
