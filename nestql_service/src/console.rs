use std::io::Write;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, warn};

use nestql::database::postgres::{PgEavSink, PgProvider};
use nestql::{eav, Engine, OutputMode};

use crate::config::ServiceConfig;

/// A request given inline, or as `@path` to a file holding it.
pub fn load_request(arg: &str) -> anyhow::Result<serde_json::Value> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read request file {}: {}", path, e))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).map_err(|e| anyhow::anyhow!("Request is not JSON: {}", e))
}

pub async fn query(
    config: &ServiceConfig,
    request: &str,
    mode: &str,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let mode: OutputMode = mode.parse()?;
    let request = load_request(request)?;

    let provider = PgProvider::connect(&config.database).await?;
    let engine = Engine::new(provider).with_options(config.resolve.options());

    let processed = nestql::process(&engine, &request, mode.pretty()).await?;
    for warning in &processed.warnings {
        warn!(
            level = warning.level,
            node = %warning.node,
            parent = warning.parent_ordinal,
            "{}",
            warning.message
        );
    }

    match output {
        Some(path) => {
            tokio::fs::write(path, &processed.document)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;
            info!(path = %path.display(), "document written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", processed.document)?;
        }
    }
    Ok(())
}

/// Where `ingest` takes its `contentData` document from.
#[derive(Debug, PartialEq)]
pub enum DocumentSource {
    File(PathBuf),
    Stdin,
    /// POST the request to a service and ingest its response body.
    Service {
        url: String,
        request: serde_json::Value,
    },
}

impl DocumentSource {
    /// A `request` selects the service, at `url` or the configured `eav.service_url`.
    pub fn select(
        config: &ServiceConfig,
        document: Option<PathBuf>,
        url: Option<String>,
        request: Option<&str>,
    ) -> anyhow::Result<Self> {
        match (document, request) {
            (Some(_), Some(_)) => Err(anyhow::anyhow!(
                "--document and --request are mutually exclusive"
            )),
            (Some(path), None) => Ok(Self::File(path)),
            (None, Some(request)) => {
                let url = url.or_else(|| config.eav.service_url.clone()).ok_or_else(|| {
                    anyhow::anyhow!("--request needs --url or eav.service_url in the config")
                })?;
                Ok(Self::Service {
                    url,
                    request: load_request(request)?,
                })
            }
            (None, None) if url.is_some() => {
                Err(anyhow::anyhow!("--url needs a --request to send"))
            }
            (None, None) => Ok(Self::Stdin),
        }
    }
}

async fn read_document<R: AsyncRead + Unpin>(mut reader: R) -> anyhow::Result<String> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read document: {}", e))?;
    Ok(text)
}

async fn fetch_document(url: &str, request: &serde_json::Value) -> anyhow::Result<String> {
    let client = reqwest::Client::new();
    let response = client
        .post(url)
        .json(request)
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to reach {}: {}", url, e))?;

    let status = response.status();
    debug!(%url, %status, "content service answered");
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("{} answered {}: {}", url, status, body));
    }
    response
        .text()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read response from {}: {}", url, e))
}

pub async fn load_document(source: DocumentSource) -> anyhow::Result<String> {
    match source {
        DocumentSource::File(path) => tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e)),
        DocumentSource::Stdin => read_document(tokio::io::stdin()).await,
        DocumentSource::Service { url, request } => fetch_document(&url, &request).await,
    }
}

pub async fn ingest(config: &ServiceConfig, source: DocumentSource) -> anyhow::Result<()> {
    let text = load_document(source).await?;

    let provider = PgProvider::connect(&config.database).await?;
    let mut sink = PgEavSink::new(provider.pool().clone(), config.eav.statements.clone());
    let summary = eav::ingest(&mut sink, &text).await?;

    println!(
        "stored {} entities, {} values, {} metadata rows",
        summary.entities, summary.values, summary.metadata
    );
    Ok(())
}
