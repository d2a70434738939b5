//! Morphik document backend client
//!
//! HTTP implementation of [`DocumentBackend`] for a Morphik-compatible API:
//! multipart ingestion with status polling, chunk retrieval filtered to one
//! document, and deletion.

use crate::backend::{
    DeleteOutcome, DocumentBackend, DocumentHandle, DocumentSource, QueryRequest, SearchHit,
    SourceLocation,
};
use crate::config::MorphikConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;
use url::Url;

/// Morphik API client
pub struct MorphikClient {
    /// HTTP client
    client: Client,
    /// Configuration
    config: MorphikConfig,
    /// Ask the backend to build visual embeddings at ingestion time
    visual_ingestion: bool,
}

impl MorphikClient {
    /// Create a new client from the `MORPHIK_URI` environment variable
    pub fn from_env() -> Result<Self> {
        Self::new(MorphikConfig::from_env()?)
    }

    /// Create a new client with the given configuration
    pub fn new(config: MorphikConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            config,
            visual_ingestion: true,
        })
    }

    /// Enable or disable visual embeddings at ingestion time
    pub fn with_visual_ingestion(mut self, enabled: bool) -> Self {
        self.visual_ingestion = enabled;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &MorphikConfig {
        &self.config
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.config
            .base_url
            .join(path)
            .map_err(|e| Error::config(format!("Invalid endpoint {}: {}", path, e)))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match self.config.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn wait_for_completion(&self, handle: &DocumentHandle) -> Result<()> {
        let url = self.endpoint(&format!("documents/{}/status", handle))?;
        let deadline = Instant::now() + self.config.ingest_timeout;

        loop {
            let response = self.authorize(self.client.get(url.clone())).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                return Err(Error::ingestion(format!(
                    "Status check failed with status {}: {}",
                    status, error_text
                )));
            }

            let status: DocumentStatus = response.json().await?;
            match status.status.as_str() {
                "completed" => return Ok(()),
                "failed" => {
                    return Err(Error::ingestion(format!(
                        "Backend failed to process document {}: {}",
                        handle,
                        status.error.unwrap_or_else(|| "no details".to_string())
                    )))
                }
                other => {
                    tracing::debug!(
                        document = %handle,
                        status = other,
                        "Document still processing"
                    );
                }
            }

            if Instant::now() >= deadline {
                return Err(Error::ingestion(format!(
                    "Document {} was not processed within {:?}",
                    handle, self.config.ingest_timeout
                )));
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn map_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::timeout(err.to_string())
    } else {
        Error::Http(err)
    }
}

#[async_trait]
impl DocumentBackend for MorphikClient {
    async fn ingest(&self, source: &DocumentSource) -> Result<DocumentHandle> {
        let url = self.endpoint("ingest/file")?;

        let part = Part::bytes(source.bytes.to_vec()).file_name(source.filename.clone());
        let form = Form::new()
            .part("file", part)
            .text("metadata", "{}")
            .text("use_colpali", self.visual_ingestion.to_string());

        let response = self
            .authorize(self.client.post(url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::ingestion(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::ingestion(format!(
                "Ingest failed with status {}: {}",
                status, error_text
            )));
        }

        let ingested: IngestResponse = response
            .json()
            .await
            .map_err(|e| Error::ingestion(format!("Malformed ingest response: {}", e)))?;
        let handle = DocumentHandle::new(ingested.external_id);

        tracing::info!(document = %handle, filename = %source.filename, "Document uploaded");
        if let Err(e) = self.wait_for_completion(&handle).await {
            // The upload exists on the backend even though processing did not finish.
            if let Err(delete_err) = self.delete(&handle).await {
                tracing::warn!(
                    document = %handle,
                    error = %delete_err,
                    "Failed to release partially ingested document"
                );
            }
            return Err(match e {
                e @ Error::Ingestion(_) => e,
                other => Error::ingestion(other.to_string()),
            });
        }
        Ok(handle)
    }

    async fn query(
        &self,
        handle: &DocumentHandle,
        request: &QueryRequest,
    ) -> Result<Vec<SearchHit>> {
        let url = self.endpoint("retrieve/chunks")?;

        let mut filters = HashMap::new();
        filters.insert("external_id", handle.as_str());
        let body = RetrieveRequest {
            query: &request.text,
            k: request.result_limit,
            min_score: 0.0,
            use_colpali: request.use_visual_understanding,
            filters,
        };

        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(Error::backend(format!(
                "Retrieve failed with status {}: {}",
                status, error_text
            )));
        }

        let chunks: Vec<ChunkResult> = response.json().await.map_err(map_transport)?;
        Ok(chunks.into_iter().map(SearchHit::from).collect())
    }

    async fn delete(&self, handle: &DocumentHandle) -> Result<DeleteOutcome> {
        let url = self.endpoint(&format!("documents/{}", handle))?;

        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(map_transport)?;

        match response.status() {
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::AlreadyDeleted),
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(Error::backend(format!(
                    "Delete failed with status {}: {}",
                    status, error_text
                )))
            }
        }
    }

    fn backend_type(&self) -> &str {
        "morphik"
    }
}

#[derive(Debug, Deserialize)]
struct IngestResponse {
    external_id: String,
}

#[derive(Debug, Deserialize)]
struct DocumentStatus {
    status: String,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct RetrieveRequest<'a> {
    query: &'a str,
    k: usize,
    min_score: f64,
    use_colpali: bool,
    filters: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct ChunkResult {
    content: String,
    score: f64,
    document_id: String,
    #[serde(default)]
    chunk_number: Option<u32>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

impl From<ChunkResult> for SearchHit {
    fn from(chunk: ChunkResult) -> Self {
        let page = chunk
            .metadata
            .get("page")
            .or_else(|| chunk.metadata.get("page_number"))
            .and_then(|v| v.as_u64())
            .and_then(|p| u32::try_from(p).ok());

        SearchHit {
            text: chunk.content,
            relevance_score: chunk.score,
            source_location: SourceLocation {
                document: chunk.document_id,
                chunk: chunk.chunk_number,
                page,
            },
        }
    }
}
