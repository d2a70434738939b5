//! Document-understanding backend interface
//!
//! The engine never talks to a concrete backend directly. Ingestion, ranked
//! search scoped to one document, and deletion all go through
//! [`DocumentBackend`]; [`crate::morphik::MorphikClient`] is the bundled HTTP
//! implementation.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw document handed to the backend for ingestion
#[derive(Debug, Clone)]
pub struct DocumentSource {
    /// Original file name
    pub filename: String,
    /// File contents
    pub bytes: Bytes,
}

impl DocumentSource {
    /// Create a source from in-memory bytes
    pub fn new(filename: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a source from disk
    pub async fn from_path(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document".to_string());
        Ok(Self::new(filename, bytes))
    }
}

/// Opaque reference returned by the backend after ingestion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentHandle(String);

impl DocumentHandle {
    /// Wrap a backend-issued id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the backend-issued id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single search against one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Query text
    pub text: String,
    /// Maximum number of ranked results
    pub result_limit: usize,
    /// Use visual (page image) understanding in addition to text
    pub use_visual_understanding: bool,
}

/// Where in the document a result came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Backend document id
    pub document: String,
    /// Chunk index within the document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk: Option<u32>,
    /// Page number, when the backend reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.document)?;
        if let Some(page) = self.page {
            write!(f, " p.{}", page)?;
        }
        if let Some(chunk) = self.chunk {
            write!(f, " #{}", chunk)?;
        }
        Ok(())
    }
}

/// One ranked search result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    /// Result text
    pub text: String,
    /// Backend relevance score
    pub relevance_score: f64,
    /// Source location
    pub source_location: SourceLocation,
}

/// Result of a delete call that did not error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    /// The document was removed by this call
    Deleted,
    /// The backend no longer knew the document
    AlreadyDeleted,
}

/// Document-understanding collaborator
#[async_trait]
pub trait DocumentBackend: Send + Sync {
    /// Ingest a document and wait until it is queryable
    async fn ingest(&self, source: &DocumentSource) -> Result<DocumentHandle>;

    /// Ranked search scoped to one document
    async fn query(
        &self,
        handle: &DocumentHandle,
        request: &QueryRequest,
    ) -> Result<Vec<SearchHit>>;

    /// Delete a document
    async fn delete(&self, handle: &DocumentHandle) -> Result<DeleteOutcome>;

    /// Backend type for logging
    fn backend_type(&self) -> &str;
}
