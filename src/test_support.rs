//! Scripted in-memory collaborators for unit tests

use crate::backend::{
    DeleteOutcome, DocumentBackend, DocumentHandle, DocumentSource, QueryRequest, SearchHit,
    SourceLocation,
};
use crate::cancel::CancelHandle;
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Build a search hit on page 1 of `doc-1`
pub fn hit(text: &str, score: f64) -> SearchHit {
    SearchHit {
        text: text.to_string(),
        relevance_score: score,
        source_location: SourceLocation {
            document: "doc-1".to_string(),
            chunk: Some(0),
            page: Some(1),
        },
    }
}

/// Scripted response to a query
#[derive(Debug, Clone)]
pub enum Script {
    Hits(Vec<SearchHit>),
    Fail(String),
    Timeout,
    Stall,
}

pub struct MockBackend {
    default: Script,
    scripts: Mutex<HashMap<String, Script>>,
    queries: Mutex<Vec<QueryRequest>>,
    fail_ingest: bool,
    delete_result: Option<DeleteOutcome>,
    deletes: AtomicUsize,
    answered: AtomicUsize,
    cancel: Mutex<Option<(usize, CancelHandle)>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            default: Script::Hits(vec![hit("default finding", 0.5)]),
            scripts: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            fail_ingest: false,
            delete_result: Some(DeleteOutcome::Deleted),
            deletes: AtomicUsize::new(0),
            answered: AtomicUsize::new(0),
            cancel: Mutex::new(None),
        }
    }

    pub fn with_default(mut self, script: Script) -> Self {
        self.default = script;
        self
    }

    pub fn failing_ingest(mut self) -> Self {
        self.fail_ingest = true;
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.delete_result = None;
        self
    }

    pub fn deleting_with(mut self, outcome: DeleteOutcome) -> Self {
        self.delete_result = Some(outcome);
        self
    }

    /// Respond to the exact query text with `script`
    pub fn script(&self, query: &str, script: Script) {
        self.scripts.lock().insert(query.to_string(), script);
    }

    /// Raise `handle` once `count` queries have answered with hits
    pub fn cancel_after(&self, count: usize, handle: CancelHandle) {
        *self.cancel.lock() = Some((count, handle));
    }

    pub fn delete_calls(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<QueryRequest> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl DocumentBackend for MockBackend {
    async fn ingest(&self, source: &DocumentSource) -> Result<DocumentHandle> {
        if self.fail_ingest {
            return Err(Error::backend(format!("cannot parse {}", source.filename)));
        }
        Ok(DocumentHandle::new("doc-1"))
    }

    async fn query(
        &self,
        _handle: &DocumentHandle,
        request: &QueryRequest,
    ) -> Result<Vec<SearchHit>> {
        self.queries.lock().push(request.clone());
        let script = self
            .scripts
            .lock()
            .get(&request.text)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match script {
            Script::Hits(hits) => {
                let answered = self.answered.fetch_add(1, Ordering::SeqCst) + 1;
                if let Some((count, handle)) = self.cancel.lock().as_ref() {
                    if answered == *count {
                        handle.cancel();
                    }
                }
                Ok(hits)
            }
            Script::Fail(message) => Err(Error::backend(message)),
            Script::Timeout => Err(Error::timeout("backend deadline exceeded")),
            Script::Stall => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, _handle: &DocumentHandle) -> Result<DeleteOutcome> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.delete_result
            .ok_or_else(|| Error::backend("delete rejected"))
    }

    fn backend_type(&self) -> &str {
        "mock"
    }
}

/// Language model returning a fixed response or error
pub struct MockLlm {
    response: std::result::Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn replying(text: &str) -> Self {
        Self {
            response: Ok(text.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            response: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().push(prompt.to_string());
        self.response.clone().map_err(Error::synthesis)
    }

    fn client_type(&self) -> &str {
        "mock"
    }
}
