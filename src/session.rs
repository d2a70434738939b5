//! Session lifecycle management
//!
//! A [`Session`] owns exactly one document from ingestion to deletion and
//! walks the state machine
//!
//! ```text
//! Created -> Ingested -> Analyzing -> Synthesized -> CleanedUp
//!               \___________\______________\______-> Failed
//! ```
//!
//! Deletion goes through [`Session::cleanup`] and is attempted at most once.

use crate::backend::{DeleteOutcome, DocumentBackend, DocumentHandle, DocumentSource};
use crate::collector::Insight;
use crate::error::{Error, Result};
use crate::synthesis::ProductOpportunity;
use crate::types::{AgentId, DocumentId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No document yet
    Created,
    /// Document ingested
    Ingested,
    /// Agent queries in flight
    Analyzing,
    /// Insights settled, synthesis running or done
    Synthesized,
    /// Document deleted after a normal run
    CleanedUp,
    /// A fatal step failed or the run was cancelled
    Failed,
}

/// A document owned by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Local id
    pub id: DocumentId,
    /// Reference returned by the backend
    pub external_handle: DocumentHandle,
    /// Original file name
    pub filename: String,
    /// Ingestion time
    pub ingested_at: DateTime<Utc>,
}

/// Snapshot of one analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSession {
    /// Unique session identifier
    pub session_id: SessionId,
    /// The owned document, once ingested
    pub document: Option<Document>,
    /// Current state
    pub state: SessionState,
    /// Successful insights only
    pub insights: BTreeMap<AgentId, Insight>,
    /// Ranked opportunities, populated after synthesis
    pub opportunities: Vec<ProductOpportunity>,
    /// Cross-agent narrative, populated after synthesis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Time the run reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the backend no longer holds the document
    pub document_deleted: bool,
}

impl AnalysisSession {
    fn new() -> Self {
        Self {
            session_id: SessionId::new(),
            document: None,
            state: SessionState::Created,
            insights: BTreeMap::new(),
            opportunities: Vec::new(),
            synthesis: None,
            created_at: Utc::now(),
            completed_at: None,
            document_deleted: false,
        }
    }
}

/// What a cleanup call did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupOutcome {
    /// The document was deleted by this call
    Deleted,
    /// The backend reported the document as already gone
    AlreadyDeleted,
    /// Cleanup already ran for this session
    AlreadyCleaned,
    /// No document was ever ingested
    NothingToClean,
    /// Auto-cleanup is off; call again with `force`
    Deferred,
}

impl CleanupOutcome {
    /// Whether this call deleted the document
    pub fn deleted(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

/// Lifecycle manager for one document
pub struct Session {
    backend: Arc<dyn DocumentBackend>,
    record: AnalysisSession,
    auto_cleanup: bool,
    cleanup_attempted: bool,
}

impl Session {
    /// Create a session in the `Created` state
    pub fn new(backend: Arc<dyn DocumentBackend>, auto_cleanup: bool) -> Self {
        Self {
            backend,
            record: AnalysisSession::new(),
            auto_cleanup,
            cleanup_attempted: false,
        }
    }

    /// Session id
    pub fn id(&self) -> SessionId {
        self.record.session_id
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.record.state
    }

    /// Owned document, once ingested
    pub fn document(&self) -> Option<&Document> {
        self.record.document.as_ref()
    }

    /// Whether the session deletes its document without an explicit `force`
    pub fn auto_cleanup(&self) -> bool {
        self.auto_cleanup
    }

    /// Read-only view of the session record
    pub fn record(&self) -> &AnalysisSession {
        &self.record
    }

    /// Ingest the document through the backend.
    ///
    /// On failure the session stays `Created` and there is nothing to clean up.
    pub async fn ingest(&mut self, source: &DocumentSource) -> Result<&Document> {
        if self.record.state != SessionState::Created {
            return Err(Error::InvalidTransition {
                from: self.record.state,
                to: SessionState::Ingested,
            });
        }

        let handle = self.backend.ingest(source).await.map_err(|e| match e {
            Error::Ingestion(_) => e,
            other => Error::ingestion(other.to_string()),
        })?;

        tracing::debug!(
            session_id = %self.record.session_id,
            document = %handle,
            "Document ingested"
        );
        self.record.state = SessionState::Ingested;
        Ok(self.record.document.insert(Document {
            id: DocumentId::new(),
            external_handle: handle,
            filename: source.filename.clone(),
            ingested_at: Utc::now(),
        }))
    }

    /// `Ingested -> Analyzing`
    pub fn mark_analyzing(&mut self) -> Result<()> {
        self.transition(SessionState::Ingested, SessionState::Analyzing)
    }

    /// `Analyzing -> Synthesized`
    pub fn mark_synthesized(&mut self) -> Result<()> {
        self.transition(SessionState::Analyzing, SessionState::Synthesized)
    }

    /// Move to `Failed` from `Ingested`, `Analyzing` or `Synthesized`
    pub fn mark_failed(&mut self) -> Result<()> {
        match self.record.state {
            SessionState::Ingested | SessionState::Analyzing | SessionState::Synthesized => {
                tracing::debug!(
                    session_id = %self.record.session_id,
                    from = ?self.record.state,
                    "Session failed"
                );
                self.record.state = SessionState::Failed;
                self.record.completed_at = Some(Utc::now());
                Ok(())
            }
            from => Err(Error::InvalidTransition {
                from,
                to: SessionState::Failed,
            }),
        }
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<()> {
        if self.record.state != from {
            return Err(Error::InvalidTransition {
                from: self.record.state,
                to,
            });
        }
        tracing::debug!(session_id = %self.record.session_id, ?from, ?to, "Session transition");
        self.record.state = to;
        Ok(())
    }

    /// Record the settled insights of the analysis phase
    pub fn record_insights(&mut self, insights: BTreeMap<AgentId, Insight>) {
        self.record.insights = insights;
    }

    /// Record synthesized opportunities; requires `Synthesized`
    pub fn record_opportunities(&mut self, opportunities: Vec<ProductOpportunity>) -> Result<()> {
        if self.record.state != SessionState::Synthesized {
            return Err(Error::InvalidTransition {
                from: self.record.state,
                to: SessionState::Synthesized,
            });
        }
        self.record.opportunities = opportunities;
        self.record.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Record the cross-agent narrative
    pub fn record_synthesis(&mut self, narrative: impl Into<String>) {
        self.record.synthesis = Some(narrative.into());
    }

    /// Delete the owned document.
    ///
    /// Idempotent: only the first effective call reaches the backend. With
    /// auto-cleanup off and `force` false this is a no-op returning
    /// [`CleanupOutcome::Deferred`].
    pub async fn cleanup(&mut self, force: bool) -> Result<CleanupOutcome> {
        if !force && !self.auto_cleanup {
            return Ok(CleanupOutcome::Deferred);
        }
        if self.cleanup_attempted {
            return Ok(CleanupOutcome::AlreadyCleaned);
        }
        let Some(document) = self.record.document.as_ref() else {
            return Ok(CleanupOutcome::NothingToClean);
        };

        self.cleanup_attempted = true;
        let handle = document.external_handle.clone();
        let outcome = self.backend.delete(&handle).await;

        match outcome {
            Ok(result) => {
                self.record.document_deleted = true;
                if self.record.state != SessionState::Failed {
                    self.record.state = SessionState::CleanedUp;
                }
                tracing::info!(
                    session_id = %self.record.session_id,
                    document = %handle,
                    result = ?result,
                    "Document cleaned up"
                );
                Ok(match result {
                    DeleteOutcome::Deleted => CleanupOutcome::Deleted,
                    DeleteOutcome::AlreadyDeleted => CleanupOutcome::AlreadyDeleted,
                })
            }
            Err(e) => Err(Error::cleanup(format!("Failed to delete document {}: {}", handle, e))),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.auto_cleanup || self.cleanup_attempted {
            return;
        }
        let Some(document) = self.record.document.take() else {
            return;
        };

        let session_id = self.record.session_id;
        let handle = document.external_handle;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                tracing::warn!(
                    %session_id,
                    document = %handle,
                    "Session dropped before cleanup; deleting in background"
                );
                let backend = self.backend.clone();
                runtime.spawn(async move {
                    if let Err(e) = backend.delete(&handle).await {
                        tracing::warn!(
                            %session_id,
                            document = %handle,
                            error = %e,
                            "Background cleanup failed"
                        );
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    %session_id,
                    document = %handle,
                    "Session dropped outside a runtime; document left on backend"
                );
            }
        }
    }
}
