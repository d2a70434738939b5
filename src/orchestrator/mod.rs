//! Orchestrator - end-to-end analysis of one document
//!
//! Drives a [`Session`] through ingest, concurrent insight collection and
//! synthesis, and releases the document on every exit path.
//!
//! # Example
//!
//! ```rust,ignore
//! use opportunity_engine::prelude::*;
//!
//! let backend = Arc::new(MorphikClient::from_env()?);
//! let orchestrator = Orchestrator::new(backend);
//! let source = DocumentSource::from_path("paper.pdf").await?;
//! let report = orchestrator.run_analysis(AnalysisRequest::new(source)).await?;
//! ```

pub mod report;

pub use report::{AgentReport, AnalysisReport, CleanupStatus, DocumentAnswer, ReportSummary};

use crate::backend::{DocumentBackend, DocumentSource, QueryRequest};
use crate::cancel::CancelSignal;
use crate::collector::{self, Collection, InsightCollector};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use crate::registry::{AgentRegistry, QueryOverrides};
use crate::session::{AnalysisSession, CleanupOutcome, Session};
use crate::synthesis::SynthesisEngine;
use crate::types::{AgentId, SessionId};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// One call to [`Orchestrator::run_analysis`]
pub struct AnalysisRequest {
    source: DocumentSource,
    overrides: QueryOverrides,
    auto_cleanup: Option<bool>,
    cancel: CancelSignal,
}

impl AnalysisRequest {
    /// Analyze `source` with the registry templates
    pub fn new(source: DocumentSource) -> Self {
        Self {
            source,
            overrides: QueryOverrides::new(),
            auto_cleanup: None,
            cancel: CancelSignal::never(),
        }
    }

    /// Replace one agent's query for this run only
    pub fn with_override(mut self, agent_id: impl Into<String>, query: impl Into<String>) -> Self {
        self.overrides.insert(AgentId::new(agent_id), query.into());
        self
    }

    /// Override the configured auto-cleanup setting
    pub fn with_auto_cleanup(mut self, auto_cleanup: bool) -> Self {
        self.auto_cleanup = Some(auto_cleanup);
        self
    }

    /// Abort the run when `cancel` is raised during collection
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Top-level coordinator
pub struct Orchestrator {
    backend: Arc<dyn DocumentBackend>,
    registry: Arc<AgentRegistry>,
    collector: InsightCollector,
    engine: SynthesisEngine,
    retained: Mutex<HashMap<SessionId, Session>>,
    last_session: RwLock<Option<AnalysisSession>>,
}

impl Orchestrator {
    /// Orchestrator with the default roster, catalog and settings
    pub fn new(backend: Arc<dyn DocumentBackend>) -> Self {
        let config = EngineConfig::default();
        Self::assemble(backend, AgentRegistry::default(), &config)
    }

    /// Orchestrator from an engine configuration
    pub fn from_config(backend: Arc<dyn DocumentBackend>, config: &EngineConfig) -> Result<Self> {
        let registry = match &config.agents {
            Some(agents) => AgentRegistry::new(agents.clone())?,
            None => AgentRegistry::default(),
        };
        Ok(Self::assemble(backend, registry, config))
    }

    fn assemble(
        backend: Arc<dyn DocumentBackend>,
        registry: AgentRegistry,
        config: &EngineConfig,
    ) -> Self {
        let mut engine = SynthesisEngine::new(config.synthesis.clone());
        if let Some(themes) = &config.themes {
            engine = engine.with_catalog(themes.clone());
        }

        Self {
            collector: InsightCollector::new(backend.clone(), config.analysis.clone()),
            backend,
            registry: Arc::new(registry),
            engine,
            retained: Mutex::new(HashMap::new()),
            last_session: RwLock::new(None),
        }
    }

    /// Replace the agent roster
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Use a language model for theme extraction and the run narrative
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.engine = self.engine.with_llm(llm);
        self
    }

    /// Agent roster
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Analyze one document.
    ///
    /// Per-agent failures are reported inside the result. Fatal errors mark
    /// the session failed and release the document before propagating. A
    /// cleanup failure is recorded in [`AnalysisReport::cleanup`] and never
    /// replaces the analysis result.
    pub async fn run_analysis(&self, request: AnalysisRequest) -> Result<AnalysisReport> {
        let AnalysisRequest {
            source,
            overrides,
            auto_cleanup,
            mut cancel,
        } = request;

        for agent_id in overrides.keys() {
            self.registry.get(agent_id.as_str())?;
        }

        let auto_cleanup = auto_cleanup.unwrap_or(self.collector.options().auto_cleanup);
        let mut session = Session::new(self.backend.clone(), auto_cleanup);
        let started = Instant::now();
        tracing::info!(
            session_id = %session.id(),
            filename = %source.filename,
            agents = self.registry.len(),
            auto_cleanup,
            backend = self.backend.backend_type(),
            "Starting document analysis"
        );

        let ingested = session.ingest(&source).await.map(|_| ());
        if let Err(e) = ingested {
            tracing::error!(session_id = %session.id(), error = %e, "Ingestion failed");
            *self.last_session.write() = Some(session.record().clone());
            return Err(e);
        }

        let outcome = self.analyze(&mut session, &overrides, &mut cancel).await;
        if outcome.is_err() {
            if let Err(e) = session.mark_failed() {
                tracing::debug!(
                    session_id = %session.id(),
                    error = %e,
                    "Session not marked failed"
                );
            }
        }
        let cleanup = self.release(&mut session).await;

        *self.last_session.write() = Some(session.record().clone());
        let result = match outcome {
            Ok(collection) => {
                let report =
                    AnalysisReport::new(&session, self.registry.list(), &collection, cleanup);
                tracing::info!(
                    session_id = %report.session_id,
                    succeeded = collection.succeeded(),
                    opportunities = report.opportunities.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Document analysis complete"
                );
                Ok(report)
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(
                    session_id = %session.id(),
                    error = %e,
                    ?cleanup,
                    "Document analysis failed"
                );
                Err(e)
            }
            Err(e) => {
                tracing::info!(
                    session_id = %session.id(),
                    reason = %e,
                    ?cleanup,
                    "Document analysis aborted"
                );
                Err(e)
            }
        };

        if !session.auto_cleanup() {
            self.retained.lock().insert(session.id(), session);
        }
        result
    }

    async fn analyze(
        &self,
        session: &mut Session,
        overrides: &QueryOverrides,
        cancel: &mut CancelSignal,
    ) -> Result<Collection> {
        session.mark_analyzing()?;
        let collection = self
            .collector
            .collect(session, &self.registry, overrides, cancel)
            .await?;
        session.record_insights(collection.insights());

        if collection.cancelled {
            return Err(Error::cancelled(format!(
                "{} of {} agents settled before cancellation",
                collection.outcomes.len(),
                self.registry.len()
            )));
        }

        session.mark_synthesized()?;
        let opportunities = self
            .engine
            .synthesize(&session.record().insights, self.registry.list())
            .await?;
        let narrative = self
            .engine
            .narrate(&session.record().insights, self.registry.list(), &opportunities)
            .await;
        session.record_opportunities(opportunities)?;
        session.record_synthesis(narrative);
        Ok(collection)
    }

    async fn release(&self, session: &mut Session) -> CleanupStatus {
        match session.cleanup(false).await {
            Ok(CleanupOutcome::Deleted) => CleanupStatus::Deleted,
            Ok(CleanupOutcome::AlreadyDeleted) => CleanupStatus::AlreadyDeleted,
            Ok(CleanupOutcome::Deferred) => CleanupStatus::Deferred,
            Ok(CleanupOutcome::AlreadyCleaned | CleanupOutcome::NothingToClean) => {
                CleanupStatus::NotRequired
            }
            Err(e) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Document cleanup failed");
                CleanupStatus::Failed { reason: e.to_string() }
            }
        }
    }

    /// Delete the document of a session run with auto-cleanup off
    pub async fn cleanup_session(&self, session_id: SessionId) -> Result<CleanupOutcome> {
        let mut session = self
            .retained
            .lock()
            .remove(&session_id)
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;

        let outcome = session.cleanup(true).await;
        let mut last = self.last_session.write();
        if let Some(record) = last.as_mut().filter(|r| r.session_id == session_id) {
            *record = session.record().clone();
        }
        outcome
    }

    /// Ask one question of a retained document
    pub async fn query_document(
        &self,
        session_id: SessionId,
        question: &str,
    ) -> Result<DocumentAnswer> {
        let handle = {
            let retained = self.retained.lock();
            let session = retained
                .get(&session_id)
                .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))?;
            session
                .document()
                .map(|d| d.external_handle.clone())
                .ok_or_else(|| Error::backend("Session holds no document"))?
        };

        let options = self.collector.options();
        let request = QueryRequest {
            text: question.to_string(),
            result_limit: options.result_limit,
            use_visual_understanding: options.use_visual_understanding,
        };
        let query = self.backend.query(&handle, &request);
        let hits = tokio::time::timeout(options.query_timeout(), query)
            .await
            .map_err(|_| Error::timeout(format!("Query exceeded {:?}", options.query_timeout())))??;

        let (hits, confidence) = collector::rank_hits(hits, options.result_limit)
            .ok_or_else(|| Error::no_signal("Document query returned no results"))?;

        Ok(DocumentAnswer {
            session_id,
            question: question.to_string(),
            answer: hits
                .iter()
                .map(|h| collector::collapse_whitespace(&h.text))
                .collect::<Vec<_>>()
                .join("\n\n"),
            confidence,
            citations: hits.iter().map(|h| collector::cite(h, options.excerpt_chars)).collect(),
        })
    }

    /// Snapshot of the most recent session, including failed and cancelled runs
    pub fn last_session(&self) -> Option<AnalysisSession> {
        self.last_session.read().clone()
    }

    /// Headline numbers of the most recent session
    pub fn summary(&self) -> Option<ReportSummary> {
        self.last_session.read().as_ref().map(ReportSummary::from)
    }

    /// Sessions awaiting `cleanup_session`
    pub fn retained_sessions(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.retained.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SearchHit;
    use crate::cancel::cancellation;
    use crate::collector::FailureReason;
    use crate::config::AnalysisConfig;
    use crate::session::SessionState;
    use crate::test_support::{hit, MockBackend, Script};

    fn source() -> DocumentSource {
        DocumentSource::new("paper.pdf", b"%PDF-1.7".to_vec())
    }

    fn orchestrator(backend: Arc<MockBackend>, query_timeout_ms: u64) -> Orchestrator {
        let config = EngineConfig {
            analysis: AnalysisConfig {
                query_timeout_ms,
                ..AnalysisConfig::default()
            },
            ..EngineConfig::default()
        };
        Orchestrator::from_config(backend, &config).unwrap()
    }

    fn template(orchestrator: &Orchestrator, agent: &str) -> String {
        orchestrator.registry().get(agent).unwrap().query_template.clone()
    }

    fn hits(text: &str, score: f64) -> Script {
        let found: Vec<SearchHit> = vec![hit(text, score)];
        Script::Hits(found)
    }

    #[tokio::test]
    async fn test_successful_run_deletes_document() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let report = orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap();

        assert_eq!(report.cleanup, CleanupStatus::Deleted);
        assert_eq!(report.filename, "paper.pdf");
        assert_eq!(report.insights.len(), 5);
        assert_eq!(report.successful_insights().count(), 5);
        assert!(!report.opportunities.is_empty());
        assert!(report
            .synthesis
            .as_deref()
            .unwrap()
            .starts_with("5 of 5 agents contributed findings."));
        assert_eq!(backend.delete_calls(), 1);

        let last = orchestrator.last_session().unwrap();
        assert_eq!(last.synthesis, report.synthesis);
        assert_eq!(last.state, SessionState::CleanedUp);
        assert!(last.document_deleted);
        assert!(orchestrator.retained_sessions().is_empty());

        let summary = orchestrator.summary().unwrap();
        assert_eq!(summary.agents_participated, 5);
        assert!((summary.average_confidence - 0.5).abs() < 1e-9);
        assert_eq!(summary, report.summary());
    }

    #[tokio::test]
    async fn test_deferred_cleanup_keeps_document_until_requested() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let report = orchestrator
            .run_analysis(AnalysisRequest::new(source()).with_auto_cleanup(false))
            .await
            .unwrap();

        assert_eq!(report.cleanup, CleanupStatus::Deferred);
        assert_eq!(backend.delete_calls(), 0);
        assert_eq!(orchestrator.retained_sessions(), vec![report.session_id]);

        let answer = orchestrator
            .query_document(report.session_id, "What dataset is used?")
            .await
            .unwrap();
        assert_eq!(answer.answer, "default finding");
        assert_eq!(answer.citations.len(), 1);

        let outcome = orchestrator.cleanup_session(report.session_id).await.unwrap();
        assert!(outcome.deleted());
        assert_eq!(backend.delete_calls(), 1);
        assert!(orchestrator.last_session().unwrap().document_deleted);

        let again = orchestrator.cleanup_session(report.session_id).await;
        assert!(matches!(again, Err(Error::SessionNotFound(_))));
        assert_eq!(backend.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_zero_successes_is_no_signal_with_one_cleanup() {
        let backend = Arc::new(MockBackend::new().with_default(Script::Fail("unavailable".into())));
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let err = orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap_err();

        assert!(matches!(err, Error::NoSignal(_)));
        assert_eq!(backend.delete_calls(), 1);
        let last = orchestrator.last_session().unwrap();
        assert_eq!(last.state, SessionState::Failed);
        assert!(last.insights.is_empty());
        assert!(last.document_deleted);
    }

    #[tokio::test]
    async fn test_fatal_failure_without_auto_cleanup_retains_document() {
        let backend = Arc::new(MockBackend::new().with_default(Script::Fail("unavailable".into())));
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let err = orchestrator
            .run_analysis(AnalysisRequest::new(source()).with_auto_cleanup(false))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NoSignal(_)));
        assert_eq!(backend.delete_calls(), 0);
        let last = orchestrator.last_session().unwrap();
        assert_eq!(last.state, SessionState::Failed);
        assert!(!last.document_deleted);
        assert_eq!(orchestrator.retained_sessions(), vec![last.session_id]);

        let outcome = orchestrator.cleanup_session(last.session_id).await.unwrap();
        assert_eq!(outcome, CleanupOutcome::Deleted);
        assert_eq!(backend.delete_calls(), 1);
        assert!(orchestrator.retained_sessions().is_empty());
        let last = orchestrator.last_session().unwrap();
        assert_eq!(last.state, SessionState::Failed);
        assert!(last.document_deleted);
    }

    #[tokio::test]
    async fn test_timed_out_agent_is_reported_not_thrown() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 50);
        let script = |agent: &str, found: Script| {
            backend.script(&template(&orchestrator, agent), found);
        };
        script("technical_lead", Script::Stall);
        script("visual_analyst", hits("Figure 2 shows patient outcomes.", 0.9));
        script("product_manager", hits("Clinicians need triage tools.", 0.8));
        script("business_strategist", hits("Hospitals buy per seat.", 0.7));
        script("research_analyst", hits("A strong medical benchmark.", 0.6));

        let report = orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap();

        assert_eq!(report.successful_insights().count(), 4);
        let failed = report.agent("technical_lead").unwrap();
        assert!(!failed.succeeded);
        assert_eq!(failed.failure_reason, Some(FailureReason::Timeout));
        assert!(failed.summary.is_none());

        assert!(!report.opportunities.is_empty());
        assert!(report.opportunities.iter().any(|o| o.contributing_agents.len() <= 4));
        for opportunity in &report.opportunities {
            assert!(!opportunity.contributing_agents.contains("technical_lead"));
        }
        assert_eq!(report.opportunities[0].title, "Clinical Decision Support");
        assert!((report.opportunities[0].consensus_score - 3.0 / 5.0).abs() < 1e-9);
        assert_eq!(backend.delete_calls(), 1);
    }

    #[tokio::test]
    async fn test_override_applies_to_one_run_only() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 1_000);
        let original = template(&orchestrator, "technical_lead");
        let custom = "Focus on blockchain implementation challenges";

        let report = orchestrator
            .run_analysis(AnalysisRequest::new(source()).with_override("technical_lead", custom))
            .await
            .unwrap();
        assert_eq!(report.insights.len(), 5);

        let sent: Vec<String> = backend.queries().into_iter().map(|q| q.text).collect();
        assert!(sent.iter().any(|q| q == custom));
        assert!(!sent.contains(&original));
        assert_eq!(template(&orchestrator, "technical_lead"), original);

        orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap();
        let sent: Vec<String> = backend.queries().into_iter().map(|q| q.text).collect();
        assert_eq!(sent.iter().filter(|q| q.as_str() == custom).count(), 1);
        assert!(sent.contains(&original));
    }

    #[tokio::test]
    async fn test_unknown_override_is_rejected_before_ingest() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let err = orchestrator
            .run_analysis(
                AnalysisRequest::new(source()).with_override("legal_counsel", "Any liabilities?"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::AgentNotFound(_)));
        assert!(backend.queries().is_empty());
        assert!(orchestrator.last_session().is_none());
    }

    #[tokio::test]
    async fn test_cancellation_keeps_completed_agents_and_cleans_up() {
        let backend = Arc::new(MockBackend::new().with_default(Script::Stall));
        let orchestrator = orchestrator(backend.clone(), 60_000);
        backend.script(&template(&orchestrator, "visual_analyst"), hits("a chart", 0.5));
        backend.script(&template(&orchestrator, "business_strategist"), hits("a market", 0.5));
        let (handle, signal) = cancellation();
        backend.cancel_after(2, handle);

        let err = orchestrator
            .run_analysis(AnalysisRequest::new(source()).with_cancel(signal))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled(_)));
        assert_eq!(backend.delete_calls(), 1);
        let last = orchestrator.last_session().unwrap();
        assert_eq!(last.state, SessionState::Failed);
        assert_eq!(last.insights.len(), 2);
        assert!(last.insights.contains_key("visual_analyst"));
        assert!(last.insights.contains_key("business_strategist"));
        assert!(last.opportunities.is_empty());
    }

    #[tokio::test]
    async fn test_ingest_failure_needs_no_cleanup() {
        let backend = Arc::new(MockBackend::new().failing_ingest());
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let err = orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap_err();

        assert!(matches!(err, Error::Ingestion(_)));
        assert_eq!(backend.delete_calls(), 0);
        assert!(backend.queries().is_empty());
        assert_eq!(orchestrator.last_session().unwrap().state, SessionState::Created);
    }

    #[tokio::test]
    async fn test_cleanup_failure_does_not_mask_report() {
        let backend = Arc::new(MockBackend::new().failing_delete());
        let orchestrator = orchestrator(backend.clone(), 1_000);

        let report = orchestrator.run_analysis(AnalysisRequest::new(source())).await.unwrap();

        assert!(matches!(report.cleanup, CleanupStatus::Failed { .. }));
        assert_eq!(report.successful_insights().count(), 5);
        assert_eq!(backend.delete_calls(), 1);
        assert!(!orchestrator.last_session().unwrap().document_deleted);
    }

    #[tokio::test]
    async fn test_query_document_unknown_session() {
        let orchestrator = orchestrator(Arc::new(MockBackend::new()), 1_000);
        let err = orchestrator
            .query_document(SessionId::new(), "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SessionNotFound(_)));
    }
}
