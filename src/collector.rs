//! Insight collection
//!
//! Dispatches one query per agent against the session's document, all
//! concurrently, and turns each ranked result list into an [`Insight`]. A
//! failing agent is recorded as a [`FailureReason`] and never aborts the batch.

use crate::backend::{DocumentBackend, DocumentHandle, QueryRequest, SearchHit, SourceLocation};
use crate::cancel::CancelSignal;
use crate::config::AnalysisConfig;
use crate::error::{Error, Result};
use crate::registry::{AgentProfile, AgentRegistry, QueryOverrides};
use crate::session::{Session, SessionState};
use crate::types::AgentId;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A piece of evidence taken from a search result
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    /// Result text, truncated
    pub excerpt: String,
    /// Where the result came from
    pub source_location: SourceLocation,
}

/// One agent's structured finding about the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Agent that produced it
    pub agent_id: AgentId,
    /// Framed concatenation of the top results
    pub text_summary: String,
    /// Normalized mean relevance of the top results, in `[0, 1]`
    pub confidence: f64,
    /// Evidence in rank order
    pub citations: Vec<Citation>,
    /// Query actually sent
    pub query: String,
    /// Backend round trip in milliseconds
    pub elapsed_ms: u64,
}

impl Insight {
    /// Summary text without the framing header line
    pub fn findings(&self) -> &str {
        self.text_summary
            .split_once('\n')
            .map(|(_, body)| body)
            .unwrap_or("")
    }
}

/// Why an agent produced no insight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The backend did not answer within the query timeout
    Timeout,
    /// The backend returned an error
    BackendError {
        /// Backend error message
        message: String,
    },
    /// The backend answered with no results
    EmptyResult,
    /// The query task panicked
    TaskPanicked,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::BackendError { message } => write!(f, "backend_error: {}", message),
            Self::EmptyResult => write!(f, "empty_result"),
            Self::TaskPanicked => write!(f, "task_panicked"),
        }
    }
}

/// Settled result of one agent
pub type AgentOutcome = std::result::Result<Insight, FailureReason>;

/// Outcomes of one collection batch
#[derive(Debug, Clone, Default)]
pub struct Collection {
    /// Settled agents only; agents still in flight at cancellation are absent
    pub outcomes: BTreeMap<AgentId, AgentOutcome>,
    /// Whether the batch stopped early on cancellation
    pub cancelled: bool,
}

impl Collection {
    /// Successful insights keyed by agent
    pub fn insights(&self) -> BTreeMap<AgentId, Insight> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().ok().map(|i| (id.clone(), i.clone())))
            .collect()
    }

    /// Number of successful agents
    pub fn succeeded(&self) -> usize {
        self.outcomes.values().filter(|o| o.is_ok()).count()
    }

    /// Failed agents with their reasons
    pub fn failures(&self) -> impl Iterator<Item = (&AgentId, &FailureReason)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.as_ref().err().map(|reason| (id, reason)))
    }
}

/// Concurrent per-agent query dispatcher
pub struct InsightCollector {
    backend: Arc<dyn DocumentBackend>,
    options: AnalysisConfig,
}

impl InsightCollector {
    /// Create a collector over a backend
    pub fn new(backend: Arc<dyn DocumentBackend>, options: AnalysisConfig) -> Self {
        Self { backend, options }
    }

    /// Collection settings
    pub fn options(&self) -> &AnalysisConfig {
        &self.options
    }

    /// Query every agent against the session's document.
    ///
    /// Waits until every agent settles or `cancel` is raised. Returns
    /// [`Error::NoSignal`] when the batch ran to completion without a single
    /// success; a cancelled batch is returned as is with `cancelled` set.
    pub async fn collect(
        &self,
        session: &Session,
        registry: &AgentRegistry,
        overrides: &QueryOverrides,
        cancel: &mut CancelSignal,
    ) -> Result<Collection> {
        if session.state() != SessionState::Analyzing {
            return Err(Error::InvalidTransition {
                from: session.state(),
                to: SessionState::Analyzing,
            });
        }
        let handle = session
            .document()
            .map(|d| d.external_handle.clone())
            .ok_or_else(|| Error::backend("Session has no ingested document"))?;

        let mut collection = Collection::default();
        if cancel.is_cancelled() {
            collection.cancelled = true;
            return Ok(collection);
        }

        let planned = registry
            .list()
            .iter()
            .map(|profile| {
                registry
                    .effective_query(profile.id.as_str(), overrides)
                    .map(|query| (profile, query.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut pending: FuturesUnordered<_> = planned
            .into_iter()
            .map(|(profile, query)| {
                let request = QueryRequest {
                    text: query,
                    result_limit: self.options.result_limit,
                    use_visual_understanding: self.options.use_visual_understanding,
                };
                let task = tokio::spawn(query_agent(
                    self.backend.clone(),
                    handle.clone(),
                    profile.clone(),
                    request,
                    self.options.clone(),
                ));
                let agent_id = profile.id.clone();
                task.map(move |joined| (agent_id, joined))
            })
            .collect();

        tracing::debug!(
            session_id = %session.id(),
            agents = registry.len(),
            "Dispatched agent queries"
        );

        while !pending.is_empty() {
            tokio::select! {
                biased;
                Some((agent_id, joined)) = pending.next() => {
                    let outcome = joined.unwrap_or_else(|e| {
                        tracing::warn!(%agent_id, error = %e, "Agent task aborted");
                        Err(FailureReason::TaskPanicked)
                    });
                    collection.outcomes.insert(agent_id, outcome);
                }
                _ = cancel.cancelled() => {
                    tracing::info!(
                        session_id = %session.id(),
                        outstanding = pending.len(),
                        "Cancellation raised; abandoning outstanding agent queries"
                    );
                    collection.cancelled = true;
                    break;
                }
            }
        }

        if !collection.cancelled && collection.succeeded() == 0 {
            let reasons = collection
                .failures()
                .map(|(id, reason)| format!("{}: {}", id, reason))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(Error::no_signal(format!(
                "all {} agents failed ({})",
                collection.outcomes.len(),
                reasons
            )));
        }

        Ok(collection)
    }
}

async fn query_agent(
    backend: Arc<dyn DocumentBackend>,
    handle: DocumentHandle,
    profile: AgentProfile,
    request: QueryRequest,
    options: AnalysisConfig,
) -> AgentOutcome {
    let started = Instant::now();
    let result = tokio::time::timeout(options.query_timeout(), backend.query(&handle, &request))
        .await;
    let elapsed = started.elapsed();

    let hits = match result {
        Err(_) | Ok(Err(Error::Timeout(_))) => {
            tracing::warn!(
                agent_id = %profile.id,
                elapsed_ms = elapsed.as_millis() as u64,
                "Agent query timed out"
            );
            return Err(FailureReason::Timeout);
        }
        Ok(Err(e)) => {
            tracing::warn!(agent_id = %profile.id, error = %e, "Agent query failed");
            return Err(FailureReason::BackendError {
                message: e.to_string(),
            });
        }
        Ok(Ok(hits)) => hits,
    };

    let insight = build_insight(&profile, request.text, hits, elapsed, &options);
    match &insight {
        Ok(i) => tracing::info!(
            agent_id = %profile.id,
            confidence = i.confidence,
            citations = i.citations.len(),
            elapsed_ms = i.elapsed_ms,
            "Agent completed analysis"
        ),
        Err(reason) => tracing::warn!(agent_id = %profile.id, %reason, "Agent produced no insight"),
    }
    insight
}

/// Turn ranked backend results into an insight
pub(crate) fn build_insight(
    profile: &AgentProfile,
    query: String,
    hits: Vec<SearchHit>,
    elapsed: Duration,
    options: &AnalysisConfig,
) -> AgentOutcome {
    let (hits, confidence) =
        rank_hits(hits, options.result_limit).ok_or(FailureReason::EmptyResult)?;

    let mut text_summary = format!("{} ({}) findings:", profile.persona_name, profile.role);
    for hit in &hits {
        text_summary.push_str("\n- ");
        text_summary.push_str(&collapse_whitespace(&hit.text));
    }

    Ok(Insight {
        agent_id: profile.id.clone(),
        text_summary,
        confidence,
        citations: hits.iter().map(|hit| cite(hit, options.excerpt_chars)).collect(),
        query,
        elapsed_ms: elapsed.as_millis() as u64,
    })
}

/// Keep the top `limit` non-blank hits by score with their mean clamped score
pub(crate) fn rank_hits(mut hits: Vec<SearchHit>, limit: usize) -> Option<(Vec<SearchHit>, f64)> {
    hits.retain(|h| !h.text.trim().is_empty());
    if hits.is_empty() {
        return None;
    }

    hits.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
    hits.truncate(limit.max(1));

    let total: f64 = hits.iter().map(|h| normalize_score(h.relevance_score)).sum();
    let mean = total / hits.len() as f64;
    Some((hits, mean.clamp(0.0, 1.0)))
}

/// Citation for one hit with its text collapsed and truncated
pub(crate) fn cite(hit: &SearchHit, excerpt_chars: usize) -> Citation {
    Citation {
        excerpt: truncate_chars(&collapse_whitespace(&hit.text), excerpt_chars),
        source_location: hit.source_location.clone(),
    }
}

fn normalize_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}
