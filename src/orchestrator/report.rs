//! Caller-facing report types

use crate::collector::{Citation, Collection, FailureReason};
use crate::registry::AgentProfile;
use crate::session::{AnalysisSession, Session};
use crate::synthesis::ProductOpportunity;
use crate::types::{AgentId, SessionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-agent entry of a report, failed agents included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Agent id
    pub agent_id: AgentId,
    /// Display name
    pub persona_name: String,
    /// Whether the agent produced an insight
    pub succeeded: bool,
    /// Insight summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Insight confidence
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Why the agent failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<FailureReason>,
    /// Insight citations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<Citation>,
    /// Backend round trip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

/// How the document was released at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupStatus {
    /// Deleted by this run
    Deleted,
    /// Backend already no longer held it
    AlreadyDeleted,
    /// Auto-cleanup off; retained until `cleanup_session`
    Deferred,
    /// Nothing had to be deleted
    NotRequired,
    /// Deletion was attempted and failed
    Failed {
        /// Backend error
        reason: String,
    },
}

/// Result of a completed analysis run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Session the run belonged to
    pub session_id: SessionId,
    /// Analyzed file name
    pub filename: String,
    /// One entry per roster agent, in roster order
    pub insights: Vec<AgentReport>,
    /// Ranked opportunities
    pub opportunities: Vec<ProductOpportunity>,
    /// Cross-agent narrative
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<String>,
    /// Document release
    pub cleanup: CleanupStatus,
    /// Session creation time
    pub created_at: DateTime<Utc>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisReport {
    pub(crate) fn new(
        session: &Session,
        profiles: &[AgentProfile],
        collection: &Collection,
        cleanup: CleanupStatus,
    ) -> Self {
        let record = session.record();
        let insights = profiles
            .iter()
            .filter_map(|profile| {
                let outcome = collection.outcomes.get(&profile.id)?;
                let mut entry = AgentReport {
                    agent_id: profile.id.clone(),
                    persona_name: profile.persona_name.clone(),
                    succeeded: outcome.is_ok(),
                    summary: None,
                    confidence: None,
                    failure_reason: None,
                    citations: Vec::new(),
                    elapsed_ms: None,
                };
                match outcome {
                    Ok(insight) => {
                        entry.summary = Some(insight.text_summary.clone());
                        entry.confidence = Some(insight.confidence);
                        entry.citations = insight.citations.clone();
                        entry.elapsed_ms = Some(insight.elapsed_ms);
                    }
                    Err(reason) => entry.failure_reason = Some(reason.clone()),
                }
                Some(entry)
            })
            .collect();

        Self {
            session_id: record.session_id,
            filename: record
                .document
                .as_ref()
                .map(|d| d.filename.clone())
                .unwrap_or_default(),
            insights,
            opportunities: record.opportunities.clone(),
            synthesis: record.synthesis.clone(),
            cleanup,
            created_at: record.created_at,
            completed_at: record.completed_at,
        }
    }

    /// Entries of agents that produced an insight
    pub fn successful_insights(&self) -> impl Iterator<Item = &AgentReport> {
        self.insights.iter().filter(|entry| entry.succeeded)
    }

    /// Entry for one agent
    pub fn agent(&self, agent_id: &str) -> Option<&AgentReport> {
        self.insights.iter().find(|entry| entry.agent_id.as_str() == agent_id)
    }

    /// Headline numbers
    pub fn summary(&self) -> ReportSummary {
        let confidences: Vec<f64> = self
            .successful_insights()
            .filter_map(|e| e.confidence)
            .collect();
        ReportSummary {
            session_id: self.session_id,
            agents_participated: confidences.len(),
            average_confidence: mean(&confidences),
            opportunity_count: self.opportunities.len(),
            top_opportunity: self.opportunities.first().map(|o| o.title.clone()),
        }
    }
}

/// Headline numbers of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Session id
    pub session_id: SessionId,
    /// Agents that produced an insight
    pub agents_participated: usize,
    /// Mean confidence of those insights, 0 when there are none
    pub average_confidence: f64,
    /// Number of opportunities
    pub opportunity_count: usize,
    /// Title of the highest ranked opportunity
    pub top_opportunity: Option<String>,
}

impl From<&AnalysisSession> for ReportSummary {
    fn from(record: &AnalysisSession) -> Self {
        let confidences: Vec<f64> = record.insights.values().map(|i| i.confidence).collect();
        Self {
            session_id: record.session_id,
            agents_participated: confidences.len(),
            average_confidence: mean(&confidences),
            opportunity_count: record.opportunities.len(),
            top_opportunity: record.opportunities.first().map(|o| o.title.clone()),
        }
    }
}

/// Answer to an ad-hoc question about a retained document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentAnswer {
    /// Session holding the document
    pub session_id: SessionId,
    /// Question as asked
    pub question: String,
    /// Top results, one paragraph each
    pub answer: String,
    /// Mean clamped relevance of the results
    pub confidence: f64,
    /// Evidence in rank order
    pub citations: Vec<Citation>,
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
