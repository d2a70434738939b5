//! # Opportunity Engine
//!
//! Multi-agent document analysis that turns one document into ranked,
//! evidence-backed product opportunities.
//!
//! ## Features
//!
//! - **Specialist roster**: data-driven agent profiles, each with its own query template and weight
//! - **Concurrent collection**: one backend query per agent, tolerant of partial failure
//! - **Deterministic synthesis**: keyword-overlap clustering with weighted consensus scoring
//! - **Guaranteed cleanup**: the analyzed document is released on every exit path
//! - **Cancellation**: abandon outstanding agent queries and still clean up
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use opportunity_engine::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = Arc::new(MorphikClient::from_env()?);
//!     let orchestrator = Orchestrator::new(backend);
//!
//!     let source = DocumentSource::from_path("paper.pdf").await?;
//!     let report = orchestrator
//!         .run_analysis(AnalysisRequest::new(source).with_override(
//!             "technical_lead",
//!             "Focus on blockchain implementation challenges",
//!         ))
//!         .await?;
//!
//!     for opportunity in &report.opportunities {
//!         println!("{:.2} {}", opportunity.consensus_score, opportunity.title);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod cancel;
pub mod collector;
pub mod config;
pub mod error;
pub mod llm_client;
pub mod morphik;
pub mod openrouter;
pub mod orchestrator;
pub mod registry;
pub mod session;
pub mod synthesis;
pub mod tracing_ext;
pub mod types;

#[cfg(test)]
mod test_support;

// Re-exports for convenience
pub use backend::{
    DeleteOutcome, DocumentBackend, DocumentHandle, DocumentSource, QueryRequest, SearchHit,
    SourceLocation,
};
pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use collector::{
    AgentOutcome, Citation, Collection, FailureReason, Insight, InsightCollector,
};
pub use config::{AnalysisConfig, EngineConfig, MorphikConfig, OpenRouterConfig, SynthesisConfig};
pub use error::{Error, Result};
pub use llm_client::LlmClient;
pub use morphik::MorphikClient;
pub use openrouter::OpenRouterClient;
pub use orchestrator::{
    AgentReport, AnalysisReport, AnalysisRequest, CleanupStatus, DocumentAnswer, Orchestrator,
    ReportSummary,
};
pub use registry::{AgentProfile, AgentRegistry, QueryOverrides, Specialty};
pub use session::{AnalysisSession, CleanupOutcome, Document, Session, SessionState};
pub use synthesis::{
    FieldValue, ProductOpportunity, SynthesisEngine, ThemeDefinition, UnavailableReason,
};
pub use tracing_ext::{init_tracing, LogFormat};
pub use types::{AgentId, DocumentId, SessionId};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::backend::{DocumentBackend, DocumentSource};
    pub use crate::cancel::{cancellation, CancelHandle, CancelSignal};
    pub use crate::config::EngineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::morphik::MorphikClient;
    pub use crate::openrouter::OpenRouterClient;
    pub use crate::orchestrator::{AnalysisReport, AnalysisRequest, Orchestrator};
    pub use crate::registry::AgentRegistry;
    pub use crate::types::*;
}
