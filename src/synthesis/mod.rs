//! Opportunity synthesis
//!
//! Merges the settled insights of one run into ranked [`ProductOpportunity`]
//! values. Agents are linked to themes by keyword overlap; each theme becomes
//! one opportunity whose consensus score is the weighted confidence of its
//! linked agents over the weight of the whole roster, so a failed agent
//! always lowers the score it would have contributed to.
//!
//! Given the same insights, roster and catalog the output is identical.

mod fields;
mod narrative;
mod themes;

pub use fields::{FieldValue, UnavailableReason};
pub use themes::{default_catalog, ThemeDefinition, GENERAL_THEME_TITLE};

use crate::collector::{Citation, Insight};
use crate::config::SynthesisConfig;
use crate::error::{Error, Result};
use crate::llm_client::LlmClient;
use crate::registry::{AgentProfile, Specialty};
use crate::types::AgentId;
use fields::FieldSources;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use themes::ThemeMatch;

/// A synthesized, evidence-backed proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductOpportunity {
    /// Theme title
    pub title: String,
    /// Short description from the contributing agents' findings
    pub description: String,
    /// From the business specialist
    pub market_size_estimate: FieldValue<String>,
    /// From the technical specialist
    pub technical_requirements: FieldValue<Vec<String>>,
    /// From the product specialist
    pub target_users: FieldValue<Vec<String>>,
    /// From the business specialist
    pub revenue_model: FieldValue<String>,
    /// Citations from every contributing agent
    pub supporting_evidence: Vec<Citation>,
    /// Weighted agreement in `[0, 1]`
    pub consensus_score: f64,
    /// Agents whose insights are linked to this theme
    pub contributing_agents: BTreeSet<AgentId>,
    /// Each contributing specialty's theme-relevant finding
    #[serde(default)]
    pub agent_perspectives: BTreeMap<Specialty, String>,
}

/// Turns insights into ranked opportunities
pub struct SynthesisEngine {
    options: SynthesisConfig,
    catalog: Vec<ThemeDefinition>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl SynthesisEngine {
    /// Engine over the built-in theme catalog
    pub fn new(options: SynthesisConfig) -> Self {
        Self {
            options,
            catalog: default_catalog(),
            llm: None,
        }
    }

    /// Replace the theme catalog
    pub fn with_catalog(mut self, catalog: Vec<ThemeDefinition>) -> Self {
        self.catalog = catalog;
        self
    }

    /// Ask a language model for themes before falling back to the catalog
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Active theme catalog
    pub fn catalog(&self) -> &[ThemeDefinition] {
        &self.catalog
    }

    /// Synthesis settings
    pub fn options(&self) -> &SynthesisConfig {
        &self.options
    }

    /// Synthesize opportunities from successful insights.
    ///
    /// `profiles` is the full roster of the run, failed agents included.
    /// Returns [`Error::NoSignal`] when `insights` is empty.
    pub async fn synthesize(
        &self,
        insights: &BTreeMap<AgentId, Insight>,
        profiles: &[AgentProfile],
    ) -> Result<Vec<ProductOpportunity>> {
        if insights.is_empty() {
            return Err(Error::no_signal("no successful insights to synthesize"));
        }

        let Some(llm) = &self.llm else {
            return self.synthesize_with_catalog(insights, profiles, &self.catalog);
        };

        let roster = linked_roster(insights, profiles);
        let prompt = themes::theme_prompt(&roster, self.options.max_opportunities);
        let extracted = llm
            .complete(&prompt)
            .await
            .and_then(|response| themes::parse_themes(&response));

        match extracted {
            Ok(catalog) => {
                tracing::debug!(
                    client = llm.client_type(),
                    themes = catalog.len(),
                    "Using model-extracted themes"
                );
                self.synthesize_with_catalog(insights, profiles, &catalog)
            }
            Err(e) => {
                tracing::warn!(
                    client = llm.client_type(),
                    error = %e,
                    "Theme extraction failed; using built-in catalog"
                );
                self.synthesize_with_catalog(insights, profiles, &self.catalog)
            }
        }
    }

    /// Cross-agent narrative of a run.
    ///
    /// Asks the language model when one is configured; otherwise, or when the
    /// model fails, the narrative is assembled from each agent's headline.
    pub async fn narrate(
        &self,
        insights: &BTreeMap<AgentId, Insight>,
        profiles: &[AgentProfile],
        opportunities: &[ProductOpportunity],
    ) -> String {
        let roster = linked_roster(insights, profiles);
        let Some(llm) = &self.llm else {
            return narrative::summarize(&roster, profiles.len(), opportunities);
        };

        match llm.complete(&narrative::prompt(&roster, opportunities)).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!(
                    client = llm.client_type(),
                    "Model returned an empty synthesis; summarizing locally"
                );
                narrative::summarize(&roster, profiles.len(), opportunities)
            }
            Err(e) => {
                tracing::warn!(
                    client = llm.client_type(),
                    error = %e,
                    "Synthesis narrative failed; summarizing locally"
                );
                narrative::summarize(&roster, profiles.len(), opportunities)
            }
        }
    }

    /// Deterministic synthesis against an explicit catalog
    pub fn synthesize_with_catalog(
        &self,
        insights: &BTreeMap<AgentId, Insight>,
        profiles: &[AgentProfile],
        catalog: &[ThemeDefinition],
    ) -> Result<Vec<ProductOpportunity>> {
        let roster = linked_roster(insights, profiles);
        if roster.is_empty() {
            return Err(Error::no_signal("no successful insights to synthesize"));
        }

        let mut matches = themes::cluster(catalog, &roster, self.options.min_keyword_hits);
        if matches.is_empty() {
            matches = themes::emergent(&roster, self.options.max_opportunities.max(1));
        }
        if matches.is_empty() {
            matches = vec![themes::general(&roster)];
        }

        let total_weight: f64 = profiles.iter().map(|p| p.weight).sum();
        let sources = FieldSources::new(profiles, insights);

        let mut opportunities: Vec<ProductOpportunity> = matches
            .iter()
            .map(|m| self.build(m, total_weight, &sources))
            .collect();

        opportunities.sort_by(|a, b| {
            b.consensus_score
                .total_cmp(&a.consensus_score)
                .then(b.contributing_agents.len().cmp(&a.contributing_agents.len()))
                .then_with(|| a.title.cmp(&b.title))
        });
        opportunities.truncate(self.options.max_opportunities.max(1));

        tracing::info!(
            opportunities = opportunities.len(),
            top_score = opportunities.first().map(|o| o.consensus_score).unwrap_or(0.0),
            "Synthesis complete"
        );
        Ok(opportunities)
    }

    fn build(
        &self,
        m: &ThemeMatch<'_>,
        total_weight: f64,
        sources: &FieldSources<'_>,
    ) -> ProductOpportunity {
        let weighted: f64 = m
            .agents
            .iter()
            .map(|(profile, insight)| profile.weight * insight.confidence)
            .sum();
        let consensus_score = if total_weight > 0.0 {
            (weighted / total_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };

        ProductOpportunity {
            title: m.theme.title.clone(),
            description: fields::describe(&m.theme, &m.agents),
            market_size_estimate: sources.market_size(m),
            technical_requirements: sources.technical_requirements(m),
            target_users: sources.target_users(m),
            revenue_model: sources.revenue_model(m),
            supporting_evidence: self.evidence(m),
            consensus_score,
            contributing_agents: m.agents.iter().map(|(p, _)| p.id.clone()).collect(),
            agent_perspectives: fields::perspectives(m),
        }
    }

    /// Round-robin over the linked agents so each contributes before any repeats
    fn evidence(&self, m: &ThemeMatch<'_>) -> Vec<Citation> {
        let per_agent: Vec<Vec<&Citation>> = m
            .agents
            .iter()
            .map(|(_, insight)| {
                let relevant: Vec<_> = insight
                    .citations
                    .iter()
                    .filter(|c| m.theme.keywords.is_empty() || m.theme.mentioned_in(&c.excerpt))
                    .collect();
                if relevant.is_empty() {
                    insight.citations.iter().take(1).collect()
                } else {
                    relevant
                }
            })
            .collect();

        let mut evidence: Vec<Citation> = Vec::new();
        let depth = per_agent.iter().map(Vec::len).max().unwrap_or(0);
        'fill: for round in 0..depth {
            for citations in &per_agent {
                if evidence.len() >= self.options.max_evidence {
                    break 'fill;
                }
                if let Some(&citation) = citations.get(round) {
                    if !evidence.contains(citation) {
                        evidence.push(citation.clone());
                    }
                }
            }
        }
        evidence
    }
}

/// Successful insights paired with their profiles, in roster order
fn linked_roster<'a>(
    insights: &'a BTreeMap<AgentId, Insight>,
    profiles: &'a [AgentProfile],
) -> Vec<(&'a AgentProfile, &'a Insight)> {
    profiles
        .iter()
        .filter_map(|p| insights.get(&p.id).map(|i| (p, i)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SourceLocation;
    use crate::registry::AgentRegistry;
    use crate::test_support::MockLlm;

    fn insight(agent: &str, confidence: f64, lines: &[&str]) -> Insight {
        let mut text_summary = format!("{} findings:", agent);
        for line in lines {
            text_summary.push_str("\n- ");
            text_summary.push_str(line);
        }
        Insight {
            agent_id: AgentId::new(agent),
            text_summary,
            confidence,
            citations: lines
                .iter()
                .enumerate()
                .map(|(i, line)| Citation {
                    excerpt: line.to_string(),
                    source_location: SourceLocation {
                        document: "doc-1".into(),
                        chunk: Some(i as u32),
                        page: Some(1),
                    },
                })
                .collect(),
            query: "q".into(),
            elapsed_ms: 1,
        }
    }

    fn insights(entries: Vec<Insight>) -> BTreeMap<AgentId, Insight> {
        entries.into_iter().map(|i| (i.agent_id.clone(), i)).collect()
    }

    fn engine() -> SynthesisEngine {
        SynthesisEngine::new(SynthesisConfig::default())
    }

    #[tokio::test]
    async fn test_empty_insights_is_no_signal() {
        let registry = AgentRegistry::default();
        let err = engine().synthesize(&BTreeMap::new(), registry.list()).await.unwrap_err();
        assert!(matches!(err, Error::NoSignal(_)));
    }

    #[tokio::test]
    async fn test_single_agent_score_is_weight_share() {
        let registry = AgentRegistry::default();
        let input = insights(vec![insight(
            "product_manager",
            0.6,
            &["Hospitals could triage patient scans faster."],
        )]);

        let opportunities = engine().synthesize(&input, registry.list()).await.unwrap();

        assert_eq!(opportunities.len(), 1);
        let top = &opportunities[0];
        assert_eq!(top.title, "Clinical Decision Support");
        assert!((top.consensus_score - 0.6 / 5.0).abs() < 1e-9);
        assert_eq!(top.contributing_agents.len(), 1);
        assert!(top.contributing_agents.contains("product_manager"));
        assert_eq!(top.supporting_evidence.len(), 1);
    }

    #[test]
    fn test_ranking_and_determinism() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight("technical_lead", 0.8, &["The model needs GPU inference at low latency."]),
            insight("product_manager", 0.7, &["Clinicians want patient triage tools."]),
            insight(
                "business_strategist",
                0.9,
                &["Hospital buyers pay per seat for diagnosis support."],
            ),
            insight("research_analyst", 0.5, &["Validated on three medical imaging benchmarks."]),
        ]);

        let first = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let second = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(first[0].title, "Clinical Decision Support");
        assert_eq!(first[0].contributing_agents.len(), 3);
        assert!((first[0].consensus_score - (0.7 + 0.9 + 0.5) / 5.0).abs() < 1e-9);
        for pair in first.windows(2) {
            assert!(pair[0].consensus_score >= pair[1].consensus_score);
        }
    }

    #[test]
    fn test_ties_break_on_contributors_then_title() {
        let registry = AgentRegistry::default();
        let catalog = vec![
            ThemeDefinition::new("Zeta", &["alpha"]),
            ThemeDefinition::new("Beta", &["gamma"]),
            ThemeDefinition::new("Alpha", &["delta"]),
        ];
        // Zeta: two agents at 0.3 = 0.6 total; Beta and Alpha: one agent at 0.6 each
        let input = insights(vec![
            insight("visual_analyst", 0.3, &["alpha signal"]),
            insight("technical_lead", 0.3, &["alpha again"]),
            insight("product_manager", 0.6, &["gamma signal"]),
            insight("business_strategist", 0.6, &["delta signal"]),
        ]);

        let ranked = engine()
            .synthesize_with_catalog(&input, registry.list(), &catalog)
            .unwrap();
        let titles: Vec<_> = ranked.iter().map(|o| o.title.as_str()).collect();
        assert_eq!(titles, vec!["Zeta", "Alpha", "Beta"]);
    }

    #[test]
    fn test_extra_agreement_never_lowers_score() {
        let registry = AgentRegistry::default();
        let one = insights(vec![insight(
            "product_manager",
            0.6,
            &["Robot fleets for warehouses."],
        )]);
        let mut two = one.clone();
        let extra = insight(
            "research_analyst",
            0.4,
            &["Autonomous navigation results are strong."],
        );
        two.insert(extra.agent_id.clone(), extra);

        let score = |input: &BTreeMap<AgentId, Insight>| {
            engine()
                .synthesize_with_catalog(input, registry.list(), &default_catalog())
                .unwrap()[0]
                .consensus_score
        };
        assert!(score(&two) >= score(&one));
    }

    #[test]
    fn test_fields_follow_specialists() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight(
                "technical_lead",
                0.8,
                &["Deployment requires GPU clusters for patient image processing."],
            ),
            insight("product_manager", 0.7, &["Radiology teams in hospitals are the first users."]),
        ]);

        let top = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap()
            .into_iter()
            .find(|o| o.title == "Clinical Decision Support")
            .unwrap();

        assert_eq!(
            top.market_size_estimate,
            FieldValue::Unavailable { reason: UnavailableReason::SpecialistFailed }
        );
        assert_eq!(
            top.revenue_model,
            FieldValue::Unavailable { reason: UnavailableReason::SpecialistFailed }
        );
        assert_eq!(
            top.technical_requirements.value().unwrap(),
            &vec!["Deployment requires GPU clusters for patient image processing.".to_string()]
        );
        assert!(top.target_users.is_available());
    }

    #[test]
    fn test_market_size_prefers_money_figures() {
        let registry = AgentRegistry::default();
        let input = insights(vec![insight(
            "business_strategist",
            0.9,
            &[
                "The fraud screening market is crowded.",
                "Fraud tooling is a $12.5B market growing 20% a year.",
                "Fraud teams at banks prefer subscription licensing.",
            ],
        )]);

        let ranked = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let top = &ranked[0];

        assert_eq!(top.title, "Financial Risk & Fraud Intelligence");
        assert_eq!(
            top.market_size_estimate.value().map(String::as_str),
            Some("Fraud tooling is a $12.5B market growing 20% a year.")
        );
        assert_eq!(
            top.revenue_model.value().map(String::as_str),
            Some("Fraud teams at banks prefer subscription licensing.")
        );
        assert_eq!(
            top.technical_requirements,
            FieldValue::Unavailable { reason: UnavailableReason::SpecialistFailed }
        );
    }

    #[test]
    fn test_fields_only_come_from_contributing_agents() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight("product_manager", 0.6, &["Hospitals could triage patient scans faster."]),
            insight(
                "business_strategist",
                0.8,
                &["Fraud tooling is a $12.5B market sold by subscription licensing."],
            ),
        ]);

        let ranked = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let clinical = ranked.iter().find(|o| o.title == "Clinical Decision Support").unwrap();
        let fraud = ranked
            .iter()
            .find(|o| o.title == "Financial Risk & Fraud Intelligence")
            .unwrap();

        assert_eq!(clinical.contributing_agents.len(), 1);
        assert!(clinical.contributing_agents.contains("product_manager"));
        assert_eq!(
            clinical.market_size_estimate,
            FieldValue::Unavailable { reason: UnavailableReason::NoSignal }
        );
        assert_eq!(
            clinical.revenue_model,
            FieldValue::Unavailable { reason: UnavailableReason::NoSignal }
        );
        assert_eq!(
            fraud.market_size_estimate.value().map(String::as_str),
            Some("Fraud tooling is a $12.5B market sold by subscription licensing.")
        );
    }

    #[test]
    fn test_off_theme_sentences_are_ignored() {
        let registry = AgentRegistry::default();
        let input = insights(vec![insight(
            "business_strategist",
            0.8,
            &[
                "Hospital networks are the first buyers.",
                "Robot fleets are a $3B market on subscription.",
            ],
        )]);

        let ranked = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let clinical = ranked.iter().find(|o| o.title == "Clinical Decision Support").unwrap();

        assert_eq!(
            clinical.market_size_estimate,
            FieldValue::Unavailable { reason: UnavailableReason::NoSignal }
        );
        assert_eq!(
            clinical.revenue_model,
            FieldValue::Unavailable { reason: UnavailableReason::NoSignal }
        );
    }

    #[test]
    fn test_perspectives_per_contributing_specialty() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight("technical_lead", 0.8, &["The model needs GPU inference at low latency."]),
            insight(
                "product_manager",
                0.7,
                &["Teams ship weekly.", "Clinicians want patient triage tools."],
            ),
            insight(
                "business_strategist",
                0.9,
                &["Hospital buyers pay per seat for diagnosis support."],
            ),
        ]);

        let ranked = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let clinical = ranked.iter().find(|o| o.title == "Clinical Decision Support").unwrap();

        let expected: BTreeMap<Specialty, String> = [
            (Specialty::Product, "Clinicians want patient triage tools.".to_string()),
            (
                Specialty::Business,
                "Hospital buyers pay per seat for diagnosis support.".to_string(),
            ),
        ]
        .into_iter()
        .collect();
        assert_eq!(clinical.agent_perspectives, expected);

        let json = serde_json::to_value(clinical).unwrap();
        assert_eq!(
            json["agent_perspectives"]["product"],
            "Clinicians want patient triage tools."
        );
    }

    #[tokio::test]
    async fn test_narrative_without_model_uses_headlines() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight("technical_lead", 0.8, &["The model needs GPU inference.", "It scales."]),
            insight("research_analyst", 0.6, &["Results beat three baselines."]),
        ]);
        let engine = engine();
        let ranked = engine
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();

        let narrative = engine.narrate(&input, registry.list(), &ranked).await;
        let lines: Vec<&str> = narrative.lines().collect();

        assert_eq!(lines[0], "2 of 5 agents contributed findings.");
        assert_eq!(lines[1], "Technical Lead: The model needs GPU inference.");
        assert_eq!(lines[2], "Research Analyst: Results beat three baselines.");
        assert!(lines[3].starts_with(&format!("Leading opportunity: {}", ranked[0].title)));
    }

    #[tokio::test]
    async fn test_narrative_from_model_with_fallback() {
        let registry = AgentRegistry::default();
        let input = insights(vec![insight(
            "technical_lead",
            0.7,
            &["Custom kernels halve latency."],
        )]);

        let llm = Arc::new(MockLlm::replying("  Kernels are the core innovation.  "));
        let narrative = engine().with_llm(llm.clone()).narrate(&input, registry.list(), &[]).await;
        assert_eq!(narrative, "Kernels are the core innovation.");
        assert!(llm.prompts()[0].contains("TECHNICAL LEAD ANALYSIS"));

        for llm in [MockLlm::failing("rate limited"), MockLlm::replying("   ")] {
            let narrative = engine()
                .with_llm(Arc::new(llm))
                .narrate(&input, registry.list(), &[])
                .await;
            assert_eq!(
                narrative,
                "1 of 5 agents contributed findings.\nTechnical Lead: Custom kernels halve latency."
            );
        }
    }

    #[test]
    fn test_fallbacks_when_no_catalog_theme_matches() {
        let registry = AgentRegistry::default();
        let input = insights(vec![
            insight("technical_lead", 0.5, &["Sparsity patterns accelerate kernels."]),
            insight("research_analyst", 0.5, &["Novel sparsity regularizer."]),
        ]);

        let emergent = engine()
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        assert_eq!(emergent[0].title, "Sparsity Solutions");
        assert_eq!(emergent[0].contributing_agents.len(), 2);

        let terse = insights(vec![insight("technical_lead", 0.5, &["Works well."])]);
        let general = engine()
            .synthesize_with_catalog(&terse, registry.list(), &default_catalog())
            .unwrap();
        assert_eq!(general.len(), 1);
        assert_eq!(general[0].title, GENERAL_THEME_TITLE);
    }

    #[test]
    fn test_evidence_is_capped_and_shared() {
        let registry = AgentRegistry::default();
        let lines = ["patient one", "patient two", "patient three", "patient four"];
        let input = insights(vec![
            insight("product_manager", 0.5, &lines),
            insight("research_analyst", 0.5, &["clinical trial data"]),
        ]);
        let engine = SynthesisEngine::new(SynthesisConfig {
            max_evidence: 3,
            ..SynthesisConfig::default()
        });

        let ranked = engine
            .synthesize_with_catalog(&input, registry.list(), &default_catalog())
            .unwrap();
        let top = &ranked[0];
        assert_eq!(top.supporting_evidence.len(), 3);
        assert_eq!(top.supporting_evidence[1].excerpt, "clinical trial data");
    }

    #[tokio::test]
    async fn test_model_themes_are_used_when_valid() {
        let registry = AgentRegistry::default();
        let llm = Arc::new(MockLlm::replying(
            "{\"themes\": [{\"title\": \"Kernel Autotuner\", \"keywords\": [\"kernel\"]}]}",
        ));
        let engine = engine().with_llm(llm.clone());
        let input = insights(vec![insight(
            "technical_lead",
            0.7,
            &["Custom kernels halve latency."],
        )]);

        let opportunities = engine.synthesize(&input, registry.list()).await.unwrap();

        assert_eq!(opportunities.len(), 1);
        assert_eq!(opportunities[0].title, "Kernel Autotuner");
        assert!(llm.prompts()[0].contains("Custom kernels halve latency."));
    }

    #[tokio::test]
    async fn test_model_failure_falls_back_to_catalog() {
        let registry = AgentRegistry::default();
        let input = insights(vec![insight(
            "technical_lead",
            0.7,
            &["Custom kernels halve latency."],
        )]);

        for llm in [MockLlm::failing("rate limited"), MockLlm::replying("not json")] {
            let engine = engine().with_llm(Arc::new(llm));
            let opportunities = engine.synthesize(&input, registry.list()).await.unwrap();
            assert_eq!(opportunities[0].title, "Efficient AI Infrastructure");
        }
    }
}
