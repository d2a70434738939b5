//! Agent profile registry
//!
//! Specialists are data, not types: every agent is an [`AgentProfile`] with a
//! query template and a weight, and the registry is an ordered, read-only
//! collection of them. Callers can replace an agent's query for a single
//! invocation through [`AgentRegistry::effective_query`] without touching the
//! stored template.

use crate::error::{Error, Result};
use crate::types::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Caller-supplied replacement queries, keyed by agent id
pub type QueryOverrides = HashMap<AgentId, String>;

/// Domain a specialist covers; drives which opportunity fields it feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Specialty {
    /// Figures, charts, diagrams
    Visual,
    /// Implementation and feasibility; feeds technical requirements
    Technical,
    /// Market fit and users; feeds target users
    Product,
    /// Revenue and market sizing; feeds market size and revenue model
    Business,
    /// Academic merit and novelty
    Research,
}

/// A specialist definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable agent id
    pub id: AgentId,
    /// Persona display name
    pub persona_name: String,
    /// Job title used in summaries
    pub role: String,
    /// Specialty
    pub specialty: Specialty,
    /// Topics the persona concentrates on
    #[serde(default)]
    pub focus_areas: Vec<String>,
    /// Default query sent to the document backend
    pub query_template: String,
    /// Relative weight in consensus scoring
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

impl AgentProfile {
    /// Create a profile with weight 1.0 and no focus areas
    pub fn new(
        id: impl Into<String>,
        persona_name: impl Into<String>,
        role: impl Into<String>,
        specialty: Specialty,
        query_template: impl Into<String>,
    ) -> Self {
        Self {
            id: AgentId::new(id),
            persona_name: persona_name.into(),
            role: role.into(),
            specialty,
            focus_areas: Vec::new(),
            query_template: query_template.into(),
            weight: default_weight(),
        }
    }

    /// Set the weight
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Set the focus areas
    pub fn with_focus_areas(mut self, areas: &[&str]) -> Self {
        self.focus_areas = areas.iter().map(|a| a.to_string()).collect();
        self
    }
}

/// Ordered, immutable collection of agent profiles
#[derive(Debug, Clone)]
pub struct AgentRegistry {
    profiles: Vec<AgentProfile>,
}

impl AgentRegistry {
    /// Build a registry from an ordered list of profiles.
    ///
    /// Ids must be unique and weights finite and positive.
    pub fn new(profiles: Vec<AgentProfile>) -> Result<Self> {
        if profiles.is_empty() {
            return Err(Error::config("Agent registry must contain at least one profile"));
        }

        let mut seen = HashSet::new();
        for profile in &profiles {
            if !seen.insert(profile.id.clone()) {
                return Err(Error::config(format!("Duplicate agent id: {}", profile.id)));
            }
            if !profile.weight.is_finite() || profile.weight <= 0.0 {
                return Err(Error::config(format!(
                    "Agent {} has invalid weight {}",
                    profile.id, profile.weight
                )));
            }
            if profile.query_template.trim().is_empty() {
                return Err(Error::config(format!(
                    "Agent {} has an empty query template",
                    profile.id
                )));
            }
        }

        Ok(Self { profiles })
    }

    /// Load profiles from a YAML list
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let profiles: Vec<AgentProfile> = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("Failed to parse agent YAML: {}", e)))?;
        Self::new(profiles)
    }

    /// Load profiles from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::config(format!("Failed to read file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// All profiles in roster order
    pub fn list(&self) -> &[AgentProfile] {
        &self.profiles
    }

    /// Look up a profile by id
    pub fn get(&self, agent_id: &str) -> Result<&AgentProfile> {
        self.profiles
            .iter()
            .find(|p| p.id.as_str() == agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
    }

    /// The query to send for `agent_id`: the caller's override if present, the template otherwise
    pub fn effective_query<'a>(
        &'a self,
        agent_id: &str,
        overrides: &'a QueryOverrides,
    ) -> Result<&'a str> {
        let profile = self.get(agent_id)?;
        Ok(overrides
            .get(agent_id)
            .map(String::as_str)
            .unwrap_or(profile.query_template.as_str()))
    }

    /// Sum of all weights; the denominator of consensus scores
    pub fn total_weight(&self) -> f64 {
        self.profiles.iter().map(|p| p.weight).sum()
    }

    /// Number of profiles
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Always false; registries are never empty
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self {
            profiles: default_roster(),
        }
    }
}

/// The five built-in specialists
pub fn default_roster() -> Vec<AgentProfile> {
    vec![
        AgentProfile::new(
            "visual_analyst",
            "Dr. Vision",
            "Visual Research Analyst",
            Specialty::Visual,
            "Analyze visual elements in the research paper including:\n\
             - What do the figures, charts, and diagrams show?\n\
             - What key data is presented visually?\n\
             - What trends or patterns are visible?\n\
             - How do the visual elements support the main claims?\n\
             - What experimental results or frameworks are shown visually?\n\
             Focus on visual content analysis and data interpretation.",
        )
        .with_focus_areas(&[
            "figures",
            "charts",
            "diagrams",
            "data visualization",
            "experimental results",
        ]),
        AgentProfile::new(
            "technical_lead",
            "Alex Chen",
            "Technical Lead",
            Specialty::Technical,
            "Analyze technical aspects of the research:\n\
             - What are the core technical innovations and algorithms?\n\
             - What are the implementation details and technical framework?\n\
             - What are the computational complexity considerations?\n\
             - What technical challenges are identified?\n\
             - How feasible is implementing this in production systems?\n\
             Focus on technical depth and implementation feasibility.",
        )
        .with_focus_areas(&[
            "algorithms",
            "implementation",
            "scalability",
            "performance",
            "technical challenges",
        ]),
        AgentProfile::new(
            "product_manager",
            "Sam Rodriguez",
            "Product Manager",
            Specialty::Product,
            "Analyze the research from a product development perspective:\n\
             - What market opportunities does this research enable?\n\
             - What problems does this solve for users or businesses?\n\
             - What are potential applications and use cases?\n\
             - How does this compare to existing solutions?\n\
             - What would be key features of products based on this research?\n\
             Focus on market opportunities and product potential.",
        )
        .with_focus_areas(&[
            "market fit",
            "user needs",
            "competitive analysis",
            "product strategy",
        ]),
        AgentProfile::new(
            "business_strategist",
            "Jordan Kim",
            "Business Strategist",
            Specialty::Business,
            "Analyze commercial potential of the research:\n\
             - What are potential revenue models for this technology?\n\
             - What is the estimated market size and opportunity?\n\
             - What competitive advantages does this provide?\n\
             - What are barriers to commercialization?\n\
             - What business partnerships would be needed?\n\
             Focus on business strategy and commercial viability.",
        )
        .with_focus_areas(&[
            "business models",
            "market sizing",
            "competitive advantage",
            "monetization",
        ]),
        AgentProfile::new(
            "research_analyst",
            "Dr. Casey Wang",
            "Research Analyst",
            Specialty::Research,
            "Evaluate the research from an academic perspective:\n\
             - What is the significance of the research contribution?\n\
             - How novel are the approaches compared to existing work?\n\
             - What are strengths and limitations of the methodology?\n\
             - What future research directions are suggested?\n\
             - How strong is the theoretical and empirical validation?\n\
             Focus on research quality and academic significance.",
        )
        .with_focus_areas(&[
            "research quality",
            "innovation level",
            "scientific impact",
            "academic merit",
        ]),
    ]
}
