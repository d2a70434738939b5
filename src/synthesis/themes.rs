//! Theme catalog and keyword clustering

use crate::collector::Insight;
use crate::error::{Error, Result};
use crate::registry::AgentProfile;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

/// A candidate opportunity theme
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThemeDefinition {
    /// Opportunity title used when the theme is detected
    pub title: String,
    /// Lowercase keyword stems; multi-word entries match as phrases
    pub keywords: Vec<String>,
}

impl ThemeDefinition {
    /// Create a theme from string slices
    pub fn new(title: &str, keywords: &[&str]) -> Self {
        Self {
            title: title.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    /// Number of keyword hits in `text`
    pub fn hits(&self, text: &str) -> usize {
        if self.keywords.is_empty() {
            return 1;
        }
        let words = tokens(text);
        let joined = format!(" {} ", words.join(" "));

        self.keywords
            .iter()
            .map(|keyword| {
                if keyword.contains(' ') {
                    joined.matches(&format!(" {}", keyword)).count()
                } else {
                    words.iter().filter(|w| w.starts_with(keyword.as_str())).count()
                }
            })
            .sum()
    }

    /// Whether `text` mentions any keyword
    pub fn mentioned_in(&self, text: &str) -> bool {
        !self.keywords.is_empty() && self.hits(text) > 0
    }
}

/// Built-in application themes, in priority order
pub fn default_catalog() -> Vec<ThemeDefinition> {
    vec![
        ThemeDefinition::new(
            "Clinical Decision Support",
            &["clinic", "patient", "medical", "diagnos", "hospital", "disease", "healthcare"],
        ),
        ThemeDefinition::new(
            "Document Intelligence Platform",
            &[
                "document",
                "retrieval",
                "knowledge base",
                "question answering",
                "summariz",
                "search engine",
            ],
        ),
        ThemeDefinition::new(
            "Computer Vision Analytics",
            &["image", "video", "vision", "detection", "segmentation", "camera", "pixel"],
        ),
        ThemeDefinition::new(
            "Autonomous Systems & Robotics",
            &["robot", "autonomous", "vehicle", "drone", "navigation", "manipulat"],
        ),
        ThemeDefinition::new(
            "Financial Risk & Fraud Intelligence",
            &["financ", "fraud", "trading", "banking", "payment", "credit", "insur"],
        ),
        ThemeDefinition::new(
            "Security & Privacy Infrastructure",
            &["security", "privacy", "encrypt", "attack", "threat", "blockchain", "authenticat"],
        ),
        ThemeDefinition::new(
            "Efficient AI Infrastructure",
            &[
                "latency",
                "inference",
                "gpu",
                "compression",
                "quantiz",
                "throughput",
                "edge device",
                "hardware",
            ],
        ),
        ThemeDefinition::new(
            "Conversational AI Assistants",
            &["chatbot", "conversation", "dialog", "assistant", "language model", "speech"],
        ),
        ThemeDefinition::new(
            "Personalization & Recommendation",
            &["recommend", "personaliz", "preference", "engagement"],
        ),
        ThemeDefinition::new(
            "Scientific Discovery Tools",
            &["molecul", "protein", "chemistry", "genom", "simulation", "materials"],
        ),
        ThemeDefinition::new(
            "Education & Training Technology",
            &["student", "education", "learner", "teaching", "curriculum", "tutor"],
        ),
        ThemeDefinition::new(
            "Sustainability & Energy Optimization",
            &["energy", "carbon", "climate", "emission", "battery", "power grid"],
        ),
    ]
}

/// Title of the fallback theme linked to every successful agent
pub const GENERAL_THEME_TITLE: &str = "Document-Derived Product Opportunity";

const STOPWORDS: &[&str] = &[
    "across", "addition", "against", "already", "although", "analysis", "approach", "approaches",
    "because", "before", "between", "business", "compared", "current", "different", "enables",
    "existing", "findings", "further", "however", "important", "including", "method", "methods",
    "market", "opportunities", "opportunity", "overall", "particular", "potential", "product",
    "proposed", "provide", "provides", "related", "research", "results", "several", "should",
    "significant", "significantly", "specific", "suggests", "technical", "through", "towards",
    "various", "whereas", "whether", "within", "without",
];

/// Lowercase alphanumeric words of `text`
pub(crate) fn tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// A theme together with the agents linked to it, in roster order
#[derive(Debug, Clone)]
pub(crate) struct ThemeMatch<'a> {
    pub theme: ThemeDefinition,
    pub agents: Vec<(&'a AgentProfile, &'a Insight)>,
}

/// Link each successful agent to the catalog themes its findings mention.
///
/// Themes nobody links to are dropped; catalog order is preserved.
pub(crate) fn cluster<'a>(
    catalog: &[ThemeDefinition],
    roster: &[(&'a AgentProfile, &'a Insight)],
    min_hits: usize,
) -> Vec<ThemeMatch<'a>> {
    catalog
        .iter()
        .filter(|theme| !theme.keywords.is_empty())
        .filter_map(|theme| {
            let agents: Vec<_> = roster
                .iter()
                .filter(|(_, insight)| theme.hits(insight.findings()) >= min_hits.max(1))
                .copied()
                .collect();
            (!agents.is_empty()).then(|| ThemeMatch {
                theme: theme.clone(),
                agents,
            })
        })
        .collect()
}

/// Themes derived from the salient terms shared by the most agents
pub(crate) fn emergent<'a>(
    roster: &[(&'a AgentProfile, &'a Insight)],
    limit: usize,
) -> Vec<ThemeMatch<'a>> {
    let mut terms: BTreeMap<String, (BTreeSet<usize>, usize)> = BTreeMap::new();
    for (idx, (_, insight)) in roster.iter().enumerate() {
        for word in tokens(insight.findings()) {
            if word.len() < 6
                || word.chars().all(|c| c.is_ascii_digit())
                || STOPWORDS.contains(&word.as_str())
            {
                continue;
            }
            let entry = terms.entry(word).or_default();
            entry.0.insert(idx);
            entry.1 += 1;
        }
    }

    let mut ranked: Vec<_> = terms.into_iter().collect();
    ranked.sort_by(|(a_term, (a_agents, a_count)), (b_term, (b_agents, b_count))| {
        b_agents
            .len()
            .cmp(&a_agents.len())
            .then(b_count.cmp(a_count))
            .then(a_term.cmp(b_term))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(term, (agent_idx, _))| ThemeMatch {
            theme: ThemeDefinition {
                title: format!("{} Solutions", capitalize(&term)),
                keywords: vec![term],
            },
            agents: agent_idx.into_iter().map(|i| roster[i]).collect(),
        })
        .collect()
}

/// One theme linked to every successful agent
pub(crate) fn general<'a>(roster: &[(&'a AgentProfile, &'a Insight)]) -> ThemeMatch<'a> {
    ThemeMatch {
        theme: ThemeDefinition {
            title: GENERAL_THEME_TITLE.to_string(),
            keywords: Vec::new(),
        },
        agents: roster.to_vec(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Prompt asking a language model for opportunity themes
pub(crate) fn theme_prompt(roster: &[(&AgentProfile, &Insight)], limit: usize) -> String {
    let mut sections = String::new();
    for (profile, insight) in roster {
        sections.push_str(&format!(
            "{} ANALYSIS (confidence {:.0}%):\n{}\n\n",
            profile.role.to_uppercase(),
            insight.confidence * 100.0,
            insight.findings()
        ));
    }

    format!(
        "Based on this multi-agent analysis of a single document, identify up to {limit} distinct \
         product opportunity themes.\n\nAGENT INSIGHTS:\n{sections}\
         For each theme give a short product title and 3-6 lowercase keywords that appear in the \
         insights above. Return JSON with this exact structure:\n\
         {{\"themes\": [{{\"title\": \"Product Name\", \"keywords\": [\"keyword\"]}}]}}"
    )
}

fn json_object() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("valid JSON object regex"))
}

#[derive(Debug, Deserialize)]
struct ThemeList {
    #[serde(default)]
    themes: Vec<ThemeDefinition>,
}

/// Extract the theme list from a model response
pub(crate) fn parse_themes(response: &str) -> Result<Vec<ThemeDefinition>> {
    let json = json_object()
        .find(response)
        .ok_or_else(|| Error::synthesis("Theme response contained no JSON object"))?;
    let parsed: ThemeList = serde_json::from_str(json.as_str())?;

    let mut seen = BTreeSet::new();
    let themes: Vec<ThemeDefinition> = parsed
        .themes
        .into_iter()
        .filter_map(|theme| {
            let title = theme.title.trim().to_string();
            let keywords: Vec<String> = theme
                .keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect();
            (!title.is_empty() && !keywords.is_empty() && seen.insert(title.clone()))
                .then_some(ThemeDefinition { title, keywords })
        })
        .collect();

    if themes.is_empty() {
        return Err(Error::synthesis("Theme response listed no usable themes"));
    }
    Ok(themes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_stems_and_phrases() {
        let theme = ThemeDefinition::new("T", &["diagnos", "language model"]);
        assert_eq!(theme.hits("Diagnosis and diagnostic tools built on a language-model."), 3);
        assert_eq!(theme.hits("Nothing relevant here."), 0);
    }

    #[test]
    fn test_parse_themes_from_noisy_response() {
        let response = "Sure! Here you go:\n```json\n{\"themes\": [\
            {\"title\": \"Ledger Audit Copilot\", \"keywords\": [\"Ledger\", \" audit \"]},\
            {\"title\": \"Empty\", \"keywords\": []},\
            {\"title\": \"Ledger Audit Copilot\", \"keywords\": [\"dup\"]}]}\n```";
        let themes = parse_themes(response).unwrap();
        assert_eq!(themes.len(), 1);
        assert_eq!(themes[0].keywords, vec!["ledger", "audit"]);
    }

    #[test]
    fn test_parse_themes_rejects_garbage() {
        assert!(parse_themes("no json here").is_err());
        assert!(parse_themes("{\"themes\": []}").is_err());
    }

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("sparsity"), "Sparsity");
    }
}
