//! Specialist-routed opportunity fields

use super::themes::{tokens, ThemeDefinition, ThemeMatch};
use crate::collector::Insight;
use crate::registry::{AgentProfile, Specialty};
use crate::types::AgentId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Why a field carries no value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    /// Every agent with the owning specialty failed
    SpecialistFailed,
    /// The roster has no agent with the owning specialty
    NoSpecialist,
    /// The specialist answered but said nothing usable for this field
    NoSignal,
}

/// A field value, or an explicit marker that it could not be derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FieldValue<T> {
    /// Derived from specialist findings
    Available {
        /// The value
        value: T,
    },
    /// Not derived
    Unavailable {
        /// Why
        reason: UnavailableReason,
    },
}

impl<T> FieldValue<T> {
    /// The value, if available
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available { value } => Some(value),
            Self::Unavailable { .. } => None,
        }
    }

    /// Whether a value is present
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    fn unavailable(reason: UnavailableReason) -> Self {
        Self::Unavailable { reason }
    }
}

const MARKET_CUES: &[&str] =
    &["market", "tam", "billion", "million", "cagr", "growth", "size", "industry"];
const REVENUE_CUES: &[&str] = &[
    "subscription", "licens", "saas", "pricing", "revenue", "freemium", "monetiz", "fee", "seat",
    "royalt",
];
const TECHNICAL_CUES: &[&str] = &[
    "requir", "infrastructure", "gpu", "api", "integrat", "dataset", "training", "deploy",
    "compute", "architecture", "pipeline", "scal",
];
const USER_CUES: &[&str] = &[
    "user", "customer", "team", "clinician", "developer", "enterprise", "professional", "segment",
    "organization", "analyst", "researcher", "operator",
];

const MAX_LIST_ITEMS: usize = 3;

fn money() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(concat!(
            r"(?i)(\$\s?\d[\d,.]*\s?(k|m|b|t|bn|thousand|million|billion|trillion)?\b",
            r"|\d[\d,.]*\s?(million|billion|trillion)\b)"
        ))
        .expect("valid money regex")
    })
}

/// Split findings into sentences, dropping bullet markers.
///
/// A sentence ends at a line break or at `.`, `!` or `?` followed by
/// whitespace, so figures such as `$1.2B` stay intact.
pub(crate) fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim().trim_start_matches("- ").trim();
        let mut current = String::new();
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            current.push(c);
            if matches!(c, '.' | '!' | '?') && chars.peek().map_or(true, |n| n.is_whitespace()) {
                flush(&mut out, &mut current);
            }
        }
        flush(&mut out, &mut current);
    }
    out
}

fn flush(out: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if sentence.chars().count() >= 3 {
        out.push(sentence.to_string());
    }
    current.clear();
}

fn mentions_any(sentence: &str, cues: &[&str]) -> bool {
    tokens(sentence)
        .iter()
        .any(|word| cues.iter().any(|cue| word.starts_with(cue)))
}

/// Read access to the settled analysis, in roster order
pub(crate) struct FieldSources<'a> {
    profiles: &'a [AgentProfile],
    insights: &'a BTreeMap<AgentId, Insight>,
}

impl<'a> FieldSources<'a> {
    pub fn new(profiles: &'a [AgentProfile], insights: &'a BTreeMap<AgentId, Insight>) -> Self {
        Self { profiles, insights }
    }

    /// Theme-relevant sentences from the specialists linked to `m`.
    ///
    /// Specialists outside the match never contribute, so a field cannot
    /// borrow findings the opportunity's own agents did not make.
    fn specialist_sentences(
        &self,
        specialty: Specialty,
        m: &ThemeMatch<'_>,
    ) -> Result<Vec<String>, UnavailableReason> {
        let mut specialists = self.profiles.iter().filter(|p| p.specialty == specialty).peekable();
        if specialists.peek().is_none() {
            return Err(UnavailableReason::NoSpecialist);
        }
        if !specialists.any(|p| self.insights.contains_key(&p.id)) {
            return Err(UnavailableReason::SpecialistFailed);
        }

        Ok(m.agents
            .iter()
            .filter(|(profile, _)| profile.specialty == specialty)
            .flat_map(|(_, insight)| sentences(insight.findings()))
            .filter(|s| m.theme.keywords.is_empty() || m.theme.mentioned_in(s))
            .collect())
    }

    fn first_with(
        &self,
        specialty: Specialty,
        m: &ThemeMatch<'_>,
        cues: &[&str],
    ) -> FieldValue<String> {
        match self.specialist_sentences(specialty, m) {
            Ok(candidates) => candidates
                .into_iter()
                .find(|s| mentions_any(s, cues))
                .map(|value| FieldValue::Available { value })
                .unwrap_or(FieldValue::unavailable(UnavailableReason::NoSignal)),
            Err(reason) => FieldValue::unavailable(reason),
        }
    }

    fn list_with(
        &self,
        specialty: Specialty,
        m: &ThemeMatch<'_>,
        cues: &[&str],
    ) -> FieldValue<Vec<String>> {
        match self.specialist_sentences(specialty, m) {
            Ok(candidates) => {
                let mut items: Vec<String> = Vec::new();
                for sentence in candidates.into_iter().filter(|s| mentions_any(s, cues)) {
                    if !items.contains(&sentence) {
                        items.push(sentence);
                    }
                    if items.len() == MAX_LIST_ITEMS {
                        break;
                    }
                }
                if items.is_empty() {
                    FieldValue::unavailable(UnavailableReason::NoSignal)
                } else {
                    FieldValue::Available { value: items }
                }
            }
            Err(reason) => FieldValue::unavailable(reason),
        }
    }

    /// Business specialist; a sentence quoting a money figure wins
    pub fn market_size(&self, m: &ThemeMatch<'_>) -> FieldValue<String> {
        match self.specialist_sentences(Specialty::Business, m) {
            Ok(candidates) => {
                let cued: Vec<_> = candidates
                    .into_iter()
                    .filter(|s| mentions_any(s, MARKET_CUES))
                    .collect();
                cued.iter()
                    .find(|s| money().is_match(s))
                    .or_else(|| cued.first())
                    .map(|value| FieldValue::Available { value: value.clone() })
                    .unwrap_or(FieldValue::unavailable(UnavailableReason::NoSignal))
            }
            Err(reason) => FieldValue::unavailable(reason),
        }
    }

    /// Business specialist
    pub fn revenue_model(&self, m: &ThemeMatch<'_>) -> FieldValue<String> {
        self.first_with(Specialty::Business, m, REVENUE_CUES)
    }

    /// Technical specialist
    pub fn technical_requirements(&self, m: &ThemeMatch<'_>) -> FieldValue<Vec<String>> {
        self.list_with(Specialty::Technical, m, TECHNICAL_CUES)
    }

    /// Product specialist
    pub fn target_users(&self, m: &ThemeMatch<'_>) -> FieldValue<Vec<String>> {
        self.list_with(Specialty::Product, m, USER_CUES)
    }
}

/// The sentence of `insight` that best speaks to `theme`
fn lead_sentence(theme: &ThemeDefinition, insight: &Insight) -> Option<String> {
    let all = sentences(insight.findings());
    let chosen = all
        .iter()
        .find(|s| theme.mentioned_in(s))
        .or_else(|| all.first())
        .cloned();
    chosen
}

/// Short description from the linked agents' theme-relevant sentences
pub(crate) fn describe(theme: &ThemeDefinition, linked: &[(&AgentProfile, &Insight)]) -> String {
    let picked: Vec<String> = linked
        .iter()
        .filter_map(|(_, insight)| lead_sentence(theme, insight))
        .take(MAX_LIST_ITEMS)
        .collect();

    if picked.is_empty() {
        theme.title.clone()
    } else {
        picked.join(" ")
    }
}

/// One view per contributing specialty; the first agent in roster order wins
pub(crate) fn perspectives(m: &ThemeMatch<'_>) -> BTreeMap<Specialty, String> {
    let mut views = BTreeMap::new();
    for (profile, insight) in &m.agents {
        if views.contains_key(&profile.specialty) {
            continue;
        }
        if let Some(sentence) = lead_sentence(&m.theme, insight) {
            views.insert(profile.specialty, sentence);
        }
    }
    views
}
