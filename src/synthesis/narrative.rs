//! Cross-agent synthesis narrative

use super::fields::sentences;
use super::ProductOpportunity;
use crate::collector::Insight;
use crate::registry::AgentProfile;

/// Prompt asking a language model to synthesize the run
pub(crate) fn prompt(
    roster: &[(&AgentProfile, &Insight)],
    opportunities: &[ProductOpportunity],
) -> String {
    let mut sections = String::new();
    for (profile, insight) in roster {
        sections.push_str(&format!(
            "{} ANALYSIS (confidence {:.0}%, {} sources):\n{}\n\n",
            profile.role.to_uppercase(),
            insight.confidence * 100.0,
            insight.citations.len(),
            insight.findings()
        ));
    }

    let ranked: Vec<String> = opportunities
        .iter()
        .map(|o| format!("- {} (consensus {:.0}%)", o.title, o.consensus_score * 100.0))
        .collect();

    format!(
        "Based on this multi-agent analysis of a single document, write a comprehensive synthesis \
         that:\n\
         1. Identifies the core innovation and its significance\n\
         2. Assesses technical feasibility and implementation challenges\n\
         3. Evaluates market potential and commercial opportunities\n\
         4. Highlights key evidence supporting conclusions\n\
         5. Recommends 2-3 specific directions for product development\n\n\
         AGENT INSIGHTS:\n{sections}\
         RANKED OPPORTUNITIES:\n{}\n\n\
         Answer in plain prose of at most three paragraphs.",
        ranked.join("\n")
    )
}

/// Narrative assembled from each agent's headline sentence
pub(crate) fn summarize(
    roster: &[(&AgentProfile, &Insight)],
    roster_size: usize,
    opportunities: &[ProductOpportunity],
) -> String {
    let mut lines = vec![format!(
        "{} of {} agents contributed findings.",
        roster.len(),
        roster_size
    )];

    for (profile, insight) in roster {
        if let Some(headline) = sentences(insight.findings()).into_iter().next() {
            lines.push(format!("{}: {}", profile.role, headline));
        }
    }

    if let Some(top) = opportunities.first() {
        lines.push(format!(
            "Leading opportunity: {} ({:.0}% consensus across {} agents).",
            top.title,
            top.consensus_score * 100.0,
            top.contributing_agents.len()
        ));
    }

    lines.join("\n")
}
