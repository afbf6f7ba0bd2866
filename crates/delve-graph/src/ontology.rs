//! Schema handed to the graph store's extractor.
//!
//! The extractor can only create nodes for named things that appear in the
//! episode text and verb-labelled edges between them. Analytical categories
//! (objectives, hypotheses, findings) are the shape of the text rather than
//! things mentioned in it, so they are never requested as types; the body
//! carries them as labelled prose instead.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A concrete, noun-shaped entity type the extractor is told to look for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityTypeHint {
    Company,
    Tool,
    Person,
    Methodology,
    Market,
    Capability,
}

impl EntityTypeHint {
    pub const ALL: [EntityTypeHint; 6] = [
        Self::Company,
        Self::Tool,
        Self::Person,
        Self::Methodology,
        Self::Market,
        Self::Capability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Company => "Company",
            Self::Tool => "Tool",
            Self::Person => "Person",
            Self::Methodology => "Methodology",
            Self::Market => "Market",
            Self::Capability => "Capability",
        }
    }

    /// Extraction instruction sent alongside the type name.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Company => "A named business, vendor, lab or organization.",
            Self::Tool => "A named software product, library, framework, model or platform.",
            Self::Person => "A named individual such as a researcher, founder or author.",
            Self::Methodology => "A named technique, method, process or approach.",
            Self::Market => "A named market, industry, customer segment or geography.",
            Self::Capability => "A named technical capability or feature a tool or company offers.",
        }
    }

    /// Lowercase cue words that make a content-dependent hint apply.
    fn cues(&self) -> &'static [&'static str] {
        match self {
            Self::Company | Self::Tool | Self::Person => &[],
            Self::Methodology => &[
                "methodology",
                "method",
                "technique",
                "approach",
                "framework",
                "process",
            ],
            Self::Market => &[
                "market",
                "pricing",
                "customer",
                "segment",
                "industry",
                "revenue",
            ],
            Self::Capability => &["capabilit", "feature", "supports", "enables", "able to"],
        }
    }
}

impl std::fmt::Display for EntityTypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Types that always apply to research text.
pub const BASE_HINTS: [EntityTypeHint; 3] = [
    EntityTypeHint::Company,
    EntityTypeHint::Tool,
    EntityTypeHint::Person,
];

/// Category names that describe the structure of research rather than
/// anything named in it. Never sent as entity or edge types.
pub const ABSTRACT_CATEGORIES: [&str; 4] =
    ["ResearchObjective", "Hypothesis", "Finding", "Implementation"];

/// Pick the entity-type hints for an episode body: the base hints plus any
/// content-dependent hint whose cue words appear in the text.
pub fn select_hints(body: &str) -> BTreeSet<EntityTypeHint> {
    let lowered = body.to_lowercase();
    let mut hints: BTreeSet<EntityTypeHint> = BASE_HINTS.into_iter().collect();
    for hint in EntityTypeHint::ALL {
        if hint.cues().iter().any(|cue| lowered.contains(cue)) {
            let _ = hints.insert(hint);
        }
    }
    hints
}

/// Verb-shaped relationship labels between concrete entities.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RelationVerb {
    CompetesWith,
    Targets,
    Enables,
    Requires,
    Develops,
    Founded,
}

impl RelationVerb {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CompetesWith => "COMPETES_WITH",
            Self::Targets => "TARGETS",
            Self::Enables => "ENABLES",
            Self::Requires => "REQUIRES",
            Self::Develops => "DEVELOPS",
            Self::Founded => "FOUNDED",
        }
    }

    /// Plain-language form used when phrasing relationships in the body.
    pub fn phrase(&self) -> &'static str {
        match self {
            Self::CompetesWith => "competes with",
            Self::Targets => "targets",
            Self::Enables => "enables",
            Self::Requires => "requires",
            Self::Develops => "develops",
            Self::Founded => "founded",
        }
    }
}

/// One allowed (source, target) pair and the verbs that may connect them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRule {
    pub source: EntityTypeHint,
    pub target: EntityTypeHint,
    pub verbs: Vec<RelationVerb>,
}

fn rule(source: EntityTypeHint, target: EntityTypeHint, verbs: &[RelationVerb]) -> EdgeRule {
    EdgeRule {
        source,
        target,
        verbs: verbs.to_vec(),
    }
}

/// The full edge map. Every endpoint is a concrete entity type.
pub fn edge_rules() -> Vec<EdgeRule> {
    use EntityTypeHint::*;
    use RelationVerb::*;
    vec![
        rule(Company, Company, &[CompetesWith]),
        rule(Company, Market, &[Targets]),
        rule(Company, Tool, &[Develops, Requires]),
        rule(Tool, Tool, &[CompetesWith]),
        rule(Tool, Capability, &[Enables]),
        rule(Tool, Methodology, &[Enables]),
        rule(Capability, Methodology, &[Enables]),
        rule(Methodology, Tool, &[Requires]),
        rule(Methodology, Capability, &[Requires]),
        rule(Person, Company, &[Founded]),
        rule(Person, Tool, &[Develops]),
    ]
}

/// Edge rules whose endpoints are both among `hints`.
pub fn rules_for(hints: &BTreeSet<EntityTypeHint>) -> Vec<EdgeRule> {
    edge_rules()
        .into_iter()
        .filter(|r| hints.contains(&r.source) && hints.contains(&r.target))
        .collect()
}
