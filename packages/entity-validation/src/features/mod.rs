//! Feature extraction - turns a content block into classifier inputs.
//!
//! Extraction is pure and infallible. Densities and name-likeness are
//! fractions of tokens matched against the vocabularies in [`lexicon`], so
//! they degrade smoothly instead of flipping on a single keyword.

pub mod lexicon;

use serde::{Deserialize, Serialize};

use crate::types::{ContentBlock, JobContext};

/// Depth used to normalize selector depth when the page gives no maximum.
const DEFAULT_MAX_DEPTH: usize = 12;

/// Text length (chars) treated as "long" by the length input.
const LONG_TEXT_CHARS: f64 = 2000.0;

/// Headings longer than this many tokens are not treated as names.
const MAX_NAME_TOKENS: usize = 6;

/// Names of the inputs produced by [`FeatureVector::model_inputs`].
pub const MODEL_INPUTS: &[&str] = &[
    "name_likeness",
    "role_word_density",
    "aggregate_indicator_density",
    "person_indicator_excess",
    "link_density",
    "contact_signals",
    "text_length",
    "structural_depth",
    "team_heading_proximity",
    "collective_heading",
];

/// Numeric signals derived from one block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    /// Characters of heading and body
    pub text_length: usize,
    pub word_count: usize,

    /// Fraction of tokens that are role words
    pub role_word_density: f64,
    pub aggregate_indicator_count: usize,

    /// Fraction of tokens that are collection words
    pub aggregate_indicator_density: f64,

    /// Fraction of heading tokens that look like a proper name
    pub name_likeness: f64,

    /// Links per word, capped at 1
    pub link_density: f64,
    pub has_contact_signals: bool,
    pub structural_depth: usize,

    /// Depth the page considers maximal, for normalization
    pub max_depth: usize,
    pub team_heading_distance: Option<usize>,

    /// Distinct people named in the text, each titled or bound to a role
    pub person_indicator_count: usize,

    /// Heading matches the collective-noun pattern
    pub collective_heading: bool,
}

impl FeatureVector {
    /// Named inputs in `[0, 1]` consumed by the classifier weight table.
    pub fn model_inputs(&self) -> Vec<(&'static str, f64)> {
        let excess = self.person_indicator_count.saturating_sub(2) as f64 / 4.0;
        let length = (1.0 + self.text_length as f64).ln() / (1.0 + LONG_TEXT_CHARS).ln();
        let depth = self.structural_depth as f64 / self.max_depth.max(1) as f64;
        let proximity = self
            .team_heading_distance
            .map(|d| 1.0 / (1.0 + d as f64))
            .unwrap_or(0.0);

        vec![
            ("name_likeness", unit(self.name_likeness)),
            ("role_word_density", unit(self.role_word_density * 10.0)),
            (
                "aggregate_indicator_density",
                unit(self.aggregate_indicator_density * 10.0),
            ),
            ("person_indicator_excess", unit(excess)),
            ("link_density", unit(self.link_density)),
            ("contact_signals", flag(self.has_contact_signals)),
            ("text_length", unit(length)),
            ("structural_depth", unit(depth)),
            ("team_heading_proximity", unit(proximity)),
            ("collective_heading", flag(self.collective_heading)),
        ]
    }
}

fn unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

fn flag(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Computes [`FeatureVector`]s.
#[derive(Debug, Clone, Default)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract features for one block in the context of its job.
    pub fn extract(&self, block: &ContentBlock, job: &JobContext) -> FeatureVector {
        let text = block.full_text();
        let tokens = lexicon::tokenize(&text);
        let word_count = tokens.len();
        let denom = word_count.max(1) as f64;

        let role_hits = tokens
            .iter()
            .filter(|t| lexicon::ROLE_SET.contains(t.as_str()))
            .count();
        let aggregate_hits = tokens
            .iter()
            .filter(|t| lexicon::AGGREGATE_SET.contains(t.as_str()))
            .count();

        let links = if block.hints.link_count > 0 {
            block.hints.link_count
        } else {
            lexicon::URL_TOKEN.find_iter(&text).count()
        };

        let heading = block.heading_text().trim();
        let collective_heading = !heading.is_empty() && lexicon::is_collective_heading(heading);

        FeatureVector {
            text_length: text.chars().count(),
            word_count,
            role_word_density: role_hits as f64 / denom,
            aggregate_indicator_count: aggregate_hits,
            aggregate_indicator_density: aggregate_hits as f64 / denom,
            name_likeness: name_likeness(heading),
            link_density: (links as f64 / denom).min(1.0),
            has_contact_signals: lexicon::has_contact_signal(&text),
            structural_depth: block.selector_depth(),
            max_depth: job.page_hints.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
            team_heading_distance: team_heading_distance(block, job),
            person_indicator_count: lexicon::person_indicator_count(&text),
            collective_heading,
        }
    }
}

/// Share of heading tokens that look like a name; single tokens count half.
fn name_likeness(heading: &str) -> f64 {
    let tokens: Vec<&str> = heading.split_whitespace().collect();
    if tokens.is_empty() || tokens.len() > MAX_NAME_TOKENS {
        return 0.0;
    }

    let hits = tokens.iter().filter(|t| lexicon::is_name_token(t)).count();
    let share = hits as f64 / tokens.len() as f64;
    if tokens.len() == 1 {
        share * 0.5
    } else {
        share
    }
}

fn team_heading_distance(block: &ContentBlock, job: &JobContext) -> Option<usize> {
    if block.hints.team_heading_distance.is_some() {
        return block.hints.team_heading_distance;
    }

    let heading = block.heading_text().trim();
    if heading.is_empty() {
        return None;
    }
    job.page_hints
        .collection_headings
        .iter()
        .any(|h| h.trim().eq_ignore_ascii_case(heading))
        .then_some(0)
}
