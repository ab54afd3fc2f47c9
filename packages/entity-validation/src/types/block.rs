//! Content blocks - candidate entity sources handed over by the upstream extractor.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::decision::Classification;

/// Identifier of a content block, unique within a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BlockId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Pre-computed hints from the upstream segmenter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHints {
    /// Role the segmenter guessed for this block ("profile-card", "nav", ...)
    #[serde(default)]
    pub role: Option<String>,

    /// Classification the segmenter guessed, if any
    #[serde(default)]
    pub classification: Option<Classification>,

    /// Number of links inside the block
    #[serde(default)]
    pub link_count: usize,

    /// Number of structural steps to the nearest "team/staff"-like heading
    #[serde(default)]
    pub team_heading_distance: Option<usize>,
}

/// A raw candidate entity source.
///
/// Immutable once handed to the pipeline; every derived signal is
/// recomputed from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBlock {
    /// Unique id within the job
    pub id: BlockId,

    /// Heading text, if the block has one
    #[serde(default)]
    pub heading: Option<String>,

    /// Body text
    #[serde(default)]
    pub body: String,

    /// Selector-like structural locator (e.g. `main > section:nth-child(2) > div.card`)
    #[serde(default)]
    pub selector: String,

    /// Segmenter hints
    #[serde(default)]
    pub hints: BlockHints,

    /// Candidate field values already pulled by the upstream extractor
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl ContentBlock {
    /// Create a new block with a body and no heading.
    pub fn new(id: impl Into<BlockId>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            heading: None,
            body: body.into(),
            selector: String::new(),
            hints: BlockHints::default(),
            fields: BTreeMap::new(),
        }
    }

    /// Set the heading.
    pub fn with_heading(mut self, heading: impl Into<String>) -> Self {
        self.heading = Some(heading.into());
        self
    }

    /// Set the structural selector.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector = selector.into();
        self
    }

    /// Set the segmenter hints.
    pub fn with_hints(mut self, hints: BlockHints) -> Self {
        self.hints = hints;
        self
    }

    /// Add a candidate field value.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Heading text or the empty string.
    pub fn heading_text(&self) -> &str {
        self.heading.as_deref().unwrap_or("")
    }

    /// Whether the block has a non-blank heading.
    pub fn has_heading(&self) -> bool {
        self.heading.as_deref().is_some_and(|h| !h.trim().is_empty())
    }

    /// Number of structural steps in the selector.
    ///
    /// Counts `>` and whitespace-separated steps; an empty selector is depth 0.
    pub fn selector_depth(&self) -> usize {
        self.selector
            .split(|c: char| c == '>' || c == '/' || c.is_whitespace())
            .filter(|s| !s.trim().is_empty())
            .count()
    }

    /// Heading and body joined, as the text the entity is judged on.
    pub fn full_text(&self) -> String {
        match self.heading.as_deref() {
            Some(h) if !h.trim().is_empty() => format!("{}\n{}", h.trim(), self.body),
            _ => self.body.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_depth() {
        let block = ContentBlock::new("b1", "text").with_selector("main > section > div.card");
        assert_eq!(block.selector_depth(), 3);

        let xpath = ContentBlock::new("b2", "text").with_selector("/html/body/div");
        assert_eq!(xpath.selector_depth(), 3);

        assert_eq!(ContentBlock::new("b3", "text").selector_depth(), 0);
    }

    #[test]
    fn test_blank_heading_is_absent() {
        let block = ContentBlock::new("b1", "body").with_heading("   ");
        assert!(!block.has_heading());
        assert_eq!(block.full_text(), "body");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{"id": "card-1", "body": "Jane Doe, Engineer"}"#;
        let block: ContentBlock = serde_json::from_str(json).unwrap();
        assert_eq!(block.id.as_str(), "card-1");
        assert!(block.heading.is_none());
        assert_eq!(block.hints.link_count, 0);
    }
}
