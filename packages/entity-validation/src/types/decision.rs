//! Decisions - classification outcomes from the classifier or the remote judge.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::block::BlockId;

/// Whether a block is one real-world entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// One real-world entity
    Individual,

    /// A collection, summary, or navigation block
    Aggregate,

    /// Could not be decided
    Unknown,
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Individual => "INDIVIDUAL",
            Self::Aggregate => "AGGREGATE",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// Which component produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// The cheap classifier
    Heuristic,

    /// The batch judge
    RemoteModel,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heuristic => f.write_str("heuristic"),
            Self::RemoteModel => f.write_str("remote-model"),
        }
    }
}

/// A classification decision for one block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    /// Block the decision is about
    pub block_id: BlockId,

    pub classification: Classification,

    /// Whether the block is a valid entity of the requested type
    pub is_valid: bool,

    /// Confidence in `classification` as stated by the producer
    pub raw_confidence: f64,

    /// Confidence after calibration
    pub calibrated_confidence: f64,

    /// Whether calibration had enough history to replace the raw value
    pub calibration_reliable: bool,

    pub reasoning: String,

    pub provenance: Provenance,

    /// Extraction type the decision was made under (for calibration bins)
    pub extraction_type: String,

    /// Served from the decision cache rather than computed in this job
    #[serde(default)]
    pub from_cache: bool,

    /// Copied from a near-duplicate representative instead of judged directly
    #[serde(default)]
    pub inherited_from: Option<BlockId>,

    /// Fallback produced after a remote failure
    #[serde(default)]
    pub degraded: bool,

    /// Field values the producer extracted
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, String>,
}

impl Decision {
    /// Create a fresh decision whose calibrated confidence equals the raw one.
    pub fn new(
        block_id: BlockId,
        classification: Classification,
        raw_confidence: f64,
        provenance: Provenance,
        extraction_type: impl Into<String>,
    ) -> Self {
        let raw_confidence = raw_confidence.clamp(0.0, 1.0);
        Self {
            block_id,
            classification,
            is_valid: classification == Classification::Individual,
            raw_confidence,
            calibrated_confidence: raw_confidence,
            calibration_reliable: false,
            reasoning: String::new(),
            provenance,
            extraction_type: extraction_type.into(),
            from_cache: false,
            inherited_from: None,
            degraded: false,
            extracted_fields: BTreeMap::new(),
        }
    }

    /// Fallback decision for a block the judge could not resolve.
    pub fn degraded(
        block_id: BlockId,
        confidence: f64,
        extraction_type: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let mut decision = Self::new(
            block_id,
            Classification::Unknown,
            confidence,
            Provenance::RemoteModel,
            extraction_type,
        );
        decision.is_valid = false;
        decision.degraded = true;
        decision.reasoning = reason.into();
        decision
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn with_validity(mut self, is_valid: bool) -> Self {
        self.is_valid = is_valid;
        self
    }

    pub fn with_fields(mut self, fields: BTreeMap<String, String>) -> Self {
        self.extracted_fields = fields;
        self
    }

    /// Whether this decision admits the block as a validated entity.
    pub fn is_accepted_individual(&self) -> bool {
        self.classification == Classification::Individual && self.is_valid
    }

    /// Copy of this decision re-attributed to a near-duplicate block.
    pub fn inherit_for(&self, block_id: BlockId) -> Self {
        let mut inherited = self.clone();
        inherited.inherited_from = Some(self.block_id.clone());
        inherited.block_id = block_id;
        inherited.from_cache = false;
        inherited
    }
}
