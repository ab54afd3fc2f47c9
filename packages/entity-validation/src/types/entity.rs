//! Output types - validated entities, issues, and processing statistics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::types::{
    block::{BlockId, ContentBlock},
    decision::Decision,
    schema::SchemaContract,
};

/// One entity in the pipeline output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Block the entity was built from (the representative after merging)
    pub block_id: BlockId,

    /// Position of the earliest contributing block in discovery order
    pub discovery_index: usize,

    /// Display name, when one could be derived
    pub name: Option<String>,

    /// Populated fields; always a subset of the final contract
    pub fields: BTreeMap<String, String>,

    pub decision: Decision,

    /// Missing a required field under the flag policy
    #[serde(default)]
    pub incomplete: bool,

    /// Calibrated confidence below the job's low-confidence threshold
    #[serde(default)]
    pub low_confidence: bool,

    /// Other blocks merged into this entity by deduplication
    #[serde(default)]
    pub merged_from: Vec<BlockId>,

    /// Source heading, kept for the aggregate filter
    #[serde(skip)]
    pub(crate) heading: String,

    /// Source body, kept for similarity scoring
    #[serde(skip)]
    pub(crate) body: String,
}

impl Entity {
    /// Build an entity from a block and its final decision.
    ///
    /// Upstream candidate values are overlaid by values the judge extracted.
    pub fn from_block(block: &ContentBlock, discovery_index: usize, decision: Decision) -> Self {
        let mut fields: BTreeMap<String, String> = block
            .fields
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();
        for (k, v) in &decision.extracted_fields {
            fields.insert(k.clone(), v.trim().to_string());
        }

        let name = fields
            .get("name")
            .cloned()
            .or_else(|| block.has_heading().then(|| block.heading_text().trim().to_string()));

        Self {
            block_id: block.id.clone(),
            discovery_index,
            name,
            fields,
            decision,
            incomplete: false,
            low_confidence: false,
            merged_from: Vec::new(),
            heading: block.heading_text().trim().to_string(),
            body: block.body.clone(),
        }
    }

    /// Number of populated fields.
    pub fn populated_field_count(&self) -> usize {
        self.fields.values().filter(|v| !v.trim().is_empty()).count()
    }

    /// Whether a field carries a non-blank value.
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.get(name).is_some_and(|v| !v.trim().is_empty())
    }
}

/// Category of a reported issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A collective block was dropped by the aggregate override
    AggregateContamination,
    /// An entity's calibrated confidence is below the threshold
    LowConfidence,
    /// The judge said INDIVIDUAL but not a valid entity of the requested type
    RejectedByJudge,
    /// A remote call failed and its blocks were degraded to UNKNOWN
    RemoteFailure,
    /// A remote reply failed validation
    MalformedResponse,
    /// The judge phase ran out of time
    JudgeTimeout,
    /// Some reply items were missing
    MissingVerdict,
    /// Duplicates were merged
    DuplicateMerged,
    /// A field was removed from the contract
    FieldPruned,
    /// A discoverable field was promoted to expected
    FieldPromoted,
    /// An expected field was demoted to discoverable
    FieldDemoted,
    /// Every field was pruned
    AllFieldsPruned,
    /// A row lacks a required field and was flagged
    IncompleteRow,
    /// A row lacks a required field and was dropped
    RowDropped,
    /// An extracted value had no support in the block text
    UnevidencedField,
    /// An extracted field is not part of the contract
    PhantomField,
}

/// A non-fatal problem reported alongside results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub kind: IssueKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_id: Option<BlockId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub message: String,
}

impl Issue {
    pub fn new(kind: IssueKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            block_id: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn for_block(mut self, block_id: &BlockId) -> Self {
        self.block_id = Some(block_id.clone());
        self
    }

    pub fn for_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }
}

/// Counters describing how a job was resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    /// Decisions finalized by the cheap classifier
    pub heuristic_decisions: usize,

    /// Decisions returned by the remote judge
    pub remote_decisions: usize,

    /// Decisions served from the decision cache
    pub cache_hits: usize,

    /// Remote batches dispatched
    pub batches: usize,

    /// Decisions inherited from a near-duplicate representative
    pub inherited_decisions: usize,

    /// Decisions degraded to UNKNOWN after a remote failure
    pub degraded_decisions: usize,

    /// Remote calls retried after a transient failure
    pub retries: usize,

    /// Wall-clock duration of the job
    pub elapsed_ms: u64,
}

/// Proof of which content a result was derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvidence {
    /// SHA-256 over the ordered block fingerprints
    pub blocks_digest: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

/// Output of one validation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutput {
    pub job_id: Uuid,

    /// Entities in discovery order
    pub entities: Vec<Entity>,

    pub final_schema_contract: SchemaContract,

    pub issues: Vec<Issue>,

    pub processing_stats: ProcessingStats,

    pub evidence: JobEvidence,
}

impl ValidationOutput {
    /// Issues of one kind.
    pub fn issues_of(&self, kind: IssueKind) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.kind == kind).collect()
    }

    /// Find an entity by block id (including merged members).
    pub fn entity_for(&self, block_id: &BlockId) -> Option<&Entity> {
        self.entities
            .iter()
            .find(|e| &e.block_id == block_id || e.merged_from.contains(block_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Classification, Provenance};

    #[test]
    fn test_from_block_overlays_extracted_fields() {
        let block = ContentBlock::new("b1", "Jane Roe, engineer")
            .with_heading("Jane Roe")
            .with_field("title", "engineer")
            .with_field("email", "  ");
        let decision = Decision::new(
            BlockId::from("b1"),
            Classification::Individual,
            0.9,
            Provenance::RemoteModel,
            "person",
        )
        .with_fields([("title".to_string(), "Engineer".to_string())].into_iter().collect());

        let entity = Entity::from_block(&block, 3, decision);
        assert_eq!(entity.fields["title"], "Engineer");
        assert!(!entity.has_field("email"));
        assert_eq!(entity.name.as_deref(), Some("Jane Roe"));
        assert_eq!(entity.discovery_index, 3);
    }

    #[test]
    fn test_issue_wire_format() {
        let issue = Issue::new(IssueKind::FieldPruned, "no support").for_field("phone");
        let json = serde_json::to_value(&issue).unwrap();
        assert_eq!(json["kind"], "field_pruned");
        assert_eq!(json["field"], "phone");
        assert!(json.get("blockId").is_none());
    }
}
