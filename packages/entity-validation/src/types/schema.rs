//! Schema contracts - the negotiated target schema of an extraction job.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// How strongly the contract demands a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldTier {
    /// Every output row must carry it
    Required,

    /// Most rows should carry it
    Expected,

    /// Speculative or optional; carried when seen
    Discoverable,
}

impl fmt::Display for FieldTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Required => f.write_str("required"),
            Self::Expected => f.write_str("expected"),
            Self::Discoverable => f.write_str("discoverable"),
        }
    }
}

/// One field of the contract with its observed support.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSpec {
    pub tier: FieldTier,

    /// Number of entities that evidenced the field
    #[serde(default)]
    pub support_count: usize,

    /// `support_count` divided by the number of entities considered
    #[serde(default)]
    pub support_rate: f64,

    /// Optional description passed to the judge rubric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl FieldSpec {
    pub fn new(tier: FieldTier) -> Self {
        Self {
            tier,
            support_count: 0,
            support_rate: 0.0,
            description: None,
        }
    }
}

/// The target schema of a job.
///
/// Created once from the user's request, mutated only by the schema
/// negotiator, and finalized before output is returned. Field order is the
/// order the request listed them in.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaContract {
    /// What kind of entity is being extracted ("person", "product", ...)
    pub entity_type: String,

    #[serde(default)]
    pub fields: IndexMap<String, FieldSpec>,
}

impl SchemaContract {
    /// Create an empty contract for an entity type.
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            fields: IndexMap::new(),
        }
    }

    /// Add a required field.
    pub fn required(self, name: impl Into<String>) -> Self {
        self.with_field(name, FieldTier::Required)
    }

    /// Add an expected field.
    pub fn expected(self, name: impl Into<String>) -> Self {
        self.with_field(name, FieldTier::Expected)
    }

    /// Add a discoverable field.
    pub fn discoverable(self, name: impl Into<String>) -> Self {
        self.with_field(name, FieldTier::Discoverable)
    }

    /// Add a field at a tier, replacing any previous entry of that name.
    pub fn with_field(mut self, name: impl Into<String>, tier: FieldTier) -> Self {
        self.fields.insert(name.into(), FieldSpec::new(tier));
        self
    }

    /// Attach a description to an existing field.
    pub fn describe(mut self, name: &str, description: impl Into<String>) -> Self {
        if let Some(spec) = self.fields.get_mut(name) {
            spec.description = Some(description.into());
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn tier_of(&self, name: &str) -> Option<FieldTier> {
        self.fields.get(name).map(|f| f.tier)
    }

    /// Field names at a tier, in contract order.
    pub fn fields_in(&self, tier: FieldTier) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, spec)| spec.tier == tier)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn required_fields(&self) -> Vec<&str> {
        self.fields_in(FieldTier::Required)
    }

    pub fn expected_fields(&self) -> Vec<&str> {
        self.fields_in(FieldTier::Expected)
    }

    pub fn discoverable_fields(&self) -> Vec<&str> {
        self.fields_in(FieldTier::Discoverable)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Stable fingerprint over entity type and field tiers.
    ///
    /// Support statistics are excluded: they change as a job progresses but
    /// do not change what is being asked for.
    pub fn fingerprint(&self) -> String {
        let mut names: Vec<_> = self
            .fields
            .iter()
            .map(|(name, spec)| format!("{}:{}", name.trim().to_lowercase(), spec.tier))
            .collect();
        names.sort();

        let mut hasher = Sha256::new();
        hasher.update(self.entity_type.trim().to_lowercase().as_bytes());
        hasher.update(b"\n");
        hasher.update(names.join(",").as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
