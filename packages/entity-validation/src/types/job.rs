//! Job input - everything the upstream collaborators hand to one validation run.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{Result, ValidationError};
use crate::types::{block::ContentBlock, schema::SchemaContract};

/// Page-level structural hints from the segmenter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageHints {
    /// Page URL, for logging only
    #[serde(default)]
    pub url: Option<String>,

    /// Headings on the page that introduce collections ("Our Team", "Staff")
    #[serde(default)]
    pub collection_headings: Vec<String>,

    /// Deepest selector depth observed on the page, used to normalize depth
    #[serde(default)]
    pub max_depth: Option<usize>,
}

/// Input of one validation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    /// Free-text instructions from the request parser
    pub extraction_instructions: String,

    /// Initial target schema
    pub schema_contract: SchemaContract,

    /// Candidate blocks in discovery order
    pub blocks: Vec<ContentBlock>,

    #[serde(default)]
    pub page_hints: PageHints,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(
        instructions: impl Into<String>,
        schema_contract: SchemaContract,
        blocks: Vec<ContentBlock>,
    ) -> Self {
        Self {
            extraction_instructions: instructions.into(),
            schema_contract,
            blocks,
            page_hints: PageHints::default(),
        }
    }

    /// Set page-level hints.
    pub fn with_page_hints(mut self, hints: PageHints) -> Self {
        self.page_hints = hints;
        self
    }

    /// Extraction type used for calibration bins.
    pub fn extraction_type(&self) -> &str {
        let t = self.schema_contract.entity_type.trim();
        if t.is_empty() {
            "entity"
        } else {
            t
        }
    }

    /// Fail fast on input that cannot produce a meaningful job.
    pub fn validate(&self) -> Result<()> {
        if self.blocks.is_empty() {
            return Err(ValidationError::EmptyJob);
        }

        let instructions = self.extraction_instructions.trim();
        if instructions.is_empty() {
            return Err(ValidationError::InvalidInstructions {
                reason: "instructions are blank".to_string(),
            });
        }
        if !instructions.chars().any(|c| c.is_alphanumeric()) {
            return Err(ValidationError::InvalidInstructions {
                reason: "instructions contain no words".to_string(),
            });
        }

        let mut seen = HashSet::with_capacity(self.blocks.len());
        for block in &self.blocks {
            if block.id.as_str().trim().is_empty() {
                return Err(ValidationError::InvalidBlock {
                    id: block.id.to_string(),
                    reason: "empty id".to_string(),
                });
            }
            if !seen.insert(&block.id) {
                return Err(ValidationError::DuplicateBlockId {
                    id: block.id.to_string(),
                });
            }
        }

        for name in self.schema_contract.fields.keys() {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidSchema {
                    reason: "field with empty name".to_string(),
                });
            }
        }

        // IndexMap keys are unique, but case variants would still collide downstream
        let mut lowered = HashSet::new();
        for name in self.schema_contract.fields.keys() {
            if !lowered.insert(name.trim().to_lowercase()) {
                return Err(ValidationError::InvalidSchema {
                    reason: format!("field '{}' listed more than once", name),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract() -> SchemaContract {
        SchemaContract::new("person").required("name")
    }

    #[test]
    fn test_empty_job_rejected() {
        let job = JobContext::new("find people", contract(), vec![]);
        assert!(matches!(job.validate(), Err(ValidationError::EmptyJob)));
    }

    #[test]
    fn test_blank_instructions_rejected() {
        let job = JobContext::new("  ", contract(), vec![ContentBlock::new("b1", "x")]);
        assert!(matches!(
            job.validate(),
            Err(ValidationError::InvalidInstructions { .. })
        ));

        let job = JobContext::new("?!", contract(), vec![ContentBlock::new("b1", "x")]);
        assert!(job.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let blocks = vec![ContentBlock::new("b1", "x"), ContentBlock::new("b1", "y")];
        let job = JobContext::new("find people", contract(), blocks);
        assert!(matches!(
            job.validate(),
            Err(ValidationError::DuplicateBlockId { .. })
        ));
    }

    #[test]
    fn test_case_variant_fields_rejected() {
        let schema = SchemaContract::new("person").required("Name").expected("name");
        let job = JobContext::new("find people", schema, vec![ContentBlock::new("b1", "x")]);
        assert!(matches!(
            job.validate(),
            Err(ValidationError::InvalidSchema { .. })
        ));
    }

    #[test]
    fn test_extraction_type_defaults() {
        let job = JobContext::new(
            "find things",
            SchemaContract::new(" "),
            vec![ContentBlock::new("b1", "x")],
        );
        assert_eq!(job.extraction_type(), "entity");
        assert!(job.validate().is_ok());
    }
}
