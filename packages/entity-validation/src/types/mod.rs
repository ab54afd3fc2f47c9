//! Domain types shared across the pipeline.

pub mod block;
pub mod config;
pub mod decision;
pub mod entity;
pub mod job;
pub mod schema;

pub use block::{BlockHints, BlockId, ContentBlock};
pub use config::{
    CacheConfig, CalibrationConfig, ClassifierConfig, DedupConfig, IncompleteRowPolicy,
    JudgeConfig, NegotiationConfig, ValidationConfig,
};
pub use decision::{Classification, Decision, Provenance};
pub use entity::{Entity, Issue, IssueKind, JobEvidence, ProcessingStats, ValidationOutput};
pub use job::{JobContext, PageHints};
pub use schema::{FieldSpec, FieldTier, SchemaContract};
