//! Hybrid Entity Validation Library
//!
//! Decides which content blocks of a crawled page describe one individual
//! entity of the requested type, extracts their fields, merges duplicates,
//! and fits the schema contract to what the page actually supports.
//!
//! # Design Philosophy
//!
//! **"Cheap first, remote only when unsure"**
//!
//! - Deterministic feature triage finalizes the obvious blocks
//! - Only uncertain blocks reach the remote judge, batched and rate limited
//! - Every remote failure degrades to UNKNOWN; the job always completes
//! - Extracted values must be grounded in the block they came from
//! - The schema is negotiated from evidence, never invented
//!
//! # Usage
//!
//! ```rust,ignore
//! use entity_validation::{JobContext, SchemaContract, ValidationConfig, ValidationPipeline};
//! use entity_validation::testing::MockJudge;
//! use std::sync::Arc;
//!
//! let contract = SchemaContract::new("person").required("name").expected("title");
//! let job = JobContext::new("Find every staff member", contract, blocks);
//!
//! let pipeline = ValidationPipeline::new(Arc::new(MockJudge::new()), ValidationConfig::default())?;
//! let output = pipeline.run(job).await?;
//!
//! for entity in &output.entities {
//!     println!("{:?} {:?}", entity.name, entity.fields);
//! }
//! ```
//!
//! # Modules
//!
//! - [`features`] - Feature extraction and the shared lexicon
//! - [`classifier`] - Logistic triage with confidence bands
//! - [`cache`] - Fingerprints, near-duplicate clustering, decision cache
//! - [`judge`] - Batched remote judging with strict response validation
//! - [`calibration`] - Empirical confidence calibration
//! - [`dedup`] - Aggregate filtering and duplicate merging
//! - [`negotiation`] - Evidence-based schema negotiation
//! - [`pipeline`] - Job orchestration
//! - [`testing`] - Mock judge and block builders

pub mod cache;
pub mod calibration;
pub mod classifier;
pub mod dedup;
pub mod error;
pub mod features;
pub mod judge;
pub mod negotiation;
pub mod pipeline;
pub mod testing;
pub mod traits;
pub mod types;

#[cfg(feature = "openai")]
pub mod ai;

// Re-export core types at crate root
pub use error::{ConfigError, JudgeError, ValidationError};
pub use traits::judge::{JudgeItem, JudgeModel, JudgeRequest};
pub use types::{
    BlockHints, BlockId, CacheConfig, CalibrationConfig, Classification, ClassifierConfig,
    ContentBlock, Decision, DedupConfig, Entity, FieldSpec, FieldTier, IncompleteRowPolicy, Issue,
    IssueKind, JobContext, JobEvidence, JudgeConfig, NegotiationConfig, PageHints,
    ProcessingStats, Provenance, SchemaContract, ValidationConfig, ValidationOutput,
};

// Re-export pipeline components
pub use cache::{BlockFingerprint, CacheKey, CacheStats, DecisionCache};
pub use calibration::{Calibration, CalibrationSnapshot, Calibrator};
pub use classifier::{Band, CheapClassifier, Triage, WeightTable};
pub use dedup::{AggregateFilter, DedupOutcome, Deduplicator};
pub use features::{FeatureExtractor, FeatureVector};
pub use judge::{BatchJudge, JudgeOutcome, RateLimitedJudge, Rubric, RubricCache};
pub use negotiation::{NegotiationOutcome, SchemaNegotiator};
pub use pipeline::ValidationPipeline;

#[cfg(feature = "openai")]
pub use ai::OpenAIJudge;

// Re-export testing utilities
pub use testing::{MockJudge, ScriptedVerdict};
