//! Trait abstractions at the edge of the pipeline.
//!
//! The remote reasoning model is the only external collaborator the
//! pipeline calls; applications plug a transport in through [`JudgeModel`].

pub mod judge;

pub use judge::{JudgeItem, JudgeModel, JudgeRequest};
