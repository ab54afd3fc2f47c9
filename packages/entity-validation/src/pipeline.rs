//! Job orchestration - runs one validation job end to end.
//!
//! ```text
//! validate ─► fingerprint + cache ─► triage ─► cluster ─► judge ─► calibrate
//!          ─► entities ─► aggregate filter ─► dedup ─► negotiate ─► output
//! ```
//!
//! The decision cache, calibrator and rubric cache are shared by `Arc` and
//! outlive the job. Everything else is job-local.

use chrono::Utc;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::cache::{cluster_near_duplicates, BlockFingerprint, CacheKey, DecisionCache};
use crate::calibration::Calibrator;
use crate::classifier::{CheapClassifier, Triage};
use crate::dedup::{AggregateFilter, Deduplicator};
use crate::error::{Result, ValidationError};
use crate::features::{lexicon::LEXICON_VERSION, FeatureExtractor};
use crate::judge::{ground_fields, BatchJudge, RubricCache};
use crate::negotiation::SchemaNegotiator;
use crate::traits::judge::JudgeModel;
use crate::types::{
    Classification, ContentBlock, Decision, Entity, Issue, IssueKind, JobContext, JobEvidence,
    ProcessingStats, Provenance, ValidationConfig, ValidationOutput,
};

/// How a block left the triage workers.
enum Resolution {
    Cached(Decision),
    Triaged(Triage),
}

struct TriageRow {
    index: usize,
    fingerprint: BlockFingerprint,
    resolution: Resolution,
}

/// The hybrid validation pipeline.
pub struct ValidationPipeline<J: JudgeModel> {
    judge: BatchJudge<J>,
    cache: Arc<DecisionCache>,
    calibrator: Arc<Calibrator>,
    rubrics: Arc<RubricCache>,
    extractor: FeatureExtractor,
    classifier: CheapClassifier,
    aggregate_filter: AggregateFilter,
    deduplicator: Deduplicator,
    negotiator: SchemaNegotiator,
    config: ValidationConfig,
}

impl<J: JudgeModel + 'static> ValidationPipeline<J> {
    /// Create a pipeline with fresh shared state. The config is validated.
    pub fn new(judge: Arc<J>, config: ValidationConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            judge: BatchJudge::new(judge, config.judge.clone()),
            cache: Arc::new(DecisionCache::new(&config.cache)),
            calibrator: Arc::new(Calibrator::new(config.calibration.clone())),
            rubrics: Arc::new(RubricCache::new()),
            extractor: FeatureExtractor::new(),
            classifier: CheapClassifier::new(config.classifier.clone()),
            aggregate_filter: AggregateFilter::new(config.dedup.clone()),
            deduplicator: Deduplicator::new(config.dedup.clone()),
            negotiator: SchemaNegotiator::new(config.negotiation.clone()),
            config,
        })
    }

    /// Share a decision cache with other pipelines.
    pub fn with_cache(mut self, cache: Arc<DecisionCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Share a calibrator with other pipelines.
    pub fn with_calibrator(mut self, calibrator: Arc<Calibrator>) -> Self {
        self.calibrator = calibrator;
        self
    }

    pub fn with_rubric_cache(mut self, rubrics: Arc<RubricCache>) -> Self {
        self.rubrics = rubrics;
        self
    }

    pub fn cache(&self) -> &Arc<DecisionCache> {
        &self.cache
    }

    pub fn calibrator(&self) -> &Arc<Calibrator> {
        &self.calibrator
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Feed back whether a decision turned out to be correct.
    pub fn record_outcome(&self, decision: &Decision, was_correct: bool) {
        self.calibrator.record_outcome(decision, was_correct);
    }

    /// Run one job.
    pub async fn run(&self, job: JobContext) -> Result<ValidationOutput> {
        self.run_with_cancel(job, CancellationToken::new()).await
    }

    /// Run one job, aborting in-flight remote calls when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        job: JobContext,
        cancel: CancellationToken,
    ) -> Result<ValidationOutput> {
        job.validate()?;

        let job_id = Uuid::now_v7();
        let span = info_span!(
            "validation_job",
            job_id = %job_id,
            entity_type = %job.extraction_type(),
            blocks = job.blocks.len()
        );
        self.execute(job_id, job, cancel).instrument(span).await
    }

    async fn execute(
        &self,
        job_id: Uuid,
        job: JobContext,
        cancel: CancellationToken,
    ) -> Result<ValidationOutput> {
        let started_at = Utc::now();
        let timer = Instant::now();
        info!(url = ?job.page_hints.url, "Validation job started");

        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }

        let job = Arc::new(job);
        let extraction_type = job.extraction_type().to_string();
        let contract = job.schema_contract.clone();
        let rubric = self.rubrics.get_or_build(
            &contract,
            &job.extraction_instructions,
            self.config.judge.max_reasoning_chars,
        );
        let schema_fp = contract.fingerprint();
        let decision_fp = self.decision_fingerprint(&rubric.fingerprint);

        let mut stats = ProcessingStats::default();
        let mut issues: Vec<Issue> = Vec::new();

        // Fingerprint, cache lookup and triage
        let rows = self.triage(&job, &schema_fp, &decision_fp).await?;
        if cancel.is_cancelled() {
            return Err(ValidationError::Cancelled);
        }

        let mut fingerprints: Vec<Option<BlockFingerprint>> = vec![None; job.blocks.len()];
        let mut decisions: Vec<Option<Decision>> = vec![None; job.blocks.len()];
        let mut uncertain: Vec<usize> = Vec::new();

        for row in rows {
            let block = &job.blocks[row.index];
            match row.resolution {
                Resolution::Cached(mut decision) => {
                    decision.block_id = block.id.clone();
                    decision.inherited_from = None;
                    stats.cache_hits += 1;
                    decisions[row.index] = Some(decision);
                }
                Resolution::Triaged(triage) if triage.needs_remote_judgment => {
                    uncertain.push(row.index);
                }
                Resolution::Triaged(triage) => {
                    let decision = Decision::new(
                        block.id.clone(),
                        triage.classification,
                        triage.label_confidence(),
                        Provenance::Heuristic,
                        extraction_type.as_str(),
                    )
                    .with_reasoning(format!(
                        "{:?} band at p={:.2}",
                        triage.band, triage.raw_probability
                    ));
                    self.cache.put(
                        CacheKey::new(&schema_fp, &decision_fp, row.fingerprint.key()),
                        decision.clone(),
                    );
                    stats.heuristic_decisions += 1;
                    decisions[row.index] = Some(decision);
                }
            }
            fingerprints[row.index] = Some(row.fingerprint);
        }
        let fingerprints: Vec<BlockFingerprint> = fingerprints.into_iter().flatten().collect();

        // Near-duplicate clustering of uncertain misses
        uncertain.sort_unstable();
        let items: Vec<(usize, &BlockFingerprint)> =
            uncertain.iter().map(|&i| (i, &fingerprints[i])).collect();
        let groups = cluster_near_duplicates(
            &items,
            self.config.cache.cluster_prefix_bits,
            self.config.cache.cluster_max_distance,
        );
        debug!(
            uncertain = uncertain.len(),
            representatives = groups.len(),
            "Clustered uncertain blocks"
        );

        // Remote judging of representatives
        let representatives: Vec<&ContentBlock> =
            groups.iter().map(|g| &job.blocks[g.representative]).collect();
        let outcome = self
            .judge
            .judge_blocks(&representatives, &contract, &rubric, &extraction_type, &cancel)
            .await?;

        stats.batches = outcome.batches;
        stats.retries = outcome.retries;
        issues.extend(outcome.issues);

        for (group, decision) in groups.iter().zip(outcome.decisions) {
            let rep = group.representative;
            if decision.degraded {
                stats.degraded_decisions += 1;
            } else {
                stats.remote_decisions += 1;
                self.cache.put(
                    CacheKey::new(&schema_fp, &decision_fp, fingerprints[rep].key()),
                    decision.clone(),
                );
            }

            for &member in &group.members {
                let block = &job.blocks[member];
                let mut inherited = decision.inherit_for(block.id.clone());
                issues.extend(ground_fields(
                    &mut inherited,
                    block,
                    &contract,
                    self.config.judge.require_field_evidence,
                ));
                stats.inherited_decisions += 1;
                if inherited.degraded {
                    stats.degraded_decisions += 1;
                } else {
                    self.cache.put(
                        CacheKey::new(&schema_fp, &decision_fp, fingerprints[member].key()),
                        inherited.clone(),
                    );
                }
                decisions[member] = Some(inherited);
            }
            decisions[rep] = Some(decision);
        }

        // Calibration
        let mut decisions: Vec<Decision> = decisions.into_iter().flatten().collect();
        for decision in decisions.iter_mut() {
            self.calibrator.apply(decision);
        }

        let entities = self.build_entities(&job, decisions, &mut issues);

        let (entities, filter_issues) = self.aggregate_filter.apply(entities);
        issues.extend(filter_issues);

        let dedup = self.deduplicator.deduplicate(entities);
        issues.extend(dedup.issues);

        let negotiated = self.negotiator.negotiate(&contract, dedup.entities);
        issues.extend(negotiated.issues);

        stats.elapsed_ms = timer.elapsed().as_millis() as u64;
        let evidence = JobEvidence {
            blocks_digest: blocks_digest(&fingerprints),
            started_at,
            completed_at: Utc::now(),
        };

        info!(
            entities = negotiated.entities.len(),
            issues = issues.len(),
            heuristic = stats.heuristic_decisions,
            remote = stats.remote_decisions,
            cache_hits = stats.cache_hits,
            degraded = stats.degraded_decisions,
            elapsed_ms = stats.elapsed_ms,
            "Validation job complete"
        );

        Ok(ValidationOutput {
            job_id,
            entities: negotiated.entities,
            final_schema_contract: negotiated.contract,
            issues,
            processing_stats: stats,
            evidence,
        })
    }

    /// Cache key component covering the rubric and the classifier that
    /// produced heuristic decisions.
    fn decision_fingerprint(&self, rubric_fp: &str) -> String {
        let classifier = &self.config.classifier;
        let mut hasher = Sha256::new();
        hasher.update(rubric_fp.as_bytes());
        hasher.update(classifier.weights.version.as_bytes());
        hasher.update(LEXICON_VERSION.as_bytes());
        for edge in [
            classifier.certain_individual,
            classifier.certain_aggregate,
            classifier.lean_split,
        ] {
            hasher.update(edge.to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Fingerprint, look up and triage every block on a bounded worker pool.
    async fn triage(
        &self,
        job: &Arc<JobContext>,
        schema_fp: &str,
        decision_fp: &str,
    ) -> Result<Vec<TriageRow>> {
        let count = job.blocks.len();
        let workers = self.config.triage_workers.max(1);
        let chunk = count.div_ceil(workers).max(1);

        let handles = (0..count).step_by(chunk).map(|start| {
            let end = (start + chunk).min(count);
            let job = Arc::clone(job);
            let cache = Arc::clone(&self.cache);
            let extractor = self.extractor.clone();
            let classifier = self.classifier.clone();
            let schema_fp = schema_fp.to_string();
            let decision_fp = decision_fp.to_string();

            tokio::task::spawn_blocking(move || {
                (start..end)
                    .map(|index| {
                        let block = &job.blocks[index];
                        let fingerprint = BlockFingerprint::of(block);
                        let resolution = match cache.get(&schema_fp, &decision_fp, &fingerprint.key()) {
                            Some(decision) => Resolution::Cached(decision),
                            None => {
                                let features = extractor.extract(block, &job);
                                Resolution::Triaged(classifier.classify(&features))
                            }
                        };
                        TriageRow {
                            index,
                            fingerprint,
                            resolution,
                        }
                    })
                    .collect::<Vec<_>>()
            })
        });

        let chunks = try_join_all(handles)
            .await
            .map_err(|e| ValidationError::Worker(e.to_string()))?;
        Ok(chunks.into_iter().flatten().collect())
    }

    /// Turn decisions into entity candidates in discovery order.
    fn build_entities(
        &self,
        job: &JobContext,
        decisions: Vec<Decision>,
        issues: &mut Vec<Issue>,
    ) -> Vec<Entity> {
        let threshold = self.config.low_confidence_threshold;
        let mut entities = Vec::new();

        for (index, (block, decision)) in job.blocks.iter().zip(decisions).enumerate() {
            match decision.classification {
                Classification::Aggregate => continue,
                Classification::Unknown if !self.config.include_unknown => continue,
                Classification::Individual if !decision.is_valid => {
                    issues.push(
                        Issue::new(
                            IssueKind::RejectedByJudge,
                            format!("not a valid {}", decision.extraction_type),
                        )
                        .for_block(&block.id),
                    );
                    continue;
                }
                _ => {}
            }

            let mut entity = Entity::from_block(block, index, decision);
            if entity.decision.calibrated_confidence < threshold {
                entity.low_confidence = true;
                issues.push(
                    Issue::new(
                        IssueKind::LowConfidence,
                        format!(
                            "calibrated confidence {:.2} below {:.2}",
                            entity.decision.calibrated_confidence, threshold
                        ),
                    )
                    .for_block(&block.id),
                );
            }
            entities.push(entity);
        }
        entities
    }
}

/// SHA-256 over the ordered block fingerprint keys.
fn blocks_digest(fingerprints: &[BlockFingerprint]) -> String {
    let mut hasher = Sha256::new();
    for fp in fingerprints {
        hasher.update(fp.key().as_bytes());
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{person_block, person_contract, uncertain_block, MockJudge, ScriptedVerdict};
    use std::time::Duration;

    fn pipeline(judge: Arc<MockJudge>) -> ValidationPipeline<MockJudge> {
        ValidationPipeline::new(judge, ValidationConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_job_fails_fast() {
        let p = pipeline(Arc::new(MockJudge::new()));
        let job = JobContext::new("find people", person_contract(), vec![]);
        assert!(matches!(p.run(job).await, Err(ValidationError::EmptyJob)));
    }

    #[tokio::test]
    async fn test_heuristic_only_job_makes_no_calls() {
        let judge = Arc::new(MockJudge::new());
        let p = pipeline(judge.clone());
        let job = JobContext::new(
            "find people",
            person_contract(),
            vec![
                person_block("a", "Alice Wong", "engineer"),
                person_block("b", "Bob Lee", "designer"),
            ],
        );

        let output = p.run(job).await.unwrap();
        assert_eq!(judge.call_count(), 0);
        assert_eq!(output.entities.len(), 2);
        assert_eq!(output.processing_stats.heuristic_decisions, 2);
        assert!(output
            .entities
            .iter()
            .all(|e| e.decision.provenance == Provenance::Heuristic));
    }

    #[tokio::test]
    async fn test_uncertain_blocks_are_judged() {
        let judge = Arc::new(
            MockJudge::new()
                .with_verdict("u0", ScriptedVerdict::aggregate(0.9))
                .with_verdict("u1", ScriptedVerdict::individual(0.7).invalid()),
        );
        let p = pipeline(judge.clone());
        let job = JobContext::new(
            "find people",
            person_contract(),
            vec![uncertain_block(0), uncertain_block(1), uncertain_block(2)],
        );

        let output = p.run(job).await.unwrap();
        assert_eq!(judge.call_count(), 1);
        assert_eq!(output.processing_stats.remote_decisions, 3);
        assert_eq!(output.issues_of(IssueKind::RejectedByJudge).len(), 1);
        assert!(output.entity_for(&"u0".into()).is_none());
        assert!(output.entity_for(&"u2".into()).is_some());
    }

    #[tokio::test]
    async fn test_near_duplicates_inherit() {
        let judge = Arc::new(MockJudge::new());
        let p = pipeline(judge.clone());
        let text = "field notes on amber birch cedar dune ember";
        let job = JobContext::new(
            "find people",
            person_contract(),
            vec![
                ContentBlock::new("x1", text),
                ContentBlock::new("x2", text),
                ContentBlock::new("x3", text),
            ],
        );

        let output = p.run(job).await.unwrap();
        assert_eq!(judge.judged_item_count(), 1);
        assert_eq!(output.processing_stats.inherited_decisions, 2);
    }

    #[tokio::test]
    async fn test_cancelled_job_returns_error() {
        let judge = Arc::new(MockJudge::new().with_delay(Duration::from_secs(10)));
        let p = pipeline(judge);
        let job = JobContext::new("find people", person_contract(), vec![uncertain_block(0)]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = p.run_with_cancel(job, cancel).await;
        assert!(matches!(result, Err(ValidationError::Cancelled)));
    }

    #[tokio::test]
    async fn test_evidence_digest_is_content_based() {
        let p = pipeline(Arc::new(MockJudge::new()));
        let blocks = vec![person_block("a", "Alice Wong", "engineer")];
        let first = p
            .run(JobContext::new("find people", person_contract(), blocks.clone()))
            .await
            .unwrap();
        let second = p
            .run(JobContext::new("find people", person_contract(), blocks))
            .await
            .unwrap();

        assert_eq!(first.evidence.blocks_digest, second.evidence.blocks_digest);
        assert_ne!(first.job_id, second.job_id);
        assert!(first.evidence.completed_at >= first.evidence.started_at);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ValidationConfig::default();
        config.judge.max_batch_size = 0;
        assert!(matches!(
            ValidationPipeline::new(Arc::new(MockJudge::new()), config),
            Err(ValidationError::Config(_))
        ));
    }
}
