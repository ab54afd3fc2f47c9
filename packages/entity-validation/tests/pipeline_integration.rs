//! End-to-end tests for the validation pipeline.
//!
//! These run whole jobs through triage, judging, calibration, filtering,
//! deduplication and negotiation with a scripted mock judge.

use std::sync::Arc;
use std::time::Duration;

use entity_validation::{
    testing::{person_block, person_contract, uncertain_block, MockJudge, ScriptedVerdict},
    BlockId, Classification, ClassifierConfig, ContentBlock, DecisionCache, FieldTier,
    IncompleteRowPolicy, IssueKind, JobContext, JudgeConfig, NegotiationConfig, Provenance,
    SchemaContract, ValidationConfig, ValidationError, ValidationOutput, ValidationPipeline,
    WeightTable,
};

const INSTRUCTIONS: &str = "Find every staff member with their name and title";

/// Helper to build a pipeline around a mock judge with default config.
fn pipeline_with(judge: MockJudge) -> (ValidationPipeline<MockJudge>, Arc<MockJudge>) {
    pipeline_with_config(judge, ValidationConfig::default())
}

fn pipeline_with_config(
    judge: MockJudge,
    config: ValidationConfig,
) -> (ValidationPipeline<MockJudge>, Arc<MockJudge>) {
    let judge = Arc::new(judge);
    let pipeline = ValidationPipeline::new(judge.clone(), config).unwrap();
    (pipeline, judge)
}

fn job(blocks: Vec<ContentBlock>) -> JobContext {
    JobContext::new(INSTRUCTIONS, person_contract(), blocks)
}

fn assert_fields_within_contract(output: &ValidationOutput) {
    for entity in &output.entities {
        let names = entity
            .fields
            .keys()
            .chain(entity.decision.extracted_fields.keys());
        for name in names {
            assert!(
                output.final_schema_contract.contains(name),
                "entity {} carries field {} outside the final contract",
                entity.block_id,
                name
            );
        }
    }
}

fn forced_individual() -> ValidationConfig {
    let forced = ClassifierConfig::default().with_weights(WeightTable::constant("forced", 8.0));
    ValidationConfig::default().with_classifier(forced)
}

fn staff() -> Vec<ContentBlock> {
    vec![
        person_block("p0", "Alice Wong", "engineer"),
        person_block("p1", "Bruno Diaz", "designer"),
        person_block("p2", "Chioma Obi", "analyst"),
        person_block("p3", "Dmitri Ivanov", "architect"),
        person_block("p4", "Elena Rossi", "consultant"),
        person_block("p5", "Farah Khan", "researcher"),
        person_block("p6", "Goran Petrov", "scientist"),
        person_block("p7", "Hana Sato", "developer"),
        person_block("p8", "Ivan Horvat", "editor"),
        person_block("p9", "Julia Novak", "accountant"),
    ]
}

#[tokio::test]
async fn test_rerun_is_served_from_cache() {
    let (pipeline, judge) = pipeline_with(
        MockJudge::new().with_verdict("u1", ScriptedVerdict::aggregate(0.9)),
    );
    let blocks = vec![
        person_block("a", "Alice Wong", "engineer"),
        uncertain_block(0),
        uncertain_block(1),
        person_block("b", "Bruno Diaz", "designer"),
    ];

    let first = pipeline.run(job(blocks.clone())).await.unwrap();
    assert!(judge.call_count() > 0);
    judge.clear_calls();

    let second = pipeline.run(job(blocks)).await.unwrap();
    assert_eq!(judge.call_count(), 0);
    assert_eq!(second.processing_stats.cache_hits, 4);

    let summarize = |o: &ValidationOutput| {
        o.entities
            .iter()
            .map(|e| {
                (
                    e.block_id.clone(),
                    e.decision.classification,
                    e.decision.calibrated_confidence,
                    e.fields.clone(),
                )
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(summarize(&first), summarize(&second));
    assert_eq!(first.final_schema_contract, second.final_schema_contract);
    assert_eq!(first.evidence.blocks_digest, second.evidence.blocks_digest);
    assert!(second.entities.iter().all(|e| e.decision.from_cache));
}

#[tokio::test]
async fn test_shared_cache_across_pipelines() {
    let cache = Arc::new(DecisionCache::default());
    let (first, _) = pipeline_with(MockJudge::new());
    let first = first.with_cache(cache.clone());
    first.run(job(vec![uncertain_block(3)])).await.unwrap();

    let (second, judge) = pipeline_with(MockJudge::new());
    let second = second.with_cache(cache);
    let output = second.run(job(vec![uncertain_block(3)])).await.unwrap();

    assert_eq!(judge.call_count(), 0);
    assert_eq!(output.processing_stats.cache_hits, 1);
}

#[tokio::test]
async fn test_extracted_fields_never_leave_the_contract() {
    let (pipeline, _) = pipeline_with(MockJudge::new().with_verdict(
        "u0",
        ScriptedVerdict::individual(0.9)
            .with_field("name", "Amber Birch")
            .with_field("title", "Chief Wizard")
            .with_field("ssn", "amber"),
    ));

    let output = pipeline.run(job(vec![uncertain_block(0)])).await.unwrap();
    let entity = output.entity_for(&BlockId::from("u0")).unwrap();

    assert_eq!(entity.fields.get("name").map(String::as_str), Some("Amber Birch"));
    assert!(!entity.fields.contains_key("ssn"));
    assert!(!entity.fields.contains_key("title"));

    let phantom = output.issues_of(IssueKind::PhantomField);
    assert_eq!(phantom.len(), 1);
    assert_eq!(phantom[0].field.as_deref(), Some("ssn"));

    let unevidenced = output.issues_of(IssueKind::UnevidencedField);
    assert_eq!(unevidenced.len(), 1);
    assert_eq!(unevidenced[0].field.as_deref(), Some("title"));

    assert_fields_within_contract(&output);
}

#[tokio::test]
async fn test_unsupported_field_is_pruned() {
    let (pipeline, _) = pipeline_with(MockJudge::new());
    let contract = SchemaContract::new("person")
        .required("name")
        .expected("title")
        .expected("phone");

    let output = pipeline
        .run(JobContext::new(INSTRUCTIONS, contract, staff()))
        .await
        .unwrap();

    assert!(!output.final_schema_contract.contains("phone"));
    assert!(output
        .issues_of(IssueKind::FieldPruned)
        .iter()
        .any(|i| i.field.as_deref() == Some("phone")));
    assert_eq!(output.entities.len(), 10);
    assert!(output.entities.iter().all(|e| !e.incomplete));
}

#[tokio::test]
async fn test_well_supported_field_is_promoted() {
    let (pipeline, _) = pipeline_with(MockJudge::new());
    let blocks: Vec<ContentBlock> = staff()
        .into_iter()
        .enumerate()
        .map(|(i, block)| {
            if i < 8 {
                block.with_field("email", format!("person{}@acme.org", i))
            } else {
                block
            }
        })
        .collect();

    let output = pipeline.run(job(blocks)).await.unwrap();

    assert_eq!(
        output.final_schema_contract.tier_of("email"),
        Some(FieldTier::Expected)
    );
    assert_eq!(output.final_schema_contract.fields["email"].support_count, 8);
    assert!(output
        .issues_of(IssueKind::FieldPromoted)
        .iter()
        .any(|i| i.field.as_deref() == Some("email")));
}

#[tokio::test]
async fn test_same_person_twice_is_merged() {
    let (pipeline, _) = pipeline_with(MockJudge::new());
    let blocks = vec![
        person_block("s1", "Dr. Sarah Chen", "radiologist"),
        person_block("o1", "Omar Haddad", "engineer"),
        person_block("s2", "Sarah Chen", "radiologist").with_field("email", "schen@acme.org"),
    ];

    let output = pipeline.run(job(blocks)).await.unwrap();

    assert_eq!(output.entities.len(), 2);
    let sarah = output.entity_for(&BlockId::from("s1")).unwrap();
    assert_eq!(
        sarah.block_id,
        output.entity_for(&BlockId::from("s2")).unwrap().block_id
    );
    assert_eq!(sarah.discovery_index, 0);
    assert_eq!(sarah.fields.get("email").map(String::as_str), Some("schen@acme.org"));
    assert_eq!(output.issues_of(IssueKind::DuplicateMerged).len(), 1);

    // Discovery order survives the merge
    assert_eq!(output.entities[1].block_id.as_str(), "o1");
}

#[tokio::test]
async fn test_team_listing_is_overridden_even_when_classified_individual() {
    let (pipeline, judge) = pipeline_with_config(MockJudge::new(), forced_individual());

    let team = ContentBlock::new(
        "team",
        "Dr. Ann Lee, Director of Research. Dr. Bo Park, Lead Engineer. \
         Dr. Cy Diaz, Program Coordinator. Dr. Di Fox, Senior Analyst.",
    )
    .with_heading("Our Team");
    let blocks = vec![team, person_block("a", "Alice Wong", "engineer")];

    let output = pipeline.run(job(blocks)).await.unwrap();

    assert_eq!(judge.call_count(), 0);
    assert!(output.entity_for(&BlockId::from("team")).is_none());
    assert!(output.entity_for(&BlockId::from("a")).is_some());

    let contamination = output.issues_of(IssueKind::AggregateContamination);
    assert_eq!(contamination.len(), 1);
    assert_eq!(contamination[0].block_id.as_ref().map(BlockId::as_str), Some("team"));
}

#[tokio::test]
async fn test_single_person_bios_survive_the_aggregate_override() {
    let (pipeline, judge) = pipeline_with_config(MockJudge::new(), forced_individual());

    let jane = ContentBlock::new(
        "jane",
        "Jane Roe is a staff engineer on the platform group. She was previously an \
         engineering manager and director of infrastructure, and is an advisor to two startups.",
    )
    .with_heading("Jane Roe, Staff Engineer");
    let founder = ContentBlock::new(
        "founder",
        "Dr. Maria Lopez is our founder and CEO. She also serves as president and chair of \
         the board.",
    )
    .with_heading("Meet the Founder");

    let output = pipeline.run(job(vec![jane, founder])).await.unwrap();

    assert_eq!(judge.call_count(), 0);
    assert!(output.entity_for(&BlockId::from("jane")).is_some());
    assert!(output.entity_for(&BlockId::from("founder")).is_some());
    assert!(output.issues_of(IssueKind::AggregateContamination).is_empty());
}

#[tokio::test]
async fn test_team_sharing_one_role_is_overridden() {
    let (pipeline, _) = pipeline_with_config(MockJudge::new(), forced_individual());

    let team = ContentBlock::new(
        "team",
        "Alice Wong, Software Engineer. Bob Lee, Software Engineer. \
         Carol Diaz, Software Engineer. Dan Ito, Software Engineer.",
    )
    .with_heading("Our Team");
    let blocks = vec![team, person_block("b", "Bruno Diaz", "designer")];

    let output = pipeline.run(job(blocks)).await.unwrap();

    assert!(output.entity_for(&BlockId::from("team")).is_none());
    assert!(output.entity_for(&BlockId::from("b")).is_some());
    assert_eq!(output.issues_of(IssueKind::AggregateContamination).len(), 1);
}

#[tokio::test]
async fn test_pruned_field_is_removed_from_judge_fields() {
    let (pipeline, _) = pipeline_with(
        MockJudge::new().with_verdict("u0", ScriptedVerdict::unknown(0.7).with_field("phone", "field")),
    );
    let contract = SchemaContract::new("person").required("name").expected("phone");
    let blocks = vec![uncertain_block(0), person_block("a", "Alice Wong", "engineer")];

    let output = pipeline
        .run(JobContext::new(INSTRUCTIONS, contract, blocks))
        .await
        .unwrap();

    assert!(!output.final_schema_contract.contains("phone"));
    let unknown = output.entity_for(&BlockId::from("u0")).unwrap();
    assert_eq!(unknown.decision.classification, Classification::Unknown);
    assert!(unknown.decision.extracted_fields.is_empty());

    let serialized = serde_json::to_string(&output.entities).unwrap();
    assert!(!serialized.contains("\"phone\""));
    assert_fields_within_contract(&output);
}

#[tokio::test]
async fn test_transport_failure_degrades_only_judged_blocks() {
    let (pipeline, judge) =
        pipeline_with(MockJudge::new().failing_with_transport("connection refused"));

    let mut blocks: Vec<ContentBlock> = (0..12).map(uncertain_block).collect();
    blocks.insert(0, person_block("a", "Alice Wong", "engineer"));
    blocks.push(person_block("b", "Bruno Diaz", "designer"));

    let output = pipeline.run(job(blocks)).await.unwrap();

    // One batch, one retry
    assert_eq!(judge.call_count(), 2);
    assert_eq!(output.processing_stats.retries, 1);
    assert_eq!(output.processing_stats.degraded_decisions, 12);
    assert_eq!(output.issues_of(IssueKind::RemoteFailure).len(), 12);

    for id in ["a", "b"] {
        let entity = output.entity_for(&BlockId::from(id)).unwrap();
        assert_eq!(entity.decision.classification, Classification::Individual);
        assert_eq!(entity.decision.provenance, Provenance::Heuristic);
        assert!(entity.fields.contains_key("name"));
        assert!(entity.fields.contains_key("title"));
    }

    let unknown: Vec<_> = output
        .entities
        .iter()
        .filter(|e| e.decision.classification == Classification::Unknown)
        .collect();
    assert_eq!(unknown.len(), 12);
    assert!(unknown.iter().all(|e| e.decision.degraded && e.low_confidence));

    // Tiers are negotiated from the two surviving individuals only
    assert!(output.final_schema_contract.contains("title"));
}

#[tokio::test]
async fn test_degraded_blocks_can_be_excluded() {
    let (pipeline, _) = pipeline_with_config(
        MockJudge::new().failing_with_transport("connection refused"),
        ValidationConfig::default().with_include_unknown(false),
    );

    let blocks = vec![uncertain_block(0), person_block("a", "Alice Wong", "engineer")];
    let output = pipeline.run(job(blocks)).await.unwrap();

    assert_eq!(output.entities.len(), 1);
    assert_eq!(output.entities[0].block_id.as_str(), "a");
}

#[tokio::test]
async fn test_malformed_reply_is_not_retried() {
    let (pipeline, judge) = pipeline_with(MockJudge::new().with_raw_reply("I think these are people"));

    let output = pipeline
        .run(job(vec![uncertain_block(0), uncertain_block(1)]))
        .await
        .unwrap();

    assert_eq!(judge.call_count(), 1);
    assert_eq!(output.issues_of(IssueKind::MalformedResponse).len(), 2);
    assert!(output.entities.iter().all(|e| e.decision.degraded));
}

#[tokio::test]
async fn test_missing_verdict_is_rejudged_next_time() {
    let (pipeline, judge) = pipeline_with(MockJudge::new().omitting("u1"));
    let blocks = vec![uncertain_block(0), uncertain_block(1)];

    let first = pipeline.run(job(blocks.clone())).await.unwrap();
    assert_eq!(first.issues_of(IssueKind::MissingVerdict).len(), 1);
    let u1 = first.entity_for(&BlockId::from("u1")).unwrap();
    assert_eq!(u1.decision.classification, Classification::Unknown);

    judge.clear_calls();
    pipeline.run(job(blocks)).await.unwrap();

    // Only the degraded block goes back to the judge
    let requests = judge.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].ids(), vec!["u1"]);
}

#[tokio::test]
async fn test_judge_phase_timeout_degrades_pending_blocks() {
    let config = ValidationConfig::default().with_judge(
        JudgeConfig::default()
            .with_call_timeout(Duration::from_secs(5))
            .with_job_timeout(Duration::from_millis(50)),
    );
    let (pipeline, _) = pipeline_with_config(
        MockJudge::new().with_delay(Duration::from_millis(500)),
        config,
    );

    let output = pipeline
        .run(job(vec![uncertain_block(0), person_block("a", "Alice Wong", "engineer")]))
        .await
        .unwrap();

    assert_eq!(output.issues_of(IssueKind::JudgeTimeout).len(), 1);
    let u0 = output.entity_for(&BlockId::from("u0")).unwrap();
    assert!(u0.decision.degraded);
    assert!(output.entity_for(&BlockId::from("a")).is_some());
}

#[tokio::test]
async fn test_calibration_applies_only_after_enough_outcomes() {
    let (pipeline, _) = pipeline_with(MockJudge::new());
    let blocks = vec![uncertain_block(0)];

    let first = pipeline.run(job(blocks.clone())).await.unwrap();
    let decision = first.entities[0].decision.clone();
    assert!(!decision.calibration_reliable);
    assert_eq!(decision.calibrated_confidence, decision.raw_confidence);

    for _ in 0..4 {
        pipeline.record_outcome(&decision, false);
    }
    let second = pipeline.run(job(blocks.clone())).await.unwrap();
    assert!(!second.entities[0].decision.calibration_reliable);
    assert!(!second.entities[0].low_confidence);

    pipeline.record_outcome(&decision, false);
    let third = pipeline.run(job(blocks)).await.unwrap();
    let calibrated = &third.entities[0];
    assert!(calibrated.decision.calibration_reliable);
    assert_eq!(calibrated.decision.calibrated_confidence, 0.0);
    assert!(calibrated.low_confidence);
    assert_eq!(third.issues_of(IssueKind::LowConfidence).len(), 1);
}

#[tokio::test]
async fn test_incomplete_rows_follow_policy() {
    let unnamed = ContentBlock::new("x", "Alice Wong is a senior engineer at Acme Health working on imaging.")
        .with_heading("Alice Wong")
        .with_selector("main > section > div > article")
        .with_field("title", "engineer");
    let blocks = vec![person_block("a", "Bruno Diaz", "designer"), unnamed];

    let (flagging, _) = pipeline_with(MockJudge::new());
    let flagged = flagging.run(job(blocks.clone())).await.unwrap();
    assert_eq!(flagged.entities.len(), 2);
    assert!(flagged.entity_for(&BlockId::from("x")).unwrap().incomplete);

    let (dropping, _) = pipeline_with_config(
        MockJudge::new(),
        ValidationConfig::default()
            .with_negotiation(NegotiationConfig::default().with_policy(IncompleteRowPolicy::Drop)),
    );
    let dropped = dropping.run(job(blocks)).await.unwrap();
    assert_eq!(dropped.entities.len(), 1);
    assert_eq!(dropped.issues_of(IssueKind::RowDropped).len(), 1);
}

#[tokio::test]
async fn test_cancellation_aborts_the_job() {
    let (pipeline, _) = pipeline_with(MockJudge::new().with_delay(Duration::from_secs(5)));
    let cancel = tokio_util::sync::CancellationToken::new();
    let trigger = cancel.clone();

    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let result = pipeline
        .run_with_cancel(job(vec![uncertain_block(0)]), cancel)
        .await;
    handle.await.unwrap();

    assert!(matches!(result, Err(ValidationError::Cancelled)));
}

#[tokio::test]
async fn test_invalid_jobs_fail_fast() {
    let (pipeline, judge) = pipeline_with(MockJudge::new());

    let duplicate = job(vec![uncertain_block(0), uncertain_block(0)]);
    assert!(matches!(
        pipeline.run(duplicate).await,
        Err(ValidationError::DuplicateBlockId { .. })
    ));

    let blank = JobContext::new("   ", person_contract(), vec![uncertain_block(0)]);
    assert!(matches!(
        pipeline.run(blank).await,
        Err(ValidationError::InvalidInstructions { .. })
    ));

    assert_eq!(judge.call_count(), 0);
}
