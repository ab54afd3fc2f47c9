//! Batch judge - resolves uncertain blocks through the remote model.
//!
//! Blocks are sanitized, grouped into batches of at most `max_batch_size`,
//! and sent with a cached rubric. Up to `max_in_flight` batches run at once,
//! each call bounded by `call_timeout` and the whole phase by `job_timeout`.
//! Every failure mode ends in a decision: a block the model could not
//! resolve becomes UNKNOWN with the fallback confidence, and the job goes on.

pub mod rate_limited;
pub mod response;
pub mod rubric;
pub mod sanitize;
pub mod schema;

pub use rate_limited::RateLimitedJudge;
pub use response::{parse_reply, JudgeReply, JudgeVerdict, ParsedBatch};
pub use rubric::{Rubric, RubricCache, RUBRIC_VERSION};

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JudgeError, JudgeResult, Result, ValidationError};
use crate::features::lexicon::tokenize;
use crate::traits::judge::{JudgeItem, JudgeModel, JudgeRequest};
use crate::types::{ContentBlock, Decision, Issue, IssueKind, JudgeConfig, SchemaContract};

/// Decisions and bookkeeping for one judge phase.
#[derive(Debug, Default)]
pub struct JudgeOutcome {
    /// One decision per input block, in input order
    pub decisions: Vec<Decision>,
    pub issues: Vec<Issue>,
    pub batches: usize,
    pub retries: usize,
    pub degraded: usize,
    pub timed_out: bool,
}

/// Batching, dispatch and validation around a [`JudgeModel`].
pub struct BatchJudge<J: JudgeModel> {
    model: Arc<J>,
    config: JudgeConfig,
}

struct Batch {
    number: usize,
    /// Indexes into the input slice
    members: Vec<usize>,
    request: JudgeRequest,
}

struct BatchResult {
    number: usize,
    members: Vec<usize>,
    reply: JudgeResult<String>,
    retries: usize,
}

impl<J: JudgeModel> BatchJudge<J> {
    pub fn new(model: Arc<J>, config: JudgeConfig) -> Self {
        Self { model, config }
    }

    /// Sanitized request item for one block.
    pub fn item_for(&self, block: &ContentBlock) -> JudgeItem {
        JudgeItem {
            id: block.id.to_string(),
            sanitized_text: sanitize::sanitize(&block.body, self.config.max_text_chars),
            sanitized_heading: sanitize::sanitize(
                block.heading_text(),
                self.config.max_heading_chars,
            ),
            hints: sanitize::hint_summary(block),
        }
    }

    fn batches(
        &self,
        blocks: &[&ContentBlock],
        contract: &SchemaContract,
        rubric: &Rubric,
    ) -> Vec<Batch> {
        let size = self.config.max_batch_size.max(1);
        let format = schema::response_format(contract);
        (0..blocks.len())
            .collect::<Vec<_>>()
            .chunks(size)
            .enumerate()
            .map(|(number, members)| Batch {
                number,
                members: members.to_vec(),
                request: JudgeRequest::new(
                    rubric.text.clone(),
                    members.iter().map(|&i| self.item_for(blocks[i])).collect(),
                )
                .with_response_format(format.clone()),
            })
            .collect()
    }

    /// Judge every block. Only cancellation is an error.
    pub async fn judge_blocks(
        &self,
        blocks: &[&ContentBlock],
        contract: &SchemaContract,
        rubric: &Rubric,
        extraction_type: &str,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        let mut outcome = JudgeOutcome::default();
        if blocks.is_empty() {
            return Ok(outcome);
        }

        let batches = self.batches(blocks, contract, rubric);
        outcome.batches = batches.len();
        info!(
            judge = self.model.name(),
            blocks = blocks.len(),
            batches = batches.len(),
            "Dispatching judge batches"
        );

        let mut resolved: Vec<Option<Decision>> = vec![None; blocks.len()];

        let results = stream::iter(batches)
            .map(|batch| async move {
                let (reply, retries) = self.call_with_retry(&batch.request, batch.number).await;
                BatchResult {
                    number: batch.number,
                    members: batch.members,
                    reply,
                    retries,
                }
            })
            .buffer_unordered(self.config.max_in_flight.max(1));
        tokio::pin!(results);

        let deadline = tokio::time::sleep(self.config.job_timeout());
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!("Judge phase cancelled");
                    return Err(ValidationError::Cancelled);
                }
                _ = &mut deadline => {
                    outcome.timed_out = true;
                    warn!(
                        timeout_ms = self.config.job_timeout_ms,
                        "Judge phase timed out; pending blocks become UNKNOWN"
                    );
                    break;
                }
                next = results.next() => match next {
                    Some(result) => {
                        outcome.retries += result.retries;
                        self.resolve_batch(
                            result,
                            blocks,
                            contract,
                            extraction_type,
                            &mut resolved,
                            &mut outcome.issues,
                        );
                    }
                    None => break,
                },
            }
        }

        for (i, slot) in resolved.iter_mut().enumerate() {
            if slot.is_none() {
                let block = blocks[i];
                outcome.issues.push(
                    Issue::new(IssueKind::JudgeTimeout, "judge phase timed out before a verdict")
                        .for_block(&block.id),
                );
                *slot = Some(self.fallback(block, extraction_type, "judge phase timed out"));
            }
        }

        outcome.decisions = resolved.into_iter().flatten().collect();
        outcome.degraded = outcome.decisions.iter().filter(|d| d.degraded).count();

        info!(
            decisions = outcome.decisions.len(),
            degraded = outcome.degraded,
            retries = outcome.retries,
            "Judge phase complete"
        );
        Ok(outcome)
    }

    async fn call_with_retry(
        &self,
        request: &JudgeRequest,
        batch: usize,
    ) -> (JudgeResult<String>, usize) {
        let mut retries = 0;
        loop {
            let call = self.model.judge(request);
            let reply = match tokio::time::timeout(self.config.call_timeout(), call).await {
                Ok(reply) => reply,
                Err(_) => Err(JudgeError::Timeout {
                    after_ms: self.config.call_timeout_ms,
                }),
            };

            match reply {
                Err(e) if e.is_transient() && retries < self.config.max_retries => {
                    retries += 1;
                    warn!(batch, attempt = retries, error = %e, "Transient judge failure, retrying");
                }
                other => return (other, retries),
            }
        }
    }

    fn resolve_batch(
        &self,
        result: BatchResult,
        blocks: &[&ContentBlock],
        contract: &SchemaContract,
        extraction_type: &str,
        resolved: &mut [Option<Decision>],
        issues: &mut Vec<Issue>,
    ) {
        let parsed = result.reply.and_then(|raw| {
            let ids: Vec<&str> = result.members.iter().map(|&i| blocks[i].id.as_str()).collect();
            parse_reply(&raw, &ids, self.config.max_reasoning_chars)
        });

        let mut parsed = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                let kind = match e {
                    JudgeError::Malformed { .. } => IssueKind::MalformedResponse,
                    JudgeError::Timeout { .. } => IssueKind::JudgeTimeout,
                    _ => IssueKind::RemoteFailure,
                };
                warn!(
                    batch = result.number,
                    size = result.members.len(),
                    error = %e,
                    "Judge batch failed; degrading to UNKNOWN"
                );
                for &i in &result.members {
                    let block = blocks[i];
                    issues.push(Issue::new(kind, e.to_string()).for_block(&block.id));
                    resolved[i] = Some(self.fallback(block, extraction_type, &e.to_string()));
                }
                return;
            }
        };

        debug!(
            batch = result.number,
            verdicts = parsed.verdicts.len(),
            missing = parsed.missing.len(),
            "Judge batch resolved"
        );

        for &i in &result.members {
            let block = blocks[i];
            match parsed.verdicts.remove(block.id.as_str()) {
                Some(verdict) => {
                    let mut decision = verdict.into_decision(block.id.clone(), extraction_type);
                    issues.extend(ground_fields(
                        &mut decision,
                        block,
                        contract,
                        self.config.require_field_evidence,
                    ));
                    resolved[i] = Some(decision);
                }
                None => {
                    issues.push(
                        Issue::new(IssueKind::MissingVerdict, "reply had no verdict for this block")
                            .for_block(&block.id),
                    );
                    resolved[i] = Some(self.fallback(block, extraction_type, "no verdict returned"));
                }
            }
        }
    }

    fn fallback(&self, block: &ContentBlock, extraction_type: &str, reason: &str) -> Decision {
        Decision::degraded(
            block.id.clone(),
            self.config.fallback_confidence,
            extraction_type,
            reason,
        )
    }
}

/// Keep only extracted values that belong to the contract and, when
/// `require_evidence` is set, whose text occurs in the block.
pub fn ground_fields(
    decision: &mut Decision,
    block: &ContentBlock,
    contract: &SchemaContract,
    require_evidence: bool,
) -> Vec<Issue> {
    let haystack = format!(" {} ", tokenize(&block.full_text()).join(" "));
    let mut issues = Vec::new();

    decision.extracted_fields.retain(|name, value| {
        if !contract.contains(name) {
            issues.push(
                Issue::new(IssueKind::PhantomField, "extracted field is not in the contract")
                    .for_block(&block.id)
                    .for_field(name.clone()),
            );
            return false;
        }
        if require_evidence {
            let needle = tokenize(value).join(" ");
            if needle.is_empty() || !haystack.contains(&format!(" {} ", needle)) {
                issues.push(
                    Issue::new(IssueKind::UnevidencedField, "value does not occur in the block text")
                        .for_block(&block.id)
                        .for_field(name.clone()),
                );
                return false;
            }
        }
        true
    });

    issues
}
