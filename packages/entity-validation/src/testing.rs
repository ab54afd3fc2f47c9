//! Testing utilities including a mock judge and block builders.
//!
//! These let applications and tests exercise the whole pipeline without a
//! remote model: verdicts are scripted per block id, and failures, malformed
//! replies and latency can be injected.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use crate::error::{JudgeError, JudgeResult};
use crate::judge::response::{JudgeReply, JudgeVerdict};
use crate::traits::judge::{JudgeModel, JudgeRequest};
use crate::types::{Classification, ContentBlock, SchemaContract};

/// A verdict the mock returns for one block.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptedVerdict {
    pub classification: Classification,
    pub is_valid: bool,
    pub confidence: f64,
    pub reasoning: String,
    pub fields: BTreeMap<String, Option<String>>,
}

impl ScriptedVerdict {
    pub fn individual(confidence: f64) -> Self {
        Self {
            classification: Classification::Individual,
            is_valid: true,
            confidence,
            reasoning: "describes one entity".to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn aggregate(confidence: f64) -> Self {
        Self {
            classification: Classification::Aggregate,
            is_valid: false,
            confidence,
            reasoning: "describes several entities".to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn unknown(confidence: f64) -> Self {
        Self {
            classification: Classification::Unknown,
            is_valid: false,
            confidence,
            reasoning: "not enough information".to_string(),
            fields: BTreeMap::new(),
        }
    }

    /// An INDIVIDUAL verdict that is not of the requested type.
    pub fn invalid(mut self) -> Self {
        self.is_valid = false;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), Some(value.into()));
        self
    }

    fn to_verdict(&self, id: &str) -> JudgeVerdict {
        JudgeVerdict {
            id: id.to_string(),
            classification: self.classification,
            is_valid: self.is_valid,
            confidence: self.confidence,
            reasoning: self.reasoning.clone(),
            extracted_fields: self.fields.clone(),
        }
    }
}

/// Failure the mock raises on every call.
#[derive(Debug, Clone)]
pub enum MockFailure {
    Transport(String),
    Status(u16),
    RateLimited,
}

impl MockFailure {
    fn to_error(&self) -> JudgeError {
        match self {
            Self::Transport(msg) => JudgeError::transport(msg.clone()),
            Self::Status(status) => JudgeError::Status {
                status: *status,
                body: "mock failure".to_string(),
            },
            Self::RateLimited => JudgeError::RateLimited,
        }
    }
}

/// A mock judge for testing.
///
/// Unscripted items get the default verdict (INDIVIDUAL, valid, 0.8).
pub struct MockJudge {
    /// Scripted verdicts by block id
    verdicts: Arc<RwLock<HashMap<String, ScriptedVerdict>>>,

    default_verdict: ScriptedVerdict,

    /// Ids left out of every reply
    omitted: Arc<RwLock<HashSet<String>>>,

    failure: Option<MockFailure>,

    /// Remaining calls that fail with a transient transport error
    fail_first: Arc<AtomicUsize>,

    raw_reply: Option<String>,

    delay: Option<Duration>,

    /// Requests received, for assertions
    calls: Arc<RwLock<Vec<JudgeRequest>>>,

    /// Calls currently inside `judge` and the highest count seen
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when a call finishes or is cancelled.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockJudge {
    fn default() -> Self {
        Self::new()
    }
}

impl MockJudge {
    pub fn new() -> Self {
        Self {
            verdicts: Arc::new(RwLock::new(HashMap::new())),
            default_verdict: ScriptedVerdict::individual(0.8),
            omitted: Arc::new(RwLock::new(HashSet::new())),
            failure: None,
            fail_first: Arc::new(AtomicUsize::new(0)),
            raw_reply: None,
            delay: None,
            calls: Arc::new(RwLock::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Script the verdict for one block id.
    pub fn with_verdict(self, id: impl Into<String>, verdict: ScriptedVerdict) -> Self {
        self.verdicts.write().unwrap().insert(id.into(), verdict);
        self
    }

    /// Verdict for every unscripted item.
    pub fn with_default_verdict(mut self, verdict: ScriptedVerdict) -> Self {
        self.default_verdict = verdict;
        self
    }

    /// Leave an id out of the reply.
    pub fn omitting(self, id: impl Into<String>) -> Self {
        self.omitted.write().unwrap().insert(id.into());
        self
    }

    /// Fail every call with a transport error.
    pub fn failing_with_transport(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(MockFailure::Transport(message.into()));
        self
    }

    pub fn failing_with(mut self, failure: MockFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Fail the first `n` calls with a transient error, then behave.
    pub fn fail_first_calls(self, n: usize) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Return this body verbatim instead of a generated reply.
    pub fn with_raw_reply(mut self, raw: impl Into<String>) -> Self {
        self.raw_reply = Some(raw.into());
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Total items across every request.
    pub fn judged_item_count(&self) -> usize {
        self.calls.read().unwrap().iter().map(|r| r.items.len()).sum()
    }

    /// Most calls that were ever running at the same time.
    pub fn max_concurrent_calls(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn clear_calls(&self) {
        self.calls.write().unwrap().clear();
    }

    fn reply_for(&self, request: &JudgeRequest) -> JudgeResult<String> {
        let verdicts = self.verdicts.read().unwrap();
        let omitted = self.omitted.read().unwrap();

        let items = request
            .items
            .iter()
            .filter(|item| !omitted.contains(&item.id))
            .map(|item| {
                verdicts
                    .get(&item.id)
                    .unwrap_or(&self.default_verdict)
                    .to_verdict(&item.id)
            })
            .collect();

        Ok(serde_json::to_string(&JudgeReply { items })?)
    }
}

#[async_trait]
impl JudgeModel for MockJudge {
    async fn judge(&self, request: &JudgeRequest) -> JudgeResult<String> {
        self.calls.write().unwrap().push(request.clone());

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(JudgeError::transport("mock transient failure"));
        }

        if let Some(failure) = &self.failure {
            return Err(failure.to_error());
        }

        if let Some(raw) = &self.raw_reply {
            return Ok(raw.clone());
        }

        self.reply_for(request)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Contract asking for people with a required name.
pub fn person_contract() -> SchemaContract {
    SchemaContract::new("person")
        .required("name")
        .expected("title")
        .discoverable("email")
}

/// A block that the default classifier finalizes as INDIVIDUAL.
pub fn person_block(id: &str, name: &str, role: &str) -> ContentBlock {
    ContentBlock::new(
        id,
        format!("{} is a senior {} at Acme Health working on imaging.", name, role),
    )
    .with_heading(name)
    .with_selector("main > section > div > article")
    .with_field("name", name)
    .with_field("title", role)
}

const NEUTRAL_WORDS: &[&str] = &[
    "amber", "birch", "cedar", "dune", "ember", "fjord", "glacier", "harbor", "iris", "juniper",
    "kelp", "lagoon", "meadow", "nectar", "orchid", "pebble", "quartz", "ravine", "sage",
    "thistle", "umber", "valley", "willow", "yarrow", "zephyr", "acorn", "bramble", "canyon",
    "delta", "estuary", "fern", "grove", "heather", "inlet", "jasper", "knoll", "lichen",
    "marsh", "nettle", "oasis", "prairie", "quarry", "reed", "spruce", "tundra", "upland",
    "vine", "wetland", "basalt", "cobble", "drift", "flint", "granite", "hollow", "islet",
    "jetty", "kiln", "ledge", "moraine", "nook", "outcrop", "plateau", "ridge", "shoal",
    "terrace", "vale", "wharf", "alder", "beacon", "cairn", "dell", "eddy", "ford", "gorge",
];

/// A headingless block the default classifier routes to the judge.
///
/// Distinct `n` (up to 14) produce texts that do not cluster together.
pub fn uncertain_block(n: usize) -> ContentBlock {
    let words: Vec<&str> = (0..5)
        .map(|k| NEUTRAL_WORDS[(n * 5 + k) % NEUTRAL_WORDS.len()])
        .collect();
    ContentBlock::new(
        format!("u{}", n),
        format!("field notes on {} {} {} {} {}", words[0], words[1], words[2], words[3], words[4]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::judge::JudgeItem;

    fn request(ids: &[&str]) -> JudgeRequest {
        JudgeRequest::new(
            "rubric",
            ids.iter()
                .map(|id| JudgeItem {
                    id: id.to_string(),
                    sanitized_text: "text".to_string(),
                    sanitized_heading: String::new(),
                    hints: String::new(),
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_mock_scripted_and_default() {
        let judge = MockJudge::new().with_verdict("b2", ScriptedVerdict::aggregate(0.9));
        let raw = judge.judge(&request(&["b1", "b2"])).await.unwrap();
        let reply: JudgeReply = serde_json::from_str(&raw).unwrap();

        assert_eq!(reply.items[0].classification, Classification::Individual);
        assert_eq!(reply.items[1].classification, Classification::Aggregate);
        assert_eq!(judge.call_count(), 1);
        assert_eq!(judge.judged_item_count(), 2);
    }

    #[tokio::test]
    async fn test_mock_fail_first() {
        let judge = MockJudge::new().fail_first_calls(1);
        assert!(judge.judge(&request(&["b1"])).await.is_err());
        assert!(judge.judge(&request(&["b1"])).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_status_failure() {
        let judge = MockJudge::new().failing_with(MockFailure::Status(503));
        let err = judge.judge(&request(&["b1"])).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_uncertain_blocks_are_distinct() {
        let a = uncertain_block(0);
        let b = uncertain_block(1);
        assert_ne!(a.body, b.body);
        assert_eq!(a.id.as_str(), "u0");
    }
}
