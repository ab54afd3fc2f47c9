//! Strict parsing of judge replies.
//!
//! A reply is accepted only if it is exactly the shape we asked for. Unknown
//! keys, unknown or repeated ids, and confidences off the 0.1 grid all fail
//! the whole batch. Ids that are simply missing are reported back so the
//! caller can mark those blocks UNKNOWN.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{JudgeError, JudgeResult};
use crate::judge::sanitize::truncate_chars;
use crate::types::{BlockId, Classification, Decision, Provenance};

/// Tolerance when checking that a confidence sits on the 0.1 grid.
const GRID_TOLERANCE: f64 = 1e-6;

/// Whole reply for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct JudgeReply {
    pub items: Vec<JudgeVerdict>,
}

/// Verdict for one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct JudgeVerdict {
    /// Id of the item, copied from the request
    pub id: String,

    pub classification: Classification,

    /// Whether the item is a valid entity of the requested type
    pub is_valid: bool,

    /// Confidence from 0 to 1 in steps of 0.1
    pub confidence: f64,

    /// Short justification
    pub reasoning: String,

    /// Field values copied from the item text, null when absent
    pub extracted_fields: BTreeMap<String, Option<String>>,
}

impl JudgeVerdict {
    /// Turn a verdict into a decision for `block_id`.
    pub fn into_decision(self, block_id: BlockId, extraction_type: &str) -> Decision {
        let confidence = (self.confidence * 10.0).round() / 10.0;
        let is_valid = self.is_valid && self.classification == Classification::Individual;
        let fields = self
            .extracted_fields
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .filter(|(_, v)| !v.trim().is_empty())
            .collect();

        Decision::new(
            block_id,
            self.classification,
            confidence,
            Provenance::RemoteModel,
            extraction_type,
        )
        .with_validity(is_valid)
        .with_reasoning(self.reasoning)
        .with_fields(fields)
    }
}

/// A validated batch reply.
#[derive(Debug, Clone, Default)]
pub struct ParsedBatch {
    pub verdicts: HashMap<String, JudgeVerdict>,

    /// Requested ids with no verdict, in request order
    pub missing: Vec<String>,
}

/// Parse and validate a raw reply against the ids that were sent.
pub fn parse_reply(
    raw: &str,
    expected_ids: &[&str],
    max_reasoning_chars: usize,
) -> JudgeResult<ParsedBatch> {
    let reply: JudgeReply = serde_json::from_str(strip_code_fence(raw))?;

    let expected: HashSet<&str> = expected_ids.iter().copied().collect();
    let mut verdicts = HashMap::with_capacity(reply.items.len());

    for mut verdict in reply.items {
        if !expected.contains(verdict.id.as_str()) {
            return Err(JudgeError::malformed(format!(
                "reply contains unknown id '{}'",
                verdict.id
            )));
        }
        check_confidence(&verdict)?;
        verdict.reasoning = truncate_chars(verdict.reasoning.trim(), max_reasoning_chars);

        let id = verdict.id.clone();
        if verdicts.insert(id.clone(), verdict).is_some() {
            return Err(JudgeError::malformed(format!(
                "reply contains id '{}' more than once",
                id
            )));
        }
    }

    let missing = expected_ids
        .iter()
        .filter(|id| !verdicts.contains_key(**id))
        .map(|id| id.to_string())
        .collect();

    Ok(ParsedBatch { verdicts, missing })
}

fn check_confidence(verdict: &JudgeVerdict) -> JudgeResult<()> {
    let c = verdict.confidence;
    if !c.is_finite() || !(0.0..=1.0).contains(&c) {
        return Err(JudgeError::malformed(format!(
            "confidence {} for '{}' is outside [0, 1]",
            c, verdict.id
        )));
    }
    let scaled = c * 10.0;
    if (scaled - scaled.round()).abs() > GRID_TOLERANCE {
        return Err(JudgeError::malformed(format!(
            "confidence {} for '{}' is not a multiple of 0.1",
            c, verdict.id
        )));
    }
    Ok(())
}

/// Models sometimes wrap JSON in a markdown fence; the content is still checked strictly.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(items: &str) -> String {
        format!(r#"{{"items": [{}]}}"#, items)
    }

    fn item(id: &str, confidence: &str) -> String {
        format!(
            r#"{{"id": "{}", "classification": "INDIVIDUAL", "isValid": true, "confidence": {}, "reasoning": "one person", "extractedFields": {{"name": "Jane", "email": null}}}}"#,
            id, confidence
        )
    }

    #[test]
    fn test_valid_reply() {
        let raw = reply(&format!("{},{}", item("b1", "0.9"), item("b2", "0.3")));
        let parsed = parse_reply(&raw, &["b1", "b2", "b3"], 400).unwrap();
        assert_eq!(parsed.verdicts.len(), 2);
        assert_eq!(parsed.missing, vec!["b3".to_string()]);
    }

    #[test]
    fn test_unknown_key_fails_batch() {
        let raw = r#"{"items": [], "note": "hi"}"#;
        assert!(matches!(
            parse_reply(raw, &["b1"], 400),
            Err(JudgeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_id_fails_batch() {
        let raw = reply(&item("zzz", "0.9"));
        assert!(parse_reply(&raw, &["b1"], 400).is_err());
    }

    #[test]
    fn test_duplicate_id_fails_batch() {
        let raw = reply(&format!("{},{}", item("b1", "0.9"), item("b1", "0.8")));
        assert!(parse_reply(&raw, &["b1"], 400).is_err());
    }

    #[test]
    fn test_off_grid_confidence_fails_batch() {
        assert!(parse_reply(&reply(&item("b1", "0.85")), &["b1"], 400).is_err());
        assert!(parse_reply(&reply(&item("b1", "1.2")), &["b1"], 400).is_err());
        assert!(parse_reply(&reply(&item("b1", "0.7")), &["b1"], 400).is_ok());
        assert!(parse_reply(&reply(&item("b1", "1")), &["b1"], 400).is_ok());
    }

    #[test]
    fn test_lowercase_classification_rejected() {
        let raw = reply(
            r#"{"id": "b1", "classification": "individual", "isValid": true, "confidence": 0.9, "reasoning": "", "extractedFields": {}}"#,
        );
        assert!(parse_reply(&raw, &["b1"], 400).is_err());
    }

    #[test]
    fn test_snake_case_keys_rejected() {
        let raw = reply(
            r#"{"id": "b1", "classification": "INDIVIDUAL", "is_valid": true, "confidence": 0.9, "reasoning": "", "extracted_fields": {}}"#,
        );
        assert!(matches!(
            parse_reply(&raw, &["b1"], 400),
            Err(JudgeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_verdict_serializes_camel_case() {
        let raw = reply(&item("b1", "0.9"));
        let parsed = parse_reply(&raw, &["b1"], 400).unwrap();
        let json = serde_json::to_value(&parsed.verdicts["b1"]).unwrap();
        assert_eq!(json["isValid"], serde_json::json!(true));
        assert_eq!(json["extractedFields"]["name"], serde_json::json!("Jane"));
        assert!(json.get("is_valid").is_none());
    }

    #[test]
    fn test_reasoning_truncated() {
        let long = "x".repeat(50);
        let raw = reply(&format!(
            r#"{{"id": "b1", "classification": "AGGREGATE", "isValid": false, "confidence": 0.8, "reasoning": "{}", "extractedFields": {{}}}}"#,
            long
        ));
        let parsed = parse_reply(&raw, &["b1"], 10).unwrap();
        assert_eq!(parsed.verdicts["b1"].reasoning.len(), 10);
    }

    #[test]
    fn test_fenced_reply_accepted() {
        let raw = format!("```json\n{}\n```", reply(&item("b1", "0.9")));
        assert!(parse_reply(&raw, &["b1"], 400).is_ok());
    }

    #[test]
    fn test_into_decision_drops_nulls() {
        let raw = reply(&item("b1", "0.9"));
        let mut parsed = parse_reply(&raw, &["b1"], 400).unwrap();
        let verdict = parsed.verdicts.remove("b1").unwrap();
        let decision = verdict.into_decision(BlockId::from("b1"), "person");

        assert_eq!(decision.provenance, Provenance::RemoteModel);
        assert!(decision.is_valid);
        assert_eq!(decision.extracted_fields.len(), 1);
        assert_eq!(decision.extracted_fields["name"], "Jane");
    }
}
