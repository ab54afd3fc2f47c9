//! Judge trait for remote batch classification.
//!
//! A judge receives one batch of sanitized blocks and a rubric and returns
//! the model's raw reply. Parsing and validation of that reply happen in
//! [`crate::judge::response`], so every transport gets the same strictness.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::JudgeResult;

/// One sanitized block inside a batch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeItem {
    pub id: String,
    pub sanitized_text: String,

    #[serde(default)]
    pub sanitized_heading: String,

    /// Short structural summary ("depth 4; 2 links; near team heading")
    #[serde(default)]
    pub hints: String,
}

/// One remote call worth of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub rubric: String,
    pub items: Vec<JudgeItem>,

    /// Strict structured-output format for transports that support it
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub response_format: serde_json::Value,
}

impl JudgeRequest {
    pub fn new(rubric: impl Into<String>, items: Vec<JudgeItem>) -> Self {
        Self {
            rubric: rubric.into(),
            items,
            response_format: serde_json::Value::Null,
        }
    }

    pub fn with_response_format(mut self, format: serde_json::Value) -> Self {
        self.response_format = format;
        self
    }

    /// Ids of the items in request order.
    pub fn ids(&self) -> Vec<&str> {
        self.items.iter().map(|i| i.id.as_str()).collect()
    }

    /// The items rendered as the JSON document sent as user content.
    pub fn items_json(&self) -> JudgeResult<String> {
        let payload = serde_json::json!({ "items": self.items });
        Ok(serde_json::to_string_pretty(&payload)?)
    }
}

/// Remote reasoning model that classifies batches of blocks.
///
/// Implementations must be deterministic at the transport level
/// (temperature 0, fixed schema) and return the reply body unparsed.
#[async_trait]
pub trait JudgeModel: Send + Sync {
    /// Classify one batch. Returns the raw JSON reply.
    async fn judge(&self, request: &JudgeRequest) -> JudgeResult<String>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "judge"
    }
}

#[async_trait]
impl<J: JudgeModel + ?Sized> JudgeModel for Arc<J> {
    async fn judge(&self, request: &JudgeRequest) -> JudgeResult<String> {
        (**self).judge(request).await
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
