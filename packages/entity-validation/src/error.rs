//! Typed errors for the validation library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) to provide
//! strongly-typed, composable error handling.
//!
//! Only invalid job input and cancellation ever surface as a failed job.
//! Remote-model failures are [`JudgeError`]s that the batch judge degrades
//! into UNKNOWN decisions instead of propagating.

use thiserror::Error;

/// Errors that fail a validation job outright.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The job carried no content blocks
    #[error("job has no content blocks")]
    EmptyJob,

    /// Extraction instructions were blank or unusable
    #[error("invalid extraction instructions: {reason}")]
    InvalidInstructions { reason: String },

    /// Two blocks share an id, so decisions could not be attributed
    #[error("duplicate block id: {id}")]
    DuplicateBlockId { id: String },

    /// A block failed basic shape checks
    #[error("invalid block {id}: {reason}")]
    InvalidBlock { id: String, reason: String },

    /// The initial schema contract is inconsistent
    #[error("invalid schema contract: {reason}")]
    InvalidSchema { reason: String },

    /// Operation was cancelled
    #[error("operation cancelled")]
    Cancelled,

    /// A triage worker panicked or was aborted
    #[error("triage worker failed: {0}")]
    Worker(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Errors from a single remote judging call.
#[derive(Debug, Error)]
pub enum JudgeError {
    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The call exceeded its time budget
    #[error("judge call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// Non-success HTTP status from the model provider
    #[error("judge returned status {status}: {body}")]
    Status { status: u16, body: String },

    /// The reply did not satisfy the response contract
    #[error("malformed judge response: {reason}")]
    Malformed { reason: String },

    /// Provider rejected the call for rate limiting
    #[error("rate limit exceeded")]
    RateLimited,
}

impl JudgeError {
    /// Wrap any transport-level error.
    pub fn transport(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Transport(err.into())
    }

    /// Create a malformed-response error.
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same batch could plausibly succeed.
    ///
    /// Malformed replies are not retried: decoding is deterministic, so the
    /// same prompt yields the same broken output.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } | Self::RateLimited => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Malformed { .. } => false,
        }
    }
}

impl From<serde_json::Error> for JudgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::malformed(err.to_string())
    }
}

/// Errors while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Config JSON could not be parsed
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A value is out of range or inconsistent
    #[error("invalid config: {reason}")]
    Invalid { reason: String },

    /// A required environment variable is missing
    #[error("missing environment variable: {0}")]
    MissingEnv(String),
}

impl ConfigError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::Invalid {
            reason: reason.into(),
        }
    }
}

/// Result type alias for validation jobs.
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Result type alias for remote judging calls.
pub type JudgeResult<T> = std::result::Result<T, JudgeError>;

/// Result type alias for configuration loading.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
