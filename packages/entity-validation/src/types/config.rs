//! Configuration types for the validation pipeline.
//!
//! Every threshold the pipeline applies lives here, so tuning is a data
//! change. Configs load from JSON and are validated on load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::classifier::WeightTable;
use crate::error::{ConfigError, ConfigResult};

/// Environment variable naming a JSON config file.
pub const CONFIG_PATH_ENV: &str = "ENTITY_VALIDATION_CONFIG";

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ValidationConfig {
    pub classifier: ClassifierConfig,
    pub cache: CacheConfig,
    pub judge: JudgeConfig,
    pub calibration: CalibrationConfig,
    pub dedup: DedupConfig,
    pub negotiation: NegotiationConfig,

    /// Worker threads used for feature extraction and triage.
    ///
    /// Default: 4.
    pub triage_workers: usize,

    /// Calibrated confidence below which entities are flagged low-confidence.
    ///
    /// Default: 0.5.
    pub low_confidence_threshold: f64,

    /// Keep UNKNOWN blocks in the output (flagged) rather than dropping them.
    ///
    /// Default: true.
    pub include_unknown: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            classifier: ClassifierConfig::default(),
            cache: CacheConfig::default(),
            judge: JudgeConfig::default(),
            calibration: CalibrationConfig::default(),
            dedup: DedupConfig::default(),
            negotiation: NegotiationConfig::default(),
            triage_workers: 4,
            low_confidence_threshold: 0.5,
            include_unknown: true,
        }
    }
}

impl ValidationConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON config. Missing keys take defaults.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Load from the file named by `ENTITY_VALIDATION_CONFIG`, or defaults.
    pub fn from_env() -> ConfigResult<Self> {
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => Ok(Self::new()),
        }
    }

    /// Check ranges and cross-field consistency.
    pub fn validate(&self) -> ConfigResult<()> {
        self.classifier.validate()?;
        self.judge.validate()?;
        self.calibration.validate()?;
        self.negotiation.validate()?;

        if self.cache.max_entries == 0 {
            return Err(ConfigError::invalid("cache.maxEntries must be > 0"));
        }
        if self.triage_workers == 0 {
            return Err(ConfigError::invalid("triageWorkers must be > 0"));
        }
        check_unit("lowConfidenceThreshold", self.low_confidence_threshold)?;
        check_unit("dedup.similarityThreshold", self.dedup.similarity_threshold)?;
        check_unit("dedup.nameWeight", self.dedup.name_weight)?;
        Ok(())
    }

    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_judge(mut self, judge: JudgeConfig) -> Self {
        self.judge = judge;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_calibration(mut self, calibration: CalibrationConfig) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupConfig) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_negotiation(mut self, negotiation: NegotiationConfig) -> Self {
        self.negotiation = negotiation;
        self
    }

    pub fn with_triage_workers(mut self, workers: usize) -> Self {
        self.triage_workers = workers;
        self
    }

    pub fn with_include_unknown(mut self, include: bool) -> Self {
        self.include_unknown = include;
        self
    }
}

fn check_unit(name: &str, value: f64) -> ConfigResult<()> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(ConfigError::invalid(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )));
    }
    Ok(())
}

/// Band edges and weights of the cheap classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub weights: WeightTable,

    /// Probability at or above which a block is certainly INDIVIDUAL.
    ///
    /// Default: 0.85.
    pub certain_individual: f64,

    /// Probability at or below which a block is certainly AGGREGATE.
    ///
    /// Default: 0.15.
    pub certain_aggregate: f64,

    /// Split between the two leaning bands.
    ///
    /// Default: 0.5.
    pub lean_split: f64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            weights: WeightTable::default(),
            certain_individual: crate::classifier::CERTAIN_INDIVIDUAL,
            certain_aggregate: crate::classifier::CERTAIN_AGGREGATE,
            lean_split: crate::classifier::LEAN_SPLIT,
        }
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_unit("classifier.certainIndividual", self.certain_individual)?;
        check_unit("classifier.certainAggregate", self.certain_aggregate)?;
        check_unit("classifier.leanSplit", self.lean_split)?;
        if !(self.certain_aggregate < self.lean_split && self.lean_split < self.certain_individual)
        {
            return Err(ConfigError::invalid(
                "classifier bands must satisfy certainAggregate < leanSplit < certainIndividual",
            ));
        }
        self.weights.validate()
    }

    pub fn with_weights(mut self, weights: WeightTable) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_bands(mut self, certain_aggregate: f64, certain_individual: f64) -> Self {
        self.certain_aggregate = certain_aggregate;
        self.certain_individual = certain_individual;
        self
    }
}

/// Decision cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheConfig {
    /// Entry cap before least-recently-used eviction.
    ///
    /// Default: 10_000.
    pub max_entries: usize,

    /// SimHash bits that must match for two blocks to share a cluster.
    ///
    /// Default: 16.
    pub cluster_prefix_bits: u32,

    /// Maximum Hamming distance between SimHashes within a cluster.
    ///
    /// Default: 3.
    pub cluster_max_distance: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            cluster_prefix_bits: 16,
            cluster_max_distance: 3,
        }
    }
}

/// Batch judge limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JudgeConfig {
    /// Blocks per remote call. Default: 12.
    pub max_batch_size: usize,

    /// Simultaneous in-flight remote calls per job. Default: 4.
    pub max_in_flight: usize,

    /// Character budget for sanitized body text. Default: 1500.
    pub max_text_chars: usize,

    /// Character budget for sanitized headings. Default: 200.
    pub max_heading_chars: usize,

    /// Longest reasoning string kept from a reply. Default: 400.
    pub max_reasoning_chars: usize,

    /// Timeout for one remote call. Default: 30s.
    pub call_timeout_ms: u64,

    /// Budget for the whole judge phase of a job. Default: 90s.
    pub job_timeout_ms: u64,

    /// Retries after a transient failure. Default: 1.
    pub max_retries: usize,

    /// Confidence given to UNKNOWN fallbacks. Default: 0.1.
    pub fallback_confidence: f64,

    /// Drop extracted values whose text does not occur in the block.
    ///
    /// Default: true.
    pub require_field_evidence: bool,

    /// Model identifier passed to the transport, if it needs one.
    pub model: Option<String>,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 12,
            max_in_flight: 4,
            max_text_chars: 1500,
            max_heading_chars: 200,
            max_reasoning_chars: 400,
            call_timeout_ms: 30_000,
            job_timeout_ms: 90_000,
            max_retries: 1,
            fallback_confidence: 0.1,
            require_field_evidence: true,
            model: None,
        }
    }
}

impl JudgeConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid("judge.maxBatchSize must be > 0"));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::invalid("judge.maxInFlight must be > 0"));
        }
        if self.max_text_chars == 0 {
            return Err(ConfigError::invalid("judge.maxTextChars must be > 0"));
        }
        check_unit("judge.fallbackConfidence", self.fallback_confidence)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_max_in_flight(mut self, n: usize) -> Self {
        self.max_in_flight = n;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_field_evidence(mut self, required: bool) -> Self {
        self.require_field_evidence = required;
        self
    }
}

/// Calibration history limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CalibrationConfig {
    /// Outcomes needed in a bin before calibration replaces the raw value.
    ///
    /// Default: 5.
    pub min_samples: usize,

    /// Outcomes kept per bin; older ones are dropped. Default: 200.
    pub max_history_per_bin: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            max_history_per_bin: 200,
        }
    }
}

impl CalibrationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_history_per_bin == 0 {
            return Err(ConfigError::invalid("calibration.maxHistoryPerBin must be > 0"));
        }
        if self.min_samples > self.max_history_per_bin {
            return Err(ConfigError::invalid(
                "calibration.minSamples cannot exceed maxHistoryPerBin",
            ));
        }
        Ok(())
    }
}

/// Deduplication and aggregate filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DedupConfig {
    /// Pair score at or above which two entities merge. Default: 0.85.
    pub similarity_threshold: f64,

    /// Share of the pair score given to name similarity. Default: 0.6.
    pub name_weight: f64,

    /// Distinct person/role indicators a collective block may contain
    /// before the aggregate override drops it. Default: 3.
    pub max_person_indicators: usize,

    /// Weights of the representative quality score.
    pub quality_confidence_weight: f64,
    pub quality_completeness_weight: f64,
    pub quality_fields_weight: f64,

    /// Body length counted as fully complete. Default: 400 chars.
    pub complete_text_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            name_weight: 0.6,
            max_person_indicators: 3,
            quality_confidence_weight: 0.5,
            quality_completeness_weight: 0.2,
            quality_fields_weight: 0.3,
            complete_text_chars: 400,
        }
    }
}

/// What happens to a row missing a still-required field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncompleteRowPolicy {
    /// Remove the row from the output
    Drop,

    /// Keep the row, marked incomplete
    #[default]
    Flag,
}

/// Schema negotiation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NegotiationConfig {
    /// Support rate at which a discoverable field becomes expected.
    ///
    /// Default: 0.8.
    pub promotion_threshold: f64,

    /// Support rate below which an expected field becomes discoverable.
    ///
    /// Default: 0.3.
    pub demotion_threshold: f64,

    pub incomplete_row_policy: IncompleteRowPolicy,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 0.8,
            demotion_threshold: 0.3,
            incomplete_row_policy: IncompleteRowPolicy::Flag,
        }
    }
}

impl NegotiationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_unit("negotiation.promotionThreshold", self.promotion_threshold)?;
        check_unit("negotiation.demotionThreshold", self.demotion_threshold)?;
        if self.demotion_threshold > self.promotion_threshold {
            return Err(ConfigError::invalid(
                "negotiation.demotionThreshold cannot exceed promotionThreshold",
            ));
        }
        Ok(())
    }

    pub fn with_policy(mut self, policy: IncompleteRowPolicy) -> Self {
        self.incomplete_row_policy = policy;
        self
    }

    pub fn with_promotion_threshold(mut self, threshold: f64) -> Self {
        self.promotion_threshold = threshold;
        self
    }
}
